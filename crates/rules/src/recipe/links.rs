//! Cycle detection over the trigger graph of a recipe set.
//!
//! An edge `a → b` means a commit of `a` causes a write to `b`: either `a`
//! forward-links to `b`, or `b` computes from `a` through `calc`. Any cycle
//! would re-trigger itself until the registry's forward depth bound cuts it.

use std::collections::{BTreeMap, HashSet};

use super::schema::Recipe;

/// Maximum trigger chain length followed before giving up.
const MAX_LINK_DEPTH: usize = 64;

/// Downstream records of each record, restricted to names in the set.
pub fn trigger_graph<'a, I>(recipes: I) -> BTreeMap<String, Vec<String>>
where
    I: IntoIterator<Item = (&'a String, &'a Recipe)>,
{
    let recipes: Vec<(&String, &Recipe)> = recipes.into_iter().collect();
    let known: HashSet<&str> = recipes.iter().map(|(name, _)| name.as_str()).collect();
    let mut graph: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (name, recipe) in &recipes {
        for target in &recipe.forward_links {
            if known.contains(target.as_str()) {
                push_edge(&mut graph, name, target);
            }
        }
        for input in recipe.inputs() {
            if known.contains(input.as_str()) {
                push_edge(&mut graph, input, name);
            }
        }
    }
    graph
}

fn push_edge(graph: &mut BTreeMap<String, Vec<String>>, from: &str, to: &str) {
    let targets = graph.entry(from.to_string()).or_default();
    if !targets.iter().any(|t| t == to) {
        targets.push(to.to_string());
    }
}

/// Reject trigger cycles and chains longer than [`MAX_LINK_DEPTH`].
pub fn check_links<'a, I>(recipes: I) -> std::result::Result<(), String>
where
    I: IntoIterator<Item = (&'a String, &'a Recipe)>,
{
    let graph = trigger_graph(recipes);
    let mut done: HashSet<&str> = HashSet::new();
    let mut path: Vec<&str> = Vec::new();

    for start in graph.keys() {
        visit(start, &graph, &mut done, &mut path)?;
    }
    Ok(())
}

fn visit<'g>(
    node: &'g str,
    graph: &'g BTreeMap<String, Vec<String>>,
    done: &mut HashSet<&'g str>,
    path: &mut Vec<&'g str>,
) -> std::result::Result<(), String> {
    if done.contains(node) {
        return Ok(());
    }
    if let Some(pos) = path.iter().position(|n| *n == node) {
        let mut cycle: Vec<&str> = path[pos..].to_vec();
        cycle.push(node);
        return Err(format!("trigger cycle detected: {}", cycle.join(" -> ")));
    }
    if path.len() >= MAX_LINK_DEPTH {
        return Err(format!(
            "trigger chain from '{}' exceeds maximum depth ({})",
            path[0], MAX_LINK_DEPTH
        ));
    }

    path.push(node);
    for next in graph.get(node).into_iter().flatten() {
        visit(next, graph, done, path)?;
    }
    path.pop();
    done.insert(node);
    Ok(())
}
