//! Core [`RuleEngine`]: ordered rule set and the apply loop.

use std::collections::HashMap;

use pvflow_core::Record;
use tracing::{debug, warn};

use crate::context::{CallerContext, Trigger};
use crate::error::{Result, RuleError};
use crate::outcome::{AbortReason, RuleOutcome};
use crate::rule::Rule;
use crate::rules::{ReadOnlyRule, TimestampRule};

/// Ordered set of rules for one kind of record.
///
/// Placement is decided at registration time: `read_only` always sits at the
/// head, `timestamp` always at the tail, everything else in insertion order
/// between them. An engine is never mutated while an `apply` is in flight;
/// the caller serializes access per record.
#[derive(Default)]
pub struct RuleEngine {
    rules: Vec<(String, Box<dyn Rule>)>,
    /// Name → position in `rules`.
    index: HashMap<String, usize>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule, applying head/tail placement for `read_only`/`timestamp`.
    pub fn register(&mut self, rule: impl Rule + 'static) -> Result<()> {
        self.register_boxed(Box::new(rule))
    }

    pub fn register_boxed(&mut self, rule: Box<dyn Rule>) -> Result<()> {
        let name = rule.name().to_string();
        if self.index.contains_key(&name) {
            return Err(RuleError::DuplicateRule(name));
        }

        let position = if name == ReadOnlyRule::NAME {
            0
        } else if name == TimestampRule::NAME {
            self.rules.len()
        } else {
            match self.index.get(TimestampRule::NAME) {
                Some(&ts) => ts,
                None => self.rules.len(),
            }
        };
        debug!(rule = %name, position, "registered rule");
        self.rules.insert(position, (name, rule));
        self.reindex();
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_rule(mut self, rule: impl Rule + 'static) -> Result<Self> {
        self.register(rule)?;
        Ok(self)
    }

    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Rule>> {
        let position = self.index.get(name).copied()?;
        let (_, rule) = self.rules.remove(position);
        self.reindex();
        Some(rule)
    }

    pub fn get(&self, name: &str) -> Option<&dyn Rule> {
        self.index.get(name).map(|&i| self.rules[i].1.as_ref())
    }

    /// Rule names in evaluation order.
    pub fn names(&self) -> Vec<&str> {
        self.rules.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn reindex(&mut self) {
        self.index = self
            .rules
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.clone(), i))
            .collect();
    }

    /// External records whose commits should re-trigger records using this engine.
    pub fn inputs(&self) -> Vec<String> {
        let mut inputs: Vec<String> = Vec::new();
        for (_, rule) in &self.rules {
            for input in rule.inputs() {
                if !inputs.contains(&input) {
                    inputs.push(input);
                }
            }
        }
        inputs
    }

    /// Evaluate `candidate` through every rule in order.
    ///
    /// Returns the candidate as modified by the rules, with its change marks
    /// describing what the write touches. The caller commits it (for `Merge`
    /// and `Request`, by overlaying it on `old`). An abort drops the candidate
    /// and surfaces the rule's reason; nothing is left half-applied.
    pub fn apply(
        &self,
        trigger: Trigger,
        old: Option<&Record>,
        candidate: Record,
        ctx: Option<&CallerContext>,
    ) -> Result<Record> {
        if trigger != Trigger::Init && old.is_none() {
            return Err(RuleError::MissingCommittedState(trigger));
        }
        let default_ctx = CallerContext::default();
        let ctx = ctx.unwrap_or(&default_ctx);
        let mut candidate = candidate;

        for (name, rule) in &self.rules {
            match self.run_rule(name, rule.as_ref(), trigger, old, &mut candidate, ctx)? {
                RuleOutcome::Continue => {}
                RuleOutcome::Terminate => {
                    if name != TimestampRule::NAME {
                        self.run_timestamp(trigger, old, &mut candidate, ctx)?;
                    }
                    break;
                }
                RuleOutcome::TerminateWithoutTimestamp => break,
                RuleOutcome::Abort(reason) => return Err(Self::aborted(name, trigger, reason)),
            }
        }
        Ok(candidate)
    }

    /// Invoke `after_commit` on every rule in order.
    pub fn after_commit(&self, committed: &Record) {
        for (_, rule) in &self.rules {
            rule.after_commit(committed);
        }
    }

    fn run_timestamp(
        &self,
        trigger: Trigger,
        old: Option<&Record>,
        candidate: &mut Record,
        ctx: &CallerContext,
    ) -> Result<()> {
        if let Some(&i) = self.index.get(TimestampRule::NAME) {
            let (name, rule) = &self.rules[i];
            if let RuleOutcome::Abort(reason) =
                self.run_rule(name, rule.as_ref(), trigger, old, candidate, ctx)?
            {
                return Err(Self::aborted(name, trigger, reason));
            }
        }
        Ok(())
    }

    fn aborted(name: &str, trigger: Trigger, reason: AbortReason) -> RuleError {
        warn!(rule = %name, %trigger, reason = %reason, "rule aborted write");
        RuleError::from_abort(name, reason)
    }

    /// Applicability check plus dispatch to the trigger's entry point.
    fn run_rule(
        &self,
        name: &str,
        rule: &dyn Rule,
        trigger: Trigger,
        old: Option<&Record>,
        candidate: &mut Record,
        ctx: &CallerContext,
    ) -> Result<RuleOutcome> {
        if !rule.is_applicable(candidate) {
            debug!(rule = %name, %trigger, "not applicable");
            return Ok(RuleOutcome::Continue);
        }
        let outcome = match (trigger, old) {
            (Trigger::Init, _) => rule.evaluate_for_init(candidate)?,
            (Trigger::Merge, Some(old)) => rule.evaluate_for_merge(old, candidate)?,
            (Trigger::Request, Some(old)) => rule.evaluate_for_request(old, candidate, ctx)?,
            (_, None) => return Err(RuleError::MissingCommittedState(trigger)),
        };
        debug!(rule = %name, %trigger, outcome = outcome.label(), "rule evaluated");
        Ok(outcome)
    }
}
