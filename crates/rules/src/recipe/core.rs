//! Core [`RecipeLoader`]: filesystem-backed recipe catalog with optional hot-reload.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use pvflow_core::config::EngineConfig;
use tracing::{info, warn};

use crate::registry::MemoryRegistry;

use super::error::{LoadResult, LoadStatus, RecipeError, Result};
use super::links::check_links;
use super::schema::{Recipe, RecipeFile};
use super::watcher::handle_fs_event;

/// Loaded recipes plus the file each one came from.
#[derive(Debug, Default)]
pub(super) struct Catalog {
    pub(super) recipes: BTreeMap<String, Recipe>,
    pub(super) sources: BTreeMap<String, PathBuf>,
}

impl Catalog {
    /// Replace everything previously loaded from `path` with `file`.
    ///
    /// Fails without modifying the catalog if a name is already owned by
    /// another file.
    pub(super) fn replace_file(&mut self, path: &Path, file: RecipeFile) -> std::result::Result<Vec<String>, String> {
        for name in file.keys() {
            if let Some(owner) = self.sources.get(name) {
                if owner != path {
                    return Err(format!(
                        "record '{}' is already defined in {}",
                        name,
                        owner.display()
                    ));
                }
            }
        }
        self.remove_file(path);
        let mut names = Vec::with_capacity(file.len());
        for (name, recipe) in file {
            self.sources.insert(name.clone(), path.to_path_buf());
            self.recipes.insert(name.clone(), recipe);
            names.push(name);
        }
        Ok(names)
    }

    pub(super) fn remove_file(&mut self, path: &Path) -> Vec<String> {
        let names: Vec<String> = self
            .sources
            .iter()
            .filter(|(_, source)| source.as_path() == path)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &names {
            self.sources.remove(name);
            self.recipes.remove(name);
        }
        names
    }
}

/// Parse and validate a recipe document.
pub fn parse_recipes(contents: &str) -> Result<RecipeFile> {
    let file: RecipeFile = serde_yaml::from_str(contents)?;
    for (name, recipe) in &file {
        if name.is_empty() {
            return Err(RecipeError::Validation("record names must not be empty".to_string()));
        }
        recipe.validate(name)?;
    }
    Ok(file)
}

pub(super) fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e == "yml" || e == "yaml")
        .unwrap_or(false)
}

/// Filesystem-backed recipe loader with optional hot-reload.
///
/// Scans a directory (recursively) for `*.yml` / `*.yaml` files, each a
/// mapping of record name → recipe, and keeps an in-memory catalog keyed by
/// record name. Hot-reloaded recipes take effect on the next
/// [`install`](Self::install).
pub struct RecipeLoader {
    recipes_dir: PathBuf,
    catalog: Arc<RwLock<Catalog>>,
    /// Held to keep the watcher alive.
    _watcher: Option<RecommendedWatcher>,
}

impl RecipeLoader {
    pub fn new(recipes_dir: PathBuf) -> Self {
        Self {
            recipes_dir,
            catalog: Arc::new(RwLock::new(Catalog::default())),
            _watcher: None,
        }
    }

    /// Recursively scan the recipes directory and load all YAML files.
    ///
    /// Dotfiles and non-YAML files are skipped. Parse and validation errors
    /// are reported per file and do not abort the scan.
    pub fn load_all(&self) -> Result<Vec<LoadResult>> {
        let mut results = Vec::new();
        self.scan_dir_recursive(&self.recipes_dir, &mut results)?;
        Ok(results)
    }

    fn scan_dir_recursive(&self, dir: &Path, results: &mut Vec<LoadResult>) -> Result<()> {
        let mut entries: Vec<PathBuf> = match fs::read_dir(dir) {
            Ok(entries) => entries.map(|e| e.map(|e| e.path())).collect::<std::io::Result<_>>()?,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "failed to read directory");
                return Ok(());
            }
        };
        // Deterministic order so duplicate-name conflicts resolve the same way every run.
        entries.sort();

        for path in entries {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with('.') {
                    if path.is_file() {
                        results.push(LoadResult {
                            path,
                            status: LoadStatus::Skipped {
                                reason: "dotfile".to_string(),
                            },
                        });
                    }
                    continue;
                }
            }

            if path.is_dir() {
                self.scan_dir_recursive(&path, results)?;
                continue;
            }

            if !is_yaml(&path) {
                results.push(LoadResult {
                    path,
                    status: LoadStatus::Skipped {
                        reason: "not a YAML file".to_string(),
                    },
                });
                continue;
            }

            let loaded = self.load_file(&path).and_then(|file| {
                self.catalog
                    .write()
                    .expect("catalog lock poisoned")
                    .replace_file(&path, file)
                    .map_err(RecipeError::Validation)
            });
            match loaded {
                Ok(records) => {
                    info!(path = %path.display(), records = records.len(), "loaded recipes");
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Loaded { records },
                    });
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load recipe file");
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Failed {
                            error: e.to_string(),
                        },
                    });
                }
            }
        }
        Ok(())
    }

    /// Parse and validate a single recipe file without touching the catalog.
    pub fn load_file(&self, path: &Path) -> Result<RecipeFile> {
        let contents = fs::read_to_string(path)?;
        parse_recipes(&contents)
    }

    /// Start a filesystem watcher.
    ///
    /// On create/modify the file is re-parsed and its recipes replaced; on
    /// delete its recipes are dropped. Parse errors keep the previous version.
    pub fn watch(&mut self) -> Result<()> {
        let catalog = Arc::clone(&self.catalog);

        let mut watcher = notify::recommended_watcher(move |res: std::result::Result<notify::Event, notify::Error>| {
            match res {
                Ok(event) => handle_fs_event(&event, &catalog),
                Err(e) => warn!(error = %e, "filesystem watcher error"),
            }
        })?;
        watcher.watch(&self.recipes_dir, RecursiveMode::Recursive)?;
        let _ = watcher.configure(notify::Config::default().with_poll_interval(Duration::from_millis(500)));

        info!(path = %self.recipes_dir.display(), "watching recipes directory for changes");
        self._watcher = Some(watcher);
        Ok(())
    }

    pub fn recipes_dir(&self) -> &Path {
        &self.recipes_dir
    }

    pub fn get(&self, name: &str) -> Option<Recipe> {
        self.catalog.read().expect("catalog lock poisoned").recipes.get(name).cloned()
    }

    /// Snapshot of every loaded recipe, sorted by record name.
    pub fn recipes(&self) -> BTreeMap<String, Recipe> {
        self.catalog.read().expect("catalog lock poisoned").recipes.clone()
    }

    pub fn len(&self) -> usize {
        self.catalog.read().expect("catalog lock poisoned").recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check the trigger graph of the whole catalog.
    pub fn check_links(&self) -> Result<()> {
        let recipes = self.recipes();
        check_links(&recipes).map_err(RecipeError::Validation)
    }

    /// Build every record and insert it into `registry`. Returns the names installed.
    ///
    /// The trigger graph is checked first; nothing is installed if it has a cycle.
    pub fn install(&self, registry: &MemoryRegistry, config: &EngineConfig) -> Result<Vec<String>> {
        let recipes = self.recipes();
        check_links(&recipes).map_err(RecipeError::Validation)?;
        install_recipes(&recipes, registry, config)
    }
}

/// Build and insert each recipe in iteration order.
pub fn install_recipes<'a, I>(recipes: I, registry: &MemoryRegistry, config: &EngineConfig) -> Result<Vec<String>>
where
    I: IntoIterator<Item = (&'a String, &'a Recipe)>,
{
    let access = registry.handle();
    let mut installed = Vec::new();
    for (name, recipe) in recipes {
        let record = recipe.build_record(name)?;
        let engine = recipe.build_engine(name, Arc::clone(&access), config)?;
        registry
            .insert(name, record, engine)
            .map_err(|e| RecipeError::Install {
                record: name.clone(),
                message: e.to_string(),
            })?;
        installed.push(name.clone());
    }
    info!(records = installed.len(), "installed recipes");
    Ok(installed)
}
