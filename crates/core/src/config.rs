use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub engine: EngineConfig,
    pub registry: RegistryConfig,
    pub recipes: RecipeConfig,
    pub log: LogConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `PVFLOW_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("PVFLOW_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            engine: EngineConfig::from_env_profiled(p),
            registry: RegistryConfig::from_env_profiled(p),
            recipes: RecipeConfig::from_env_profiled(p),
            log: LogConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  engine:    io_timeout={}ms, clear_alarm_on_deactivate={}",
            self.engine.io_timeout_ms,
            self.engine.clear_alarm_on_deactivate
        );
        tracing::info!(
            "  registry:  lock_timeout={}ms, max_forward_depth={}, audit_max_entries={}",
            self.registry.lock_timeout_ms,
            self.registry.max_forward_depth,
            self.registry.audit_max_entries
        );
        tracing::info!(
            "  recipes:   dir={}, watch={}",
            self.recipes.recipes_dir.display(),
            self.recipes.watch
        );
        tracing::info!("  log:       filter={}", self.log.filter);
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: String::new(),
            engine: EngineConfig::default(),
            registry: RegistryConfig::default(),
            recipes: RecipeConfig::default(),
            log: LogConfig::default(),
        }
    }
}

// ── Engine ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Deadline for every external record read/write issued by a rule.
    pub io_timeout_ms: u64,
    /// Clear an active alarm when `valueAlarm.active` is switched off.
    pub clear_alarm_on_deactivate: bool,
}

impl EngineConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            io_timeout_ms: profiled_env_u64(p, "PVFLOW_IO_TIMEOUT_MS", 2000),
            clear_alarm_on_deactivate: profiled_env_bool(p, "PVFLOW_CLEAR_ALARM_ON_DEACTIVATE", false),
        }
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            io_timeout_ms: 2000,
            clear_alarm_on_deactivate: false,
        }
    }
}

// ── Registry ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub lock_timeout_ms: u64,
    /// Longest chain of forward-link / monitor writes followed from one commit.
    pub max_forward_depth: usize,
    /// Per-record cap on retained audit entries.
    pub audit_max_entries: usize,
}

impl RegistryConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            lock_timeout_ms: profiled_env_u64(p, "PVFLOW_LOCK_TIMEOUT_MS", 5000),
            max_forward_depth: profiled_env_usize(p, "PVFLOW_MAX_FORWARD_DEPTH", 16),
            audit_max_entries: profiled_env_usize(p, "PVFLOW_AUDIT_MAX_ENTRIES", 500),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5000,
            max_forward_depth: 16,
            audit_max_entries: 500,
        }
    }
}

// ── Recipes ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeConfig {
    pub recipes_dir: PathBuf,
    /// Hot-reload recipe files on change.
    pub watch: bool,
}

impl RecipeConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            recipes_dir: PathBuf::from(profiled_env_or(p, "PVFLOW_RECIPES_DIR", "data/recipes")),
            watch: profiled_env_bool(p, "PVFLOW_WATCH", false),
        }
    }
}

impl Default for RecipeConfig {
    fn default() -> Self {
        Self {
            recipes_dir: PathBuf::from("data/recipes"),
            watch: false,
        }
    }
}

// ── Logging ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl LogConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            filter: profiled_env_or(p, "PVFLOW_LOG", "info"),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}
