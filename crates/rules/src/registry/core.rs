//! Core [`MemoryRegistry`]: committed state, serialized writes, fan-out.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use pvflow_core::config::RegistryConfig;
use pvflow_core::{Record, Value};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::access::{timeout_ms, FieldUpdates, RecordAccess};
use crate::audit_log::{AuditLog, ExecutionPhase, LogLevel};
use crate::context::{CallerContext, Trigger};
use crate::engine::RuleEngine;
use crate::error::RuleError;
use crate::rules::TimestampRule;

use super::error::{RegistryError, Result};
use super::handle::RegistryHandle;

/// Capacity of the update broadcast channel. Slow subscribers lag, writers never block.
const UPDATE_CHANNEL_CAPACITY: usize = 256;

thread_local! {
    /// Nesting depth of writes issued from post-commit fan-out on this thread.
    static FORWARD_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Holds one level of [`FORWARD_DEPTH`] for the duration of a write.
struct DepthGuard;

impl DepthGuard {
    fn enter(max_depth: usize) -> Option<Self> {
        FORWARD_DEPTH.with(|depth| {
            if depth.get() >= max_depth {
                None
            } else {
                depth.set(depth.get() + 1);
                Some(DepthGuard)
            }
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        FORWARD_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Published after every commit.
#[derive(Debug, Clone, Serialize)]
pub struct RecordUpdate {
    pub name: String,
    pub record: Record,
    /// Leaf paths the commit changed.
    pub changed: Vec<String>,
}

struct Entry {
    state: Mutex<Record>,
    engine: RuleEngine,
}

pub(super) struct Inner {
    records: RwLock<HashMap<String, Arc<Entry>>>,
    /// Input record → records whose rules read it.
    dependents: RwLock<HashMap<String, Vec<String>>>,
    config: RegistryConfig,
    audit: AuditLog,
    updates: broadcast::Sender<RecordUpdate>,
}

/// Named records with their rule engines.
///
/// Cheap to clone; clones share state. A write holds the target record's
/// lock for exactly one `RuleEngine::apply` plus the commit, never while
/// notifying subscribers or running post-commit hooks.
#[derive(Clone)]
pub struct MemoryRegistry {
    pub(super) inner: Arc<Inner>,
}

impl MemoryRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let audit = AuditLog::with_max_entries(config.audit_max_entries);
        Self {
            inner: Arc::new(Inner {
                records: RwLock::new(HashMap::new()),
                dependents: RwLock::new(HashMap::new()),
                config,
                audit,
                updates,
            }),
        }
    }

    /// Access port for rules that read or write other records in this registry.
    pub fn handle(&self) -> Arc<dyn RecordAccess> {
        Arc::new(RegistryHandle::new(Arc::downgrade(&self.inner)))
    }

    pub fn audit(&self) -> &AuditLog {
        &self.inner.audit
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordUpdate> {
        self.inner.updates.subscribe()
    }

    /// Sorted record names.
    pub fn names(&self) -> Vec<String> {
        let guard = self.inner.records.read().expect("registry lock poisoned");
        let mut names: Vec<String> = guard.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        let guard = self.inner.records.read().expect("registry lock poisoned");
        guard.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.records.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records whose rules are re-triggered by commits of `name`.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        let guard = self.inner.dependents.read().expect("registry dependents lock poisoned");
        guard.get(name).cloned().unwrap_or_default()
    }

    // ── Writes ──────────────────────────────────────────────────

    /// Materialize a new record by running its engine's init path.
    pub fn insert(&self, name: &str, record: Record, engine: RuleEngine) -> Result<Record> {
        if self.contains(name) {
            return Err(RegistryError::AlreadyExists(name.to_string()));
        }
        let started = Instant::now();
        let committed = engine
            .apply(Trigger::Init, None, record, None)
            .map_err(|source| self.rejected(name, Trigger::Init, source))?;

        let inputs = engine.inputs();
        let entry = Arc::new(Entry {
            state: Mutex::new(committed.clone()),
            engine,
        });
        {
            let mut guard = self.inner.records.write().expect("registry lock poisoned");
            if guard.contains_key(name) {
                return Err(RegistryError::AlreadyExists(name.to_string()));
            }
            guard.insert(name.to_string(), Arc::clone(&entry));
        }
        if !inputs.is_empty() {
            let mut deps = self.inner.dependents.write().expect("registry dependents lock poisoned");
            for input in &inputs {
                deps.entry(input.clone()).or_default().push(name.to_string());
            }
            debug!(record = %name, ?inputs, "monitoring inputs");
        }

        info!(record = %name, rules = ?entry.engine.names(), "record created");
        self.after_commit(name, &entry, &committed, Trigger::Init, started);
        Ok(committed)
    }

    /// Externally requested write.
    pub fn put(&self, name: &str, updates: FieldUpdates, ctx: &CallerContext) -> Result<Record> {
        self.write(name, Trigger::Request, updates, Some(ctx), self.inner.config.lock_timeout())
    }

    /// Internally originated write (monitor and forward-link triggers).
    pub fn post(&self, name: &str, updates: FieldUpdates) -> Result<Record> {
        self.write(name, Trigger::Merge, updates, None, self.inner.config.lock_timeout())
    }

    pub fn remove(&self, name: &str) -> bool {
        let removed = self
            .inner
            .records
            .write()
            .expect("registry lock poisoned")
            .remove(name)
            .is_some();
        if removed {
            // Keep `name` as a key: records monitoring it resume if it is re-inserted.
            let mut deps = self.inner.dependents.write().expect("registry dependents lock poisoned");
            for dependents in deps.values_mut() {
                dependents.retain(|d| d != name);
            }
            info!(record = %name, "record removed");
        }
        removed
    }

    // ── Reads ───────────────────────────────────────────────────

    /// Snapshot of a record's committed state.
    pub fn current_committed_state(&self, name: &str) -> Result<Record> {
        let entry = self.entry(name)?;
        let guard = self.lock(name, &entry, self.inner.config.lock_timeout())?;
        Ok(guard.clone())
    }

    pub(super) fn read_value(&self, name: &str, timeout: Duration) -> Result<Option<Value>> {
        let entry = self.entry(name)?;
        let guard = self.lock(name, &entry, timeout)?;
        Ok(guard.get("value").cloned())
    }

    // ── Internals ───────────────────────────────────────────────

    fn entry(&self, name: &str) -> Result<Arc<Entry>> {
        let guard = self.inner.records.read().expect("registry lock poisoned");
        guard
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    fn lock<'a>(&self, name: &str, entry: &'a Entry, timeout: Duration) -> Result<MutexGuard<'a, Record>> {
        entry.state.try_lock_for(timeout).ok_or_else(|| {
            warn!(record = %name, timeout_ms = timeout_ms(timeout), "record lock timeout");
            RegistryError::LockTimeout {
                record: name.to_string(),
                timeout_ms: timeout_ms(timeout),
            }
        })
    }

    pub(super) fn write(
        &self,
        name: &str,
        trigger: Trigger,
        updates: FieldUpdates,
        ctx: Option<&CallerContext>,
        timeout: Duration,
    ) -> Result<Record> {
        let max_depth = self.inner.config.max_forward_depth;
        let Some(_depth) = DepthGuard::enter(max_depth) else {
            warn!(record = %name, max_depth, "forward chain too deep; dropping write");
            self.inner.audit.log(
                name,
                LogLevel::Warning,
                ExecutionPhase::ForwardLink,
                format!("dropped: forward chain deeper than {}", max_depth),
            );
            return Err(RegistryError::ForwardDepthExceeded {
                record: name.to_string(),
                max_depth,
            });
        };

        let entry = self.entry(name)?;
        let started = Instant::now();
        let committed = {
            let mut state = self.lock(name, &entry, timeout)?;
            let mut candidate = state.blank_candidate();
            let process_only = trigger == Trigger::Merge && updates.is_empty();
            for (path, value) in updates {
                candidate.set(&path, value)?;
            }
            // A no-value post asks the record to process: refresh its timestamp.
            if process_only
                && candidate.has_field("timeStamp")
                && entry.engine.get(TimestampRule::NAME).is_some()
            {
                candidate.mark_changed("timeStamp", true)?;
            }

            let evaluated = entry
                .engine
                .apply(trigger, Some(&*state), candidate, ctx)
                .map_err(|source| self.rejected(name, trigger, source))?;

            if !evaluated.any_changed() {
                debug!(record = %name, %trigger, "nothing changed; no commit");
                self.inner.audit.log(
                    name,
                    LogLevel::Debug,
                    trigger.into(),
                    "nothing changed; no commit",
                );
                return Ok(state.clone());
            }
            let committed = state.overlay_changed(&evaluated)?;
            *state = committed.clone();
            committed
        };

        self.after_commit(name, &entry, &committed, trigger, started);
        Ok(committed)
    }

    fn rejected(&self, name: &str, trigger: Trigger, source: RuleError) -> RegistryError {
        warn!(record = %name, %trigger, error = %source, "write rejected");
        self.inner.audit.log_with_details(
            name,
            LogLevel::Warning,
            ExecutionPhase::Abort,
            source.to_string(),
            Some(serde_json::json!({ "trigger": trigger, "retryable": source.is_retryable() })),
            None,
        );
        RegistryError::Rule {
            record: name.to_string(),
            source,
        }
    }

    /// Runs with the record lock released.
    fn after_commit(&self, name: &str, entry: &Entry, committed: &Record, trigger: Trigger, started: Instant) {
        let changed: Vec<String> = committed.changed_paths().into_iter().map(str::to_string).collect();
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(record = %name, %trigger, changed = changed.len(), duration_ms, "committed");
        self.inner.audit.log_with_details(
            name,
            LogLevel::Info,
            ExecutionPhase::Commit,
            format!("{} committed {} field(s)", trigger, changed.len()),
            Some(serde_json::json!({ "trigger": trigger, "changed": changed })),
            Some(duration_ms),
        );

        // No receivers is not an error.
        let _ = self.inner.updates.send(RecordUpdate {
            name: name.to_string(),
            record: committed.clone(),
            changed,
        });

        entry.engine.after_commit(committed);

        for dependent in self.dependents_of(name) {
            match self.post(&dependent, FieldUpdates::new()) {
                Ok(_) => {
                    debug!(record = %name, dependent = %dependent, "monitor triggered");
                    self.inner.audit.log(
                        &dependent,
                        LogLevel::Debug,
                        ExecutionPhase::ForwardLink,
                        format!("triggered by '{}'", name),
                    );
                }
                Err(e) => warn!(record = %name, dependent = %dependent, error = %e, "monitor trigger failed"),
            }
        }
    }
}
