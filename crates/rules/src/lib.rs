//! Record processing rule engine.
//!
//! This crate provides:
//! - The [`Rule`] trait and the ordered [`RuleEngine`] that runs a record's rules
//! - Standard rules (read-only, alarm, control, value alarm, calc, forward link, timestamp)
//! - An in-memory record registry with cross-record reads, writes and forward links
//! - YAML recipe loading with hot-reload via `notify` watcher
//! - A per-record audit log of commits, aborts and forward-link activity

pub mod access;
pub mod array;
pub mod audit_log;
pub mod context;
pub mod engine;
pub mod error;
pub mod merge;
pub mod outcome;
pub mod recipe;
pub mod registry;
pub mod rule;
pub mod rules;

pub use access::{AccessError, FieldUpdates, RecordAccess};
pub use array::ScalarToArrayWrapper;
pub use audit_log::AuditLog;
pub use context::{CallerContext, Trigger};
pub use engine::RuleEngine;
pub use error::RuleError;
pub use merge::MergedView;
pub use outcome::{AbortReason, RuleOutcome};
pub use recipe::RecipeLoader;
pub use registry::{MemoryRegistry, RegistryError};
pub use rule::{GatherableRule, Rule};
