//! Port through which rules reach other records.
//!
//! Calc and ForwardLink rules never talk to a registry or transport directly;
//! they receive an `Arc<dyn RecordAccess>` and every call carries a deadline.

use std::time::Duration;

use indexmap::IndexMap;
use pvflow_core::Value;
use thiserror::Error;

/// Ordered partial update: field path → new value.
/// An empty update is a "no-value write" that only re-triggers the target's rules.
pub type FieldUpdates = IndexMap<String, Value>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccessError {
    #[error("record '{0}' not found")]
    NotFound(String),

    #[error("timed out after {timeout_ms}ms waiting for '{record}'")]
    Timeout { record: String, timeout_ms: u64 },

    #[error("write to '{record}' rejected: {message}")]
    Rejected { record: String, message: String },

    #[error("record '{0}' has no readable value")]
    NoValue(String),

    #[error("record access is closed")]
    Closed,
}

/// Blocking read/write access to named records, each call bounded by `timeout`.
pub trait RecordAccess: Send + Sync {
    /// Current committed `value` of a record.
    fn read(&self, record: &str, timeout: Duration) -> Result<Value, AccessError>;

    /// Apply a partial update to a record, running its rules.
    fn write(&self, record: &str, updates: FieldUpdates, timeout: Duration)
        -> Result<(), AccessError>;
}

pub(crate) fn timeout_ms(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}
