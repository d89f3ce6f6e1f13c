//! Error types for registry operations.

use pvflow_core::RecordError;

use crate::access::AccessError;
use crate::error::RuleError;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("record '{0}' not found")]
    NotFound(String),

    #[error("record '{0}' already exists")]
    AlreadyExists(String),

    /// The record's lock could not be taken within the configured timeout.
    #[error("timed out after {timeout_ms}ms waiting for lock on '{record}'")]
    LockTimeout { record: String, timeout_ms: u64 },

    /// A forward-link or monitor chain nested deeper than allowed.
    #[error("write to '{record}' dropped: forward chain deeper than {max_depth}")]
    ForwardDepthExceeded { record: String, max_depth: usize },

    #[error("write to '{record}' failed: {source}")]
    Rule {
        record: String,
        #[source]
        source: RuleError,
    },

    #[error(transparent)]
    Record(#[from] RecordError),
}

impl RegistryError {
    /// Whether retrying the same write later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RegistryError::LockTimeout { .. } => true,
            RegistryError::Rule { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Translate into the error surfaced through [`RecordAccess`](crate::access::RecordAccess).
    pub fn into_access_error(self) -> AccessError {
        match self {
            RegistryError::NotFound(record) => AccessError::NotFound(record),
            RegistryError::LockTimeout { record, timeout_ms } => {
                AccessError::Timeout { record, timeout_ms }
            }
            RegistryError::Rule { record, source } => AccessError::Rejected {
                record,
                message: source.to_string(),
            },
            RegistryError::ForwardDepthExceeded { record, max_depth } => AccessError::Rejected {
                record,
                message: format!("forward chain deeper than {}", max_depth),
            },
            other => AccessError::Rejected {
                record: String::new(),
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
