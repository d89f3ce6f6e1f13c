use thiserror::Error;

use pvflow_core::RecordError;

use crate::context::Trigger;
use crate::outcome::AbortReason;

/// Errors surfaced by [`RuleEngine::apply`](crate::engine::RuleEngine::apply).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    /// A rule rejected the write. The message is suitable for direct display.
    #[error("rule '{rule}' rejected the write: {message}")]
    Aborted { rule: String, message: String },

    /// A Calc/ForwardLink dependency could not be reached. Retryable.
    #[error("rule '{rule}' could not reach '{record}': {message}")]
    DependencyUnavailable {
        rule: String,
        record: String,
        message: String,
    },

    #[error("rule '{0}' is already registered")]
    DuplicateRule(String),

    #[error("{0} evaluation requires a committed state")]
    MissingCommittedState(Trigger),

    #[error(transparent)]
    Record(#[from] RecordError),
}

impl RuleError {
    pub fn from_abort(rule: &str, reason: AbortReason) -> Self {
        match reason {
            AbortReason::Rejected(message) => RuleError::Aborted {
                rule: rule.to_string(),
                message,
            },
            AbortReason::DependencyUnavailable { record, message } => {
                RuleError::DependencyUnavailable {
                    rule: rule.to_string(),
                    record,
                    message,
                }
            }
        }
    }

    /// Whether retrying the same write later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RuleError::DependencyUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
