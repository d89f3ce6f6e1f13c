//! Control-flow signal returned by every rule entry point.

use std::fmt;

/// Why a rule refused a write.
#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    /// Policy rejection, e.g. a read-only record.
    Rejected(String),
    /// An external record the rule depends on could not be read or written.
    DependencyUnavailable { record: String, message: String },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Rejected(msg) => write!(f, "{}", msg),
            AbortReason::DependencyUnavailable { record, message } => {
                write!(f, "dependency '{}' unavailable: {}", record, message)
            }
        }
    }
}

/// What the engine should do after a rule returns.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    /// Proceed to the next rule.
    Continue,
    /// Stop, but still run the `timestamp` rule.
    Terminate,
    /// Stop immediately.
    TerminateWithoutTimestamp,
    /// Discard the candidate and report the reason.
    Abort(AbortReason),
}

impl RuleOutcome {
    pub fn abort(message: impl Into<String>) -> Self {
        RuleOutcome::Abort(AbortReason::Rejected(message.into()))
    }

    pub fn dependency_unavailable(record: impl Into<String>, message: impl Into<String>) -> Self {
        RuleOutcome::Abort(AbortReason::DependencyUnavailable {
            record: record.into(),
            message: message.into(),
        })
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, RuleOutcome::Abort(_))
    }

    /// Position in the "worst outcome wins" order:
    /// Abort > TerminateWithoutTimestamp > Terminate > Continue.
    fn severity(&self) -> u8 {
        match self {
            RuleOutcome::Continue => 0,
            RuleOutcome::Terminate => 1,
            RuleOutcome::TerminateWithoutTimestamp => 2,
            RuleOutcome::Abort(_) => 3,
        }
    }

    /// The worse of two outcomes. Ties keep `self`.
    pub fn worst(self, other: RuleOutcome) -> RuleOutcome {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RuleOutcome::Continue => "continue",
            RuleOutcome::Terminate => "terminate",
            RuleOutcome::TerminateWithoutTimestamp => "terminate_without_timestamp",
            RuleOutcome::Abort(_) => "abort",
        }
    }
}

impl fmt::Display for RuleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleOutcome::Abort(reason) => write!(f, "abort: {}", reason),
            other => write!(f, "{}", other.label()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_follows_total_order() {
        use RuleOutcome::*;
        assert_eq!(Continue.worst(Terminate), Terminate);
        assert_eq!(Terminate.worst(TerminateWithoutTimestamp), TerminateWithoutTimestamp);
        assert_eq!(TerminateWithoutTimestamp.worst(Continue), TerminateWithoutTimestamp);
        assert!(Terminate.worst(RuleOutcome::abort("x")).is_abort());
    }

    #[test]
    fn worst_keeps_first_abort_on_tie() {
        let first = RuleOutcome::abort("first");
        let merged = first.clone().worst(RuleOutcome::abort("second"));
        assert_eq!(merged, first);
    }

    #[test]
    fn display_includes_reason() {
        let o = RuleOutcome::dependency_unavailable("TEMP:1", "timed out");
        assert_eq!(o.to_string(), "abort: dependency 'TEMP:1' unavailable: timed out");
    }
}
