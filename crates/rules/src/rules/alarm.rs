use pvflow_core::Record;

use crate::outcome::RuleOutcome;
use crate::rule::{Evaluation, Rule};

const FIELDS: &[&str] = &["alarm"];

/// Owns `alarm` without applying any policy of its own.
///
/// Registered so that `alarm.severity` / `alarm.message` can be made read-only
/// for external requests while other rules remain free to set them.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlarmRule {
    read_only: bool,
}

impl AlarmRule {
    pub const NAME: &'static str = "alarm";

    pub fn new(read_only: bool) -> Self {
        Self { read_only }
    }
}

impl Rule for AlarmRule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn fields(&self) -> Option<&[&'static str]> {
        Some(FIELDS)
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    fn evaluate_for_init(&self, _candidate: &mut Record) -> Evaluation {
        Ok(RuleOutcome::Continue)
    }
}
