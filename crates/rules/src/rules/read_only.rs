use pvflow_core::Record;

use crate::context::CallerContext;
use crate::outcome::RuleOutcome;
use crate::rule::{Evaluation, Rule};

/// Rejects every externally requested write. Internal posts pass through.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOnlyRule;

impl ReadOnlyRule {
    pub const NAME: &'static str = "read_only";
}

impl Rule for ReadOnlyRule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn fields(&self) -> Option<&[&'static str]> {
        None
    }

    fn evaluate_for_init(&self, _candidate: &mut Record) -> Evaluation {
        Ok(RuleOutcome::Continue)
    }

    fn evaluate_for_request(
        &self,
        _committed: &Record,
        _update: &mut Record,
        _ctx: &CallerContext,
    ) -> Evaluation {
        Ok(RuleOutcome::abort("read-only"))
    }
}
