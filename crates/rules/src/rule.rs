//! The rule contract.
//!
//! A rule is a named unit of policy that inspects a candidate record and may
//! mutate it in place before commit. Rules hold configuration only; they never
//! cache record values between invocations.

use pvflow_core::{Record, RecordError};
use tracing::debug;

use crate::context::CallerContext;
use crate::outcome::RuleOutcome;

/// Result of one rule entry point. Record errors are programming or
/// configuration defects (writing a field of the wrong type) and fail the apply.
pub type Evaluation = Result<RuleOutcome, RecordError>;

/// A named, self-contained unit of record policy.
pub trait Rule: Send + Sync {
    /// Unique name within an engine.
    fn name(&self) -> &str;

    /// Field paths (leaves or sub-structures) this rule owns.
    /// `None` means the rule always applies.
    fn fields(&self) -> Option<&[&'static str]>;

    /// Whether external requests may write this rule's owned fields.
    fn read_only(&self) -> bool {
        false
    }

    /// Fast-path check run by the engine before any entry point.
    fn is_applicable(&self, candidate: &Record) -> bool {
        owned_fields_changed(self.fields(), candidate)
    }

    /// Evaluate against the candidate alone. Must not consult prior state.
    fn evaluate_for_init(&self, candidate: &mut Record) -> Evaluation;

    /// Evaluate against the committed record and a candidate update.
    fn evaluate_for_merge(&self, old: &Record, new: &mut Record) -> Evaluation {
        let _ = old;
        self.evaluate_for_init(new)
    }

    /// Evaluate an externally requested write.
    ///
    /// Read-only rules drop the request's writes to their owned fields, then
    /// re-check applicability before falling through to the merge path.
    fn evaluate_for_request(
        &self,
        committed: &Record,
        update: &mut Record,
        ctx: &CallerContext,
    ) -> Evaluation {
        let _ = ctx;
        if self.read_only() {
            if let Some(fields) = self.fields() {
                for field in fields {
                    if update.has_field(field) {
                        update.mark_changed(field, false)?;
                    }
                }
            }
            if !self.is_applicable(update) {
                debug!(rule = %self.name(), "read-only fields dropped; nothing left to evaluate");
                return Ok(RuleOutcome::Continue);
            }
        }
        self.evaluate_for_merge(committed, update)
    }

    /// Records whose commits should re-trigger this record.
    fn inputs(&self) -> Vec<String> {
        Vec::new()
    }

    /// Runs after a successful commit, outside the record lock.
    fn after_commit(&self, committed: &Record) {
        let _ = committed;
    }

    /// Capability hook for the array adapter.
    fn as_gatherable(&self) -> Option<&dyn GatherableRule> {
        None
    }
}

/// A scalar rule that can fold per-element results into one aggregate when
/// lifted onto an array.
pub trait GatherableRule: Rule {
    /// Reset the aggregate held in `acc` to its neutral state.
    fn gather_init(&self, acc: &mut Record) -> Result<(), RecordError>;

    /// Fold one element's evaluated scalar record into `acc`.
    fn gather(&self, element: &Record, acc: &mut Record) -> Result<(), RecordError>;
}

/// Default applicability: every owned field exists, and at least one owned
/// field or `value` is marked changed.
pub fn owned_fields_changed(fields: Option<&[&str]>, candidate: &Record) -> bool {
    let Some(fields) = fields else {
        return true;
    };
    if !fields.iter().all(|f| candidate.has_field(f)) {
        return false;
    }
    candidate.is_changed("value") || fields.iter().any(|f| candidate.is_changed(f))
}
