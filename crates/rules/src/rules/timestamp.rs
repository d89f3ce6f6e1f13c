use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use pvflow_core::nt::timestamp_parts;
use pvflow_core::Record;
use tracing::debug;

use crate::outcome::RuleOutcome;
use crate::rule::{Evaluation, Rule};

const FIELDS: &[&str] = &["timeStamp"];
const SECONDS: &str = "timeStamp.secondsPastEpoch";
const NANOS: &str = "timeStamp.nanoseconds";

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Stamps every committed write with the current time.
///
/// Applicable whenever anything changed, not just `timeStamp`. A time the
/// caller set explicitly is kept.
#[derive(Clone)]
pub struct TimestampRule {
    clock: Clock,
}

impl TimestampRule {
    pub const NAME: &'static str = "timestamp";

    pub fn new() -> Self {
        Self {
            clock: Arc::new(Utc::now),
        }
    }

    /// Use a fixed or simulated clock instead of wall time.
    pub fn with_clock(clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        Self {
            clock: Arc::new(clock),
        }
    }
}

impl Default for TimestampRule {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TimestampRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimestampRule").finish_non_exhaustive()
    }
}

impl Rule for TimestampRule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn fields(&self) -> Option<&[&'static str]> {
        Some(FIELDS)
    }

    fn is_applicable(&self, candidate: &Record) -> bool {
        candidate.has_field("timeStamp") && candidate.any_changed()
    }

    fn evaluate_for_init(&self, candidate: &mut Record) -> Evaluation {
        if candidate.is_changed(SECONDS) || candidate.is_changed(NANOS) {
            debug!("keeping caller-supplied timeStamp");
            return Ok(RuleOutcome::Continue);
        }
        self.stamp(candidate)
    }

    /// A marked timeStamp equal to the committed one is a refresh request,
    /// not a caller-supplied time.
    fn evaluate_for_merge(&self, old: &Record, new: &mut Record) -> Evaluation {
        let supplied = [SECONDS, NANOS]
            .iter()
            .any(|path| new.is_changed(path) && new.get(path) != old.get(path));
        if supplied {
            debug!("keeping caller-supplied timeStamp");
            return Ok(RuleOutcome::Continue);
        }
        self.stamp(new)
    }
}

impl TimestampRule {
    fn stamp(&self, candidate: &mut Record) -> Evaluation {
        let (seconds, nanos) = timestamp_parts((self.clock)());
        candidate.set(SECONDS, seconds)?;
        candidate.set(NANOS, nanos)?;
        Ok(RuleOutcome::Continue)
    }
}
