//! Control limits: minimum step and low/high clamping.

use pvflow_core::{Record, RecordError, Value};
use tracing::debug;

use crate::merge::MergedView;
use crate::outcome::RuleOutcome;
use crate::rule::{Evaluation, Rule};

const FIELDS: &[&str] = &["control"];

/// Clamp `value` into `[limitLow, limitHigh]`.
///
/// Limits of `0/0` mean the control structure is unconfigured and nothing is
/// clipped. Returns `None` when the value is already in range.
pub fn clip(value: f64, low: f64, high: f64) -> Option<f64> {
    if low == 0.0 && high == 0.0 {
        return None;
    }
    if value < low {
        Some(low)
    } else if value > high {
        Some(high)
    } else {
        None
    }
}

/// Whether a change from `old` to `new` is smaller than `min_step`.
pub fn below_min_step(new: f64, old: f64, min_step: f64) -> bool {
    (new - old).abs() < min_step
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ControlRule {
    read_only: bool,
}

impl ControlRule {
    pub const NAME: &'static str = "control";

    pub fn new(read_only: bool) -> Self {
        Self { read_only }
    }

    fn clipped(view: &MergedView<'_>) -> Option<f64> {
        let value = view.get_f64("value")?;
        let low = view.get_f64("control.limitLow")?;
        let high = view.get_f64("control.limitHigh")?;
        clip(value, low, high)
    }
}

impl Rule for ControlRule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn fields(&self) -> Option<&[&'static str]> {
        Some(FIELDS)
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    fn evaluate_for_init(&self, candidate: &mut Record) -> Evaluation {
        let clipped = Self::clipped(&MergedView::init(candidate));
        if let Some(limit) = clipped {
            debug!(limit, "value outside control limits; clipping");
            candidate.set("value", limit)?;
        }
        Ok(RuleOutcome::Continue)
    }

    fn evaluate_for_merge(&self, old: &Record, new: &mut Record) -> Evaluation {
        let view = MergedView::new(Some(old), new);

        // Only an explicit value write is subject to minStep.
        if view.is_changed("value") {
            let step = view.get_f64("control.minStep");
            let previous = view.old_value("value");
            if let (Some(value), Some(step), Some(previous)) =
                (view.get_f64("value"), step, previous.cloned())
            {
                if previous.as_f64().is_some_and(|p| below_min_step(value, p, step)) {
                    debug!(value, previous = %previous, step, "change below control.minStep; keeping previous value");
                    new.set("value", previous)?;
                    return Ok(RuleOutcome::Continue);
                }
            }
        }

        let clipped = Self::clipped(&view);
        if let Some(limit) = clipped {
            debug!(limit, "value outside control limits; clipping");
            new.set("value", limit)?;
        }
        Ok(RuleOutcome::Continue)
    }
}

/// Configured control limits, applied to a record at construction.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlSettings {
    pub low: f64,
    pub high: f64,
    pub min_step: f64,
}

impl ControlSettings {
    pub fn apply(&self, record: &mut Record) -> Result<(), RecordError> {
        record.set("control.limitLow", Value::Double(self.low))?;
        record.set("control.limitHigh", Value::Double(self.high))?;
        record.set("control.minStep", Value::Double(self.min_step))?;
        Ok(())
    }
}
