//! Threshold alarms driven by the `valueAlarm` sub-structure.

use pvflow_core::{AlarmSeverity, Record, RecordError, Value};
use tracing::debug;

use crate::merge::MergedView;
use crate::outcome::RuleOutcome;
use crate::rule::{Evaluation, GatherableRule, Rule};

const FIELDS: &[&str] = &["alarm", "valueAlarm"];

/// One of the four configurable thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threshold {
    HighAlarm,
    LowAlarm,
    HighWarning,
    LowWarning,
}

impl Threshold {
    /// Evaluation order. Alarms always precede warnings.
    pub const CHECK_ORDER: [Threshold; 4] = [
        Threshold::HighAlarm,
        Threshold::LowAlarm,
        Threshold::HighWarning,
        Threshold::LowWarning,
    ];

    /// Token written to `alarm.message` when this threshold fires.
    pub fn token(self) -> &'static str {
        match self {
            Threshold::HighAlarm => "highAlarm",
            Threshold::LowAlarm => "lowAlarm",
            Threshold::HighWarning => "highWarning",
            Threshold::LowWarning => "lowWarning",
        }
    }

    pub fn limit_path(self) -> &'static str {
        match self {
            Threshold::HighAlarm => "valueAlarm.highAlarmLimit",
            Threshold::LowAlarm => "valueAlarm.lowAlarmLimit",
            Threshold::HighWarning => "valueAlarm.highWarningLimit",
            Threshold::LowWarning => "valueAlarm.lowWarningLimit",
        }
    }

    pub fn severity_path(self) -> &'static str {
        match self {
            Threshold::HighAlarm => "valueAlarm.highAlarmSeverity",
            Threshold::LowAlarm => "valueAlarm.lowAlarmSeverity",
            Threshold::HighWarning => "valueAlarm.highWarningSeverity",
            Threshold::LowWarning => "valueAlarm.lowWarningSeverity",
        }
    }

    /// High thresholds fire at or above the limit, low ones at or below.
    pub fn fires(self, value: f64, limit: f64) -> bool {
        match self {
            Threshold::HighAlarm | Threshold::HighWarning => value >= limit,
            Threshold::LowAlarm | Threshold::LowWarning => value <= limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Decision {
    Leave,
    Raise { severity: i64, message: &'static str },
    Clear,
}

/// Raises or clears `alarm` from the configured `valueAlarm` thresholds.
///
/// While `valueAlarm.active` is false the rule leaves `alarm` untouched, so an
/// alarm raised before deactivation persists; `clear_on_deactivate` opts in to
/// clearing it instead. `valueAlarm.hysteresis` is not applied.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueAlarmRule {
    read_only: bool,
    clear_on_deactivate: bool,
}

impl ValueAlarmRule {
    pub const NAME: &'static str = "valueAlarm";

    pub fn new(read_only: bool) -> Self {
        Self {
            read_only,
            clear_on_deactivate: false,
        }
    }

    pub fn clear_on_deactivate(mut self, clear: bool) -> Self {
        self.clear_on_deactivate = clear;
        self
    }

    fn decide(&self, view: &MergedView<'_>) -> Decision {
        if !view.get_bool("valueAlarm.active").unwrap_or(false) {
            if self.clear_on_deactivate {
                debug!("valueAlarm inactive; clearing alarm");
                return Decision::Clear;
            }
            debug!("valueAlarm inactive");
            return Decision::Leave;
        }
        let Some(value) = view.get_f64("value") else {
            return Decision::Leave;
        };

        for threshold in Threshold::CHECK_ORDER {
            let limit = view.get_f64(threshold.limit_path());
            let severity = view.get_i64(threshold.severity_path());
            let (Some(limit), Some(severity)) = (limit, severity) else {
                debug!(threshold = threshold.token(), "threshold not configured; skipping");
                continue;
            };
            if severity != 0 && threshold.fires(value, limit) {
                return Decision::Raise {
                    severity,
                    message: threshold.token(),
                };
            }
        }
        Decision::Clear
    }

    fn apply(severity_now: i64, has_message: bool, decision: Decision, record: &mut Record) -> Evaluation {
        match decision {
            Decision::Leave => {}
            Decision::Raise { severity, message } => {
                debug!(severity, alarm = message, "raising alarm");
                record.set("alarm.severity", severity)?;
                record.set("alarm.message", message)?;
            }
            Decision::Clear => {
                if severity_now != 0 {
                    record.set("alarm.severity", AlarmSeverity::NoAlarm)?;
                }
                if has_message {
                    record.set("alarm.message", "")?;
                }
                if severity_now != 0 || has_message {
                    debug!("alarm cleared");
                }
            }
        }
        Ok(RuleOutcome::Continue)
    }

    fn evaluate(&self, view: MergedView<'_>) -> (i64, bool, Decision) {
        let severity = view.get_i64("alarm.severity").unwrap_or(0);
        let has_message = view.get_str("alarm.message").is_some_and(|m| !m.is_empty());
        (severity, has_message, self.decide(&view))
    }
}

impl Rule for ValueAlarmRule {
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
        let (severity, message, decision) = self.evaluate(MergedView::init(candidate));
        Self::apply(severity, message, decision, candidate)
    }

    fn evaluate_for_merge(&self, old: &Record, new: &mut Record) -> Evaluation {
        let (severity, message, decision) = self.evaluate(MergedView::new(Some(old), new));
        Self::apply(severity, message, decision, new)
    }

    fn as_gatherable(&self) -> Option<&dyn GatherableRule> {
        Some(self)
    }
}

impl GatherableRule for ValueAlarmRule {
    /// Reset to no alarm, unless the write explicitly set INVALID.
    fn gather_init(&self, acc: &mut Record) -> Result<(), RecordError> {
        let explicit_invalid = acc.is_changed("alarm.severity")
            && acc.get("alarm.severity") == Some(&Value::from(AlarmSeverity::Invalid));
        if !explicit_invalid {
            acc.set("alarm.severity", AlarmSeverity::NoAlarm)?;
            acc.set("alarm.message", "")?;
        }
        Ok(())
    }

    /// Highest severity wins; ties keep the first element seen.
    fn gather(&self, element: &Record, acc: &mut Record) -> Result<(), RecordError> {
        let severity = element.get("alarm.severity").and_then(Value::as_i64).unwrap_or(0);
        let current = acc.get("alarm.severity").and_then(Value::as_i64).unwrap_or(0);
        if severity > current {
            acc.set("alarm.severity", severity)?;
            let message = element.get("alarm.message").cloned().unwrap_or_else(|| Value::from(""));
            acc.set("alarm.message", message)?;
        }
        Ok(())
    }
}
