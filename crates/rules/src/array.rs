//! Lifting scalar rules onto array-valued records.
//!
//! [`ScalarToArrayWrapper`] runs a scalar rule once per array element against
//! a scalar projection of the record, folds the per-element outcomes into the
//! worst one, and (for [`GatherableRule`]s) folds per-element metadata into a
//! single aggregate written back onto the array record.

use pvflow_core::{Record, Value};
use tracing::debug;

use crate::merge::MergedView;
use crate::outcome::RuleOutcome;
use crate::rule::{Evaluation, GatherableRule, Rule};

/// Adapter running a scalar rule element-wise over an NTScalarArray.
#[derive(Debug, Clone)]
pub struct ScalarToArrayWrapper<R> {
    inner: R,
}

impl<R: Rule> ScalarToArrayWrapper<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Paths of `acc` marked by gathering that belong to the wrapped rule.
    fn gathered_paths(&self, acc: &Record) -> Vec<String> {
        acc.changed_paths()
            .into_iter()
            .filter(|path| *path != "value")
            .filter(|path| match self.inner.fields() {
                Some(fields) => fields
                    .iter()
                    .any(|f| *path == *f || path.strip_prefix(f).is_some_and(|rest| rest.starts_with('.'))),
                None => true,
            })
            .map(str::to_string)
            .collect()
    }

    fn run(&self, old: Option<&Record>, new: &mut Record) -> Evaluation {
        let view = MergedView::new(old, new);
        let items: Vec<Value> = view
            .get("value")
            .and_then(Value::as_array)
            .map(<[Value]>::to_vec)
            .unwrap_or_default();
        let old_items: Vec<Value> = old
            .and_then(|o| o.get("value"))
            .and_then(Value::as_array)
            .map(<[Value]>::to_vec)
            .unwrap_or_default();
        let value_marked = new.is_changed("value");

        let gatherable: Option<&dyn GatherableRule> = self.inner.as_gatherable();
        let mut acc = new.scalar_projection(None)?;
        if let Some(g) = gatherable {
            g.gather_init(&mut acc)?;
        }

        let mut results = Vec::with_capacity(items.len());
        let mut worst = RuleOutcome::Continue;
        for (index, item) in items.iter().enumerate() {
            let mut scratch = new.scalar_projection(Some(item.clone()))?;
            let outcome = match old {
                Some(old) => {
                    let prior = old.scalar_projection(old_items.get(index).cloned())?;
                    self.inner.evaluate_for_merge(&prior, &mut scratch)?
                }
                None => self.inner.evaluate_for_init(&mut scratch)?,
            };
            if outcome.is_abort() {
                debug!(rule = %self.inner.name(), index, "array element aborted the write");
                return Ok(outcome);
            }
            worst = worst.worst(outcome);

            if let Some(g) = gatherable {
                g.gather(&scratch, &mut acc)?;
            }
            results.push(scratch.get("value").cloned().unwrap_or_else(|| item.clone()));
        }

        if value_marked || results != items {
            new.set("value", Value::Array(results))?;
        }
        if gatherable.is_some() {
            for path in self.gathered_paths(&acc) {
                if let Some(value) = acc.get(&path).cloned() {
                    new.set(&path, value)?;
                }
            }
        }
        Ok(worst)
    }
}

impl<R: Rule> Rule for ScalarToArrayWrapper<R> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn fields(&self) -> Option<&[&'static str]> {
        self.inner.fields()
    }

    fn read_only(&self) -> bool {
        self.inner.read_only()
    }

    fn evaluate_for_init(&self, candidate: &mut Record) -> Evaluation {
        self.run(None, candidate)
    }

    fn evaluate_for_merge(&self, old: &Record, new: &mut Record) -> Evaluation {
        self.run(Some(old), new)
    }

    fn inputs(&self) -> Vec<String> {
        self.inner.inputs()
    }

    fn after_commit(&self, committed: &Record) {
        self.inner.after_commit(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{ControlRule, ControlSettings, Threshold, ValueAlarmRule};
    use pvflow_core::{AlarmSeverity, NtScalar, ScalarType};

    fn alarm_array(values: Vec<f64>) -> Record {
        let mut rec = NtScalar::array(ScalarType::Double)
            .initial(values)
            .value_alarm()
            .build()
            .unwrap();
        rec.set("valueAlarm.active", true).unwrap();
        for (threshold, limit, severity) in [
            (Threshold::LowAlarm, -10.0, AlarmSeverity::Major),
            (Threshold::LowWarning, -5.0, AlarmSeverity::Minor),
            (Threshold::HighWarning, 5.0, AlarmSeverity::Minor),
            (Threshold::HighAlarm, 10.0, AlarmSeverity::Major),
        ] {
            rec.set(threshold.limit_path(), limit).unwrap();
            rec.set(threshold.severity_path(), severity).unwrap();
        }
        rec
    }

    fn control_array(values: Vec<f64>, settings: ControlSettings) -> Record {
        let mut rec = NtScalar::array(ScalarType::Double)
            .initial(values)
            .control()
            .build()
            .unwrap();
        settings.apply(&mut rec).unwrap();
        rec
    }

    fn doubles(rec: &Record) -> Vec<f64> {
        rec.get("value")
            .and_then(Value::as_array)
            .unwrap()
            .iter()
            .map(|v| v.as_f64().unwrap())
            .collect()
    }

    #[test]
    fn worst_alarm_is_aggregated() {
        let mut rec = alarm_array(vec![-10.0, 0.0, 10.0]);
        let rule = ScalarToArrayWrapper::new(ValueAlarmRule::default());
        let outcome = rule.evaluate_for_init(&mut rec).unwrap();
        assert_eq!(outcome, RuleOutcome::Continue);
        assert_eq!(rec.get("alarm.severity"), Some(&Value::Int(2)));
        assert_eq!(rec.get("alarm.message"), Some(&Value::from("lowAlarm")));
    }

    #[test]
    fn alarm_clears_when_all_elements_return_to_range() {
        let rule = ScalarToArrayWrapper::new(ValueAlarmRule::default());
        let mut old = alarm_array(vec![12.0, 0.0]);
        rule.evaluate_for_init(&mut old).unwrap();
        assert_eq!(old.get("alarm.message"), Some(&Value::from("highAlarm")));

        let mut new = old.blank_candidate();
        new.set("value", vec![1.0, 2.0]).unwrap();
        rule.evaluate_for_merge(&old, &mut new).unwrap();
        assert_eq!(new.get("alarm.severity"), Some(&Value::Int(0)));
        assert_eq!(new.get("alarm.message"), Some(&Value::from("")));
    }

    #[test]
    fn control_clips_each_element() {
        let settings = ControlSettings { low: -5.0, high: 5.0, min_step: 0.0 };
        let mut rec = control_array(vec![-7.0, 1.0, 9.0], settings);
        ScalarToArrayWrapper::new(ControlRule::default())
            .evaluate_for_init(&mut rec)
            .unwrap();
        assert_eq!(doubles(&rec), vec![-5.0, 1.0, 5.0]);
    }

    #[test]
    fn merge_aligns_by_index_and_tolerates_growth() {
        let settings = ControlSettings { low: -50.0, high: 50.0, min_step: 0.5 };
        let old = control_array(vec![1.0, 2.0], settings);
        let mut new = old.blank_candidate();
        new.set("value", vec![1.2, 5.0, 90.0]).unwrap();

        ScalarToArrayWrapper::new(ControlRule::default())
            .evaluate_for_merge(&old, &mut new)
            .unwrap();
        // [0] is below minStep, [1] passes, [2] has no prior value and is clipped.
        assert_eq!(doubles(&new), vec![1.0, 5.0, 50.0]);
    }

    struct RejectNegative;

    impl Rule for RejectNegative {
        fn name(&self) -> &str {
            "reject_negative"
        }

        fn fields(&self) -> Option<&[&'static str]> {
            None
        }

        fn evaluate_for_init(&self, candidate: &mut Record) -> Evaluation {
            match candidate.get("value").and_then(Value::as_f64) {
                Some(v) if v < 0.0 => Ok(RuleOutcome::abort("negative")),
                Some(v) if v == 0.0 => Ok(RuleOutcome::Terminate),
                _ => Ok(RuleOutcome::Continue),
            }
        }
    }

    #[test]
    fn worst_outcome_wins_and_abort_short_circuits() {
        let rule = ScalarToArrayWrapper::new(RejectNegative);

        let mut rec = control_array(vec![1.0, 0.0, 2.0], ControlSettings::default());
        assert_eq!(rule.evaluate_for_init(&mut rec).unwrap(), RuleOutcome::Terminate);

        let mut rec = control_array(vec![1.0, -1.0, 0.0], ControlSettings::default());
        assert_eq!(rule.evaluate_for_init(&mut rec).unwrap(), RuleOutcome::abort("negative"));
    }

    #[test]
    fn delegates_identity_to_wrapped_rule() {
        let rule = ScalarToArrayWrapper::new(ControlRule::new(true));
        assert_eq!(rule.name(), "control");
        assert_eq!(rule.fields(), Some(&["control"][..]));
        assert!(rule.read_only());
        assert!(rule.as_gatherable().is_none());
    }
}
