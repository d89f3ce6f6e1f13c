use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::DateTime;
use pvflow_core::{NtScalar, Record, ScalarType, Value};

use super::*;
use crate::context::{CallerContext, Trigger};
use crate::error::RuleError;
use crate::outcome::RuleOutcome;
use crate::rule::{Evaluation, Rule};
use crate::rules::{
    ControlRule, ControlSettings, ReadOnlyRule, TimestampRule, ValueAlarmRule,
};

// ── Helpers ─────────────────────────────────────────────────────

fn clock() -> TimestampRule {
    TimestampRule::with_clock(|| DateTime::from_timestamp(1_700_000_000, 0).unwrap())
}

fn controlled(low: f64, high: f64, min_step: f64) -> Record {
    let mut rec = NtScalar::scalar(ScalarType::Double)
        .initial(0.0)
        .control()
        .build()
        .unwrap();
    ControlSettings { low, high, min_step }.apply(&mut rec).unwrap();
    rec
}

fn control_engine() -> RuleEngine {
    RuleEngine::new()
        .with_rule(ControlRule::default())
        .unwrap()
        .with_rule(clock())
        .unwrap()
}

/// Request a new `value` and commit the result the way a registry does.
fn request(engine: &RuleEngine, committed: &Record, value: f64) -> Result<Record, RuleError> {
    let mut candidate = committed.blank_candidate();
    candidate.set("value", value).unwrap();
    let evaluated = engine.apply(Trigger::Request, Some(committed), candidate, None)?;
    Ok(committed.overlay_changed(&evaluated).unwrap())
}

fn value_of(rec: &Record) -> f64 {
    rec.get("value").and_then(Value::as_f64).unwrap()
}

/// Returns a fixed outcome and records that it ran by writing `value`.
struct Fixed {
    name: &'static str,
    outcome: RuleOutcome,
    writes: Option<f64>,
    inputs: Vec<String>,
    runs: Arc<AtomicUsize>,
}

impl Fixed {
    fn new(name: &'static str, outcome: RuleOutcome) -> Self {
        Self {
            name,
            outcome,
            writes: None,
            inputs: Vec::new(),
            runs: Arc::default(),
        }
    }

    fn writing(mut self, value: f64) -> Self {
        self.writes = Some(value);
        self
    }

    fn listening(mut self, inputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|s| s.to_string()).collect();
        self
    }

    fn counting(mut self, runs: &Arc<AtomicUsize>) -> Self {
        self.runs = Arc::clone(runs);
        self
    }
}

impl Rule for Fixed {
    fn name(&self) -> &str {
        self.name
    }

    fn fields(&self) -> Option<&[&'static str]> {
        None
    }

    fn evaluate_for_init(&self, candidate: &mut Record) -> Evaluation {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if let Some(v) = self.writes {
            candidate.set("value", v)?;
        }
        Ok(self.outcome.clone())
    }

    fn inputs(&self) -> Vec<String> {
        self.inputs.clone()
    }
}

// ── Registration ────────────────────────────────────────────────

#[test]
fn read_only_first_and_timestamp_last() {
    let mut engine = RuleEngine::new();
    engine.register(ControlRule::default()).unwrap();
    engine.register(clock()).unwrap();
    engine.register(ValueAlarmRule::default()).unwrap();
    engine.register(ReadOnlyRule).unwrap();

    assert_eq!(engine.names(), vec!["read_only", "control", "valueAlarm", "timestamp"]);
    assert_eq!(engine.len(), 4);
}

#[test]
fn duplicate_names_are_rejected() {
    let mut engine = control_engine();
    let err = engine.register(ControlRule::new(true)).unwrap_err();
    assert_eq!(err, RuleError::DuplicateRule("control".into()));
    assert_eq!(engine.len(), 2);
}

#[test]
fn remove_keeps_order_and_lookup_consistent() {
    let mut engine = RuleEngine::new();
    engine.register(ReadOnlyRule).unwrap();
    engine.register(ControlRule::default()).unwrap();
    engine.register(clock()).unwrap();

    assert!(engine.remove("control").is_some());
    assert!(engine.remove("control").is_none());
    assert_eq!(engine.names(), vec!["read_only", "timestamp"]);
    assert!(engine.get("timestamp").is_some());

    // Re-added rules still land before timestamp.
    engine.register(ValueAlarmRule::default()).unwrap();
    assert_eq!(engine.names(), vec!["read_only", "valueAlarm", "timestamp"]);
}

#[test]
fn inputs_are_deduplicated_in_order() {
    let engine = RuleEngine::new()
        .with_rule(Fixed::new("a", RuleOutcome::Continue).listening(&["X", "Y"]))
        .unwrap()
        .with_rule(Fixed::new("b", RuleOutcome::Continue).listening(&["Y", "Z"]))
        .unwrap();
    assert_eq!(engine.inputs(), vec!["X", "Y", "Z"]);
}

// ── Apply ───────────────────────────────────────────────────────

#[test]
fn control_scenario_clip_then_min_step() {
    let engine = control_engine();
    let committed = engine
        .apply(Trigger::Init, None, controlled(-5.0, 5.0, 1.0), None)
        .unwrap();
    assert_eq!(value_of(&committed), 0.0);

    let committed = request(&engine, &committed, 6.0).unwrap();
    assert_eq!(value_of(&committed), 5.0);

    let committed = request(&engine, &committed, 5.5).unwrap();
    assert_eq!(value_of(&committed), 5.0);

    let committed = request(&engine, &committed, 4.0).unwrap();
    assert_eq!(value_of(&committed), 4.0);
    assert_eq!(
        committed.get("timeStamp.secondsPastEpoch"),
        Some(&Value::Int(1_700_000_000))
    );
}

#[test]
fn abort_discards_candidate() {
    let engine = RuleEngine::new()
        .with_rule(ReadOnlyRule)
        .unwrap()
        .with_rule(ControlRule::default())
        .unwrap();
    let committed = engine
        .apply(Trigger::Init, None, controlled(-5.0, 5.0, 0.0), None)
        .unwrap();

    let err = request(&engine, &committed, 3.0).unwrap_err();
    assert_eq!(
        err,
        RuleError::Aborted {
            rule: "read_only".into(),
            message: "read-only".into(),
        }
    );
    assert!(!err.is_retryable());
    assert_eq!(value_of(&committed), 0.0);
}

#[test]
fn read_only_registered_last_still_rejects_before_other_rules() {
    let runs = Arc::new(AtomicUsize::new(0));
    let engine = RuleEngine::new()
        .with_rule(Fixed::new("writer", RuleOutcome::Continue).writing(9.0).counting(&runs))
        .unwrap()
        .with_rule(clock())
        .unwrap()
        .with_rule(ReadOnlyRule)
        .unwrap();
    assert_eq!(engine.names(), vec!["read_only", "writer", "timestamp"]);

    let mut committed = NtScalar::scalar(ScalarType::Double)
        .initial(1.0)
        .with_timestamp(5, 6)
        .build()
        .unwrap();
    committed.mark_all(false);
    let before = committed.clone();

    let err = request(&engine, &committed, 3.0).unwrap_err();
    assert_eq!(
        err,
        RuleError::Aborted {
            rule: "read_only".into(),
            message: "read-only".into(),
        }
    );
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(committed, before);
    assert_eq!(
        committed.get("timeStamp.secondsPastEpoch"),
        Some(&Value::Int(5))
    );
}

#[test]
fn read_only_lets_internal_posts_through() {
    let engine = RuleEngine::new()
        .with_rule(ReadOnlyRule)
        .unwrap()
        .with_rule(ControlRule::default())
        .unwrap();
    let committed = engine
        .apply(Trigger::Init, None, controlled(-5.0, 5.0, 0.0), None)
        .unwrap();

    let mut candidate = committed.blank_candidate();
    candidate.set("value", 9.0).unwrap();
    let evaluated = engine
        .apply(Trigger::Merge, Some(&committed), candidate, None)
        .unwrap();
    assert_eq!(value_of(&evaluated), 5.0);
}

#[test]
fn terminate_skips_remaining_rules_but_stamps() {
    let engine = RuleEngine::new()
        .with_rule(Fixed::new("stop", RuleOutcome::Terminate))
        .unwrap()
        .with_rule(Fixed::new("later", RuleOutcome::Continue).writing(99.0))
        .unwrap()
        .with_rule(clock())
        .unwrap();

    let rec = engine
        .apply(Trigger::Init, None, controlled(0.0, 0.0, 0.0), None)
        .unwrap();
    assert_eq!(value_of(&rec), 0.0);
    assert!(rec.is_changed("timeStamp.secondsPastEpoch"));
}

#[test]
fn terminate_without_timestamp_skips_stamp() {
    let engine = RuleEngine::new()
        .with_rule(Fixed::new("stop", RuleOutcome::TerminateWithoutTimestamp))
        .unwrap()
        .with_rule(clock())
        .unwrap();

    let rec = engine
        .apply(Trigger::Init, None, controlled(0.0, 0.0, 0.0), None)
        .unwrap();
    assert!(!rec.is_changed("timeStamp"));
}

#[test]
fn dependency_abort_is_retryable() {
    let engine = RuleEngine::new()
        .with_rule(Fixed::new(
            "calc",
            RuleOutcome::dependency_unavailable("UPSTREAM", "timed out"),
        ))
        .unwrap();
    let err = engine
        .apply(Trigger::Init, None, controlled(0.0, 0.0, 0.0), None)
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(err.to_string().contains("UPSTREAM"));
}

#[test]
fn merge_and_request_require_committed_state() {
    let engine = control_engine();
    let candidate = controlled(0.0, 0.0, 0.0);
    for trigger in [Trigger::Merge, Trigger::Request] {
        let err = engine
            .apply(trigger, None, candidate.clone(), Some(&CallerContext::default()))
            .unwrap_err();
        assert_eq!(err, RuleError::MissingCommittedState(trigger));
    }
}

#[test]
fn inapplicable_rules_are_skipped() {
    // No valueAlarm structure on this record.
    let engine = RuleEngine::new()
        .with_rule(ValueAlarmRule::default())
        .unwrap();
    let rec = engine
        .apply(Trigger::Init, None, controlled(-1.0, 1.0, 0.0), None)
        .unwrap();
    assert_eq!(rec.get("alarm.severity"), Some(&Value::Int(0)));
}

#[test]
fn unchanged_request_is_not_stamped() {
    let engine = control_engine();
    let committed = engine
        .apply(Trigger::Init, None, controlled(-5.0, 5.0, 0.0), None)
        .unwrap();
    let evaluated = engine
        .apply(Trigger::Request, Some(&committed), committed.blank_candidate(), None)
        .unwrap();
    assert!(!evaluated.any_changed());
}
