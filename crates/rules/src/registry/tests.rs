use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::result::Result;

use pvflow_core::config::RegistryConfig;
use pvflow_core::{NtScalar, Record, ScalarType, Value};

use super::*;
use crate::access::{AccessError, FieldUpdates, RecordAccess};
use crate::audit_log::{ExecutionPhase, LogLevel, LogQueryParams};
use crate::context::CallerContext;
use crate::engine::RuleEngine;
use crate::rules::{CalcRule, ControlRule, ControlSettings, ForwardLinkRule, ReadOnlyRule, TimestampRule};

// ── Helpers ─────────────────────────────────────────────────────

fn registry() -> MemoryRegistry {
    MemoryRegistry::new(RegistryConfig {
        lock_timeout_ms: 200,
        max_forward_depth: 4,
        audit_max_entries: 50,
    })
}

fn double(value: f64) -> Record {
    NtScalar::scalar(ScalarType::Double).initial(value).build().unwrap()
}

fn updates(pairs: &[(&str, Value)]) -> FieldUpdates {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn value_of(reg: &MemoryRegistry, name: &str) -> f64 {
    reg.current_committed_state(name)
        .unwrap()
        .get("value")
        .and_then(Value::as_f64)
        .unwrap()
}

fn plain_engine() -> RuleEngine {
    RuleEngine::new().with_rule(TimestampRule::new()).unwrap()
}

fn calc(reg_access: Arc<dyn RecordAccess>, expr: &str, vars: &[&str]) -> CalcRule {
    CalcRule::new(
        expr,
        vars.iter().map(|s| s.to_string()).collect(),
        reg_access,
        Duration::from_millis(50),
    )
    .unwrap()
}

/// Every read returns the next integer.
#[derive(Default)]
struct Counter(AtomicI64);

impl RecordAccess for Counter {
    fn read(&self, _: &str, _: Duration) -> Result<Value, AccessError> {
        Ok(Value::Int(self.0.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn write(&self, _: &str, _: FieldUpdates, _: Duration) -> Result<(), AccessError> {
        Ok(())
    }
}

// ── Lifecycle ───────────────────────────────────────────────────

#[test]
fn insert_put_and_read_back() {
    let reg = registry();
    let mut rec = NtScalar::scalar(ScalarType::Double).control().build().unwrap();
    ControlSettings { low: -5.0, high: 5.0, min_step: 1.0 }.apply(&mut rec).unwrap();
    let engine = RuleEngine::new()
        .with_rule(ControlRule::default())
        .unwrap()
        .with_rule(TimestampRule::new())
        .unwrap();
    reg.insert("PUMP:SPEED", rec, engine).unwrap();

    let ctx = CallerContext::for_account("operator");
    for (requested, expected) in [(6.0, 5.0), (5.5, 5.0), (4.0, 4.0)] {
        reg.put("PUMP:SPEED", updates(&[("value", Value::Double(requested))]), &ctx)
            .unwrap();
        assert_eq!(value_of(&reg, "PUMP:SPEED"), expected);
    }

    let commits = reg.audit().query(
        "PUMP:SPEED",
        &LogQueryParams {
            phase: Some(ExecutionPhase::Commit),
            ..LogQueryParams::default()
        },
    );
    assert_eq!(commits.len(), 4);
}

#[test]
fn duplicate_and_missing_records() {
    let reg = registry();
    reg.insert("A", double(1.0), plain_engine()).unwrap();
    assert!(matches!(
        reg.insert("A", double(2.0), plain_engine()),
        Err(RegistryError::AlreadyExists(_))
    ));
    assert!(matches!(
        reg.post("NOPE", FieldUpdates::new()),
        Err(RegistryError::NotFound(_))
    ));
    assert_eq!(reg.names(), vec!["A".to_string()]);
}

#[test]
fn rejected_put_leaves_state_and_is_audited() {
    let reg = registry();
    let engine = RuleEngine::new().with_rule(ReadOnlyRule).unwrap();
    reg.insert("RO", double(1.0), engine).unwrap();

    let err = reg
        .put("RO", updates(&[("value", Value::Double(9.0))]), &CallerContext::default())
        .unwrap_err();
    assert!(err.to_string().contains("read-only"));
    assert!(!err.is_retryable());
    assert_eq!(value_of(&reg, "RO"), 1.0);

    // Internal posts are not subject to read_only.
    reg.post("RO", updates(&[("value", Value::Double(2.0))])).unwrap();
    assert_eq!(value_of(&reg, "RO"), 2.0);

    let aborts = reg.audit().query(
        "RO",
        &LogQueryParams {
            level: Some(LogLevel::Warning),
            ..LogQueryParams::default()
        },
    );
    assert_eq!(aborts.len(), 1);
    assert_eq!(aborts[0].phase, ExecutionPhase::Abort);
}

#[test]
fn unknown_field_in_update_is_an_error() {
    let reg = registry();
    reg.insert("A", double(1.0), plain_engine()).unwrap();
    let err = reg
        .post("A", updates(&[("control.limitHigh", Value::Double(1.0))]))
        .unwrap_err();
    assert!(matches!(err, RegistryError::Record(_)));
}

#[test]
fn remove_drops_record() {
    let reg = registry();
    reg.insert("A", double(1.0), plain_engine()).unwrap();
    assert!(reg.remove("A"));
    assert!(!reg.remove("A"));
    assert!(reg.is_empty());
}

// ── Fan-out ─────────────────────────────────────────────────────

#[test]
fn calc_recomputes_when_an_input_commits() {
    let reg = registry();
    reg.insert("A", double(1.0), plain_engine()).unwrap();
    reg.insert("B", double(10.0), plain_engine()).unwrap();
    let engine = RuleEngine::new()
        .with_rule(calc(reg.handle(), "pv[0] + pv[1]", &["A", "B"]))
        .unwrap()
        .with_rule(TimestampRule::new())
        .unwrap();
    reg.insert("SUM", double(0.0), engine).unwrap();
    assert_eq!(reg.dependents_of("A"), vec!["SUM".to_string()]);

    reg.put("A", updates(&[("value", Value::Double(3.0))]), &CallerContext::default())
        .unwrap();
    assert_eq!(value_of(&reg, "SUM"), 13.0);

    reg.post("B", updates(&[("value", Value::Double(-3.0))])).unwrap();
    assert_eq!(value_of(&reg, "SUM"), 0.0);

    let triggered = reg.audit().query(
        "SUM",
        &LogQueryParams {
            phase: Some(ExecutionPhase::ForwardLink),
            ..LogQueryParams::default()
        },
    );
    assert_eq!(triggered.len(), 2);
}

#[test]
fn forward_link_retriggers_target() {
    let reg = registry();
    let counter: Arc<dyn RecordAccess> = Arc::new(Counter::default());
    let target = RuleEngine::new()
        .with_rule(calc(counter, "pv[0]", &["TICKS"]))
        .unwrap();
    reg.insert("TARGET", double(0.0), target).unwrap();

    let source = RuleEngine::new()
        .with_rule(ForwardLinkRule::new(
            vec!["TARGET".into()],
            reg.handle(),
            Duration::from_millis(50),
        ))
        .unwrap()
        .with_rule(TimestampRule::new())
        .unwrap();
    // Init already fires the link once.
    reg.insert("SOURCE", double(0.0), source).unwrap();
    assert_eq!(value_of(&reg, "TARGET"), 1.0);

    reg.put("SOURCE", updates(&[("value", Value::Double(1.0))]), &CallerContext::default())
        .unwrap();
    assert_eq!(value_of(&reg, "TARGET"), 2.0);
}

/// Timestamp rule whose clock advances one second per stamp.
fn ticking_clock() -> TimestampRule {
    let ticks = Arc::new(AtomicI64::new(0));
    TimestampRule::with_clock(move || {
        let n = ticks.fetch_add(1, Ordering::SeqCst);
        chrono::DateTime::from_timestamp(1_700_000_000 + n, 0).unwrap()
    })
}

fn seconds_of(reg: &MemoryRegistry, name: &str) -> i64 {
    reg.current_committed_state(name)
        .unwrap()
        .get("timeStamp.secondsPastEpoch")
        .and_then(Value::as_i64)
        .unwrap()
}

#[test]
fn no_value_write_refreshes_timestamp_only() {
    let reg = registry();
    let engine = RuleEngine::new().with_rule(ticking_clock()).unwrap();
    reg.insert("PLAIN", double(7.0), engine).unwrap();
    let before = seconds_of(&reg, "PLAIN");

    let mut rx = reg.subscribe();
    let after = reg.post("PLAIN", FieldUpdates::new()).unwrap();
    assert_eq!(after.get("value"), Some(&Value::Double(7.0)));
    assert!(seconds_of(&reg, "PLAIN") > before);

    let update = rx.try_recv().unwrap();
    assert!(update.changed.iter().all(|p| p.starts_with("timeStamp.")));
    assert!(!update.changed.contains(&"value".to_string()));
}

#[test]
fn forward_link_refreshes_plain_target_timestamp() {
    let reg = registry();
    let target = RuleEngine::new().with_rule(ticking_clock()).unwrap();
    reg.insert("B", double(3.0), target).unwrap();

    let source = RuleEngine::new()
        .with_rule(ForwardLinkRule::new(vec!["B".into()], reg.handle(), Duration::from_millis(50)))
        .unwrap()
        .with_rule(TimestampRule::new())
        .unwrap();
    reg.insert("A", double(0.0), source).unwrap();
    let before = seconds_of(&reg, "B");

    reg.put("A", updates(&[("value", Value::Double(1.0))]), &CallerContext::default())
        .unwrap();
    assert!(seconds_of(&reg, "B") > before);
    assert_eq!(value_of(&reg, "B"), 3.0);
}

#[test]
fn no_value_write_without_timestamp_rule_commits_nothing() {
    let reg = registry();
    let engine = RuleEngine::new().with_rule(ControlRule::default()).unwrap();
    reg.insert("BARE", double(7.0), engine).unwrap();
    let before = reg.current_committed_state("BARE").unwrap();

    let mut rx = reg.subscribe();
    let after = reg.post("BARE", FieldUpdates::new()).unwrap();
    assert_eq!(after, before);
    assert!(rx.try_recv().is_err());
}

#[test]
fn forward_chain_is_bounded() {
    let reg = registry();
    let counter: Arc<dyn RecordAccess> = Arc::new(Counter::default());
    let engine = RuleEngine::new()
        .with_rule(calc(counter, "pv[0]", &["TICKS"]))
        .unwrap()
        .with_rule(ForwardLinkRule::new(
            vec!["LOOP".into()],
            reg.handle(),
            Duration::from_millis(50),
        ))
        .unwrap();
    reg.insert("LOOP", double(0.0), engine).unwrap();
    let after_insert = value_of(&reg, "LOOP");

    reg.post("LOOP", FieldUpdates::new()).unwrap();
    // One top-level write plus three nested ones under a depth of 4.
    assert_eq!(value_of(&reg, "LOOP"), after_insert + 4.0);

    let dropped = reg.audit().query(
        "LOOP",
        &LogQueryParams {
            level: Some(LogLevel::Warning),
            phase: Some(ExecutionPhase::ForwardLink),
            ..LogQueryParams::default()
        },
    );
    assert!(!dropped.is_empty());
}

#[test]
fn self_read_times_out_instead_of_deadlocking() {
    let reg = registry();
    let engine = RuleEngine::new()
        .with_rule(calc(reg.handle(), "pv[0] + 1", &["SELF"]))
        .unwrap();
    reg.insert("SELF", double(1.0), engine).unwrap();

    let err = reg.post("SELF", FieldUpdates::new()).unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(value_of(&reg, "SELF"), 1.0);
}

#[test]
fn subscribers_see_commits() {
    let reg = registry();
    let mut rx = reg.subscribe();
    reg.insert("A", double(1.0), plain_engine()).unwrap();
    reg.post("A", updates(&[("value", Value::Double(2.0))])).unwrap();

    let created = rx.try_recv().unwrap();
    assert_eq!(created.name, "A");
    let update = rx.try_recv().unwrap();
    assert!(update.changed.contains(&"value".to_string()));
    assert!(update.changed.contains(&"timeStamp.secondsPastEpoch".to_string()));
    assert_eq!(update.record.get("value"), Some(&Value::Double(2.0)));
}

// ── Handle ──────────────────────────────────────────────────────

#[test]
fn handle_reads_writes_and_closes() {
    let reg = registry();
    reg.insert("A", double(1.5), plain_engine()).unwrap();
    let handle = reg.handle();

    assert_eq!(handle.read("A", Duration::from_millis(10)).unwrap(), Value::Double(1.5));
    assert_eq!(
        handle.read("B", Duration::from_millis(10)).unwrap_err(),
        AccessError::NotFound("B".into())
    );
    handle
        .write("A", updates(&[("value", Value::Double(4.0))]), Duration::from_millis(10))
        .unwrap();
    assert_eq!(value_of(&reg, "A"), 4.0);

    drop(reg);
    assert_eq!(handle.read("A", Duration::from_millis(10)).unwrap_err(), AccessError::Closed);
}
