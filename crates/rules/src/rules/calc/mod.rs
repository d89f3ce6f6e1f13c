//! Derived value computed from other records.

mod expr;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use pvflow_core::{Record, Value};
use tracing::{debug, warn};

use crate::access::RecordAccess;
use crate::outcome::RuleOutcome;
use crate::rule::{Evaluation, Rule};

pub use self::expr::{CalcError, CalcExpr};

/// Sets `value` from an expression over the current values of `variables`.
///
/// `pv[i]` in the expression refers to `variables[i]`. Every read is a
/// blocking call through [`RecordAccess`] bounded by the configured timeout;
/// a failed read aborts the write.
pub struct CalcRule {
    expr: CalcExpr,
    variables: Vec<String>,
    access: Arc<dyn RecordAccess>,
    timeout: Duration,
}

impl CalcRule {
    pub const NAME: &'static str = "calc";

    pub fn new(
        calc_str: &str,
        variables: Vec<String>,
        access: Arc<dyn RecordAccess>,
        timeout: Duration,
    ) -> Result<Self, CalcError> {
        let expr = CalcExpr::parse(calc_str, variables.len())?;
        Ok(Self {
            expr,
            variables,
            access,
            timeout,
        })
    }

    pub fn expression(&self) -> &CalcExpr {
        &self.expr
    }

    fn read_all(&self) -> Result<Vec<f64>, RuleOutcome> {
        let mut values = Vec::with_capacity(self.variables.len());
        for name in &self.variables {
            let value = self.access.read(name, self.timeout).map_err(|e| {
                warn!(record = %name, error = %e, "calc dependency read failed");
                RuleOutcome::dependency_unavailable(name.as_str(), e.to_string())
            })?;
            let number = match value {
                Value::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
                other => other.as_f64(),
            };
            match number {
                Some(n) => values.push(n),
                None => {
                    return Err(RuleOutcome::dependency_unavailable(
                        name.as_str(),
                        "value is not numeric",
                    ))
                }
            }
        }
        Ok(values)
    }
}

impl fmt::Debug for CalcRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalcRule")
            .field("expr", &self.expr.source())
            .field("variables", &self.variables)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Rule for CalcRule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn fields(&self) -> Option<&[&'static str]> {
        None
    }

    /// Dependencies may not exist yet at materialization; the initial value
    /// stands until the first input commit re-triggers this record.
    fn evaluate_for_init(&self, _candidate: &mut Record) -> Evaluation {
        Ok(RuleOutcome::Continue)
    }

    fn evaluate_for_merge(&self, _old: &Record, new: &mut Record) -> Evaluation {
        let values = match self.read_all() {
            Ok(values) => values,
            Err(outcome) => return Ok(outcome),
        };
        match self.expr.eval(&values) {
            Ok(result) => {
                debug!(expr = %self.expr, ?values, result, "calc evaluated");
                new.set("value", result)?;
                Ok(RuleOutcome::Continue)
            }
            Err(e) => Ok(RuleOutcome::abort(format!("calc `{}` failed: {}", self.expr, e))),
        }
    }

    fn inputs(&self) -> Vec<String> {
        self.variables.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::access::{AccessError, FieldUpdates};
    use pvflow_core::{NtScalar, ScalarType};

    struct Fixed(HashMap<String, Value>);

    impl RecordAccess for Fixed {
        fn read(&self, record: &str, timeout: Duration) -> Result<Value, AccessError> {
            match self.0.get(record) {
                Some(v) => Ok(v.clone()),
                None if record == "SLOW" => Err(AccessError::Timeout {
                    record: record.to_string(),
                    timeout_ms: crate::access::timeout_ms(timeout),
                }),
                None => Err(AccessError::NotFound(record.to_string())),
            }
        }

        fn write(&self, _: &str, _: FieldUpdates, _: Duration) -> Result<(), AccessError> {
            Ok(())
        }
    }

    fn access() -> Arc<dyn RecordAccess> {
        let mut values = HashMap::new();
        values.insert("A".to_string(), Value::Double(1.5));
        values.insert("B".to_string(), Value::Int(4));
        values.insert("FLAG".to_string(), Value::Bool(true));
        values.insert("NAME".to_string(), Value::from("pump"));
        Arc::new(Fixed(values))
    }

    fn rule(expr: &str, vars: &[&str]) -> CalcRule {
        CalcRule::new(
            expr,
            vars.iter().map(|s| s.to_string()).collect(),
            access(),
            Duration::from_millis(50),
        )
        .unwrap()
    }

    fn record() -> Record {
        NtScalar::scalar(ScalarType::Double).build().unwrap()
    }

    #[test]
    fn merge_computes_value() {
        let old = record();
        let mut new = old.blank_candidate();
        let outcome = rule("pv[0] * pv[1] + pv[2]", &["A", "B", "FLAG"])
            .evaluate_for_merge(&old, &mut new)
            .unwrap();
        assert_eq!(outcome, RuleOutcome::Continue);
        assert_eq!(new.get("value"), Some(&Value::Double(7.0)));
        assert!(new.is_changed("value"));
    }

    #[test]
    fn init_leaves_value_alone() {
        let mut rec = record();
        rule("pv[0]", &["A"]).evaluate_for_init(&mut rec).unwrap();
        assert_eq!(rec.get("value"), Some(&Value::Double(0.0)));
    }

    #[test]
    fn missing_dependency_aborts() {
        let old = record();
        let mut new = old.blank_candidate();
        let outcome = rule("pv[0] + pv[1]", &["A", "SLOW"])
            .evaluate_for_merge(&old, &mut new)
            .unwrap();
        assert!(matches!(
            outcome,
            RuleOutcome::Abort(crate::outcome::AbortReason::DependencyUnavailable { ref record, .. }) if record == "SLOW"
        ));
        assert!(!new.any_changed());
    }

    #[test]
    fn non_numeric_dependency_aborts() {
        let old = record();
        let mut new = old.blank_candidate();
        let outcome = rule("pv[0]", &["NAME"]).evaluate_for_merge(&old, &mut new).unwrap();
        assert!(outcome.is_abort());
    }

    #[test]
    fn evaluation_error_aborts() {
        let old = record();
        let mut new = old.blank_candidate();
        let outcome = rule("pv[0] / 0", &["A"]).evaluate_for_merge(&old, &mut new).unwrap();
        assert_eq!(outcome, RuleOutcome::abort("calc `pv[0] / 0` failed: division by zero"));
    }

    #[test]
    fn construction_validates_variable_count() {
        let err = CalcRule::new("pv[1]", vec!["A".into()], access(), Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, CalcError::VariableOutOfRange { index: 1, available: 1 }));
    }

    #[test]
    fn inputs_are_the_variables() {
        assert_eq!(rule("A + B", &["A", "B"]).inputs(), vec!["A".to_string(), "B".to_string()]);
    }
}
