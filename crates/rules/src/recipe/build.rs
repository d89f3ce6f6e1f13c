//! Recipe validation and record/engine construction.

use std::sync::Arc;

use pvflow_core::config::EngineConfig;
use pvflow_core::{AlarmSeverity, FieldType, NtScalar, Record, ScalarType, Value};

use crate::access::RecordAccess;
use crate::array::ScalarToArrayWrapper;
use crate::engine::RuleEngine;
use crate::error::RuleError;
use crate::rules::{
    AlarmRule, CalcExpr, CalcRule, ControlRule, ControlSettings, ForwardLinkRule, ReadOnlyRule,
    Threshold, TimestampRule, ValueAlarmRule,
};

use super::error::{RecipeError, Result};
use super::schema::{ReadOnlyField, Recipe, RecipeType, SeveritySpec, ValueAlarmRecipe};

const MIN_INT32: f64 = i32::MIN as f64;
const MAX_INT32: f64 = i32::MAX as f64;

fn invalid(name: &str, msg: impl std::fmt::Display) -> RecipeError {
    RecipeError::Validation(format!("record '{}': {}", name, msg))
}

impl Recipe {
    /// The declared type. Call after [`validate`](Self::validate).
    fn record_type(&self, name: &str) -> Result<RecipeType> {
        self.kind.ok_or_else(|| invalid(name, "'type' not specified"))
    }

    fn element(&self, name: &str) -> Result<ScalarType> {
        let kind = self.record_type(name)?;
        kind.scalar_type()
            .ok_or_else(|| invalid(name, format!("type {} is not supported", kind)))
    }

    /// Check everything that can be checked on one recipe in isolation.
    pub fn validate(&self, name: &str) -> Result<()> {
        let kind = self.record_type(name)?;
        if self.description.is_none() {
            return Err(invalid(name, "'description' not specified"));
        }
        self.element(name)?;

        if !kind.is_numeric() {
            for (present, block) in [
                (self.control.is_some(), "control"),
                (self.display.is_some(), "display"),
                (self.value_alarm.is_some(), "valueAlarm"),
                (self.calc.is_some(), "calc"),
            ] {
                if present {
                    return Err(invalid(name, format!("{} is not supported on {} records", block, kind)));
                }
            }
        }

        if let Some(control) = &self.control {
            let (Some(low), Some(high)) = (control.low, control.high) else {
                return Err(invalid(name, "control requires both 'low' and 'high'"));
            };
            if low > high {
                return Err(invalid(name, format!("control low {} is above high {}", low, high)));
            }
            if control.min_step < 0.0 {
                return Err(invalid(name, "control min_step must not be negative"));
            }
        }

        if let Some(alarm) = &self.value_alarm {
            for spec in [
                &alarm.low_alarm_severity,
                &alarm.low_warning_severity,
                &alarm.high_warning_severity,
                &alarm.high_alarm_severity,
            ]
            .into_iter()
            .flatten()
            {
                spec.resolve().map_err(|e| invalid(name, e))?;
            }
        }

        if let Some(calc) = &self.calc {
            if self.is_array() {
                return Err(invalid(name, "calc is not supported on array records"));
            }
            CalcExpr::parse(&calc.calc_str, calc.variables.len())
                .map_err(|e| invalid(name, format!("calc `{}`: {}", calc.calc_str, e)))?;
        }

        if self.forward_links.iter().any(|t| t.is_empty()) {
            return Err(invalid(name, "forward_links entries must not be empty"));
        }

        if let (Some(Value::Array(items)), Some(size)) = (&self.initial, self.array_size) {
            if items.len() != size {
                return Err(invalid(
                    name,
                    format!("initial has {} elements but array_size is {}", items.len(), size),
                ));
            }
        }
        Ok(())
    }

    fn initial_value(&self, element: ScalarType) -> Value {
        match &self.initial {
            Some(Value::Array(items)) => Value::Array(items.clone()),
            other => {
                let fill = other.clone().unwrap_or_else(|| element.default_value());
                if self.is_array() {
                    Value::Array(vec![fill; self.array_size.unwrap_or(1)])
                } else {
                    fill
                }
            }
        }
    }

    /// Materialize the record described by this recipe.
    pub fn build_record(&self, name: &str) -> Result<Record> {
        let element = self.element(name)?;
        let description = self.description.clone().unwrap_or_default();
        let with_display = self.display.is_some() || self.units.is_some() || self.precision.is_some();

        let mut nt = if self.is_array() {
            NtScalar::array(element)
        } else {
            NtScalar::scalar(element)
        };
        nt = nt
            .initial(self.initial_value(element))
            .extra("descriptor", FieldType::Scalar(ScalarType::String), description.as_str());
        if with_display {
            nt = nt.display();
        }
        if self.control.is_some() {
            nt = nt.control();
        }
        if self.value_alarm.is_some() {
            nt = nt.value_alarm();
        }

        let mut record = nt.build()?;
        let (min, max) = match element {
            ScalarType::Int => (MIN_INT32, MAX_INT32),
            _ => (f64::NEG_INFINITY, f64::INFINITY),
        };

        if with_display {
            record.set("display.description", description.as_str())?;
            if let Some(units) = &self.units {
                record.set("display.units", units.as_str())?;
            }
            if let Some(precision) = self.precision {
                record.set("display.precision", precision)?;
            }
            let display = self.display.as_ref();
            record.set("display.limitLow", display.and_then(|d| d.limit_low).unwrap_or(min))?;
            record.set("display.limitHigh", display.and_then(|d| d.limit_high).unwrap_or(max))?;
        }

        if let Some(control) = &self.control {
            ControlSettings {
                low: control.low.unwrap_or(0.0),
                high: control.high.unwrap_or(0.0),
                min_step: control.min_step,
            }
            .apply(&mut record)?;
        }

        if let Some(alarm) = &self.value_alarm {
            apply_value_alarm(&mut record, alarm, min, max).map_err(|e| invalid(name, e))?;
        }
        Ok(record)
    }

    /// Assemble the rule engine for this recipe.
    ///
    /// Order: read_only, calc, alarm, control, valueAlarm, forward_link,
    /// timestamp. Control and valueAlarm are lifted element-wise for arrays.
    pub fn build_engine(
        &self,
        name: &str,
        access: Arc<dyn RecordAccess>,
        config: &EngineConfig,
    ) -> Result<RuleEngine> {
        let register_err = |e: RuleError| invalid(name, e);
        let mut engine = RuleEngine::new();

        if self.read_only {
            engine.register(ReadOnlyRule).map_err(register_err)?;
        }
        if let Some(calc) = &self.calc {
            let rule = CalcRule::new(
                &calc.calc_str,
                calc.variables.clone(),
                Arc::clone(&access),
                config.io_timeout(),
            )
            .map_err(|e| invalid(name, e))?;
            engine.register(rule).map_err(register_err)?;
        }
        engine
            .register(AlarmRule::new(self.is_read_only(ReadOnlyField::Alarm)))
            .map_err(register_err)?;

        if self.control.is_some() {
            let rule = ControlRule::new(self.is_read_only(ReadOnlyField::Control));
            if self.is_array() {
                engine.register(ScalarToArrayWrapper::new(rule)).map_err(register_err)?;
            } else {
                engine.register(rule).map_err(register_err)?;
            }
        }
        if self.value_alarm.is_some() {
            let rule = ValueAlarmRule::new(self.is_read_only(ReadOnlyField::ValueAlarm))
                .clear_on_deactivate(config.clear_alarm_on_deactivate);
            if self.is_array() {
                engine.register(ScalarToArrayWrapper::new(rule)).map_err(register_err)?;
            } else {
                engine.register(rule).map_err(register_err)?;
            }
        }
        if !self.forward_links.is_empty() {
            engine
                .register(ForwardLinkRule::new(
                    self.forward_links.clone(),
                    access,
                    config.io_timeout(),
                ))
                .map_err(register_err)?;
        }
        engine.register(TimestampRule::new()).map_err(register_err)?;
        Ok(engine)
    }
}

fn apply_value_alarm(
    record: &mut Record,
    alarm: &ValueAlarmRecipe,
    min: f64,
    max: f64,
) -> std::result::Result<(), String> {
    let severity = |spec: &Option<SeveritySpec>, default: AlarmSeverity| {
        spec.as_ref().map(|s| s.resolve()).transpose().map(|s| s.unwrap_or(default))
    };
    let settings = [
        (
            Threshold::LowAlarm,
            alarm.low_alarm_limit.unwrap_or(min),
            severity(&alarm.low_alarm_severity, AlarmSeverity::Major)?,
        ),
        (
            Threshold::LowWarning,
            alarm.low_warning_limit.unwrap_or(min),
            severity(&alarm.low_warning_severity, AlarmSeverity::Minor)?,
        ),
        (
            Threshold::HighWarning,
            alarm.high_warning_limit.unwrap_or(max),
            severity(&alarm.high_warning_severity, AlarmSeverity::Minor)?,
        ),
        (
            Threshold::HighAlarm,
            alarm.high_alarm_limit.unwrap_or(max),
            severity(&alarm.high_alarm_severity, AlarmSeverity::Major)?,
        ),
    ];

    let set = |record: &mut Record, path: &str, value: Value| record.set(path, value).map_err(|e| e.to_string());
    set(record, "valueAlarm.active", Value::Bool(alarm.active))?;
    for (threshold, limit, sev) in settings {
        set(record, threshold.limit_path(), Value::Double(limit))?;
        set(record, threshold.severity_path(), Value::from(sev))?;
    }
    set(record, "valueAlarm.hysteresis", Value::Int(alarm.hysteresis))?;
    Ok(())
}
