//! Normative-Type record shapes.
//!
//! `NtScalar` builds the standard scalar / scalar-array process variable
//! layout: a `value` plus `alarm` and `timeStamp`, with optional `display`,
//! `control` and `valueAlarm` sub-structures.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RecordError;
use crate::record::Record;
use crate::value::{FieldType, ScalarType, Value};

pub const NT_SCALAR_ID: &str = "epics:nt/NTScalar:1.0";
pub const NT_SCALAR_ARRAY_ID: &str = "epics:nt/NTScalarArray:1.0";

// ── Alarm severity ────────────────────────────────────────────

/// Severity levels carried in `alarm.severity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum AlarmSeverity {
    NoAlarm = 0,
    Minor = 1,
    Major = 2,
    Invalid = 3,
    Undefined = 4,
}

impl AlarmSeverity {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for AlarmSeverity {
    type Error = String;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::NoAlarm),
            1 => Ok(Self::Minor),
            2 => Ok(Self::Major),
            3 => Ok(Self::Invalid),
            4 => Ok(Self::Undefined),
            other => Err(format!("invalid alarm severity {}", other)),
        }
    }
}

impl From<AlarmSeverity> for i64 {
    fn from(s: AlarmSeverity) -> i64 {
        s as i64
    }
}

impl From<AlarmSeverity> for Value {
    fn from(s: AlarmSeverity) -> Value {
        Value::Int(s as i64)
    }
}

impl FromStr for AlarmSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NO_ALARM" | "NONE" => Ok(Self::NoAlarm),
            "MINOR" => Ok(Self::Minor),
            "MAJOR" => Ok(Self::Major),
            "INVALID" => Ok(Self::Invalid),
            "UNDEFINED" => Ok(Self::Undefined),
            other => Err(format!("unknown alarm severity '{}'", other)),
        }
    }
}

impl fmt::Display for AlarmSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoAlarm => "NO_ALARM",
            Self::Minor => "MINOR",
            Self::Major => "MAJOR",
            Self::Invalid => "INVALID",
            Self::Undefined => "UNDEFINED",
        };
        write!(f, "{}", s)
    }
}

/// Split a wall-clock instant into (`secondsPastEpoch`, `nanoseconds`).
pub fn timestamp_parts(now: DateTime<Utc>) -> (i64, i64) {
    (now.timestamp(), i64::from(now.timestamp_subsec_nanos()))
}

// ── Builder ───────────────────────────────────────────────────

/// Builder for NTScalar / NTScalarArray records.
#[derive(Debug, Clone)]
pub struct NtScalar {
    element: ScalarType,
    array: bool,
    initial: Option<Value>,
    display: bool,
    control: bool,
    value_alarm: bool,
    extra: Vec<(String, FieldType, Value)>,
    timestamp: Option<(i64, i64)>,
}

impl NtScalar {
    pub fn scalar(element: ScalarType) -> Self {
        Self::new(element, false)
    }

    pub fn array(element: ScalarType) -> Self {
        Self::new(element, true)
    }

    fn new(element: ScalarType, array: bool) -> Self {
        Self {
            element,
            array,
            initial: None,
            display: false,
            control: false,
            value_alarm: false,
            extra: Vec::new(),
            timestamp: None,
        }
    }

    pub fn initial(mut self, value: impl Into<Value>) -> Self {
        self.initial = Some(value.into());
        self
    }

    pub fn display(mut self) -> Self {
        self.display = true;
        self
    }

    pub fn control(mut self) -> Self {
        self.control = true;
        self
    }

    pub fn value_alarm(mut self) -> Self {
        self.value_alarm = true;
        self
    }

    /// Extra top-level or nested field outside the normative layout.
    pub fn extra(mut self, path: &str, ty: FieldType, value: impl Into<Value>) -> Self {
        self.extra.push((path.to_string(), ty, value.into()));
        self
    }

    /// Supply an explicit time, which is then kept by the timestamp rule.
    pub fn with_timestamp(mut self, seconds: i64, nanoseconds: i64) -> Self {
        self.timestamp = Some((seconds, nanoseconds));
        self
    }

    pub fn value_type(&self) -> FieldType {
        if self.array {
            FieldType::Array(self.element)
        } else {
            FieldType::Scalar(self.element)
        }
    }

    pub fn build(self) -> Result<Record, RecordError> {
        let int = FieldType::Scalar(ScalarType::Int);
        let double = FieldType::Scalar(ScalarType::Double);
        let string = FieldType::Scalar(ScalarType::String);
        let limit = FieldType::Scalar(self.element);
        let value_ty = self.value_type();

        let type_id = if self.array { NT_SCALAR_ARRAY_ID } else { NT_SCALAR_ID };
        let initial = self.initial.unwrap_or_else(|| value_ty.default_value());
        let (secs, nanos) = self.timestamp.unwrap_or((0, 0));

        let mut builder = Record::builder(type_id)
            .field_with("value", value_ty, initial)
            .field("alarm.severity", int)
            .field("alarm.status", int)
            .field("alarm.message", string)
            .field_with("timeStamp.secondsPastEpoch", int, secs)
            .field_with("timeStamp.nanoseconds", int, nanos)
            .field("timeStamp.userTag", int);

        if self.display {
            builder = builder
                .field("display.limitLow", double)
                .field("display.limitHigh", double)
                .field("display.description", string)
                .field("display.units", string)
                .field("display.precision", int);
        }
        if self.control {
            builder = builder
                .field("control.limitLow", double)
                .field("control.limitHigh", double)
                .field("control.minStep", double);
        }
        if self.value_alarm {
            builder = builder
                .field_with("valueAlarm.active", FieldType::Scalar(ScalarType::Bool), false)
                .field("valueAlarm.lowAlarmLimit", limit)
                .field("valueAlarm.lowWarningLimit", limit)
                .field("valueAlarm.highWarningLimit", limit)
                .field("valueAlarm.highAlarmLimit", limit)
                .field("valueAlarm.lowAlarmSeverity", int)
                .field("valueAlarm.lowWarningSeverity", int)
                .field("valueAlarm.highWarningSeverity", int)
                .field("valueAlarm.highAlarmSeverity", int)
                .field("valueAlarm.hysteresis", int);
        }
        for (path, ty, value) in self.extra {
            builder = builder.field_with(&path, ty, value);
        }

        let mut record = builder.build()?;
        if self.timestamp.is_none() {
            record.mark_changed("timeStamp", false)?;
        }
        Ok(record)
    }
}
