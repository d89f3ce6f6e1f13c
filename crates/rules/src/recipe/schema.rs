//! YAML recipe types.
//!
//! A recipe file is a mapping of record name → [`Recipe`]:
//!
//! ```yaml
//! PUMP:SPEED:
//!   type: DOUBLE
//!   description: Pump speed setpoint
//!   units: rpm
//!   control: { low: 0, high: 3000, min_step: 5 }
//!   valueAlarm: { highWarningLimit: 2500, highAlarmLimit: 2900 }
//! ```

use std::fmt;

use indexmap::IndexMap;
use pvflow_core::{AlarmSeverity, ScalarType, Value};
use serde::{Deserialize, Serialize};

/// Record name → recipe, in file order.
pub type RecipeFile = IndexMap<String, Recipe>;

// ── Record type ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecipeType {
    Double,
    Integer,
    String,
    /// Accepted by the parser so it can be rejected with a clear message.
    Enum,
}

impl RecipeType {
    /// Element type of the record's `value`, `None` for unsupported types.
    pub fn scalar_type(self) -> Option<ScalarType> {
        match self {
            RecipeType::Double => Some(ScalarType::Double),
            RecipeType::Integer => Some(ScalarType::Int),
            RecipeType::String => Some(ScalarType::String),
            RecipeType::Enum => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, RecipeType::Double | RecipeType::Integer)
    }
}

impl fmt::Display for RecipeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecipeType::Double => write!(f, "DOUBLE"),
            RecipeType::Integer => write!(f, "INTEGER"),
            RecipeType::String => write!(f, "STRING"),
            RecipeType::Enum => write!(f, "ENUM"),
        }
    }
}

// ── Recipe ──────────────────────────────────────────────────────────

/// How to build one record and its rule engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Recipe {
    /// Required; kept optional so a missing key is a validation error, not a parse error.
    #[serde(rename = "type", default)]
    pub kind: Option<RecipeType>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub initial: Option<Value>,
    #[serde(default)]
    pub array_size: Option<usize>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub precision: Option<i64>,
    /// Reject every external write to the record.
    #[serde(default)]
    pub read_only: bool,
    /// Sub-structures external writes may not touch.
    #[serde(default)]
    pub read_only_fields: Vec<ReadOnlyField>,
    #[serde(default)]
    pub control: Option<ControlRecipe>,
    #[serde(default)]
    pub display: Option<DisplayRecipe>,
    #[serde(rename = "valueAlarm", default)]
    pub value_alarm: Option<ValueAlarmRecipe>,
    #[serde(default)]
    pub calc: Option<CalcRecipe>,
    #[serde(default)]
    pub forward_links: Vec<String>,
}

impl Recipe {
    /// Whether the record's `value` is an array.
    pub fn is_array(&self) -> bool {
        matches!(self.initial, Some(Value::Array(_))) || self.array_size.is_some_and(|n| n > 1)
    }

    pub fn is_read_only(&self, field: ReadOnlyField) -> bool {
        self.read_only_fields.contains(&field)
    }

    /// Records whose commits this record reacts to.
    pub fn inputs(&self) -> &[String] {
        self.calc.as_ref().map(|c| c.variables.as_slice()).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadOnlyField {
    #[serde(rename = "alarm")]
    Alarm,
    #[serde(rename = "control")]
    Control,
    #[serde(rename = "valueAlarm")]
    ValueAlarm,
}

/// `control` block. `low` and `high` are required.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ControlRecipe {
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub min_step: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DisplayRecipe {
    #[serde(rename = "limitLow", default)]
    pub limit_low: Option<f64>,
    #[serde(rename = "limitHigh", default)]
    pub limit_high: Option<f64>,
}

/// `valueAlarm` block. Missing limits never fire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ValueAlarmRecipe {
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub low_alarm_limit: Option<f64>,
    #[serde(default)]
    pub low_warning_limit: Option<f64>,
    #[serde(default)]
    pub high_warning_limit: Option<f64>,
    #[serde(default)]
    pub high_alarm_limit: Option<f64>,
    #[serde(default)]
    pub low_alarm_severity: Option<SeveritySpec>,
    #[serde(default)]
    pub low_warning_severity: Option<SeveritySpec>,
    #[serde(default)]
    pub high_warning_severity: Option<SeveritySpec>,
    #[serde(default)]
    pub high_alarm_severity: Option<SeveritySpec>,
    #[serde(default)]
    pub hysteresis: i64,
}

fn default_active() -> bool {
    true
}

/// Alarm severity as written in YAML: a code (`2`) or a name (`MAJOR`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SeveritySpec {
    Code(i64),
    Name(String),
}

impl SeveritySpec {
    pub fn resolve(&self) -> Result<AlarmSeverity, String> {
        match self {
            SeveritySpec::Code(code) => AlarmSeverity::try_from(*code),
            SeveritySpec::Name(name) => name.parse(),
        }
    }
}

/// `calc` block: `pv[i]` in `calc_str` reads `variables[i]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CalcRecipe {
    pub calc_str: String,
    #[serde(default)]
    pub variables: Vec<String>,
}
