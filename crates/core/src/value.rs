//! Typed field values and field type descriptors.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RecordError;

/// Element type of a scalar or array field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Bool,
    Int,
    Double,
    String,
}

impl ScalarType {
    /// Zero value used when a record is built without an explicit initial value.
    pub fn default_value(self) -> Value {
        match self {
            ScalarType::Bool => Value::Bool(false),
            ScalarType::Int => Value::Int(0),
            ScalarType::Double => Value::Double(0.0),
            ScalarType::String => Value::String(String::new()),
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ScalarType::Int | ScalarType::Double)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarType::Bool => write!(f, "bool"),
            ScalarType::Int => write!(f, "int"),
            ScalarType::Double => write!(f, "double"),
            ScalarType::String => write!(f, "string"),
        }
    }
}

/// Declared type of a record field. Fixed for the lifetime of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Scalar(ScalarType),
    Array(ScalarType),
}

impl FieldType {
    pub fn default_value(self) -> Value {
        match self {
            FieldType::Scalar(t) => t.default_value(),
            FieldType::Array(_) => Value::Array(Vec::new()),
        }
    }

    /// Element type, for both scalars and arrays.
    pub fn element(self) -> ScalarType {
        match self {
            FieldType::Scalar(t) | FieldType::Array(t) => t,
        }
    }

    pub fn is_array(self) -> bool {
        matches!(self, FieldType::Array(_))
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Scalar(t) => write!(f, "{}", t),
            FieldType::Array(t) => write!(f, "{}[]", t),
        }
    }
}

/// A field value.
///
/// Untagged so that YAML / JSON literals map directly: `5` is an `Int`,
/// `5.5` a `Double`, `[1, 2]` an `Array`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Array(Vec<Value>),
}

impl Value {
    /// Numeric view of the value. Bools, strings and arrays are not numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Double(d) if d.is_finite() => Some(d.trunc() as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Whether the value is "set": nonzero, nonempty or true.
    pub fn is_set(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Double(d) => *d != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
        }
    }

    /// Short type label used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Array(_) => "array",
        }
    }

    /// Convert the value to the declared field type.
    ///
    /// Ints widen to doubles; doubles truncate toward zero when stored in an
    /// int field. Arrays coerce element-wise. Anything else is a mismatch.
    pub fn coerce(self, path: &str, ty: FieldType) -> Result<Value, RecordError> {
        match ty {
            FieldType::Scalar(t) => self.coerce_scalar(path, t),
            FieldType::Array(t) => match self {
                Value::Array(items) => items
                    .into_iter()
                    .map(|item| item.coerce_scalar(path, t))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                other => Err(RecordError::TypeMismatch {
                    path: path.to_string(),
                    expected: ty,
                    found: other.type_name(),
                }),
            },
        }
    }

    fn coerce_scalar(self, path: &str, ty: ScalarType) -> Result<Value, RecordError> {
        let mismatch = |found: &'static str| RecordError::TypeMismatch {
            path: path.to_string(),
            expected: FieldType::Scalar(ty),
            found,
        };
        match (ty, self) {
            (ScalarType::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
            (ScalarType::Int, Value::Int(i)) => Ok(Value::Int(i)),
            (ScalarType::Int, Value::Double(d)) if in_i64_range(d) => Ok(Value::Int(d.trunc() as i64)),
            (ScalarType::Double, Value::Double(d)) => Ok(Value::Double(d)),
            (ScalarType::Double, Value::Int(i)) => Ok(Value::Double(i as f64)),
            (ScalarType::String, Value::String(s)) => Ok(Value::String(s)),
            (_, other) => Err(mismatch(other.type_name())),
        }
    }
}

/// Whether truncating `d` toward zero fits an `i64` without saturating.
/// `i64::MAX as f64` rounds up to 2^63, which is itself out of range.
fn in_i64_range(d: f64) -> bool {
    d.is_finite() && d >= i64::MIN as f64 && d < i64::MAX as f64
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_widens_to_double() {
        let v = Value::Int(3)
            .coerce("value", FieldType::Scalar(ScalarType::Double))
            .unwrap();
        assert_eq!(v, Value::Double(3.0));
    }

    #[test]
    fn double_truncates_into_int_field() {
        let v = Value::Double(-5.7)
            .coerce("value", FieldType::Scalar(ScalarType::Int))
            .unwrap();
        assert_eq!(v, Value::Int(-5));
    }

    #[test]
    fn non_finite_double_rejected_for_int() {
        let err = Value::Double(f64::INFINITY)
            .coerce("value", FieldType::Scalar(ScalarType::Int))
            .unwrap_err();
        assert!(matches!(err, RecordError::TypeMismatch { .. }));
    }

    #[test]
    fn out_of_range_double_rejected_for_int() {
        for d in [1e19, -1e20, 9.223372036854775807e18] {
            let err = Value::Double(d)
                .coerce("value", FieldType::Scalar(ScalarType::Int))
                .unwrap_err();
            assert!(matches!(err, RecordError::TypeMismatch { .. }), "{d}");
        }
        let v = Value::Double(-9.223372036854775808e18)
            .coerce("value", FieldType::Scalar(ScalarType::Int))
            .unwrap();
        assert_eq!(v, Value::Int(i64::MIN));
    }

    #[test]
    fn arrays_coerce_element_wise() {
        let v = Value::from(vec![1, 2, 3])
            .coerce("value", FieldType::Array(ScalarType::Double))
            .unwrap();
        assert_eq!(
            v,
            Value::Array(vec![Value::Double(1.0), Value::Double(2.0), Value::Double(3.0)])
        );
    }

    #[test]
    fn string_into_numeric_field_is_mismatch() {
        let err = Value::from("5")
            .coerce("control.limitLow", FieldType::Scalar(ScalarType::Double))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "type mismatch for 'control.limitLow': expected double, found string"
        );
    }

    #[test]
    fn untagged_yaml_literals() {
        let v: Value = serde_yaml::from_str("5").unwrap();
        assert_eq!(v, Value::Int(5));
        let v: Value = serde_yaml::from_str("5.5").unwrap();
        assert_eq!(v, Value::Double(5.5));
        let v: Value = serde_yaml::from_str("[1, 2.5]").unwrap();
        assert_eq!(v, Value::Array(vec![Value::Int(1), Value::Double(2.5)]));
    }

    #[test]
    fn is_set_semantics() {
        assert!(!Value::Int(0).is_set());
        assert!(Value::Int(2).is_set());
        assert!(!Value::from("").is_set());
        assert!(Value::from("highAlarm").is_set());
    }
}
