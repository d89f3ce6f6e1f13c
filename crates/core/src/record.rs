//! Change-tracked structured record.
//!
//! A [`Record`] is an ordered map of leaf field paths (`"control.limitLow"`)
//! to typed values. Sub-structures are implied by dotted prefixes. Every leaf
//! carries a `changed` flag recording whether it was explicitly set in the
//! current write; rules use these flags to decide what a candidate update
//! actually touches.

use indexmap::IndexMap;
use serde::{Serialize, Serializer};

use crate::error::RecordError;
use crate::value::{FieldType, Value};

/// Type id suffix of scalar-array normative types.
const ARRAY_ID_MARKER: &str = "NTScalarArray";
const SCALAR_ID_MARKER: &str = "NTScalar";

/// A single leaf field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    ty: FieldType,
    value: Value,
    changed: bool,
}

impl Field {
    pub fn ty(&self) -> FieldType {
        self.ty
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn changed(&self) -> bool {
        self.changed
    }
}

/// Whether `path` is `prefix` itself or a leaf nested beneath it.
/// The empty prefix matches everything.
fn is_under(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() || path == prefix {
        return true;
    }
    path.len() > prefix.len()
        && path.starts_with(prefix)
        && path.as_bytes()[prefix.len()] == b'.'
}

/// Structured value with per-field change tracking.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    type_id: String,
    fields: IndexMap<String, Field>,
}

impl Record {
    /// Start building a record with the given structure id.
    pub fn builder(type_id: impl Into<String>) -> RecordBuilder {
        RecordBuilder {
            type_id: type_id.into(),
            fields: IndexMap::new(),
            error: None,
        }
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    /// Number of leaf fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate leaf fields in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(k, f)| (k.as_str(), f))
    }

    /// Whether `path` names a leaf or a sub-structure of this record.
    pub fn has_field(&self, path: &str) -> bool {
        self.fields.contains_key(path) || self.fields.keys().any(|k| is_under(k, path))
    }

    /// Declared type of a leaf field.
    pub fn field_type(&self, path: &str) -> Option<FieldType> {
        self.fields.get(path).map(|f| f.ty)
    }

    /// Current value of a leaf field.
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.fields.get(path).map(|f| &f.value)
    }

    /// Set a leaf field, coercing to its declared type, and mark it changed.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<(), RecordError> {
        let field = self
            .fields
            .get_mut(path)
            .ok_or_else(|| RecordError::UnknownField(path.to_string()))?;
        field.value = value.into().coerce(path, field.ty)?;
        field.changed = true;
        Ok(())
    }

    /// Whether the leaf, or any leaf under the sub-structure, is marked changed.
    pub fn is_changed(&self, path: &str) -> bool {
        if let Some(field) = self.fields.get(path) {
            return field.changed;
        }
        self.fields
            .iter()
            .any(|(k, f)| f.changed && is_under(k, path))
    }

    /// Set or clear the changed flag on a leaf or on every leaf of a sub-structure.
    pub fn mark_changed(&mut self, path: &str, changed: bool) -> Result<(), RecordError> {
        let mut matched = false;
        for (k, f) in self.fields.iter_mut() {
            if is_under(k, path) {
                f.changed = changed;
                matched = true;
            }
        }
        if matched {
            Ok(())
        } else {
            Err(RecordError::UnknownField(path.to_string()))
        }
    }

    /// Leaf paths at or beneath `prefix`, in declaration order.
    pub fn field_paths_under(&self, prefix: &str) -> Vec<&str> {
        self.fields
            .keys()
            .filter(|k| is_under(k, prefix))
            .map(String::as_str)
            .collect()
    }

    /// Whether anything at all is marked changed.
    pub fn any_changed(&self) -> bool {
        self.fields.values().any(|f| f.changed)
    }

    /// Leaf paths currently marked changed.
    pub fn changed_paths(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, f)| f.changed)
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Set every changed flag to `changed`.
    pub fn mark_all(&mut self, changed: bool) {
        for f in self.fields.values_mut() {
            f.changed = changed;
        }
    }

    /// Same shape and values with nothing marked changed.
    ///
    /// This is the starting point for a partial update against a committed record.
    pub fn blank_candidate(&self) -> Record {
        let mut candidate = self.clone();
        candidate.mark_all(false);
        candidate
    }

    /// Apply the changed leaves of `candidate` on top of this record.
    ///
    /// The result carries exactly the candidate's changed set, so observers
    /// see which fields the write touched. Unchanged candidate leaves are
    /// ignored regardless of their values.
    pub fn overlay_changed(&self, candidate: &Record) -> Result<Record, RecordError> {
        let mut merged = self.blank_candidate();
        for (path, field) in candidate.fields.iter().filter(|(_, f)| f.changed) {
            merged.set(path, field.value.clone())?;
        }
        Ok(merged)
    }

    /// Project an array record onto its scalar counterpart.
    ///
    /// Every field is copied as-is except `value`, which is narrowed from an
    /// array of T to a single T holding `element`. With `element == None` the
    /// `value` leaf is left out entirely, which models "no value for this slot".
    /// The changed flag of `value` carries over from the array.
    pub fn scalar_projection(&self, element: Option<Value>) -> Result<Record, RecordError> {
        let value_field = self
            .fields
            .get("value")
            .ok_or_else(|| RecordError::InvalidProjection("record has no value field".to_string()))?;
        let scalar_ty = match value_field.ty {
            FieldType::Array(t) => FieldType::Scalar(t),
            FieldType::Scalar(_) => {
                return Err(RecordError::InvalidProjection(
                    "value field is not an array".to_string(),
                ))
            }
        };

        let mut fields = IndexMap::with_capacity(self.fields.len());
        for (path, field) in &self.fields {
            if path != "value" {
                fields.insert(path.clone(), field.clone());
                continue;
            }
            if let Some(element) = element.clone() {
                fields.insert(
                    path.clone(),
                    Field {
                        ty: scalar_ty,
                        value: element.coerce(path, scalar_ty)?,
                        changed: field.changed,
                    },
                );
            }
        }

        Ok(Record {
            type_id: self.type_id.replace(ARRAY_ID_MARKER, SCALAR_ID_MARKER),
            fields,
        })
    }

    /// Render as nested JSON, expanding dotted paths into objects.
    pub fn to_json(&self) -> serde_json::Value {
        let mut root = serde_json::Map::new();
        for (path, field) in &self.fields {
            let mut node = &mut root;
            let mut parts = path.split('.').peekable();
            while let Some(part) = parts.next() {
                if parts.peek().is_none() {
                    node.insert(
                        part.to_string(),
                        serde_json::to_value(&field.value).unwrap_or(serde_json::Value::Null),
                    );
                    break;
                }
                let entry = node
                    .entry(part.to_string())
                    .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
                if !entry.is_object() {
                    *entry = serde_json::Value::Object(serde_json::Map::new());
                }
                node = match entry {
                    serde_json::Value::Object(map) => map,
                    _ => unreachable!("entry was just made an object"),
                };
            }
        }
        serde_json::Value::Object(root)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Incremental [`Record`] construction. Fields start marked changed.
pub struct RecordBuilder {
    type_id: String,
    fields: IndexMap<String, Field>,
    error: Option<RecordError>,
}

impl RecordBuilder {
    /// Add a field holding its type's zero value.
    pub fn field(self, path: &str, ty: FieldType) -> Self {
        self.field_with(path, ty, ty.default_value())
    }

    /// Add a field with an explicit initial value.
    pub fn field_with(mut self, path: &str, ty: FieldType, value: impl Into<Value>) -> Self {
        if self.error.is_some() {
            return self;
        }
        if self.fields.contains_key(path) {
            self.error = Some(RecordError::DuplicateField(path.to_string()));
            return self;
        }
        match value.into().coerce(path, ty) {
            Ok(value) => {
                self.fields.insert(
                    path.to_string(),
                    Field {
                        ty,
                        value,
                        changed: true,
                    },
                );
            }
            Err(e) => self.error = Some(e),
        }
        self
    }

    pub fn build(self) -> Result<Record, RecordError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Ok(Record {
            type_id: self.type_id,
            fields: self.fields,
        })
    }
}
