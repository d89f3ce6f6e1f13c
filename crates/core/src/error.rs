use thiserror::Error;

use crate::value::FieldType;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("type mismatch for '{path}': expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: FieldType,
        found: &'static str,
    },

    #[error("duplicate field '{0}'")]
    DuplicateField(String),

    #[error("cannot project record: {0}")]
    InvalidProjection(String),
}
