pub mod config;
pub mod error;
pub mod nt;
pub mod record;
pub mod value;

pub use config::Config;
pub use error::*;
pub use nt::{AlarmSeverity, NtScalar};
pub use record::{Field, Record, RecordBuilder};
pub use value::{FieldType, ScalarType, Value};
