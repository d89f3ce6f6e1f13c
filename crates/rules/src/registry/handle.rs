use std::sync::Weak;
use std::time::Duration;

use pvflow_core::Value;

use crate::access::{AccessError, FieldUpdates, RecordAccess};
use crate::context::Trigger;

use super::core::{Inner, MemoryRegistry};

/// [`RecordAccess`] backed by a registry.
///
/// Holds only a weak reference so that rules stored inside the registry do
/// not keep it alive; calls after the registry is dropped fail with
/// [`AccessError::Closed`].
pub struct RegistryHandle {
    inner: Weak<Inner>,
}

impl RegistryHandle {
    pub(super) fn new(inner: Weak<Inner>) -> Self {
        Self { inner }
    }

    fn registry(&self) -> Result<MemoryRegistry, AccessError> {
        self.inner
            .upgrade()
            .map(|inner| MemoryRegistry { inner })
            .ok_or(AccessError::Closed)
    }
}

impl RecordAccess for RegistryHandle {
    fn read(&self, record: &str, timeout: Duration) -> Result<Value, AccessError> {
        self.registry()?
            .read_value(record, timeout)
            .map_err(|e| e.into_access_error())?
            .ok_or_else(|| AccessError::NoValue(record.to_string()))
    }

    fn write(&self, record: &str, updates: FieldUpdates, timeout: Duration) -> Result<(), AccessError> {
        self.registry()?
            .write(record, Trigger::Merge, updates, None, timeout)
            .map(|_| ())
            .map_err(|e| e.into_access_error())
    }
}
