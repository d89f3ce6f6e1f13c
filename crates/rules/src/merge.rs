//! Field-level old/new merge view.

use pvflow_core::{Record, Value};

/// Read-only projection combining the last committed record with a candidate.
///
/// A field marked changed in `new` reads from `new`; anything else reads from
/// `old`. Without an `old` record (init), everything reads from `new`.
#[derive(Debug, Clone, Copy)]
pub struct MergedView<'a> {
    old: Option<&'a Record>,
    new: &'a Record,
}

impl<'a> MergedView<'a> {
    pub fn new(old: Option<&'a Record>, new: &'a Record) -> Self {
        Self { old, new }
    }

    /// View over the candidate alone.
    pub fn init(new: &'a Record) -> Self {
        Self { old: None, new }
    }

    pub fn get(&self, path: &str) -> Option<&'a Value> {
        match self.old {
            Some(old) if !self.new.is_changed(path) => {
                old.get(path).or_else(|| self.new.get(path))
            }
            _ => self.new.get(path),
        }
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(Value::as_f64)
    }

    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(Value::as_bool)
    }

    pub fn get_str(&self, path: &str) -> Option<&'a str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Whether the candidate explicitly sets `path`.
    pub fn is_changed(&self, path: &str) -> bool {
        self.new.is_changed(path)
    }

    /// The committed value of `path`, ignoring the candidate.
    pub fn old_value(&self, path: &str) -> Option<&'a Value> {
        self.old.and_then(|old| old.get(path))
    }

    pub fn has_old(&self) -> bool {
        self.old.is_some()
    }
}
