//! In-memory record registry.
//!
//! Owns the committed state of every named record together with its
//! [`RuleEngine`](crate::engine::RuleEngine), serializes read-merge-commit per
//! record, publishes committed updates, and drives monitor and forward-link
//! fan-out after each commit.

mod core;
mod error;
mod handle;

#[cfg(test)]
mod tests;

pub use self::core::{MemoryRegistry, RecordUpdate};
pub use self::error::{RegistryError, Result};
pub use self::handle::RegistryHandle;
