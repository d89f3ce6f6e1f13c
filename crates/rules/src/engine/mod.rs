//! Ordered rule evaluation for a single record.
//!
//! The engine owns the rules for one record, keeps `read_only` first and
//! `timestamp` last, and turns each write into either a modified candidate
//! ready for commit or a [`RuleError`](crate::error::RuleError).

mod core;

#[cfg(test)]
mod tests;

pub use self::core::RuleEngine;
