//! In-memory audit trail of record evaluations.
//!
//! Stores per-record entries capped at a configurable maximum (default 500)
//! with FIFO eviction. Uses `std::sync::RwLock` so it can be written from the
//! registry's blocking paths and read from async callers alike.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::Trigger;

/// Severity level for audit log entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Numeric severity for comparison (higher = more severe).
    pub fn as_severity(&self) -> u8 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Warning => 2,
            LogLevel::Error => 3,
        }
    }
}

/// Step of a write's lifecycle that produced the entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Init,
    Merge,
    Request,
    Commit,
    Abort,
    ForwardLink,
}

impl From<Trigger> for ExecutionPhase {
    fn from(trigger: Trigger) -> Self {
        match trigger {
            Trigger::Init => ExecutionPhase::Init,
            Trigger::Merge => ExecutionPhase::Merge,
            Trigger::Request => ExecutionPhase::Request,
        }
    }
}

/// A single audit log entry.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub record: String,
    pub level: LogLevel,
    pub phase: ExecutionPhase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Query parameters for filtering audit log entries.
#[derive(Debug, Default, Deserialize)]
pub struct LogQueryParams {
    /// Minimum log level (inclusive).
    pub level: Option<LogLevel>,
    pub phase: Option<ExecutionPhase>,
    /// Maximum number of entries to return (default 100).
    pub limit: Option<u32>,
    /// Only return entries at or after this RFC 3339 timestamp.
    pub since: Option<String>,
}

/// Per-record audit log with FIFO eviction.
#[derive(Clone)]
pub struct AuditLog {
    entries: Arc<RwLock<HashMap<String, VecDeque<LogEntry>>>>,
    max_entries_per_record: usize,
}

impl AuditLog {
    /// Create a new audit log with the default cap of 500 entries per record.
    pub fn new() -> Self {
        Self::with_max_entries(500)
    }

    pub fn with_max_entries(max: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_entries_per_record: max,
        }
    }

    pub fn log(&self, record: &str, level: LogLevel, phase: ExecutionPhase, message: impl Into<String>) {
        self.log_with_details(record, level, phase, message, None, None);
    }

    /// Append an entry with optional structured details and duration.
    pub fn log_with_details(
        &self,
        record: &str,
        level: LogLevel,
        phase: ExecutionPhase,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
        duration_ms: Option<u64>,
    ) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            record: record.to_string(),
            level,
            phase,
            message: message.into(),
            details,
            duration_ms,
        };

        let mut guard = self.entries.write().expect("audit_log lock poisoned");
        let deque = guard.entry(record.to_string()).or_default();
        deque.push_back(entry);
        while deque.len() > self.max_entries_per_record {
            deque.pop_front();
        }
    }

    /// Entries for a record, newest first.
    pub fn query(&self, record: &str, params: &LogQueryParams) -> Vec<LogEntry> {
        let guard = self.entries.read().expect("audit_log lock poisoned");
        let Some(deque) = guard.get(record) else {
            return Vec::new();
        };

        let min_severity = params.level.as_ref().map(LogLevel::as_severity).unwrap_or(0);
        let since: Option<DateTime<Utc>> = params
            .since
            .as_ref()
            .and_then(|s| s.parse::<DateTime<Utc>>().ok());
        let limit = params.limit.unwrap_or(100) as usize;

        deque
            .iter()
            .rev()
            .filter(|e| e.level.as_severity() >= min_severity)
            .filter(|e| params.phase.map_or(true, |p| e.phase == p))
            .filter(|e| since.map_or(true, |s| e.timestamp >= s))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn clear(&self, record: &str) {
        let mut guard = self.entries.write().expect("audit_log lock poisoned");
        guard.remove(record);
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}
