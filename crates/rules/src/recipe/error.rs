//! Error types and load result structures for the recipe loader.

use std::path::PathBuf;

use pvflow_core::RecordError;

#[derive(Debug, thiserror::Error)]
pub enum RecipeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Missing required keys, unsupported combinations, bad expressions, link cycles.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Notify watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Record(#[from] RecordError),

    /// Building or inserting a record into a registry failed.
    #[error("failed to install '{record}': {message}")]
    Install { record: String, message: String },
}

pub type Result<T> = std::result::Result<T, RecipeError>;

/// Outcome of loading a single recipe file.
#[derive(Debug)]
pub struct LoadResult {
    pub path: PathBuf,
    pub status: LoadStatus,
}

#[derive(Debug)]
pub enum LoadStatus {
    /// Every recipe in the file parsed and validated.
    Loaded { records: Vec<String> },
    /// File was skipped (dotfile, non-YAML).
    Skipped { reason: String },
    /// Parse or validation error; nothing from the file was kept.
    Failed { error: String },
}
