use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::query::QueryRow;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExportBackendError {
    message: String,
}

impl ExportBackendError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Persists rows as CSV and reports where the file landed. Path resolution
/// belongs to the sink.
#[async_trait]
pub trait CsvSink: Send + Sync {
    async fn save_csv(
        &self,
        rows: &[QueryRow],
        filename: &str,
    ) -> Result<PathBuf, ExportBackendError>;
}

/// The most recently saved CSV. Later exports overwrite it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRecord {
    pub filename: String,
    pub absolute_path: PathBuf,
}

impl ExportRecord {
    #[must_use]
    pub fn path_string(&self) -> String {
        self.absolute_path.display().to_string()
    }
}
