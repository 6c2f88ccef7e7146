use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use sluice_core::export::{CsvSink, ExportBackendError};
use sluice_core::query::QueryRow;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid export filename `{0}`")]
    InvalidFilename(String),
    #[error("failed to create export directory at {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write export file at {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to resolve absolute path of {path}: {source}")]
    Resolve {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Writes CSV files into one directory and reports their absolute path.
#[derive(Debug, Clone)]
pub struct FileCsvSink {
    directory: PathBuf,
}

impl FileCsvSink {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub async fn write(&self, rows: &[QueryRow], filename: &str) -> Result<PathBuf, ExportError> {
        validate_filename(filename)?;
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|source| ExportError::CreateDir {
                path: self.directory.display().to_string(),
                source,
            })?;

        let path = self.directory.join(filename);
        tokio::fs::write(&path, render_csv(rows))
            .await
            .map_err(|source| ExportError::Write {
                path: path.display().to_string(),
                source,
            })?;

        match tokio::fs::canonicalize(&path).await {
            Ok(canonical) => Ok(canonical),
            Err(error) => {
                debug!(%error, path = %path.display(), "canonicalize failed; joining onto cwd");
                absolute_path(&path).map_err(|source| ExportError::Resolve {
                    path: path.display().to_string(),
                    source,
                })
            }
        }
    }
}

#[async_trait]
impl CsvSink for FileCsvSink {
    async fn save_csv(
        &self,
        rows: &[QueryRow],
        filename: &str,
    ) -> Result<PathBuf, ExportBackendError> {
        self.write(rows, filename)
            .await
            .map_err(|error| ExportBackendError::new(error.to_string()))
    }
}

fn absolute_path(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

fn validate_filename(filename: &str) -> Result<(), ExportError> {
    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(ExportError::InvalidFilename(filename.to_string())),
    }
}

/// Header is the union of column names in first-seen order; missing cells
/// and nulls are left empty.
#[must_use]
pub fn render_csv(rows: &[QueryRow]) -> String {
    let mut headers: Vec<&str> = Vec::new();
    for row in rows {
        for column in row.columns() {
            if !headers.contains(&column) {
                headers.push(column);
            }
        }
    }

    let mut content = String::new();
    content.push_str(
        &headers
            .iter()
            .map(|header| csv_escape(header))
            .collect::<Vec<_>>()
            .join(","),
    );
    content.push('\n');

    for row in rows {
        let values = headers
            .iter()
            .map(|header| row.get(header).map(cell_text).unwrap_or_default())
            .map(|value| csv_escape(&value))
            .collect::<Vec<_>>();
        content.push_str(&values.join(","));
        content.push('\n');
    }

    content
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
