//! NDJSON log of settled queries, one line per execution.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credentials::Credentials;
use crate::error::WorkflowError;
use crate::result::QueryResult;
use crate::settings::{default_config_dir, SettingsError};

const AUDIT_FILE_NAME: &str = "audit.ndjson";

/// How a query settled, mirroring the displayed [`QueryResult`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettledOutcome {
    Rows { count: u64 },
    Affected { count: u64 },
    Failed { error: String },
    Cancelled,
}

impl SettledOutcome {
    /// `None` for results a query never settles into (probe status,
    /// executable output).
    #[must_use]
    pub fn of(result: &QueryResult) -> Option<Self> {
        match result {
            QueryResult::Rows { rows, .. } => Some(Self::Rows {
                count: saturating_u64(rows.len()),
            }),
            QueryResult::Affected { affected } => Some(Self::Affected { count: *affected }),
            QueryResult::Failure(WorkflowError::Cancelled) => Some(Self::Cancelled),
            QueryResult::Failure(error) => Some(Self::Failed {
                error: error.to_string(),
            }),
            QueryResult::Status { .. } | QueryResult::Output { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryAudit {
    pub at_unix_ms: u64,
    pub host: String,
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub database: Option<String>,
    pub sql: String,
    pub elapsed_ms: u64,
    #[serde(flatten)]
    pub outcome: SettledOutcome,
}

impl QueryAudit {
    /// Builds the entry for a statement that just settled into `result`.
    #[must_use]
    pub fn settled(
        credentials: &Credentials,
        sql: String,
        result: &QueryResult,
        elapsed: Duration,
    ) -> Option<Self> {
        let outcome = SettledOutcome::of(result)?;
        Some(Self {
            at_unix_ms: now_unix_ms(),
            host: credentials.host.clone(),
            user: credentials.user.clone(),
            database: Some(credentials.database.clone()).filter(|name| !name.is_empty()),
            sql,
            elapsed_ms: saturating_u64(elapsed.as_millis()),
            outcome,
        })
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |since| saturating_u64(since.as_millis()))
}

fn saturating_u64<T: TryInto<u64>>(value: T) -> u64 {
    value.try_into().unwrap_or(u64::MAX)
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to open audit log at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode audit entry: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to append to audit log at {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct FileAuditTrail {
    path: PathBuf,
}

impl FileAuditTrail {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `audit.ndjson` next to the settings file.
    pub fn in_config_dir() -> Result<Self, SettingsError> {
        Ok(Self::new(default_config_dir()?.join(AUDIT_FILE_NAME)))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Each entry goes out as one line in a single write.
    pub fn append(&self, entry: &QueryAudit) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let open_error = |source| AuditError::Open {
            path: self.path.clone(),
            source,
        };
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(open_error)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(open_error)?;

        file.write_all(&line).map_err(|source| AuditError::Append {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};
    use tempfile::TempDir;

    use super::{FileAuditTrail, QueryAudit, SettledOutcome};
    use crate::credentials::Credentials;
    use crate::error::WorkflowError;
    use crate::query::QueryRow;
    use crate::result::QueryResult;

    fn login() -> Credentials {
        let mut credentials = Credentials::new("db.internal", "3306", "report");
        credentials.database = "sales".to_string();
        credentials
    }

    #[test]
    fn outcome_follows_the_displayed_result() {
        let rows = QueryResult::Rows {
            rows: vec![QueryRow::from_pairs([("1", json!(1))]); 3],
            message: None,
        };
        assert_eq!(SettledOutcome::of(&rows), Some(SettledOutcome::Rows { count: 3 }));
        assert_eq!(
            SettledOutcome::of(&QueryResult::Affected { affected: 9 }),
            Some(SettledOutcome::Affected { count: 9 })
        );
        assert_eq!(
            SettledOutcome::of(&QueryResult::Failure(WorkflowError::Cancelled)),
            Some(SettledOutcome::Cancelled)
        );
        assert_eq!(
            SettledOutcome::of(&QueryResult::Failure(WorkflowError::query("boom"))),
            Some(SettledOutcome::Failed {
                error: "Failed to execute query: boom".to_string()
            })
        );
        assert_eq!(
            SettledOutcome::of(&QueryResult::Output {
                data: String::new()
            }),
            None
        );
    }

    #[test]
    fn entry_is_one_flat_json_object() {
        let entry = QueryAudit::settled(
            &login(),
            "DELETE FROM t".to_string(),
            &QueryResult::Affected { affected: 2 },
            Duration::from_millis(15),
        )
        .expect("affected rows are audited");

        let value: Value = serde_json::to_value(&entry).expect("entry should encode");
        assert_eq!(value["outcome"], json!("affected"));
        assert_eq!(value["count"], json!(2));
        assert_eq!(value["database"], json!("sales"));
        assert_eq!(value["elapsed_ms"], json!(15));
        assert!(value.get("error").is_none());
    }

    #[test]
    fn blank_database_is_left_out() {
        let mut credentials = login();
        credentials.database.clear();
        let entry = QueryAudit::settled(
            &credentials,
            "SELECT SLEEP(9)".to_string(),
            &QueryResult::Failure(WorkflowError::Cancelled),
            Duration::ZERO,
        )
        .expect("cancellations are audited");

        let rendered = serde_json::to_string(&entry).expect("entry should encode");
        assert!(!rendered.contains("database"));
        assert!(rendered.contains("\"outcome\":\"cancelled\""));
    }

    #[test]
    fn appended_lines_read_back_in_order() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let trail = FileAuditTrail::new(temp_dir.path().join("logs").join("audit.ndjson"));
        let first = QueryAudit::settled(
            &login(),
            "SELECT 1".to_string(),
            &QueryResult::Rows {
                rows: vec![QueryRow::from_pairs([("1", json!(1))])],
                message: None,
            },
            Duration::from_millis(1),
        )
        .expect("rows are audited");
        let second = QueryAudit::settled(
            &login(),
            "SELEC".to_string(),
            &QueryResult::Failure(WorkflowError::query("syntax")),
            Duration::from_millis(2),
        )
        .expect("failures are audited");

        trail.append(&first).expect("first append");
        trail.append(&second).expect("second append");

        let content = std::fs::read_to_string(trail.path()).expect("failed to read audit log");
        let entries = content
            .lines()
            .map(|line| serde_json::from_str::<QueryAudit>(line).expect("valid entry"))
            .collect::<Vec<_>>();
        assert_eq!(entries, vec![first, second]);
    }
}
