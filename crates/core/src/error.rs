use thiserror::Error;

use crate::query::SessionState;

pub const CANCELLED_MESSAGE: &str = "Query cancelled by user.";

const CONNECT_FALLBACK: &str = "Failed to connect to database";
const FETCH_DATABASES_PREFIX: &str = "Failed to fetch databases";
const EXECUTE_QUERY_PREFIX: &str = "Failed to execute query";
const SAVE_CSV_FALLBACK: &str = "Failed to save CSV file";
const EXECUTE_FILE_FALLBACK: &str = "Failed to execute file";

/// Collaborator failures normalized for display. The `Display` text is the
/// operator-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("{message}")]
    Connection { message: String },
    #[error("{message}")]
    Enumeration { message: String },
    #[error("{message}")]
    Query { message: String },
    #[error("Query cancelled by user.")]
    Cancelled,
    #[error("{message}")]
    Export { message: String },
    #[error("{message}")]
    Invocation { message: String },
}

impl WorkflowError {
    #[must_use]
    pub fn connection(detail: &str) -> Self {
        Self::Connection {
            message: or_fallback(detail, CONNECT_FALLBACK),
        }
    }

    #[must_use]
    pub fn enumeration(detail: &str) -> Self {
        Self::Enumeration {
            message: prefixed(FETCH_DATABASES_PREFIX, detail),
        }
    }

    #[must_use]
    pub fn query(detail: &str) -> Self {
        Self::Query {
            message: prefixed(EXECUTE_QUERY_PREFIX, detail),
        }
    }

    #[must_use]
    pub fn export(detail: &str) -> Self {
        Self::Export {
            message: or_fallback(detail, SAVE_CSV_FALLBACK),
        }
    }

    #[must_use]
    pub fn invocation(detail: &str) -> Self {
        Self::Invocation {
            message: or_fallback(detail, EXECUTE_FILE_FALLBACK),
        }
    }

    /// Probe and enumeration failures drop the connected flag.
    #[must_use]
    pub fn clears_connection(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Enumeration { .. })
    }
}

fn or_fallback(detail: &str, fallback: &str) -> String {
    let detail = detail.trim();
    if detail.is_empty() {
        fallback.to_string()
    } else {
        detail.to_string()
    }
}

fn prefixed(prefix: &str, detail: &str) -> String {
    let detail = detail.trim();
    if detail.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}: {detail}")
    }
}

/// An operation was requested while its trigger should have been disabled.
/// Nothing is dispatched and no state changes when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("another operation is in flight ({state:?})")]
    Busy { state: SessionState },
    #[error("no query is executing")]
    NotExecuting,
    #[error("connect first: no successful connection probe")]
    NotConnected,
    #[error("export needs a tabular result with at least one row")]
    NoTabularResult,
    #[error("export filename is empty")]
    EmptyFilename,
    #[error("no CSV file has been saved in this session")]
    NoExport,
    #[error("executable path is empty")]
    NoExecutable,
    #[error("database `{0}` is not in the fetched list")]
    UnknownDatabase(String),
}

#[cfg(test)]
mod tests {
    use super::{WorkflowError, CANCELLED_MESSAGE};

    #[test]
    fn cancelled_message_is_exact() {
        assert_eq!(WorkflowError::Cancelled.to_string(), CANCELLED_MESSAGE);
        assert_ne!(
            WorkflowError::Cancelled,
            WorkflowError::query(CANCELLED_MESSAGE)
        );
    }

    #[test]
    fn generic_fallbacks_apply_to_blank_details() {
        assert_eq!(
            WorkflowError::connection("  ").to_string(),
            "Failed to connect to database"
        );
        assert_eq!(
            WorkflowError::enumeration("").to_string(),
            "Failed to fetch databases"
        );
        assert_eq!(
            WorkflowError::query("").to_string(),
            "Failed to execute query"
        );
        assert_eq!(
            WorkflowError::export("").to_string(),
            "Failed to save CSV file"
        );
        assert_eq!(
            WorkflowError::invocation("").to_string(),
            "Failed to execute file"
        );
    }

    #[test]
    fn collaborator_details_are_kept() {
        assert_eq!(
            WorkflowError::connection("Access denied for user 'root'").to_string(),
            "Access denied for user 'root'"
        );
        assert_eq!(
            WorkflowError::query("Unknown column 'x'").to_string(),
            "Failed to execute query: Unknown column 'x'"
        );
        assert_eq!(
            WorkflowError::invocation("exit status 2").to_string(),
            "exit status 2"
        );
    }

    #[test]
    fn only_connection_failures_clear_connected_flag() {
        assert!(WorkflowError::connection("refused").clears_connection());
        assert!(WorkflowError::enumeration("denied").clears_connection());
        assert!(!WorkflowError::query("boom").clears_connection());
        assert!(!WorkflowError::Cancelled.clears_connection());
    }
}
