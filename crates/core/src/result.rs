use crate::error::WorkflowError;
use crate::query::{QueryOutcome, QueryRow};

pub const EXPORT_SUCCESS_MESSAGE: &str = "CSV file saved successfully";
pub const PROBE_SUCCESS_MESSAGE: &str = "Connection successful";

/// The result currently on display. Exactly one variant is live.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Rows {
        rows: Vec<QueryRow>,
        message: Option<String>,
    },
    Affected {
        affected: u64,
    },
    Status {
        message: String,
    },
    Output {
        data: String,
    },
    Failure(WorkflowError),
}

impl QueryResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failure(_))
    }

    /// Rows of a tabular success, if any were returned.
    #[must_use]
    pub fn rows(&self) -> Option<&[QueryRow]> {
        match self {
            Self::Rows { rows, .. } => Some(rows),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_exportable(&self) -> bool {
        self.rows().is_some_and(|rows| !rows.is_empty())
    }

    #[must_use]
    pub fn failure(&self) -> Option<&WorkflowError> {
        match self {
            Self::Failure(error) => Some(error),
            _ => None,
        }
    }

    #[must_use]
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Rows { message, .. } => message.clone(),
            Self::Affected { affected } => Some(format!("{affected} row(s) affected")),
            Self::Status { message } => Some(message.clone()),
            Self::Output { .. } => None,
            Self::Failure(error) => Some(error.to_string()),
        }
    }
}

impl From<QueryOutcome> for QueryResult {
    fn from(outcome: QueryOutcome) -> Self {
        match outcome {
            QueryOutcome::Rows(rows) => Self::Rows {
                rows,
                message: None,
            },
            QueryOutcome::Affected(affected) => Self::Affected { affected },
        }
    }
}

impl From<WorkflowError> for QueryResult {
    fn from(error: WorkflowError) -> Self {
        Self::Failure(error)
    }
}
