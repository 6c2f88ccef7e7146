use async_trait::async_trait;
use thiserror::Error;

use crate::settings::ExecutableSettings;

pub const CSV_PLACEHOLDER: &str = "{csv}";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct LaunchError {
    message: String,
}

impl LaunchError {
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

/// Runs a local executable and returns what it printed.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn execute_file(&self, path: &str, parameters: &[String]) -> Result<String, LaunchError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationTemplate {
    pub path: String,
    pub params: String,
}

impl InvocationTemplate {
    /// Operator fields win when non-empty; each field falls back on its own.
    #[must_use]
    pub fn resolve(path: &str, params: &str, defaults: &ExecutableSettings) -> Self {
        Self {
            path: first_non_empty(path, &defaults.path),
            params: first_non_empty(params, &defaults.default_params),
        }
    }

    #[must_use]
    pub fn has_path(&self) -> bool {
        !self.path.is_empty()
    }

    #[must_use]
    pub fn tokens(&self, csv_path: &str) -> Vec<String> {
        substitute_parameters(&self.params, csv_path)
    }
}

fn first_non_empty(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

/// Splits on single spaces (no quoting) and replaces the first `{csv}` in
/// each token with `csv_path`.
#[must_use]
pub fn substitute_parameters(template: &str, csv_path: &str) -> Vec<String> {
    if template.is_empty() {
        return Vec::new();
    }

    template
        .split(' ')
        .map(|token| token.replacen(CSV_PLACEHOLDER, csv_path, 1))
        .collect()
}
