use async_trait::async_trait;
use thiserror::Error;

use crate::credentials::Credentials;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
}

impl BackendError {
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

/// Connectivity collaborator. Both calls receive credentials with the
/// database selection cleared.
#[async_trait]
pub trait ConnectionBackend: Send + Sync {
    async fn test_connection(&self, credentials: &Credentials) -> Result<(), BackendError>;
    async fn list_databases(&self, credentials: &Credentials) -> Result<Vec<String>, BackendError>;
}

/// Last known connectivity and the databases visible to the current login.
/// The list is only ever filled after a probe has succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DatabaseCatalog {
    probed: bool,
    connected: bool,
    databases: Option<Vec<String>>,
}

impl DatabaseCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// True from a successful probe until the next failed one.
    #[must_use]
    pub fn is_probed(&self) -> bool {
        self.probed
    }

    /// `None` until the first successful enumeration.
    #[must_use]
    pub fn databases(&self) -> Option<&[String]> {
        self.databases.as_deref()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.databases
            .as_ref()
            .is_some_and(|databases| databases.iter().any(|database| database == name))
    }

    pub(crate) fn mark_probed(&mut self) {
        self.probed = true;
    }

    /// A failed probe revokes enumeration until the next successful one.
    pub(crate) fn mark_probe_failed(&mut self) {
        self.probed = false;
        self.connected = false;
    }

    pub(crate) fn mark_disconnected(&mut self) {
        self.connected = false;
    }

    pub(crate) fn replace(&mut self, databases: Vec<String>) {
        self.databases = Some(databases);
        self.connected = true;
    }
}
