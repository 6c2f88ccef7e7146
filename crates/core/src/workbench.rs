use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::audit_trail::{FileAuditTrail, QueryAudit};
use crate::connection::{ConnectionBackend, DatabaseCatalog};
use crate::credentials::Credentials;
use crate::error::{GuardError, WorkflowError};
use crate::export::{CsvSink, ExportRecord};
use crate::invocation::{InvocationTemplate, ProcessLauncher};
use crate::query::{
    run_query, CompletedQuery, ExecutionId, PendingQuery, QueryBackend, QueryResolution,
    QuerySession, SessionState, SettledExecution,
};
use crate::result::{QueryResult, EXPORT_SUCCESS_MESSAGE, PROBE_SUCCESS_MESSAGE};
use crate::settings::{AdminSettings, ExecutableSettings, SettingsSource};

/// Free-text login fields. The database is chosen through
/// [`Workbench::select_database`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    Host,
    Port,
    User,
    Password,
}

/// A command line ready for the process launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedInvocation {
    pub path: String,
    pub parameters: Vec<String>,
}

/// Owns every piece of session state. All mutations go through the
/// operations below, each gated the same way the operator's triggers are.
#[derive(Debug)]
pub struct Workbench<D, S, L> {
    database: Arc<D>,
    sink: S,
    launcher: L,
    credentials: Credentials,
    settings: AdminSettings,
    catalog: DatabaseCatalog,
    session: QuerySession,
    result: Option<QueryResult>,
    last_export: Option<ExportRecord>,
    executable_path: String,
    parameters: String,
    in_flight_sql: Option<String>,
    audit: Option<FileAuditTrail>,
}

impl<D, S, L> Workbench<D, S, L>
where
    D: ConnectionBackend + QueryBackend + 'static,
    S: CsvSink,
    L: ProcessLauncher,
{
    #[must_use]
    pub fn new(database: D, sink: S, launcher: L) -> Self {
        Self {
            database: Arc::new(database),
            sink,
            launcher,
            credentials: Credentials::default(),
            settings: AdminSettings::default(),
            catalog: DatabaseCatalog::new(),
            session: QuerySession::new(),
            result: None,
            last_export: None,
            executable_path: String::new(),
            parameters: String::new(),
            in_flight_sql: None,
            audit: None,
        }
    }

    #[must_use]
    pub fn with_audit_trail(mut self, audit: FileAuditTrail) -> Self {
        self.audit = Some(audit);
        self
    }

    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    #[must_use]
    pub fn settings(&self) -> &AdminSettings {
        &self.settings
    }

    #[must_use]
    pub fn catalog(&self) -> &DatabaseCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    #[must_use]
    pub fn result(&self) -> Option<&QueryResult> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn last_export(&self) -> Option<&ExportRecord> {
        self.last_export.as_ref()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.catalog.is_connected()
    }

    #[must_use]
    pub fn executable_path(&self) -> &str {
        &self.executable_path
    }

    #[must_use]
    pub fn parameters(&self) -> &str {
        &self.parameters
    }

    pub fn set_field(&mut self, field: CredentialField, value: impl Into<String>) {
        let value = value.into();
        match field {
            CredentialField::Host => self.credentials.host = value,
            CredentialField::Port => self.credentials.port = value,
            CredentialField::User => self.credentials.user = value,
            CredentialField::Password => self.credentials.password = value,
        }
    }

    pub fn set_executable_path(&mut self, path: impl Into<String>) {
        self.executable_path = path.into();
    }

    pub fn set_parameters(&mut self, parameters: impl Into<String>) {
        self.parameters = parameters.into();
    }

    pub fn replace_settings(&mut self, settings: AdminSettings) {
        self.settings = settings;
    }

    /// Current login and executable fields in settings form, for saving as
    /// new defaults.
    #[must_use]
    pub fn defaults_snapshot(&self) -> AdminSettings {
        let template = self.invocation_template();
        AdminSettings {
            database: self.credentials.defaults(),
            executable: ExecutableSettings {
                path: template.path,
                default_params: template.params,
            },
        }
    }

    #[must_use]
    pub fn can_probe(&self) -> bool {
        self.session.is_idle()
    }

    #[must_use]
    pub fn can_submit(&self) -> bool {
        self.session.is_idle()
    }

    #[must_use]
    pub fn can_refresh_databases(&self) -> bool {
        self.session.is_idle() && self.catalog.is_probed()
    }

    #[must_use]
    pub fn can_cancel(&self) -> bool {
        self.session.state() == SessionState::Executing
    }

    #[must_use]
    pub fn can_export(&self) -> bool {
        self.result.as_ref().is_some_and(QueryResult::is_exportable)
    }

    #[must_use]
    pub fn can_invoke(&self) -> bool {
        self.planned_invocation().is_ok()
    }

    /// One-shot hydration from admin settings. Failures are logged and
    /// otherwise ignored.
    pub async fn load_settings<T>(&mut self, source: &T)
    where
        T: SettingsSource + ?Sized,
    {
        match source.load().await {
            Ok(settings) => {
                if self.credentials.hydrate(&settings.database) {
                    info!(host = %self.credentials.host, "hydrated credentials from settings");
                } else {
                    debug!("credentials already edited; settings defaults not applied");
                }
                self.settings = settings;
            }
            Err(error) => warn!(%error, "failed to load admin settings"),
        }
    }

    pub async fn probe(&mut self) -> Result<(), GuardError> {
        self.session.begin_probe()?;
        let credentials = self.credentials.without_database();
        debug!(host = %credentials.host, port = %credentials.port, "probing connection");

        match self.database.test_connection(&credentials).await {
            Ok(()) => {
                self.catalog.mark_probed();
                self.result = Some(QueryResult::Status {
                    message: PROBE_SUCCESS_MESSAGE.to_string(),
                });
                if self.session.begin_listing().is_ok() {
                    self.enumerate(&credentials).await;
                }
            }
            Err(error) => {
                info!(%error, "connection probe failed");
                self.catalog.mark_probe_failed();
                self.result = Some(WorkflowError::connection(error.message()).into());
            }
        }

        self.session.end_connection_phase();
        Ok(())
    }

    /// Re-runs enumeration. Only available after a successful probe.
    pub async fn refresh_databases(&mut self) -> Result<(), GuardError> {
        if !self.catalog.is_probed() {
            return Err(GuardError::NotConnected);
        }
        self.session.begin_listing()?;
        let credentials = self.credentials.without_database();
        self.enumerate(&credentials).await;
        self.session.end_connection_phase();
        Ok(())
    }

    async fn enumerate(&mut self, credentials: &Credentials) {
        match self.database.list_databases(credentials).await {
            Ok(databases) => {
                info!(count = databases.len(), "fetched database list");
                self.catalog.replace(databases);
            }
            Err(error) => {
                info!(%error, "database enumeration failed");
                self.catalog.mark_disconnected();
                self.result = Some(WorkflowError::enumeration(error.message()).into());
            }
        }
    }

    /// Once a non-empty list has been fetched, only names from it are
    /// accepted. An empty name clears the selection.
    pub fn select_database(&mut self, name: &str) -> Result<(), GuardError> {
        let restricted = self
            .catalog
            .databases()
            .is_some_and(|databases| !databases.is_empty());
        if !name.is_empty() && restricted && !self.catalog.contains(name) {
            return Err(GuardError::UnknownDatabase(name.to_string()));
        }

        self.credentials.database = name.to_string();
        Ok(())
    }

    /// Moves the session to executing and hands back the dispatched query.
    /// The session stays free for [`Self::cancel_query`] while the caller
    /// awaits it; pass the output to [`Self::complete_query`].
    pub fn submit_query(&mut self, sql: &str) -> Result<PendingQuery, GuardError> {
        let (id, token) = self.session.begin()?;
        debug!(database = %self.credentials.database, "submitting query");

        let backend = Arc::clone(&self.database);
        let credentials = self.credentials.clone();
        let statement = sql.to_string();
        self.in_flight_sql = Some(statement.clone());

        Ok(PendingQuery::new(id, async move {
            run_query(backend.as_ref(), &credentials, &statement, &token).await
        }))
    }

    pub fn cancel_query(&mut self) -> bool {
        let signalled = self.session.cancel();
        if signalled {
            info!("query cancellation requested");
        }
        signalled
    }

    /// Applies a finished execution. Returns false for a stale execution,
    /// which leaves the session untouched.
    pub fn complete_query(&mut self, completed: CompletedQuery) -> bool {
        let CompletedQuery { id, resolution } = completed;
        if resolution == QueryResolution::Cancelled || self.session.cancel_requested() {
            self.session.observe_cancellation(id);
            debug!(?id, state = ?self.session.state(), "resolution observed cancellation");
        }
        let Some(settled) = self.session.settle(id) else {
            debug!(?id, "ignoring stale query resolution");
            return false;
        };

        let result = match resolution {
            _ if settled.cancel_requested => QueryResult::Failure(WorkflowError::Cancelled),
            QueryResolution::Cancelled => QueryResult::Failure(WorkflowError::Cancelled),
            QueryResolution::Completed(outcome) => QueryResult::from(outcome),
            QueryResolution::Failed(error) => {
                QueryResult::Failure(WorkflowError::query(error.message()))
            }
        };

        info!(
            success = result.is_success(),
            elapsed_ms = settled.elapsed.as_millis(),
            "query settled"
        );
        self.record_audit(&result, settled);
        self.result = Some(result);
        true
    }

    /// Settles an execution whose [`PendingQuery`] was dropped without being
    /// completed, as if it had been cancelled. Returns false when `id` is not
    /// the live execution.
    pub fn abandon_query(&mut self, id: ExecutionId) -> bool {
        if !self.session.is_current(id) {
            return false;
        }
        self.session.cancel();
        info!(?id, "abandoning query");
        self.complete_query(CompletedQuery {
            id,
            resolution: QueryResolution::Cancelled,
        })
    }

    pub async fn execute_query(&mut self, sql: &str) -> Result<(), GuardError> {
        let pending = self.submit_query(sql)?;
        let completed = pending.await;
        self.complete_query(completed);
        Ok(())
    }

    pub async fn export_csv(&mut self, filename: &str) -> Result<(), GuardError> {
        if filename.trim().is_empty() {
            return Err(GuardError::EmptyFilename);
        }
        let Some(rows) = self
            .result
            .as_ref()
            .and_then(QueryResult::rows)
            .filter(|rows| !rows.is_empty())
        else {
            return Err(GuardError::NoTabularResult);
        };

        let saved = self.sink.save_csv(rows, filename).await;
        match saved {
            Ok(absolute_path) => {
                info!(path = %absolute_path.display(), "saved CSV export");
                self.last_export = Some(ExportRecord {
                    filename: filename.to_string(),
                    absolute_path,
                });
                if let Some(QueryResult::Rows { message, .. }) = &mut self.result {
                    *message = Some(EXPORT_SUCCESS_MESSAGE.to_string());
                }
            }
            Err(error) => {
                info!(%error, "CSV export failed");
                self.result = Some(WorkflowError::export(error.message()).into());
            }
        }
        Ok(())
    }

    /// Resolved at call time so edits to the operator fields or the settings
    /// take effect immediately.
    #[must_use]
    pub fn invocation_template(&self) -> InvocationTemplate {
        InvocationTemplate::resolve(
            &self.executable_path,
            &self.parameters,
            &self.settings.executable,
        )
    }

    pub fn planned_invocation(&self) -> Result<PlannedInvocation, GuardError> {
        let Some(record) = &self.last_export else {
            return Err(GuardError::NoExport);
        };
        let template = self.invocation_template();
        if !template.has_path() {
            return Err(GuardError::NoExecutable);
        }

        let parameters = template.tokens(&record.path_string());
        Ok(PlannedInvocation {
            path: template.path,
            parameters,
        })
    }

    pub async fn invoke(&mut self) -> Result<(), GuardError> {
        let planned = self.planned_invocation()?;
        debug!(path = %planned.path, parameters = ?planned.parameters, "invoking executable");

        let result = match self
            .launcher
            .execute_file(&planned.path, &planned.parameters)
            .await
        {
            Ok(data) => QueryResult::Output { data },
            Err(error) => {
                info!(%error, "executable invocation failed");
                WorkflowError::invocation(error.message()).into()
            }
        };
        self.result = Some(result);
        Ok(())
    }

    fn record_audit(&mut self, result: &QueryResult, settled: SettledExecution) {
        let sql = self.in_flight_sql.take().unwrap_or_default();
        let Some(audit) = &self.audit else {
            return;
        };
        let Some(entry) = QueryAudit::settled(&self.credentials, sql, result, settled.elapsed)
        else {
            return;
        };

        if let Err(error) = audit.append(&entry) {
            warn!(%error, "failed to append audit entry");
        }
    }
}
