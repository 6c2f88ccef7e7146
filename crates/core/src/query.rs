use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::credentials::Credentials;
use crate::error::GuardError;

/// One result row: column names mapped to scalars, in driver column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryRow {
    cells: Vec<(String, Value)>,
}

impl QueryRow {
    #[must_use]
    pub fn new(cells: Vec<(String, Value)>) -> Self {
        Self { cells }
    }

    pub fn from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self {
            cells: pairs
                .into_iter()
                .map(|(column, value)| (column.into(), value))
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    #[must_use]
    pub fn cells(&self) -> &[(String, Value)] {
        &self.cells
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Serialize for QueryRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (column, value) in &self.cells {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// What the driver handed back for a statement that ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Rows(Vec<QueryRow>),
    Affected(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct QueryBackendError {
    message: String,
}

impl QueryBackendError {
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

#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn execute(
        &self,
        credentials: &Credentials,
        sql: &str,
    ) -> Result<QueryOutcome, QueryBackendError>;
}

/// Cancel leaves an execution in `Executing`. `Cancelling` is entered when
/// the resolution of a cancelled execution is applied and lasts until that
/// same resolution settles, so outside the session it only shows up in the
/// transition log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Probing,
    Listing,
    Executing,
    Cancelling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionId(u64);

#[derive(Debug)]
struct ActiveExecution {
    id: ExecutionId,
    token: CancellationToken,
    started_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettledExecution {
    pub cancel_requested: bool,
    pub elapsed: Duration,
}

/// Serializes network work: at most one of probe, enumeration or query is
/// in flight, and a query owns the only live cancellation token.
#[derive(Debug, Default)]
pub struct QuerySession {
    state: SessionState,
    next_id: u64,
    active: Option<ActiveExecution>,
}

impl QuerySession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state == SessionState::Idle
    }

    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.token.is_cancelled())
    }

    pub fn begin_probe(&mut self) -> Result<(), GuardError> {
        self.require_idle()?;
        self.state = SessionState::Probing;
        Ok(())
    }

    /// Enumeration runs either as the continuation of a probe or on its own
    /// from idle.
    pub fn begin_listing(&mut self) -> Result<(), GuardError> {
        if self.state != SessionState::Probing {
            self.require_idle()?;
        }
        self.state = SessionState::Listing;
        Ok(())
    }

    pub fn end_connection_phase(&mut self) {
        if matches!(self.state, SessionState::Probing | SessionState::Listing) {
            self.state = SessionState::Idle;
        }
    }

    pub fn begin(&mut self) -> Result<(ExecutionId, CancellationToken), GuardError> {
        self.require_idle()?;

        self.next_id += 1;
        let id = ExecutionId(self.next_id);
        let token = CancellationToken::new();
        self.active = Some(ActiveExecution {
            id,
            token: token.clone(),
            started_at: Instant::now(),
        });
        self.state = SessionState::Executing;
        Ok((id, token))
    }

    /// Fires the bound token. Only the first call while executing has an
    /// effect; the state moves once the pending execution observes it.
    pub fn cancel(&mut self) -> bool {
        if self.state != SessionState::Executing {
            return false;
        }
        let Some(active) = &self.active else {
            return false;
        };
        if active.token.is_cancelled() {
            return false;
        }

        active.token.cancel();
        true
    }

    pub fn observe_cancellation(&mut self, id: ExecutionId) {
        if self.state == SessionState::Executing && self.is_active(id) {
            self.state = SessionState::Cancelling;
        }
    }

    /// Returns to idle and drops the token. `None` when `id` is not the
    /// live execution.
    pub fn settle(&mut self, id: ExecutionId) -> Option<SettledExecution> {
        if !self.is_active(id) {
            return None;
        }
        let active = self.active.take()?;
        self.state = SessionState::Idle;
        Some(SettledExecution {
            cancel_requested: active.token.is_cancelled(),
            elapsed: active.started_at.elapsed(),
        })
    }

    /// Whether `id` names the execution currently in flight.
    #[must_use]
    pub fn is_current(&self, id: ExecutionId) -> bool {
        self.is_active(id)
    }

    fn is_active(&self, id: ExecutionId) -> bool {
        self.active.as_ref().is_some_and(|active| active.id == id)
    }

    fn require_idle(&self) -> Result<(), GuardError> {
        if self.is_idle() {
            Ok(())
        } else {
            Err(GuardError::Busy { state: self.state })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResolution {
    Completed(QueryOutcome),
    Failed(QueryBackendError),
    Cancelled,
}

/// Awaits the backend unless `token` fires first. The backend is only
/// abandoned, never told to stop.
pub async fn run_query<B>(
    backend: &B,
    credentials: &Credentials,
    sql: &str,
    token: &CancellationToken,
) -> QueryResolution
where
    B: QueryBackend + ?Sized,
{
    tokio::select! {
        biased;

        () = token.cancelled() => QueryResolution::Cancelled,
        result = backend.execute(credentials, sql) => match result {
            Ok(outcome) => QueryResolution::Completed(outcome),
            Err(error) => QueryResolution::Failed(error),
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedQuery {
    pub id: ExecutionId,
    pub resolution: QueryResolution,
}

/// A dispatched query that owns everything it needs, so the caller can keep
/// driving the session (for instance to cancel) while awaiting it.
pub struct PendingQuery {
    id: ExecutionId,
    future: BoxFuture<'static, QueryResolution>,
}

impl PendingQuery {
    pub fn new(
        id: ExecutionId,
        future: impl Future<Output = QueryResolution> + Send + 'static,
    ) -> Self {
        Self {
            id,
            future: future.boxed(),
        }
    }

    #[must_use]
    pub fn id(&self) -> ExecutionId {
        self.id
    }
}

impl std::fmt::Debug for PendingQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingQuery")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Future for PendingQuery {
    type Output = CompletedQuery;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        self.future
            .poll_unpin(cx)
            .map(|resolution| CompletedQuery { id, resolution })
    }
}
