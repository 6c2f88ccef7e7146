use async_trait::async_trait;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::Queryable;
use mysql_async::{Column, Conn, OptsBuilder, Row, Value};
use serde_json::{Number, Value as JsonValue};
use sluice_core::connection::{BackendError, ConnectionBackend};
use sluice_core::credentials::Credentials;
use sluice_core::query::{QueryBackend, QueryBackendError, QueryOutcome, QueryRow};
use thiserror::Error;
use tracing::debug;

const DEFAULT_PORT: u16 = 3306;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid port `{0}`")]
pub struct InvalidPort(String);

/// Opens a fresh connection per request, since credentials may change
/// between any two calls.
#[derive(Debug, Clone, Default)]
pub struct MysqlBackend;

impl MysqlBackend {
    async fn open(credentials: &Credentials) -> Result<Conn, String> {
        let opts = opts_from_credentials(credentials).map_err(|error| error.to_string())?;
        Conn::new(opts).await.map_err(|error| error.to_string())
    }
}

#[async_trait]
impl ConnectionBackend for MysqlBackend {
    async fn test_connection(&self, credentials: &Credentials) -> Result<(), BackendError> {
        let mut conn = Self::open(credentials).await.map_err(BackendError::new)?;
        conn.ping().await.map_err(to_connection_error)?;
        conn.disconnect().await.map_err(to_connection_error)
    }

    async fn list_databases(&self, credentials: &Credentials) -> Result<Vec<String>, BackendError> {
        let mut conn = Self::open(credentials).await.map_err(BackendError::new)?;
        let databases = conn
            .query_map("SHOW DATABASES", |database: String| database)
            .await
            .map_err(to_connection_error)?;
        conn.disconnect().await.map_err(to_connection_error)?;
        Ok(databases)
    }
}

#[async_trait]
impl QueryBackend for MysqlBackend {
    async fn execute(
        &self,
        credentials: &Credentials,
        sql: &str,
    ) -> Result<QueryOutcome, QueryBackendError> {
        let mut conn = Self::open(credentials)
            .await
            .map_err(QueryBackendError::new)?;
        let outcome = run_statement(&mut conn, sql).await.map_err(to_query_error);
        if let Err(error) = conn.disconnect().await {
            debug!(%error, "disconnect after query failed");
        }
        outcome
    }
}

async fn run_statement(conn: &mut Conn, sql: &str) -> Result<QueryOutcome, mysql_async::Error> {
    let mut result = conn.query_iter(sql).await?;
    let outcome = match result.columns() {
        Some(columns) if !columns.is_empty() => {
            let rows: Vec<Row> = result.collect().await?;
            QueryOutcome::Rows(
                rows.into_iter()
                    .map(|row| row_to_query_row(&columns, row))
                    .collect(),
            )
        }
        _ => QueryOutcome::Affected(result.affected_rows()),
    };
    result.drop_result().await?;
    Ok(outcome)
}

fn opts_from_credentials(credentials: &Credentials) -> Result<OptsBuilder, InvalidPort> {
    let mut builder = OptsBuilder::default()
        .ip_or_hostname(credentials.host.clone())
        .tcp_port(parse_port(&credentials.port)?)
        .user(non_empty(&credentials.user).map(str::to_string));

    if let Some(password) = non_empty(&credentials.password) {
        builder = builder.pass(Some(password.to_string()));
    }

    if let Some(database) = non_empty(&credentials.database) {
        builder = builder.db_name(Some(database.to_string()));
    }

    Ok(builder)
}

fn parse_port(raw: &str) -> Result<u16, InvalidPort> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(DEFAULT_PORT);
    }
    trimmed
        .parse::<u16>()
        .map_err(|_| InvalidPort(raw.to_string()))
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

fn row_to_query_row(columns: &[Column], row: Row) -> QueryRow {
    let cells = columns
        .iter()
        .zip(row.unwrap())
        .map(|(column, value)| {
            (
                column.name_str().into_owned(),
                mysql_value_to_json(column.column_type(), value),
            )
        })
        .collect();
    QueryRow::new(cells)
}

// The text protocol ships most values as bytes; numeric columns are turned
// back into JSON numbers. DECIMAL stays textual to keep its precision.
fn mysql_value_to_json(column_type: ColumnType, value: Value) -> JsonValue {
    match value {
        Value::NULL => JsonValue::Null,
        Value::Bytes(bytes) => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            typed_text(column_type, text)
        }
        Value::Int(value) => JsonValue::from(value),
        Value::UInt(value) => JsonValue::from(value),
        Value::Float(value) => float_to_json(f64::from(value)),
        Value::Double(value) => float_to_json(value),
        Value::Date(year, month, day, hour, minute, second, micros) => JsonValue::String(format!(
            "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
        )),
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if is_negative { "-" } else { "" };
            JsonValue::String(format!(
                "{sign}{days:03} {hours:02}:{minutes:02}:{seconds:02}.{micros:06}"
            ))
        }
    }
}

fn typed_text(column_type: ColumnType, text: String) -> JsonValue {
    match column_type {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => {
            if let Ok(value) = text.parse::<i64>() {
                JsonValue::from(value)
            } else if let Ok(value) = text.parse::<u64>() {
                JsonValue::from(value)
            } else {
                JsonValue::String(text)
            }
        }
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => text
            .parse::<f64>()
            .map_or(JsonValue::String(text), float_to_json),
        _ => JsonValue::String(text),
    }
}

fn float_to_json(value: f64) -> JsonValue {
    Number::from_f64(value).map_or(JsonValue::Null, JsonValue::Number)
}

fn to_connection_error(error: mysql_async::Error) -> BackendError {
    BackendError::new(error.to_string())
}

fn to_query_error(error: mysql_async::Error) -> QueryBackendError {
    QueryBackendError::new(error.to_string())
}
