//! PostgreSQL database backend implementation
//!
//! Connects to PostgreSQL through the local end of the SSH tunnel and drives
//! `COPY ... FROM STDIN` directly from a byte stream, so remote files are
//! never buffered in full.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt, TryStreamExt};
use std::time::{Duration, Instant};
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::value::{JsonColumn, JsonParam};
use super::{CsvCopy, DatabaseBackend, DatabaseError, DatabaseResult, QueryOutcome, QueryResult};
use crate::config::DatabaseSection;

/// Upper bound on establishing the connection (TCP + startup + auth)
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Server-side `statement_timeout` applied to every statement of the session
pub const STATEMENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Size of the chunks read from the source stream and forwarded to `COPY`
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Host the tunnel's local end is bound to
const TUNNEL_HOST: &str = "127.0.0.1";

/// PostgreSQL database backend
///
/// Owns a single `tokio_postgres::Client` and the task driving its
/// connection. Closing the backend drops the client and waits for the
/// connection task to finish.
pub struct PostgresBackend {
    /// PostgreSQL client
    client: Client,
    /// Task driving the connection socket
    connection: JoinHandle<()>,
    /// Whether an explicit transaction is open
    in_transaction: bool,
}

impl PostgresBackend {
    /// Connect to the database listening on the tunnel's local port
    ///
    /// # Arguments
    /// * `settings` - Database name and credentials
    /// * `local_port` - Local port of the SSH tunnel
    pub async fn connect(settings: &DatabaseSection, local_port: u16) -> DatabaseResult<Self> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(TUNNEL_HOST)
            .port(local_port)
            .dbname(&settings.name)
            .user(&settings.user)
            .password(settings.password.as_bytes())
            .application_name(env!("CARGO_PKG_NAME"))
            .connect_timeout(CONNECT_TIMEOUT)
            .options(format!(
                "-c statement_timeout={}",
                STATEMENT_TIMEOUT.as_millis()
            ));

        let (client, connection) = tokio::time::timeout(CONNECT_TIMEOUT, config.connect(NoTls))
            .await
            .map_err(|_| DatabaseError::ConnectTimeout(CONNECT_TIMEOUT.as_secs()))?
            .map_err(|e| {
                DatabaseError::ConnectionFailed(format!(
                    "Failed to connect to PostgreSQL: {}",
                    error_message(&e)
                ))
            })?;

        // Spawn connection handler
        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "PostgreSQL connection error");
            }
        });

        debug!(
            port = local_port,
            database = %settings.name,
            "PostgreSQL connection established"
        );

        Ok(Self {
            client,
            connection,
            in_transaction: false,
        })
    }

    /// Close the connection
    ///
    /// An open transaction is discarded by the server when the socket closes.
    pub async fn close(self) -> DatabaseResult<()> {
        if self.in_transaction {
            warn!("Closing PostgreSQL connection with an open transaction; it will be rolled back");
        }
        drop(self.client);
        self.connection.await.map_err(|e| {
            DatabaseError::ConnectionFailed(format!("Connection task failed: {}", e))
        })?;
        Ok(())
    }

    /// Convert a PostgreSQL row to a JSON value
    fn row_to_json(row: &tokio_postgres::Row, columns: &[String]) -> DatabaseResult<serde_json::Value> {
        let mut map = serde_json::Map::new();

        for (i, col_name) in columns.iter().enumerate() {
            let value = Self::get_column_value(row, i)?;
            map.insert(col_name.clone(), value);
        }

        Ok(serde_json::Value::Object(map))
    }

    /// Get a column value as JSON, decoded according to the column's type
    fn get_column_value(row: &tokio_postgres::Row, idx: usize) -> DatabaseResult<serde_json::Value> {
        let column = row
            .try_get::<_, Option<JsonColumn>>(idx)
            .map_err(|e| DatabaseError::QueryFailed(format!("Column {}: {}", idx, error_message(&e))))?;
        Ok(column.map(|c| c.0).unwrap_or(serde_json::Value::Null))
    }

    async fn transaction_statement(&mut self, sql: &str) -> DatabaseResult<()> {
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| DatabaseError::TransactionFailed(format!("{}: {}", sql, error_message(&e))))
    }
}

/// Render a driver error, including the server's detail, hint and context
///
/// A server-side error's `Display` is only "db error"; the useful text lives
/// in its fields.
pub fn error_message(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => format_db_error(db.message(), db.detail(), db.hint(), db.where_()),
        None => e.to_string(),
    }
}

/// Join the parts of a server error report into one line
pub fn format_db_error(
    message: &str,
    detail: Option<&str>,
    hint: Option<&str>,
    context: Option<&str>,
) -> String {
    let mut out = message.to_string();
    if let Some(detail) = detail {
        out.push_str(&format!(" (detail: {})", detail));
    }
    if let Some(hint) = hint {
        out.push_str(&format!(" (hint: {})", hint));
    }
    if let Some(context) = context {
        out.push_str(&format!(" [{}]", context));
    }
    out
}

#[async_trait]
impl DatabaseBackend for PostgresBackend {
    async fn begin(&mut self) -> DatabaseResult<()> {
        self.transaction_statement("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> DatabaseResult<()> {
        // The server ends the transaction whether COMMIT succeeds or not
        self.in_transaction = false;
        self.transaction_statement("COMMIT").await
    }

    async fn rollback(&mut self) -> DatabaseResult<()> {
        self.in_transaction = false;
        self.transaction_statement("ROLLBACK").await
    }

    async fn execute(&mut self, sql: &str) -> DatabaseResult<u64> {
        self.client
            .execute(sql, &[])
            .await
            .map_err(|e| DatabaseError::QueryFailed(error_message(&e)))
    }

    async fn batch_execute(&mut self, sql: &str) -> DatabaseResult<()> {
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| DatabaseError::QueryFailed(error_message(&e)))
    }

    async fn copy_in(
        &mut self,
        copy: &CsvCopy,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> DatabaseResult<u64> {
        let copy_failed = |e: tokio_postgres::Error| DatabaseError::CopyFailed {
            table: copy.table().to_string(),
            message: error_message(&e),
        };

        let sql = copy.to_sql();
        let sink = self
            .client
            .copy_in::<_, Bytes>(sql.as_str())
            .await
            .map_err(copy_failed)?;
        futures::pin_mut!(sink);

        // Dropping the sink before `finish` aborts the COPY on the server
        let mut chunks = ReaderStream::with_capacity(source, COPY_CHUNK_SIZE);
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| DatabaseError::SourceRead(e.to_string()))?;
            sink.as_mut().send(chunk).await.map_err(copy_failed)?;
        }

        sink.finish().await.map_err(copy_failed)
    }

    async fn query(
        &mut self,
        sql: &str,
        params: &[serde_json::Value],
        limit: Option<usize>,
    ) -> DatabaseResult<QueryOutcome> {
        let start = Instant::now();

        let statement = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| DatabaseError::QueryFailed(error_message(&e)))?;

        if statement.params().len() != params.len() {
            return Err(DatabaseError::QueryFailed(format!(
                "Statement expects {} parameter(s), got {}",
                statement.params().len(),
                params.len()
            )));
        }
        let bound: Vec<JsonParam<'_>> = params.iter().map(JsonParam).collect();
        let param_refs = bound.iter().map(|p| p as &(dyn ToSql + Sync));

        if statement.columns().is_empty() {
            let affected = self
                .client
                .execute_raw(&statement, param_refs)
                .await
                .map_err(|e| DatabaseError::QueryFailed(error_message(&e)))?;
            return Ok(QueryOutcome::Affected(affected));
        }

        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let stream = self
            .client
            .query_raw(&statement, param_refs)
            .await
            .map_err(|e| DatabaseError::QueryFailed(error_message(&e)))?;
        futures::pin_mut!(stream);

        let mut rows = Vec::new();
        let mut truncated = false;
        while let Some(row) = stream
            .try_next()
            .await
            .map_err(|e| DatabaseError::QueryFailed(error_message(&e)))?
        {
            if limit.is_some_and(|max| rows.len() >= max) {
                truncated = true;
                break;
            }
            rows.push(Self::row_to_json(&row, &columns)?);
        }

        Ok(QueryOutcome::Rows(QueryResult {
            columns,
            rows,
            truncated,
            execution_time_ms: start.elapsed().as_millis() as u64,
        }))
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_db_error_copy_context() {
        let message = format_db_error(
            "invalid input syntax for type integer: \"x\"",
            None,
            None,
            Some("COPY users_raw, line 3, column user_id: \"x\""),
        );
        assert_eq!(
            message,
            "invalid input syntax for type integer: \"x\" [COPY users_raw, line 3, column user_id: \"x\"]"
        );
    }

    #[test]
    fn test_format_db_error_detail_and_hint() {
        let message = format_db_error(
            "duplicate key value violates unique constraint \"users_pkey\"",
            Some("Key (user_id)=(1) already exists."),
            Some("Truncate the table first."),
            None,
        );
        assert_eq!(
            message,
            "duplicate key value violates unique constraint \"users_pkey\" \
             (detail: Key (user_id)=(1) already exists.) (hint: Truncate the table first.)"
        );
        assert_eq!(format_db_error("boom", None, None, None), "boom");
    }

    #[test]
    fn test_copy_failure_message_names_table() {
        let err = DatabaseError::CopyFailed {
            table: "raw.users_raw".to_string(),
            message: format_db_error("extra data after last expected column", None, None, None),
        };
        assert_eq!(
            err.to_string(),
            "COPY into raw.users_raw failed: extra data after last expected column"
        );
    }
}
