//! Database backend abstraction for staging loads and transforms
//!
//! This module provides the seam between the pipeline and the relational
//! store:
//! - `DatabaseBackend`: transaction control, bulk `COPY` ingestion, statement
//!   execution and the generic query capability consumed by reporting tools
//! - `PostgresBackend`: the PostgreSQL implementation reached through the SSH
//!   tunnel
//!
//! The backend is owned exclusively by one pipeline run, so every operation
//! takes `&mut self` and no locking is involved.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::io::AsyncRead;

pub mod postgres;
pub mod value;

pub use self::postgres::PostgresBackend;

use crate::validation::input::{
    ValidationError, normalize_encoding, quote_identifier, validate_identifier,
};

/// Error type for database operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection attempt exceeded the connect timeout
    #[error("Connection timed out after {0}s")]
    ConnectTimeout(u64),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction control statement failed
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Bulk load rejected by the server (malformed row, encoding, constraint)
    #[error("COPY into {table} failed: {message}")]
    CopyFailed { table: String, message: String },

    /// Reading the source stream failed mid-copy
    #[error("Failed to read COPY source: {0}")]
    SourceRead(String),
}

/// Result type for database operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// A fully qualified destination table (`schema.table`).
///
/// Both parts are validated identifiers; [`TableTarget::qualified`] renders
/// the quoted form used inside SQL text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableTarget {
    schema: String,
    table: String,
}

impl TableTarget {
    /// Create a table target from its schema and table names
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Result<Self, ValidationError> {
        let schema = schema.into();
        let table = table.into();
        validate_identifier(&schema, "schema name")?;
        validate_identifier(&table, "table name")?;
        // Unquoted names fold to lower case in SQL; quoted ones must match
        Ok(Self {
            schema: schema.to_ascii_lowercase(),
            table: table.to_ascii_lowercase(),
        })
    }

    /// Built-in names known to be valid identifiers
    pub(crate) fn builtin(schema: &'static str, table: &'static str) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }

    /// Schema part
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Table part
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Quoted `"schema"."table"` form for SQL text
    pub fn qualified(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.schema),
            quote_identifier(&self.table)
        )
    }
}

impl FromStr for TableTarget {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('.') {
            Some((schema, table)) => Self::new(schema, table),
            None => Err(ValidationError::InvalidFormat(
                "table",
                format!("expected 'schema.table', got '{}'", s),
            )),
        }
    }
}

impl TryFrom<String> for TableTarget {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TableTarget> for String {
    fn from(value: TableTarget) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TableTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// A `COPY ... FROM STDIN` bulk load of comma-delimited CSV with a header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvCopy {
    table: TableTarget,
    encoding: String,
}

impl CsvCopy {
    /// Build a copy statement for `table`, validating the declared encoding
    pub fn new(table: TableTarget, encoding: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            table,
            encoding: normalize_encoding(encoding)?,
        })
    }

    /// Destination table
    pub fn table(&self) -> &TableTarget {
        &self.table
    }

    /// PostgreSQL name of the source encoding
    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// SQL text sent to the server
    pub fn to_sql(&self) -> String {
        format!(
            "COPY {} FROM STDIN WITH (FORMAT csv, HEADER true, DELIMITER ',', ENCODING '{}')",
            self.table.qualified(),
            self.encoding
        )
    }
}

/// Query result row as a JSON value
pub type QueryRow = serde_json::Value;

/// Query result set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names
    pub columns: Vec<String>,
    /// Rows of data
    pub rows: Vec<QueryRow>,
    /// Whether more rows were available than the requested limit
    pub truncated: bool,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl QueryResult {
    /// Create a new query result
    pub fn new(columns: Vec<String>, rows: Vec<QueryRow>) -> Self {
        Self {
            columns,
            rows,
            truncated: false,
            execution_time_ms: 0,
        }
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Check if the result is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Outcome of a generic query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    /// The statement returns no rows; number of rows it affected
    Affected(u64),
    /// The statement returns rows
    Rows(QueryResult),
}

/// Database backend trait used by the load engine, the script applier, the
/// table lifecycle manager and the query runner boundary.
#[async_trait]
pub trait DatabaseBackend: Send {
    /// Open an explicit transaction
    async fn begin(&mut self) -> DatabaseResult<()>;

    /// Commit the open transaction
    async fn commit(&mut self) -> DatabaseResult<()>;

    /// Roll back the open transaction
    async fn rollback(&mut self) -> DatabaseResult<()>;

    /// Execute a single statement, returning the number of affected rows
    async fn execute(&mut self, sql: &str) -> DatabaseResult<u64>;

    /// Execute a multi-statement batch as one simple-query message
    async fn batch_execute(&mut self, sql: &str) -> DatabaseResult<()>;

    /// Stream `source` into a `COPY ... FROM STDIN` operation
    ///
    /// # Returns
    /// Number of rows copied
    async fn copy_in(
        &mut self,
        copy: &CsvCopy,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> DatabaseResult<u64>;

    /// Count the rows of a table
    async fn count_rows(&mut self, table: &TableTarget) -> DatabaseResult<u64> {
        let sql = format!("SELECT COUNT(*) AS count FROM {}", table.qualified());
        let count = match self.query(&sql, &[], Some(1)).await? {
            QueryOutcome::Rows(result) => result
                .rows
                .first()
                .and_then(|row| row.get("count"))
                .and_then(serde_json::Value::as_u64),
            QueryOutcome::Affected(_) => None,
        };
        count.ok_or_else(|| {
            DatabaseError::QueryFailed(format!("Row count of {} returned no value", table))
        })
    }

    /// Execute an arbitrary, optionally parameterized, statement
    ///
    /// # Arguments
    /// * `sql` - SQL with `$1, $2, ...` placeholders
    /// * `params` - Parameter values as JSON
    /// * `limit` - Maximum number of rows to return (`None` for all)
    async fn query(
        &mut self,
        sql: &str,
        params: &[serde_json::Value],
        limit: Option<usize>,
    ) -> DatabaseResult<QueryOutcome>;

    /// Get the database backend type name
    fn backend_type(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_target_parse() {
        let target: TableTarget = "raw.users_raw".parse().unwrap();
        assert_eq!(target.schema(), "raw");
        assert_eq!(target.table(), "users_raw");
        assert_eq!(target.to_string(), "raw.users_raw");
        assert_eq!(target.qualified(), "\"raw\".\"users_raw\"");
    }

    #[test]
    fn test_table_target_folds_case() {
        let target: TableTarget = "Raw.Users_Raw".parse().unwrap();
        assert_eq!(target.to_string(), "raw.users_raw");
        assert_eq!(target.qualified(), "\"raw\".\"users_raw\"");
        assert_eq!(target, TableTarget::new("raw", "users_raw").unwrap());
    }

    #[test]
    fn test_table_target_requires_schema() {
        assert!("users_raw".parse::<TableTarget>().is_err());
        assert!("raw.".parse::<TableTarget>().is_err());
        assert!("raw.users; DROP TABLE x".parse::<TableTarget>().is_err());
    }

    #[test]
    fn test_table_target_serde_roundtrip_as_string() {
        let target = TableTarget::new("public", "purchases").unwrap();
        let json = serde_json::to_string(&target).unwrap();
        assert_eq!(json, "\"public.purchases\"");
        let back: TableTarget = serde_json::from_str(&json).unwrap();
        assert_eq!(back, target);
    }

    #[test]
    fn test_csv_copy_sql() {
        let copy = CsvCopy::new("raw.users_raw".parse().unwrap(), "utf-8").unwrap();
        assert_eq!(
            copy.to_sql(),
            "COPY \"raw\".\"users_raw\" FROM STDIN WITH (FORMAT csv, HEADER true, DELIMITER ',', ENCODING 'UTF8')"
        );
    }

    #[test]
    fn test_csv_copy_rejects_unknown_encoding() {
        let table: TableTarget = "raw.users_raw".parse().unwrap();
        assert!(CsvCopy::new(table, "utf8'; --").is_err());
    }

    #[test]
    fn test_query_result_counts() {
        let result = QueryResult::new(
            vec!["n".to_string()],
            vec![serde_json::json!({"n": 1}), serde_json::json!({"n": 2})],
        );
        assert_eq!(result.row_count(), 2);
        assert!(!result.is_empty());
        assert!(!result.truncated);
    }
}
