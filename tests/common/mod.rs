//! Shared test helpers: an in-memory database backend and CSV fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};
use tunnel_ingest::config::PipelineConfig;
use tunnel_ingest::database::{
    CsvCopy, DatabaseBackend, DatabaseError, DatabaseResult, QueryOutcome, TableTarget,
};

/// Rows of one in-memory table
#[derive(Debug, Clone, Default)]
struct Table {
    columns: usize,
    rows: Vec<Vec<String>>,
}

/// In-memory `DatabaseBackend`
///
/// Tables are keyed by their `schema.table` name. `COPY` input is parsed with
/// the `csv` crate (header skipped, strict column count). `BEGIN` snapshots
/// the tables and `ROLLBACK` restores the snapshot. Statements other than
/// `TRUNCATE` are only recorded.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tables: BTreeMap<String, Table>,
    snapshot: Option<BTreeMap<String, Table>>,
    aborted: bool,
    statements: Vec<String>,
    fail_on: Option<String>,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

impl MemoryDatabase {
    /// Database with the default staging and target tables
    pub fn standard() -> Self {
        let mut db = Self::default();
        db.create_table("raw.users_raw", 3);
        db.create_table("raw.purchases_raw", 4);
        db.create_table("public.users", 3);
        db.create_table("public.purchases", 4);
        db
    }

    pub fn create_table(&mut self, name: &str, columns: usize) {
        self.tables.insert(
            name.to_string(),
            Table {
                columns,
                rows: Vec::new(),
            },
        );
    }

    /// Fail any statement containing `needle`
    pub fn fail_on(&mut self, needle: &str) {
        self.fail_on = Some(needle.to_string());
    }

    /// Insert rows outside any transaction
    pub fn seed(&mut self, name: &str, rows: &[&[&str]]) {
        let table = self.tables.get_mut(name).expect("unknown table");
        for row in rows {
            table.rows.push(row.iter().map(|v| v.to_string()).collect());
        }
    }

    pub fn rows(&self, name: &str) -> Vec<Vec<String>> {
        self.tables
            .get(name)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn row_count(&self, name: &str) -> usize {
        self.tables.get(name).map(|t| t.rows.len()).unwrap_or(0)
    }

    /// First column of every row, for order checks
    pub fn ids(&self, name: &str) -> Vec<String> {
        self.rows(name).into_iter().map(|r| r[0].clone()).collect()
    }

    /// Statements passed to `execute` / `batch_execute`, in order
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    fn check_usable(&self) -> DatabaseResult<()> {
        if self.aborted {
            return Err(DatabaseError::QueryFailed(
                "current transaction is aborted, commands ignored until end of transaction block"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn fail(&mut self, error: DatabaseError) -> DatabaseError {
        if self.snapshot.is_some() {
            self.aborted = true;
        }
        error
    }

    fn run(&mut self, sql: &str) -> DatabaseResult<u64> {
        self.check_usable()?;
        self.statements.push(sql.to_string());

        if let Some(needle) = &self.fail_on {
            if sql.contains(needle.as_str()) {
                let message = format!("statement rejected: {}", sql);
                return Err(self.fail(DatabaseError::QueryFailed(message)));
            }
        }

        if let Some(rest) = sql.strip_prefix("TRUNCATE TABLE ") {
            let names = rest
                .split(" RESTART")
                .next()
                .unwrap_or(rest)
                .split(", ")
                .map(|n| n.replace('"', ""));
            for name in names {
                match self.tables.get_mut(&name) {
                    Some(table) => table.rows.clear(),
                    None => {
                        let message = format!("relation \"{}\" does not exist", name);
                        return Err(self.fail(DatabaseError::QueryFailed(message)));
                    }
                }
            }
        }

        Ok(0)
    }
}

#[async_trait]
impl DatabaseBackend for MemoryDatabase {
    async fn begin(&mut self) -> DatabaseResult<()> {
        if self.snapshot.is_some() {
            return Err(DatabaseError::TransactionFailed(
                "transaction already open".to_string(),
            ));
        }
        self.begins += 1;
        self.snapshot = Some(self.tables.clone());
        Ok(())
    }

    async fn commit(&mut self) -> DatabaseResult<()> {
        let Some(snapshot) = self.snapshot.take() else {
            return Err(DatabaseError::TransactionFailed("no transaction".to_string()));
        };
        if self.aborted {
            // COMMIT of an aborted transaction rolls back
            self.tables = snapshot;
            self.aborted = false;
            self.rollbacks += 1;
            return Ok(());
        }
        self.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> DatabaseResult<()> {
        if let Some(snapshot) = self.snapshot.take() {
            self.tables = snapshot;
        }
        self.aborted = false;
        self.rollbacks += 1;
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> DatabaseResult<u64> {
        self.run(sql)
    }

    async fn batch_execute(&mut self, sql: &str) -> DatabaseResult<()> {
        self.run(sql).map(|_| ())
    }

    async fn copy_in(
        &mut self,
        copy: &CsvCopy,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> DatabaseResult<u64> {
        self.check_usable()?;

        let name = copy.table().to_string();
        let copy_failed = |message: String| DatabaseError::CopyFailed {
            table: name.clone(),
            message,
        };

        let mut bytes = Vec::new();
        source
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| DatabaseError::SourceRead(e.to_string()))?;

        let Some(columns) = self.tables.get(&name).map(|t| t.columns) else {
            let error = copy_failed(format!("relation \"{}\" does not exist", name));
            return Err(self.fail(error));
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(bytes.as_slice());

        let mut parsed = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = match record {
                Ok(record) => record,
                Err(e) => return Err(self.fail(copy_failed(e.to_string()))),
            };
            if record.len() != columns {
                let message = format!(
                    "line {}: expected {} columns, got {}",
                    line + 2,
                    columns,
                    record.len()
                );
                return Err(self.fail(copy_failed(message)));
            }
            parsed.push(record.iter().map(str::to_string).collect::<Vec<_>>());
        }

        let count = parsed.len() as u64;
        if let Some(table) = self.tables.get_mut(&name) {
            table.rows.extend(parsed);
        }
        Ok(count)
    }

    async fn count_rows(&mut self, table: &TableTarget) -> DatabaseResult<u64> {
        self.check_usable()?;
        self.tables
            .get(&table.to_string())
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| {
                DatabaseError::QueryFailed(format!("relation \"{}\" does not exist", table))
            })
    }

    async fn query(
        &mut self,
        sql: &str,
        _params: &[serde_json::Value],
        _limit: Option<usize>,
    ) -> DatabaseResult<QueryOutcome> {
        self.run(sql).map(QueryOutcome::Affected)
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

/// Write a CSV file with a header and `rows` data rows
pub fn write_csv(dir: &Path, name: &str, header: &str, rows: &[&str]) {
    std::fs::create_dir_all(dir).unwrap();
    let mut content = String::from(header);
    content.push('\n');
    for row in rows {
        content.push_str(row);
        content.push('\n');
    }
    std::fs::write(dir.join(name), content).unwrap();
}

pub const USERS_HEADER: &str = "user_id,name,email";
pub const PURCHASES_HEADER: &str = "purchase_id,user_id,amount,purchased_at";

/// Configuration whose remote root is `/pipeline`, for use with a
/// `LocalFs` rooted at a temporary directory
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::new();
    config.ssh.host = "10.0.0.5".to_string();
    config.ssh.user = "loader".to_string();
    config.ssh.password = Some("pw".to_string());
    config.database.name = "ecommerce".to_string();
    config.database.user = "appuser".to_string();
    config.remote.root = "/pipeline".to_string();
    config
}

pub fn table(name: &str) -> TableTarget {
    name.parse().unwrap()
}
