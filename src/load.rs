//! Streaming load engine
//!
//! Streams remote CSV files straight into `COPY ... FROM STDIN`, one file at
//! a time, over a single database connection. All files of one call share a
//! transaction: either every file lands or none does.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::database::{CsvCopy, DatabaseBackend, DatabaseError, TableTarget};
use crate::remote::{self, RemoteError, RemoteFileRef, RemoteFs};
use crate::validation::ValidationError;

/// Error type for load operations
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The copy target or encoding is invalid
    #[error("Invalid load request: {0}")]
    Invalid(#[from] ValidationError),

    /// Listing or opening a remote file failed
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Streaming one file into the table failed
    #[error("Loading {file} into {table} failed: {source}")]
    File {
        file: String,
        table: TableTarget,
        #[source]
        source: DatabaseError,
    },

    /// Transaction control failed
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Outcome of loading one batch of files into a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadResult {
    /// Table the files were loaded into
    pub table: TableTarget,
    /// Number of files streamed
    pub files: usize,
    /// Number of rows copied, across all files
    pub rows: u64,
}

impl LoadResult {
    fn empty(table: &TableTarget) -> Self {
        Self {
            table: table.clone(),
            files: 0,
            rows: 0,
        }
    }
}

/// Load `files`, in order, into `table` within one transaction
///
/// An empty file list is a no-op. If any file fails, the transaction is
/// rolled back and the table is left at its previous contents.
///
/// # Arguments
/// * `db` - Database connection
/// * `fs` - Source of the file contents
/// * `table` - Destination table
/// * `files` - Files to load, in load order
/// * `encoding` - Encoding of the file contents
pub async fn load<D, F>(
    db: &mut D,
    fs: &F,
    table: &TableTarget,
    files: &[RemoteFileRef],
    encoding: &str,
) -> Result<LoadResult, LoadError>
where
    D: DatabaseBackend + ?Sized,
    F: RemoteFs + ?Sized,
{
    let copy = CsvCopy::new(table.clone(), encoding)?;

    if files.is_empty() {
        debug!(table = %table, "No files to load");
        return Ok(LoadResult::empty(table));
    }

    db.begin().await?;

    let rows = match copy_files(db, fs, &copy, files).await {
        Ok(rows) => rows,
        Err(e) => {
            if let Err(rollback) = db.rollback().await {
                warn!(table = %table, error = %rollback, "Rollback after failed load also failed");
            }
            warn!(table = %table, "Load rolled back; no files from this batch were kept");
            return Err(e);
        }
    };

    db.commit().await?;

    info!(table = %table, files = files.len(), rows, "Load committed");

    Ok(LoadResult {
        table: table.clone(),
        files: files.len(),
        rows,
    })
}

/// List the data files of `dir` and load them into `table`
pub async fn load_directory<D, F>(
    db: &mut D,
    fs: &F,
    dir: &str,
    table: &TableTarget,
    encoding: &str,
) -> Result<LoadResult, LoadError>
where
    D: DatabaseBackend + ?Sized,
    F: RemoteFs + ?Sized,
{
    let files = remote::list_data_files(fs, dir).await?;
    info!(dir = %dir, table = %table, files = files.len(), "Loading directory");
    load(db, fs, table, &files, encoding).await
}

async fn copy_files<D, F>(
    db: &mut D,
    fs: &F,
    copy: &CsvCopy,
    files: &[RemoteFileRef],
) -> Result<u64, LoadError>
where
    D: DatabaseBackend + ?Sized,
    F: RemoteFs + ?Sized,
{
    let mut total = 0;

    for file in files {
        debug!(file = %file, table = %copy.table(), "Streaming file");

        let mut reader = fs.open_read(file.path()).await?;
        let rows = db
            .copy_in(copy, &mut *reader)
            .await
            .map_err(|source| LoadError::File {
                file: file.path().to_string(),
                table: copy.table().clone(),
                source,
            })?;

        debug!(file = %file, rows, "File streamed");
        total += rows;
    }

    Ok(total)
}
