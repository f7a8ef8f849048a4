//! Remote file access
//!
//! Provides the [`RemoteFs`] abstraction the pipeline reads data files
//! through, and the Remote File Lister built on top of it:
//! - `SftpFs`: files on the remote host, over an SFTP channel
//! - `LocalFs`: files on the local filesystem, optionally re-rooted

use async_trait::async_trait;
use std::fmt;
use tokio::io::AsyncRead;
use tracing::{debug, warn};

pub mod local;
pub mod sftp;

pub use local::LocalFs;
pub use sftp::SftpFs;

/// Extension of the data files picked up by the lister
pub const DATA_FILE_EXTENSION: &str = "csv";

/// Error type for remote file operations
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Listing a directory failed for a reason other than absence
    #[error("Failed to list {path}: {message}")]
    List { path: String, message: String },

    /// Opening a file for reading failed
    #[error("Failed to open {path}: {message}")]
    Open { path: String, message: String },

    /// The file-transfer session could not be established or failed
    #[error("SFTP session failed: {0}")]
    Session(String),
}

/// Result type for remote file operations
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Byte stream over a remote file
pub type RemoteReader = Box<dyn AsyncRead + Send + Unpin>;

/// Kind of data file, inferred from the file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Comma-separated values
    Csv,
}

impl FileKind {
    /// Infer the kind from a file name (case-insensitive extension match)
    pub fn from_name(name: &str) -> Option<Self> {
        let (stem, ext) = name.rsplit_once('.')?;
        if !stem.is_empty() && ext.eq_ignore_ascii_case(DATA_FILE_EXTENSION) {
            Some(FileKind::Csv)
        } else {
            None
        }
    }
}

/// A data file on the remote host
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteFileRef {
    path: String,
    kind: FileKind,
}

impl RemoteFileRef {
    /// Reference `name` inside `dir`, if its name marks it as a data file
    pub fn in_dir(dir: &str, name: &str) -> Option<Self> {
        let kind = FileKind::from_name(name)?;
        Some(Self {
            path: format!("{}/{}", dir.trim_end_matches('/'), name),
            kind,
        })
    }

    /// Full remote path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Inferred file kind
    pub fn kind(&self) -> FileKind {
        self.kind
    }

    /// Last path component
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

impl fmt::Display for RemoteFileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Read access to a (remote) file tree
#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// Names of the entries of `dir`
    ///
    /// # Returns
    /// `None` if the directory does not exist
    async fn list_dir(&self, dir: &str) -> RemoteResult<Option<Vec<String>>>;

    /// Open a read-only byte stream over the file at `path`
    async fn open_read(&self, path: &str) -> RemoteResult<RemoteReader>;
}

/// List the data files of a remote directory, sorted by full path
///
/// A directory that does not exist yields an empty list and a warning;
/// entries that are not data files are skipped.
pub async fn list_data_files<F>(fs: &F, dir: &str) -> RemoteResult<Vec<RemoteFileRef>>
where
    F: RemoteFs + ?Sized,
{
    let Some(names) = fs.list_dir(dir).await? else {
        warn!(dir = %dir, "Remote directory does not exist; nothing to load");
        return Ok(Vec::new());
    };

    let total = names.len();
    let mut files: Vec<RemoteFileRef> = names
        .iter()
        .filter_map(|name| RemoteFileRef::in_dir(dir, name))
        .collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));

    debug!(
        dir = %dir,
        entries = total,
        data_files = files.len(),
        "Listed remote directory"
    );

    Ok(files)
}
