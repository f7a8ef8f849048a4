//! Tunnel Ingest - load remote CSV files into PostgreSQL over SSH
//!
//! Provides:
//! - Session management (SSH tunnel, tunneled database connection, SFTP)
//! - Remote file listing and streaming `COPY` loads into staging tables
//! - SQL script application with literal-aware statement splitting
//! - Table truncation for idempotent re-runs
//! - Pipeline orchestration with row-count reporting
//! - A generic query capability for downstream reporting tools

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod database;
pub mod load;
#[cfg(feature = "cli")]
pub mod logging;
pub mod pipeline;
pub mod remote;
pub mod script;
pub mod session;
pub mod signal;
pub mod tables;
pub mod validation;

// Re-export commonly used types
pub use config::{ConfigError, PipelineConfig, SshCredential, sample_config};
pub use database::{
    CsvCopy, DatabaseBackend, DatabaseError, DatabaseResult, PostgresBackend, QueryOutcome,
    QueryResult, TableTarget,
};
pub use load::{LoadError, LoadResult};
pub use pipeline::{
    Pipeline, PipelineError, PipelineResult, RowCountSnapshot, RunSummary, StatusReport,
};
pub use remote::{FileKind, LocalFs, RemoteError, RemoteFileRef, RemoteFs, SftpFs};
pub use script::{ScriptError, StatementSplitter};
pub use session::{
    Release, RemoteSession, SessionError, SessionOpener, SshOpener, TunnelEndpoint,
};
pub use validation::ValidationError;
