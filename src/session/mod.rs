//! Session management
//!
//! A [`RemoteSession`] bundles the three remote resources one pipeline run
//! needs:
//! - an SSH tunnel forwarding a local port to the database
//! - a PostgreSQL connection through that tunnel
//! - optionally, an SFTP channel on a second SSH connection
//!
//! [`RemoteSession::close`] releases them in reverse acquisition order:
//! database, then SFTP, then tunnel. If a session is dropped without being
//! closed (panic, cancelled future), its fields drop in that same order and
//! each resource tears itself down on a best-effort basis.
//!
//! Resources are opened through a [`SessionOpener`]; [`SshOpener`] opens the
//! real SSH, SFTP and PostgreSQL connections.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, warn};

pub mod ssh;
pub mod tunnel;

pub use self::tunnel::Tunnel;

use crate::config::{ConfigError, DatabaseSection, SshSection};
use crate::database::{DatabaseBackend, DatabaseError, DatabaseResult, PostgresBackend, QueryOutcome};
use crate::remote::{RemoteError, RemoteFs, SftpFs};

/// Error type for session acquisition
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// SSH settings are unusable
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// TCP connect or SSH handshake failed
    #[error("SSH {purpose} connection to {address} failed: {message}")]
    Connect {
        purpose: &'static str,
        address: String,
        message: String,
    },

    /// The server rejected the credential
    #[error("SSH {purpose} authentication as {user} failed: {message}")]
    Authentication {
        purpose: &'static str,
        user: String,
        message: String,
    },

    /// The private key file could not be loaded
    #[error("Failed to load private key {path}: {message}")]
    PrivateKey { path: PathBuf, message: String },

    /// The local end of the tunnel could not be bound
    #[error("Failed to bind tunnel port: {0}")]
    TunnelBind(String),

    /// The session was acquired without a file-transfer channel
    #[error("Session has no file-transfer channel")]
    NoFileTransfer,

    /// Opening the file-transfer channel failed
    #[error(transparent)]
    FileTransfer(#[from] RemoteError),

    /// Connecting to the database failed
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// A session resource with asynchronous teardown
#[async_trait]
pub trait Release: Send + Sized {
    /// Tear the resource down; failures are logged, not returned
    async fn release(self);
}

/// The local end of a port forward
pub trait TunnelEndpoint: Release {
    /// Local port forwarded to the database
    fn local_port(&self) -> u16;
}

/// Opens the resources of a [`RemoteSession`]
#[async_trait]
pub trait SessionOpener: Send + Sync {
    /// Port forward to the database
    type Tunnel: TunnelEndpoint;
    /// Database connection through the tunnel
    type Database: DatabaseBackend + Release;
    /// File-transfer channel
    type Files: RemoteFs + Release;

    /// Open the tunnel
    async fn open_tunnel(&self) -> SessionResult<Self::Tunnel>;

    /// Open the file-transfer channel
    async fn open_files(&self) -> SessionResult<Self::Files>;

    /// Connect to the database through the tunnel's local port
    async fn open_database(&self, local_port: u16) -> SessionResult<Self::Database>;
}

#[async_trait]
impl Release for PostgresBackend {
    async fn release(self) {
        if let Err(e) = self.close().await {
            warn!(error = %e, "Database connection did not close cleanly");
        }
    }
}

#[async_trait]
impl Release for SftpFs {
    async fn release(self) {
        self.close().await;
    }
}

#[async_trait]
impl Release for Tunnel {
    async fn release(self) {
        self.close().await;
    }
}

impl TunnelEndpoint for Tunnel {
    fn local_port(&self) -> u16 {
        Tunnel::local_port(self)
    }
}

/// Opens the tunnel and SFTP channel over SSH and PostgreSQL through the
/// tunnel
pub struct SshOpener<'a> {
    ssh: &'a SshSection,
    database: &'a DatabaseSection,
}

impl<'a> SshOpener<'a> {
    /// Opener for the given SSH host and database
    pub fn new(ssh: &'a SshSection, database: &'a DatabaseSection) -> Self {
        Self { ssh, database }
    }
}

#[async_trait]
impl<'a> SessionOpener for SshOpener<'a> {
    type Tunnel = Tunnel;
    type Database = PostgresBackend;
    type Files = SftpFs;

    async fn open_tunnel(&self) -> SessionResult<Tunnel> {
        Tunnel::open(self.ssh, self.database.port).await
    }

    async fn open_files(&self) -> SessionResult<SftpFs> {
        SftpFs::connect(self.ssh).await
    }

    async fn open_database(&self, local_port: u16) -> SessionResult<PostgresBackend> {
        Ok(PostgresBackend::connect(self.database, local_port).await?)
    }
}

/// Tunnel, database connection and optional SFTP channel of one run
///
/// Field order is drop order.
pub struct RemoteSession<D = PostgresBackend, F = SftpFs, T = Tunnel> {
    db: D,
    files: Option<F>,
    tunnel: T,
}

impl RemoteSession {
    /// Acquire a session over SSH
    ///
    /// # Arguments
    /// * `ssh` - SSH host, user and credential
    /// * `db` - Database name, credentials and remote port
    /// * `want_file_transfer` - Whether to open the SFTP channel
    pub async fn acquire(
        ssh: &SshSection,
        db: &DatabaseSection,
        want_file_transfer: bool,
    ) -> SessionResult<Self> {
        Self::open_with(&SshOpener::new(ssh, db), want_file_transfer).await
    }
}

impl<D, F, T> RemoteSession<D, F, T>
where
    D: DatabaseBackend + Release,
    F: RemoteFs + Release,
    T: TunnelEndpoint,
{
    /// Open a session: tunnel, then file transfer, then database
    ///
    /// Anything opened before a failure is released again before the error
    /// is returned; no partially-open session escapes.
    pub async fn open_with<O>(opener: &O, want_file_transfer: bool) -> SessionResult<Self>
    where
        O: SessionOpener<Tunnel = T, Database = D, Files = F> + ?Sized,
    {
        let tunnel = opener.open_tunnel().await?;

        let files = if want_file_transfer {
            match opener.open_files().await {
                Ok(files) => Some(files),
                Err(e) => {
                    tunnel.release().await;
                    return Err(e);
                }
            }
        } else {
            None
        };

        let db = match opener.open_database(tunnel.local_port()).await {
            Ok(db) => db,
            Err(e) => {
                if let Some(files) = files {
                    files.release().await;
                }
                tunnel.release().await;
                return Err(e);
            }
        };

        debug!(
            local_port = tunnel.local_port(),
            file_transfer = want_file_transfer,
            "Remote session acquired"
        );

        Ok(Self { db, files, tunnel })
    }

    /// The database connection
    pub fn database(&mut self) -> &mut D {
        &mut self.db
    }

    /// The file-transfer channel, if one was opened
    pub fn files(&self) -> Option<&F> {
        self.files.as_ref()
    }

    /// Database connection and file-transfer channel together
    pub fn parts(&mut self) -> SessionResult<(&mut D, &F)> {
        match &self.files {
            Some(files) => Ok((&mut self.db, files)),
            None => Err(SessionError::NoFileTransfer),
        }
    }

    /// Local port of the tunnel
    pub fn local_port(&self) -> u16 {
        self.tunnel.local_port()
    }

    /// Run an arbitrary query on the session's database connection
    pub async fn query(
        &mut self,
        sql: &str,
        params: &[serde_json::Value],
        limit: Option<usize>,
    ) -> DatabaseResult<QueryOutcome> {
        self.db.query(sql, params, limit).await
    }

    /// Release the session: database first, then SFTP, then the tunnel
    ///
    /// Failures are logged; teardown always runs to completion.
    pub async fn close(self) {
        let Self { db, files, tunnel } = self;

        db.release().await;
        if let Some(files) = files {
            files.release().await;
        }
        tunnel.release().await;

        debug!("Remote session released");
    }
}
