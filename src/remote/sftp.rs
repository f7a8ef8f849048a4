//! SFTP implementation of [`RemoteFs`]
//!
//! Runs on its own SSH connection, independent of the database tunnel, so
//! either can be closed without disturbing the other.

use async_trait::async_trait;
use russh_sftp::client::SftpSession;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::protocol::StatusCode;
use tracing::{debug, warn};

use super::{RemoteError, RemoteFs, RemoteReader, RemoteResult};
use crate::config::SshSection;
use crate::session::ssh::{self, SshHandle};
use crate::session::SessionResult;

const PURPOSE: &str = "sftp";

/// Remote files read over SFTP
pub struct SftpFs {
    sftp: SftpSession,
    handle: SshHandle,
}

impl SftpFs {
    /// Open a dedicated SSH connection and start the `sftp` subsystem on it
    pub async fn connect(ssh: &SshSection) -> SessionResult<Self> {
        let handle = ssh::connect(ssh, PURPOSE).await?;

        match Self::start_subsystem(&handle).await {
            Ok(sftp) => {
                debug!(ssh_host = %ssh.host, "SFTP session established");
                Ok(Self { sftp, handle })
            }
            Err(e) => {
                ssh::disconnect(&handle, PURPOSE).await;
                Err(e.into())
            }
        }
    }

    async fn start_subsystem(handle: &SshHandle) -> RemoteResult<SftpSession> {
        let session_failed = |message: String| RemoteError::Session(message);

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| session_failed(e.to_string()))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| session_failed(e.to_string()))?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| session_failed(e.to_string()))
    }

    /// End the SFTP session and disconnect its SSH connection
    pub async fn close(self) {
        if let Err(e) = self.sftp.close().await {
            warn!(error = %e, "SFTP session close failed");
        }
        ssh::disconnect(&self.handle, PURPOSE).await;
        debug!("SFTP session closed");
    }
}

fn is_not_found(error: &SftpError) -> bool {
    matches!(
        error,
        SftpError::Status(status) if status.status_code == StatusCode::NoSuchFile
    )
}

#[async_trait]
impl RemoteFs for SftpFs {
    async fn list_dir(&self, dir: &str) -> RemoteResult<Option<Vec<String>>> {
        match self.sftp.read_dir(dir).await {
            Ok(entries) => Ok(Some(entries.map(|entry| entry.file_name()).collect())),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(RemoteError::List {
                path: dir.to_string(),
                message: e.to_string(),
            }),
        }
    }

    async fn open_read(&self, path: &str) -> RemoteResult<RemoteReader> {
        let file = self.sftp.open(path).await.map_err(|e| RemoteError::Open {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        Ok(Box::new(file))
    }
}
