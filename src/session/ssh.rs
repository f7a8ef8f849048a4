//! Authenticated SSH client connections
//!
//! Both the tunnel and the file-transfer channel ride on their own SSH
//! connection, opened here.

use russh::client::{self, Handle};
use russh::keys::{HashAlg, PrivateKeyWithHashAlg, PublicKey};
use russh::Disconnect;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{SessionError, SessionResult};
use crate::config::{SshCredential, SshSection};

/// Upper bound on the TCP connect and key exchange
pub const SSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Unanswered keep-alive probes tolerated before the connection is dropped
const KEEPALIVE_MAX: usize = 3;

/// Client handler that accepts any server host key
///
/// The key's fingerprint is logged so operators can audit it.
pub struct AcceptingHandler {
    host: String,
}

impl client::Handler for AcceptingHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, key: &PublicKey) -> Result<bool, Self::Error> {
        debug!(
            host = %self.host,
            fingerprint = %key.fingerprint(HashAlg::Sha256),
            "Accepting SSH host key"
        );
        Ok(true)
    }
}

/// Handle to an authenticated SSH connection
pub type SshHandle = Handle<AcceptingHandler>;

/// Open an SSH connection and authenticate with the configured credential
///
/// `purpose` only labels log lines and errors ("tunnel", "sftp").
pub async fn connect(ssh: &SshSection, purpose: &'static str) -> SessionResult<SshHandle> {
    let credential = ssh.credential()?;

    let config = Arc::new(client::Config {
        keepalive_interval: Some(Duration::from_secs(ssh.keepalive_secs)),
        keepalive_max: KEEPALIVE_MAX,
        ..Default::default()
    });
    let handler = AcceptingHandler {
        host: ssh.host.clone(),
    };

    let connect = client::connect(config, (ssh.host.as_str(), ssh.port), handler);
    let mut handle = tokio::time::timeout(SSH_CONNECT_TIMEOUT, connect)
        .await
        .map_err(|_| SessionError::Connect {
            purpose,
            address: ssh.address(),
            message: format!("timed out after {}s", SSH_CONNECT_TIMEOUT.as_secs()),
        })?
        .map_err(|e| SessionError::Connect {
            purpose,
            address: ssh.address(),
            message: e.to_string(),
        })?;

    let auth_failed = |message: String| SessionError::Authentication {
        purpose,
        user: ssh.user.clone(),
        message,
    };

    let auth = match credential {
        SshCredential::Password(password) => {
            handle.authenticate_password(ssh.user.as_str(), password).await
        }
        SshCredential::PrivateKey(path) => {
            let key = russh::keys::load_secret_key(&path, None).map_err(|e| {
                SessionError::PrivateKey {
                    path: path.clone(),
                    message: e.to_string(),
                }
            })?;
            let hash_alg = handle
                .best_supported_rsa_hash()
                .await
                .map_err(|e| auth_failed(e.to_string()))?
                .flatten();
            handle
                .authenticate_publickey(
                    ssh.user.as_str(),
                    PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                )
                .await
        }
    }
    .map_err(|e| auth_failed(e.to_string()))?;

    if !auth.success() {
        disconnect(&handle, purpose).await;
        return Err(auth_failed("credentials rejected".to_string()));
    }

    debug!(purpose, address = %ssh.address(), user = %ssh.user, "SSH connection authenticated");
    Ok(handle)
}

/// Politely close an SSH connection; failures are logged, not returned
pub async fn disconnect(handle: &SshHandle, purpose: &'static str) {
    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "", "English")
        .await
    {
        warn!(purpose, error = %e, "SSH disconnect failed");
    }
}
