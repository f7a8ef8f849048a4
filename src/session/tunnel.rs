//! Local port forwarding over SSH
//!
//! Binds an ephemeral port on the loopback interface and relays every
//! accepted connection through a `direct-tcpip` channel to the database port
//! on the remote host.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use super::ssh::{self, SshHandle};
use super::{SessionError, SessionResult};
use crate::config::SshSection;

/// Host the forwarded connections are addressed to, as seen from the SSH server
///
/// Must stay an IPv4 literal: `localhost` may resolve to `::1` there.
const REMOTE_BIND_HOST: Ipv4Addr = Ipv4Addr::LOCALHOST;

const PURPOSE: &str = "tunnel";

/// An SSH tunnel forwarding a local port to the remote database port
pub struct Tunnel {
    local_port: u16,
    handle: Arc<SshHandle>,
    forwarder: JoinHandle<()>,
}

impl Tunnel {
    /// Connect, authenticate and start forwarding `127.0.0.1:<ephemeral>` to
    /// `127.0.0.1:<remote_port>` on the SSH host
    pub async fn open(ssh: &SshSection, remote_port: u16) -> SessionResult<Self> {
        let handle = Arc::new(ssh::connect(ssh, PURPOSE).await?);

        let listener = match TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await {
            Ok(listener) => listener,
            Err(e) => {
                ssh::disconnect(&handle, PURPOSE).await;
                return Err(SessionError::TunnelBind(e.to_string()));
            }
        };
        let local_port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                ssh::disconnect(&handle, PURPOSE).await;
                return Err(SessionError::TunnelBind(e.to_string()));
            }
        };

        let forwarder = tokio::spawn(forward(
            listener,
            Arc::clone(&handle),
            local_port,
            remote_port,
        ));

        debug!(
            local_port,
            remote_port,
            ssh_host = %ssh.host,
            "SSH tunnel established"
        );

        Ok(Self {
            local_port,
            handle,
            forwarder,
        })
    }

    /// Local port the tunnel listens on
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Stop forwarding and disconnect the SSH connection
    pub async fn close(self) {
        self.forwarder.abort();
        ssh::disconnect(&self.handle, PURPOSE).await;
        debug!(local_port = self.local_port, "SSH tunnel closed");
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        // Relay tasks live in the forwarder's JoinSet and are aborted with it
        self.forwarder.abort();
    }
}

async fn forward(listener: TcpListener, handle: Arc<SshHandle>, local_port: u16, remote_port: u16) {
    let mut relays = JoinSet::new();

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Tunnel listener failed");
                break;
            }
        };

        relays.spawn(relay(stream, peer, Arc::clone(&handle), local_port, remote_port));

        // Reap finished relays so the set does not grow without bound
        while relays.try_join_next().is_some() {}
    }
}

/// Host and port a `direct-tcpip` channel is opened to
fn forward_target(remote_port: u16) -> (String, u32) {
    (REMOTE_BIND_HOST.to_string(), u32::from(remote_port))
}

async fn relay(
    mut stream: TcpStream,
    peer: SocketAddr,
    handle: Arc<SshHandle>,
    local_port: u16,
    remote_port: u16,
) {
    let (host, port) = forward_target(remote_port);
    let channel = match handle
        .channel_open_direct_tcpip(host, port, peer.ip().to_string(), u32::from(local_port))
        .await
    {
        Ok(channel) => channel,
        Err(e) => {
            warn!(error = %e, remote_port, "Failed to open forwarding channel");
            return;
        }
    };

    let mut remote = channel.into_stream();
    match tokio::io::copy_bidirectional(&mut stream, &mut remote).await {
        Ok((sent, received)) => debug!(sent, received, "Tunnel connection closed"),
        Err(e) => debug!(error = %e, "Tunnel connection ended"),
    }
}
