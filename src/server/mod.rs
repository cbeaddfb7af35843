//! Dual-listener throughput server.
//!
//! `ThroughputServer` binds a TCP listener and a UDP socket on the same port
//! and runs two independent flows that share no state:
//!
//! - the TCP acceptor, spawning one [`TcpSessionHandler`] task per connection;
//! - the [`UdpSessionTracker`], a single polling loop over the UDP socket.

pub mod tcp;
pub mod udp;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::format::{format_data, format_speed, Quantity, Unit};
use crate::wire::Protocol;

pub use tcp::{TcpOutcome, TcpSessionHandler};
pub use udp::{DatagramOutcome, SessionTable, UdpSessionTracker};

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// SessionReport
// ---------------------------------------------------------------------------

/// Final statistics of one TCP connection or UDP session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub peer: SocketAddr,
    pub protocol: Protocol,
    /// Payload bytes received, handshake tag excluded.
    pub bytes: u64,
    pub duration: Duration,
    /// Received file, for file-mode sessions.
    pub saved_to: Option<PathBuf>,
}

impl SessionReport {
    pub fn data(&self) -> Quantity {
        format_data(self.bytes, Unit::MegaByte)
    }

    pub fn speed(&self) -> Quantity {
        format_speed(self.bytes, self.duration.as_secs_f64(), Unit::MegaByte)
    }

    pub fn log(&self, reason: &str) {
        info!(
            session_id = %self.session_id,
            peer = %self.peer,
            protocol = %self.protocol,
            bytes = self.bytes,
            duration_sec = self.duration.as_secs_f64(),
            saved_to = ?self.saved_to,
            reason,
            "received {} in {:.2} s ({})",
            self.data(),
            self.duration.as_secs_f64(),
            self.speed()
        );
    }
}

// ---------------------------------------------------------------------------
// ThroughputServer
// ---------------------------------------------------------------------------

pub struct ThroughputServer {
    config: ServerConfig,
}

impl ThroughputServer {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Bind both listeners. With port `0` the UDP socket reuses the port the
    /// OS assigned to the TCP listener.
    pub async fn bind(self) -> Result<BoundServer> {
        self.config.validate()?;

        let tcp_bind = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&tcp_bind)
            .await
            .with_context(|| format!("failed to bind TCP listener on {}", tcp_bind))?;
        let port = listener
            .local_addr()
            .context("failed to get TCP listener address")?
            .port();

        let udp_bind = format!("{}:{}", self.config.bind_address, port);
        let socket = UdpSocket::bind(&udp_bind)
            .await
            .with_context(|| format!("failed to bind UDP socket on {}", udp_bind))?;

        Ok(BoundServer {
            listener,
            socket,
            config: self.config,
        })
    }

    /// Bind and serve until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        self.bind().await?.serve(cancel).await
    }
}

/// Server with both sockets bound, ready to serve.
pub struct BoundServer {
    listener: TcpListener,
    socket: UdpSocket,
    config: ServerConfig,
}

impl BoundServer {
    pub fn tcp_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("failed to get TCP listener address")
    }

    pub fn udp_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .context("failed to get UDP socket address")
    }

    /// Run the TCP acceptor and the UDP tracker until `cancel` fires.
    ///
    /// In-flight TCP connections are not waited for on shutdown.
    pub async fn serve(self, cancel: CancellationToken) -> Result<()> {
        let tcp_addr = self.tcp_addr()?;
        let udp_addr = self.udp_addr()?;
        info!(
            %tcp_addr,
            %udp_addr,
            output_dir = %self.config.output_dir.display(),
            udp_session_budget_ms = self.config.udp_session_budget_ms,
            "throughput server listening"
        );

        let handler = Arc::new(TcpSessionHandler::new(self.config.output_dir.clone()));
        let tcp_task = tokio::spawn(accept_loop(self.listener, handler, cancel.clone()));

        let table = SessionTable::from_config(&self.config);
        let tracker = UdpSessionTracker::new(self.socket, table, self.config.poll_interval());
        let udp_task = tokio::spawn(tracker.run(cancel.clone()));

        let (tcp_res, udp_res) = tokio::join!(tcp_task, udp_task);
        tcp_res.context("TCP acceptor task failed")?;
        udp_res.context("UDP tracker task failed")?;

        info!("throughput server stopped");
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<TcpSessionHandler>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        handler.handle(stream, peer).await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "TCP accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    info!("TCP acceptor stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
