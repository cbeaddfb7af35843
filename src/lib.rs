//! speedprobe -- TCP/UDP throughput measurement.
//!
//! The client runs N concurrent workers that push randomized chunks at a
//! server for a fixed duration and aggregates what they sent. The server
//! accepts TCP connections and tracks UDP sessions on the same port, counting
//! (and optionally persisting) everything it receives.

pub mod client;
pub mod config;
pub mod error;
pub mod format;
pub mod server;
pub mod wire;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

pub use error::SpeedError;

/// Run one client measurement.
pub async fn run_client(
    config: config::ClientConfig,
    cancel: CancellationToken,
) -> Result<Option<client::RunReport>> {
    client::LoadGenerator::new(config).run(cancel).await
}

/// Run the dual-listener server until `cancel` fires.
pub async fn serve(config: config::ServerConfig, cancel: CancellationToken) -> Result<()> {
    tracing::info!(port = config.port, "starting speedprobe server");
    server::ThroughputServer::new(config).run(cancel).await
}
