//! TCP load worker.

use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::payload::Payload;
use super::{WorkerConfig, WorkerResult};
use crate::error::SpeedError;
use crate::wire::{ModeTag, Protocol};

/// Smallest chunk written per send.
pub const CHUNK_MIN: usize = 512;
/// Largest chunk written per send.
pub const CHUNK_MAX: usize = 4096;

/// One TCP connection pushing randomly sized chunks for a fixed duration.
pub struct TcpWorker {
    id: usize,
    config: Arc<WorkerConfig>,
}

impl TcpWorker {
    pub fn new(id: usize, config: Arc<WorkerConfig>) -> Self {
        Self { id, config }
    }

    /// Run the worker to completion.
    ///
    /// Returns `Err` only when the worker cannot start (missing source file,
    /// connection failure). A socket error mid-transfer still yields a result
    /// covering the bytes sent before the fault.
    ///
    /// The end of the transfer is signalled to the server by shutting down the
    /// write half of the connection; there is no length framing.
    pub async fn run(self, cancel: CancellationToken) -> Result<WorkerResult, SpeedError> {
        let cfg = &self.config;
        let mut payload = Payload::open(cfg.source_file.as_deref()).await?;

        let addr = format!("{}:{}", cfg.host, cfg.port);
        let mut stream = TcpStream::connect((cfg.host.as_str(), cfg.port))
            .await
            .map_err(|source| SpeedError::Connect {
                addr: addr.clone(),
                source,
            })?;

        let tag = ModeTag::for_tcp(payload.is_file());
        info!(worker = self.id, %addr, %tag, "TCP worker connected");

        let mut rng = StdRng::from_entropy();
        let mut buf = Vec::with_capacity(CHUNK_MAX);
        let mut total_bytes: u64 = 0;

        let sent = stream.write_all(tag.as_bytes()).await;
        let start = Instant::now();

        let outcome: std::io::Result<()> = async {
            sent?;
            while start.elapsed() < cfg.duration && !cancel.is_cancelled() {
                let len = rng.gen_range(CHUNK_MIN..=CHUNK_MAX);
                let n = payload.fill(&mut buf, len).await?;
                if n == 0 {
                    debug!(worker = self.id, "source file exhausted");
                    break;
                }
                stream.write_all(&buf[..n]).await?;
                total_bytes += n as u64;
            }
            Ok(())
        }
        .await;

        if let Err(e) = outcome {
            warn!(
                worker = self.id,
                %addr,
                error = %e,
                bytes_sent = total_bytes,
                "TCP send failed, keeping partial result"
            );
        }

        if let Err(e) = stream.shutdown().await {
            debug!(worker = self.id, error = %e, "TCP half-close failed");
        }

        let elapsed = start.elapsed().as_secs_f64();
        Ok(WorkerResult::new(Protocol::Tcp, total_bytes, elapsed, cfg.unit))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
