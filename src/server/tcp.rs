//! Per-connection TCP session handler.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::SessionReport;
use crate::wire::{received_file_name, ModeTag, Protocol, TAG_LEN};

const READ_BUFFER: usize = 4096;

/// How a connection ended.
#[derive(Debug)]
pub enum TcpOutcome {
    /// The stream did not open with a TCP tag; nothing was read past it.
    Rejected { tag: Vec<u8> },
    /// The stream was drained to end-of-stream (or to a transport error).
    Completed(SessionReport),
    /// The received file could not be created.
    Failed { reason: String },
}

/// Drains one accepted connection. Holds no state shared between connections.
#[derive(Debug, Clone)]
pub struct TcpSessionHandler {
    output_dir: PathBuf,
}

impl TcpSessionHandler {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Read the 3-byte tag, then count (and optionally persist) every byte
    /// until the peer half-closes.
    pub async fn handle<S>(&self, mut stream: S, peer: SocketAddr) -> TcpOutcome
    where
        S: AsyncRead + Unpin,
    {
        info!(%peer, "TCP connection");

        let mut tag = [0u8; TAG_LEN];
        let mut got = 0;
        while got < TAG_LEN {
            match stream.read(&mut tag[got..]).await {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) => {
                    warn!(%peer, error = %e, "failed to read mode tag");
                    break;
                }
            }
        }

        let mode = match ModeTag::parse(&tag[..got]) {
            Some(mode) if mode.protocol() == Protocol::Tcp => mode,
            _ => {
                warn!(
                    %peer,
                    tag = %String::from_utf8_lossy(&tag[..got]),
                    "unexpected mode, closing connection"
                );
                return TcpOutcome::Rejected {
                    tag: tag[..got].to_vec(),
                };
            }
        };

        let session_id = Uuid::new_v4();
        let start = Instant::now();

        let mut sink = if mode.saves_to_file() {
            let path = self.output_dir.join(received_file_name(peer));
            match File::create(&path).await {
                Ok(file) => Some((path, BufWriter::new(file))),
                Err(e) => {
                    error!(%peer, path = %path.display(), error = %e, "failed to create received file");
                    return TcpOutcome::Failed {
                        reason: format!("failed to create {}: {}", path.display(), e),
                    };
                }
            }
        } else {
            None
        };

        info!(%session_id, %peer, %mode, "TCP session started");

        let mut buf = [0u8; READ_BUFFER];
        let mut bytes: u64 = 0;
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!(%session_id, %peer, error = %e, "TCP read failed, finalizing partial session");
                    break;
                }
            };
            if let Some((path, writer)) = sink.as_mut() {
                if let Err(e) = writer.write_all(&buf[..n]).await {
                    warn!(%session_id, path = %path.display(), error = %e, "write to received file failed");
                    break;
                }
            }
            bytes += n as u64;
        }

        let saved_to = match sink {
            Some((path, mut writer)) => {
                if let Err(e) = writer.flush().await {
                    warn!(%session_id, path = %path.display(), error = %e, "flush of received file failed");
                }
                Some(path)
            }
            None => None,
        };

        let report = SessionReport {
            session_id,
            peer,
            protocol: Protocol::Tcp,
            bytes,
            duration: start.elapsed(),
            saved_to,
        };
        report.log("stream closed by peer");
        TcpOutcome::Completed(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
