//! UDP load worker.
//!
//! Fire-and-forget: one tag datagram, then randomly sized payload datagrams
//! until the duration elapses. Loss is invisible to the sender.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::{lookup_host, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::payload::Payload;
use super::{WorkerConfig, WorkerResult};
use crate::config::MIN_UDP_PACKET;
use crate::error::SpeedError;
use crate::wire::{ModeTag, Protocol};

/// Resolve `host:port` to a single datagram target.
///
/// IPv4 results win over IPv6: the server's default wildcard bind only
/// listens on IPv4, and unlike a TCP connect a datagram to the wrong family is
/// lost without any error.
pub async fn resolve_target(host: &str, port: u16) -> Result<SocketAddr, SpeedError> {
    let resolve_err = || SpeedError::Resolve {
        host: host.to_string(),
        port,
    };
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|_| resolve_err())?
        .collect();
    prefer_ipv4(&addrs).ok_or_else(resolve_err)
}

fn prefer_ipv4(addrs: &[SocketAddr]) -> Option<SocketAddr> {
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

pub struct UdpWorker {
    id: usize,
    config: Arc<WorkerConfig>,
}

impl UdpWorker {
    pub fn new(id: usize, config: Arc<WorkerConfig>) -> Self {
        Self { id, config }
    }

    /// Run the worker to completion.
    ///
    /// Returns `Err` only when the worker cannot start. Send errors after the
    /// socket is up end the loop and keep the partial total.
    pub async fn run(self, cancel: CancellationToken) -> Result<WorkerResult, SpeedError> {
        let cfg = &self.config;
        let mut payload = Payload::open(cfg.source_file.as_deref()).await?;
        let target = resolve_target(&cfg.host, cfg.port).await?;

        let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).await?;

        let tag = ModeTag::for_udp(payload.is_file());
        info!(worker = self.id, %target, %tag, "UDP worker started");

        let packet_max = cfg.udp_packet_size_max.max(MIN_UDP_PACKET);
        let mut rng = StdRng::from_entropy();
        let mut buf = Vec::with_capacity(packet_max);
        let mut total_bytes: u64 = 0;

        let sent = socket.send_to(tag.as_bytes(), target).await;
        let start = Instant::now();

        let outcome: std::io::Result<()> = async {
            sent?;
            while start.elapsed() < cfg.duration && !cancel.is_cancelled() {
                let len = rng.gen_range(MIN_UDP_PACKET..=packet_max);
                let n = payload.fill(&mut buf, len).await?;
                if n == 0 {
                    debug!(worker = self.id, "source file exhausted");
                    break;
                }
                let written = socket.send_to(&buf[..n], target).await?;
                total_bytes += written as u64;
            }
            Ok(())
        }
        .await;

        if let Err(e) = outcome {
            warn!(
                worker = self.id,
                %target,
                error = %e,
                bytes_sent = total_bytes,
                "UDP send failed, keeping partial result"
            );
        }

        let elapsed = start.elapsed().as_secs_f64();
        Ok(WorkerResult::new(Protocol::Udp, total_bytes, elapsed, cfg.unit))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Unit;
    use std::time::Duration;

    #[tokio::test]
    async fn test_udp_worker_sends_standalone_tag_then_bounded_datagrams() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();

        let cfg = Arc::new(WorkerConfig {
            host: "127.0.0.1".into(),
            port,
            duration: Duration::from_millis(50),
            unit: Unit::KiloByte,
            udp_packet_size_max: 200,
            source_file: None,
        });
        let result = UdpWorker::new(0, cfg)
            .run(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.protocol, Protocol::Udp);
        assert!(result.bytes_sent > 0);

        let mut buf = [0u8; 2048];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"udp");

        // Sample a few payload datagrams; loss on loopback is tolerated.
        for _ in 0..5 {
            let recv = tokio::time::timeout(Duration::from_millis(200), receiver.recv_from(&mut buf));
            let Ok(Ok((len, _))) = recv.await else { break };
            assert!((MIN_UDP_PACKET..=200).contains(&len), "datagram of {} bytes", len);
        }
    }

    #[tokio::test]
    async fn test_udp_worker_file_mode_bounded_by_remaining_bytes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("payload.bin");
        // Any drawn size covers the whole file in a single datagram.
        std::fs::write(&path, vec![9u8; MIN_UDP_PACKET]).unwrap();

        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();

        let cfg = Arc::new(WorkerConfig {
            host: "127.0.0.1".into(),
            port,
            duration: Duration::from_secs(10),
            unit: Unit::KiloByte,
            udp_packet_size_max: 1024,
            source_file: Some(path),
        });
        let result = UdpWorker::new(0, cfg)
            .run(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.bytes_sent, MIN_UDP_PACKET as u64);

        let mut buf = [0u8; 2048];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"upf");
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(len, MIN_UDP_PACKET);
    }

    #[test]
    fn test_prefer_ipv4_over_earlier_ipv6() {
        let v6: SocketAddr = "[::1]:5201".parse().unwrap();
        let v4: SocketAddr = "127.0.0.1:5201".parse().unwrap();
        assert_eq!(prefer_ipv4(&[v6, v4]), Some(v4));
        assert_eq!(prefer_ipv4(&[v6]), Some(v6));
        assert_eq!(prefer_ipv4(&[]), None);
    }

    #[tokio::test]
    async fn test_resolve_localhost_targets_ipv4_loopback() {
        let target = resolve_target("localhost", 5201).await.unwrap();
        assert_eq!(target, "127.0.0.1:5201".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_unknown_host_fails() {
        let err = resolve_target("speedprobe.invalid", 5201).await.unwrap_err();
        assert!(matches!(err, SpeedError::Resolve { port: 5201, .. }));
    }

    #[tokio::test]
    async fn test_udp_worker_missing_file_aborts() {
        let cfg = Arc::new(WorkerConfig {
            host: "127.0.0.1".into(),
            port: 9,
            duration: Duration::from_millis(10),
            unit: Unit::MegaByte,
            udp_packet_size_max: 1024,
            source_file: Some("/nonexistent/speedprobe.bin".into()),
        });
        let err = UdpWorker::new(0, cfg)
            .run(CancellationToken::new())
            .await
            .err()
            .expect("should abort");
        assert!(matches!(err, SpeedError::SourceFileNotFound { .. }));
    }
}
