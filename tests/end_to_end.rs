//! Loopback tests: an in-process server driven by the real client.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use speedprobe::client::{LoadGenerator, RunReport};
use speedprobe::config::{ClientConfig, ServerConfig};
use speedprobe::format::Unit;
use speedprobe::server::ThroughputServer;
use speedprobe::wire::Protocol;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

struct TestServer {
    addr: SocketAddr,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start(output_dir: &Path, udp_session_budget_ms: u64) -> Self {
        let config = ServerConfig {
            bind_address: "127.0.0.1".into(),
            port: 0,
            udp_session_budget_ms,
            udp_poll_interval_ms: 50,
            output_dir: output_dir.to_path_buf(),
            ..ServerConfig::default()
        };
        let bound = ThroughputServer::new(config).bind().await.unwrap();
        let addr = bound.tcp_addr().unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(bound.serve(cancel.clone()));
        Self { addr, cancel, task }
    }

    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            host: "127.0.0.1".into(),
            port: self.addr.port(),
            ..ClientConfig::default()
        }
    }

    async fn stop(self) {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server should stop")
            .unwrap()
            .unwrap();
    }
}

/// Poll until the file at `path` holds exactly `len` bytes.
async fn wait_for_file_len(path: &Path, len: u64) -> u64 {
    let mut current = 0;
    for _ in 0..150 {
        current = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if current == len {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    current
}

fn received_files(dir: &Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("received_from_"))
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_tcp_workers_with_json_artifact() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::start(dir.path(), 10_000).await;

    let json_path = dir.path().join("speedtest_results.json");
    let config = ClientConfig {
        threads: 3,
        mode: Protocol::Tcp,
        duration_sec: 2,
        unit: Unit::MegaByte,
        json: true,
        json_path: json_path.clone(),
        ..server.client_config()
    };
    let report = LoadGenerator::new(config)
        .run(CancellationToken::new())
        .await
        .unwrap()
        .expect("workers should report");

    assert_eq!(report.threads_results.len(), 3);
    assert!(report
        .threads_results
        .iter()
        .all(|r| r.protocol == Protocol::Tcp && r.bytes_sent > 0));

    let sum: u64 = report.threads_results.iter().map(|r| r.bytes_sent).sum();
    let max = report
        .threads_results
        .iter()
        .map(|r| r.duration_s)
        .fold(0.0_f64, f64::max);
    assert_eq!(report.aggregate.threads, 3);
    assert_eq!(report.aggregate.total_bytes, sum);
    assert_eq!(report.aggregate.total_duration_s, max);
    assert!(report.aggregate.speed.ends_with("MByte/s"));

    let parsed = RunReport::read_json(&json_path).unwrap();
    assert_eq!(parsed.aggregate, report.aggregate);
    assert_eq!(parsed.threads_results, report.threads_results);

    // Raw mode never writes received files.
    assert!(received_files(dir.path()).is_empty());

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tcp_file_mode_reproduces_source_on_server() {
    let dir = tempfile::TempDir::new().unwrap();
    let out_dir = dir.path().join("received");
    std::fs::create_dir(&out_dir).unwrap();
    let server = TestServer::start(&out_dir, 10_000).await;

    let source = dir.path().join("payload.bin");
    let content: Vec<u8> = (0..50_000u32).map(|i| (i * 31 % 256) as u8).collect();
    std::fs::write(&source, &content).unwrap();

    let config = ClientConfig {
        threads: 1,
        duration_sec: 30,
        source_file: Some(source),
        ..server.client_config()
    };
    let report = LoadGenerator::new(config)
        .run(CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.aggregate.total_bytes, content.len() as u64);

    let mut files = Vec::new();
    for _ in 0..100 {
        files = received_files(&out_dir);
        if !files.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(files.len(), 1);
    assert_eq!(wait_for_file_len(&files[0], content.len() as u64).await, content.len() as u64);
    assert_eq!(std::fs::read(&files[0]).unwrap(), content);

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_tcp_tag_is_closed_without_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::start(dir.path(), 10_000).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"xyz").await.unwrap();
    let _ = stream.write_all(&[0u8; 1024]).await;

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("server should close the connection");
    // Either a clean EOF or a reset from unread data.
    assert!(matches!(read, Ok(0) | Err(_)));
    assert!(received_files(dir.path()).is_empty());

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_source_file_produces_no_results() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::start(dir.path(), 10_000).await;

    let config = ClientConfig {
        threads: 2,
        duration_sec: 1,
        source_file: Some(dir.path().join("does-not-exist.bin")),
        ..server.client_config()
    };
    let report = LoadGenerator::new(config)
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_none());
    assert!(received_files(dir.path()).is_empty());

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_udp_workers_report_results() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::start(dir.path(), 500).await;

    let config = ClientConfig {
        threads: 2,
        mode: Protocol::Udp,
        duration_sec: 1,
        packet_size: 1200,
        unit: Unit::KiloBit,
        ..server.client_config()
    };
    let report = LoadGenerator::new(config)
        .run(CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.threads_results.len(), 2);
    assert!(report
        .threads_results
        .iter()
        .all(|r| r.protocol == Protocol::Udp && r.speed.ends_with("Kbit/s")));

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_udp_file_mode_flushes_on_eviction() {
    let dir = tempfile::TempDir::new().unwrap();
    let out_dir = dir.path().join("received");
    std::fs::create_dir(&out_dir).unwrap();
    let server = TestServer::start(&out_dir, 300).await;

    let source = dir.path().join("payload.bin");
    let content: Vec<u8> = (0..4_000u32).map(|i| (i % 199) as u8).collect();
    std::fs::write(&source, &content).unwrap();

    let config = ClientConfig {
        threads: 1,
        mode: Protocol::Udp,
        duration_sec: 5,
        packet_size: 512,
        source_file: Some(source),
        ..server.client_config()
    };
    let report = LoadGenerator::new(config)
        .run(CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.aggregate.total_bytes, content.len() as u64);

    let mut files = Vec::new();
    for _ in 0..100 {
        files = received_files(&out_dir);
        if !files.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(files.len(), 1);
    assert_eq!(wait_for_file_len(&files[0], content.len() as u64).await, content.len() as u64);
    assert_eq!(std::fs::read(&files[0]).unwrap(), content);

    server.stop().await;
}
