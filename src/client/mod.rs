//! Load-generating client: concurrent TCP/UDP workers and result aggregation.
//!
//! Each worker owns one socket, sends the handshake tag, then pushes chunks
//! until its own duration elapses or its source file runs out. Workers share
//! nothing except the [`ResultCollector`] they append to on completion.

pub mod collector;
pub mod generator;
pub mod payload;
pub mod report;
pub mod tcp;
pub mod udp;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::format::{format_data, format_speed, Unit};
use crate::wire::Protocol;

pub use collector::ResultCollector;
pub use generator::LoadGenerator;
pub use report::{AggregateResult, RunReport};
pub use tcp::TcpWorker;
pub use udp::UdpWorker;

/// Parameters every worker of a run shares.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub host: String,
    pub port: u16,
    pub duration: Duration,
    pub unit: Unit,
    /// Upper bound for randomized UDP datagram sizes.
    pub udp_packet_size_max: usize,
    pub source_file: Option<PathBuf>,
}

impl From<&ClientConfig> for WorkerConfig {
    fn from(cfg: &ClientConfig) -> Self {
        Self {
            host: cfg.host.clone(),
            port: cfg.port,
            duration: cfg.duration(),
            unit: cfg.unit,
            udp_packet_size_max: cfg.packet_size,
            source_file: cfg.source_file.clone(),
        }
    }
}

/// Terminal record of one worker's transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    pub protocol: Protocol,
    pub bytes_sent: u64,
    pub duration_s: f64,
    pub data_sent: String,
    pub speed: String,
}

impl WorkerResult {
    pub fn new(protocol: Protocol, bytes_sent: u64, duration_s: f64, unit: Unit) -> Self {
        Self {
            protocol,
            bytes_sent,
            duration_s,
            data_sent: format_data(bytes_sent, unit).to_string(),
            speed: format_speed(bytes_sent, duration_s, unit).to_string(),
        }
    }

    /// Console line printed when the worker finishes.
    pub fn summary_line(&self) -> String {
        format!(
            "[CLIENT][{}] Sent {} in {:.2} s ({})",
            self.protocol, self.data_sent, self.duration_s, self.speed
        )
    }
}
