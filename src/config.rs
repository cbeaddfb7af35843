//! TOML configuration for speedprobe.
//!
//! Every section has compiled-in defaults matching the command-line defaults,
//! so an empty or partial file is valid. Command-line flags override whatever
//! the file provides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SpeedError;
use crate::format::Unit;
use crate::wire::Protocol;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "SPEEDPROBE_CONFIG";

/// Config file picked up from the working directory when present.
pub const LOCAL_CONFIG_FILE: &str = "speedprobe.toml";

/// Largest payload a single UDP/IPv4 datagram can carry.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Smallest randomized UDP datagram the client sends.
pub const MIN_UDP_PACKET: usize = 64;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeedprobeConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SpeedprobeConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded speedprobe configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path in the `SPEEDPROBE_CONFIG` environment variable.
    /// 2. `./speedprobe.toml`.
    /// 3. Compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "SPEEDPROBE_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local_path = Path::new(LOCAL_CONFIG_FILE);
        if local_path.exists() {
            match Self::load(local_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %local_path.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Load generator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or IP address.
    pub host: String,
    /// Server port (shared by the TCP and UDP listeners).
    pub port: u16,
    /// Per-worker send duration in seconds.
    pub duration_sec: u64,
    /// Transport used by every worker.
    pub mode: Protocol,
    /// Upper bound on randomized UDP datagram size.
    pub packet_size: usize,
    /// Number of concurrent workers.
    pub threads: usize,
    /// Display unit for data and speed.
    pub unit: Unit,
    /// Persist the run as a JSON artifact.
    pub json: bool,
    /// Where the JSON artifact is written.
    pub json_path: PathBuf,
    /// Send this file instead of random bytes.
    pub source_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5201,
            duration_sec: 10,
            mode: Protocol::Tcp,
            packet_size: 1024,
            threads: 1,
            unit: Unit::MegaByte,
            json: false,
            json_path: PathBuf::from("speedtest_results.json"),
            source_file: None,
        }
    }
}

impl ClientConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_sec)
    }

    /// Reject settings no worker could run with.
    pub fn validate(&self) -> Result<(), SpeedError> {
        if self.threads == 0 {
            return Err(SpeedError::InvalidArgument(
                "threads must be at least 1".into(),
            ));
        }
        if self.duration_sec == 0 {
            return Err(SpeedError::InvalidArgument(
                "duration must be at least 1 second".into(),
            ));
        }
        if self.host.is_empty() {
            return Err(SpeedError::InvalidArgument("host cannot be empty".into()));
        }
        if self.mode == Protocol::Udp
            && !(MIN_UDP_PACKET..=MAX_UDP_PAYLOAD).contains(&self.packet_size)
        {
            return Err(SpeedError::InvalidArgument(format!(
                "UDP packet size must be within {}..={} bytes, got {}",
                MIN_UDP_PACKET, MAX_UDP_PAYLOAD, self.packet_size
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Dual-listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address both listeners bind to.
    pub bind_address: String,
    /// Port for both the TCP listener and the UDP socket. `0` picks a free one.
    pub port: u16,
    /// Fixed measurement window per UDP session, counted from its first datagram.
    pub udp_session_budget_ms: u64,
    /// Interval between UDP session sweeps.
    pub udp_poll_interval_ms: u64,
    /// Upper bound on concurrently tracked UDP sessions.
    pub udp_max_sessions: usize,
    /// Directory received files are written to.
    pub output_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5201,
            udp_session_budget_ms: 10_000,
            udp_poll_interval_ms: 500,
            udp_max_sessions: 4096,
            output_dir: PathBuf::from("."),
        }
    }
}

impl ServerConfig {
    pub fn session_budget(&self) -> Duration {
        Duration::from_millis(self.udp_session_budget_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.udp_poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), SpeedError> {
        if self.udp_poll_interval_ms == 0 {
            return Err(SpeedError::InvalidArgument(
                "udp_poll_interval_ms must be positive".into(),
            ));
        }
        if self.udp_max_sessions == 0 {
            return Err(SpeedError::InvalidArgument(
                "udp_max_sessions must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
