use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use speedprobe::config::{LogFormat, LoggingConfig, SpeedprobeConfig};
use speedprobe::format::Unit;
use speedprobe::wire::Protocol;

#[derive(Parser)]
#[command(
    name = "speedprobe",
    about = "TCP/UDP throughput tester with a multi-worker client and a session-tracking server",
    version,
    long_about = None
)]
struct Cli {
    /// TOML config file (overrides SPEEDPROBE_CONFIG and ./speedprobe.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate load against a speedprobe server
    Client {
        /// Server IP or host name
        #[arg(long)]
        host: Option<String>,

        /// Server port
        #[arg(long)]
        port: Option<u16>,

        /// Test duration in seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Transport: tcp or udp
        #[arg(long)]
        mode: Option<Protocol>,

        /// UDP max packet size in bytes
        #[arg(long = "packet-size", alias = "packet_size")]
        packet_size: Option<usize>,

        /// Number of concurrent workers
        #[arg(long)]
        threads: Option<usize>,

        /// Display unit: k (Kbit), K (KByte), m (Mbit), M (MByte)
        #[arg(long)]
        format: Option<Unit>,

        /// Save results as JSON
        #[arg(long)]
        json: bool,

        /// Where the JSON results are written
        #[arg(long = "json-path")]
        json_path: Option<PathBuf>,

        /// File to send instead of random data
        #[arg(long = "file-name", alias = "file_name")]
        file_name: Option<PathBuf>,
    },

    /// Accept TCP connections and track UDP sessions
    Server {
        /// Port to listen on (TCP and UDP)
        #[arg(long)]
        port: Option<u16>,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn bootstrap_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Cancel `token` on the first ctrl-c.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The configured subscriber is not known until the config is loaded, so
    // loading logs through a temporary one.
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(bootstrap_filter())
        .finish();
    let mut config = tracing::subscriber::with_default(bootstrap, || match &cli.config {
        Some(path) => SpeedprobeConfig::load(path),
        None => Ok(SpeedprobeConfig::load_or_default()),
    })?;

    init_tracing(&config.logging);

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    match cli.command {
        Commands::Client {
            host,
            port,
            duration,
            mode,
            packet_size,
            threads,
            format,
            json,
            json_path,
            file_name,
        } => {
            let client = &mut config.client;
            if let Some(host) = host {
                client.host = host;
            }
            if let Some(port) = port {
                client.port = port;
            }
            if let Some(duration) = duration {
                client.duration_sec = duration;
            }
            if let Some(mode) = mode {
                client.mode = mode;
            }
            if let Some(packet_size) = packet_size {
                client.packet_size = packet_size;
            }
            if let Some(threads) = threads {
                client.threads = threads;
            }
            if let Some(unit) = format {
                client.unit = unit;
            }
            if json {
                client.json = true;
            }
            if let Some(path) = json_path {
                client.json_path = path;
            }
            if file_name.is_some() {
                client.source_file = file_name;
            }

            tracing::info!(
                host = client.host.as_str(),
                port = client.port,
                mode = %client.mode,
                threads = client.threads,
                "Running client"
            );
            speedprobe::run_client(config.client, cancel).await?;
        }
        Commands::Server { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            println!("[SERVER] Listening on port {}...", config.server.port);
            speedprobe::serve(config.server, cancel).await?;
            println!("[SERVER] Shutting down.");
        }
    }

    Ok(())
}
