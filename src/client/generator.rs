//! Orchestrates N concurrent workers and reports the aggregate.

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::collector::ResultCollector;
use super::report::RunReport;
use super::{TcpWorker, UdpWorker, WorkerConfig};
use crate::config::ClientConfig;
use crate::wire::Protocol;

/// Runs one throughput measurement as configured by a [`ClientConfig`].
///
/// Every worker is started before any is awaited. Workers are not time-boxed
/// beyond their own duration check, so one stuck in a blocking send stalls
/// the whole run.
pub struct LoadGenerator {
    config: ClientConfig,
}

impl LoadGenerator {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Run all workers, print their results and the aggregate, and write the
    /// JSON artifact if requested.
    ///
    /// Returns `Ok(None)` when no worker produced a result.
    pub async fn run(&self, cancel: CancellationToken) -> Result<Option<RunReport>> {
        self.config.validate()?;

        let cfg = &self.config;
        let worker_cfg = Arc::new(WorkerConfig::from(cfg));
        let collector = ResultCollector::new();

        info!(
            host = cfg.host.as_str(),
            port = cfg.port,
            mode = %cfg.mode,
            threads = cfg.threads,
            duration_sec = cfg.duration_sec,
            "starting load generator"
        );

        let mut handles = Vec::with_capacity(cfg.threads);
        for id in 0..cfg.threads {
            let worker_cfg = worker_cfg.clone();
            let collector = collector.clone();
            let cancel = cancel.clone();
            let mode = cfg.mode;

            handles.push(tokio::spawn(async move {
                let outcome = match mode {
                    Protocol::Tcp => TcpWorker::new(id, worker_cfg).run(cancel).await,
                    Protocol::Udp => UdpWorker::new(id, worker_cfg).run(cancel).await,
                };
                match outcome {
                    Ok(result) => {
                        println!("{}", result.summary_line());
                        collector.append(result);
                    }
                    Err(e) => {
                        warn!(worker = id, error = %e, "worker aborted");
                        println!("[CLIENT][{}] {}", mode, e);
                    }
                }
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task failed to complete");
            }
        }

        let Some(aggregate) = collector.aggregate(cfg.threads, cfg.unit) else {
            warn!("no worker produced a result");
            return Ok(None);
        };
        println!("{}", aggregate.summary_line());

        let report = RunReport {
            aggregate,
            threads_results: collector.snapshot(),
        };

        if cfg.json {
            report.write_json(&cfg.json_path)?;
            println!("[CLIENT] Results saved to {}", cfg.json_path.display());
        }

        Ok(Some(report))
    }
}
