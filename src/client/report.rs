//! Aggregate totals and the persisted JSON artifact.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::WorkerResult;
use crate::format::{format_data, format_speed, Unit};

/// Totals over every worker of one run.
///
/// `total_duration_s` is the longest single worker duration, not the
/// wall-clock span of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub threads: usize,
    pub total_bytes: u64,
    pub total_duration_s: f64,
    pub data_sent: String,
    pub speed: String,
}

impl AggregateResult {
    /// Aggregate `results`; `None` when no worker produced a result.
    pub fn from_results(threads: usize, results: &[WorkerResult], unit: Unit) -> Option<Self> {
        if results.is_empty() {
            return None;
        }
        let total_bytes: u64 = results.iter().map(|r| r.bytes_sent).sum();
        let total_duration_s = results
            .iter()
            .map(|r| r.duration_s)
            .fold(0.0_f64, f64::max);

        Some(Self {
            threads,
            total_bytes,
            total_duration_s,
            data_sent: format_data(total_bytes, unit).to_string(),
            speed: format_speed(total_bytes, total_duration_s, unit).to_string(),
        })
    }

    pub fn summary_line(&self) -> String {
        format!(
            "[CLIENT][AGGREGATE] Sent {} in {:.2} s ({}) using {} thread(s).",
            self.data_sent, self.total_duration_s, self.speed, self.threads
        )
    }
}

/// Everything one run produced; serialized as the JSON artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub aggregate: AggregateResult,
    pub threads_results: Vec<WorkerResult>,
}

impl RunReport {
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize run report")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write results to {}", path.display()))?;
        Ok(())
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read results from {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse results in {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Protocol;

    fn sample_results() -> Vec<WorkerResult> {
        vec![
            WorkerResult::new(Protocol::Tcp, 1_048_576, 2.0, Unit::MegaByte),
            WorkerResult::new(Protocol::Tcp, 2_097_152, 2.5, Unit::MegaByte),
            WorkerResult::new(Protocol::Tcp, 1_048_576, 1.5, Unit::MegaByte),
        ]
    }

    #[test]
    fn test_aggregate_sums_bytes_and_takes_max_duration() {
        let agg = AggregateResult::from_results(3, &sample_results(), Unit::MegaByte).unwrap();
        assert_eq!(agg.threads, 3);
        assert_eq!(agg.total_bytes, 4_194_304);
        assert_eq!(agg.total_duration_s, 2.5);
        assert_eq!(agg.data_sent, "4.00 MByte");
        assert_eq!(agg.speed, "1.60 MByte/s");
        assert_eq!(
            agg.summary_line(),
            "[CLIENT][AGGREGATE] Sent 4.00 MByte in 2.50 s (1.60 MByte/s) using 3 thread(s)."
        );
    }

    #[test]
    fn test_aggregate_of_nothing_is_none() {
        assert!(AggregateResult::from_results(2, &[], Unit::MegaByte).is_none());
    }

    #[test]
    fn test_json_artifact_schema() {
        let results = sample_results();
        let report = RunReport {
            aggregate: AggregateResult::from_results(3, &results, Unit::MegaByte).unwrap(),
            threads_results: results,
        };
        let value = serde_json::to_value(&report).unwrap();

        let agg = &value["aggregate"];
        assert_eq!(agg["threads"], 3);
        assert_eq!(agg["total_bytes"], 4_194_304);
        assert_eq!(agg["total_duration_s"], 2.5);
        assert_eq!(agg["data_sent"], "4.00 MByte");
        assert_eq!(agg["speed"], "1.60 MByte/s");

        let first = &value["threads_results"][0];
        assert_eq!(first["protocol"], "TCP");
        assert_eq!(first["bytes_sent"], 1_048_576);
        assert_eq!(first["duration_s"], 2.0);
        assert_eq!(first["data_sent"], "1.00 MByte");
        assert_eq!(first["speed"], "0.50 MByte/s");
    }

    #[test]
    fn test_write_then_read_reproduces_aggregate() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("speedtest_results.json");
        let results = sample_results();
        let report = RunReport {
            aggregate: AggregateResult::from_results(3, &results, Unit::MegaByte).unwrap(),
            threads_results: results,
        };
        report.write_json(&path).unwrap();

        let parsed = RunReport::read_json(&path).unwrap();
        assert_eq!(parsed, report);
    }
}
