//! Concurrency-safe sink for worker results.

use std::sync::{Arc, Mutex, MutexGuard};

use super::report::AggregateResult;
use super::WorkerResult;
use crate::format::Unit;

/// Shared, ordered sequence of [`WorkerResult`]s.
///
/// Cloning yields another handle to the same sequence. The lock is held only
/// for the push itself. Callers must join every worker before calling
/// [`ResultCollector::aggregate`].
#[derive(Debug, Clone, Default)]
pub struct ResultCollector {
    results: Arc<Mutex<Vec<WorkerResult>>>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<WorkerResult>> {
        // A panicking appender cannot leave the Vec half-written.
        self.results.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, result: WorkerResult) {
        self.lock().push(result);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the results in append order.
    pub fn snapshot(&self) -> Vec<WorkerResult> {
        self.lock().clone()
    }

    pub fn aggregate(&self, threads: usize, unit: Unit) -> Option<AggregateResult> {
        AggregateResult::from_results(threads, &self.lock(), unit)
    }
}
