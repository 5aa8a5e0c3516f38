//! Per-command timing statistics
//!
//! A process-wide collector of latency samples keyed by command kind.
//! Appends happen concurrently from every session's dispatcher; aggregation
//! happens on demand when a client issues `get_timing_stats`.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Aggregated statistics for one command kind
#[derive(Debug, Clone, Serialize)]
pub struct CommandTiming {
    pub count: usize,
    pub avg_time: f64,
    pub min_time: f64,
    pub max_time: f64,
    /// Sample standard deviation; absent until there are two samples
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_dev: Option<f64>,
}

/// Process-wide latency sample collector
#[derive(Default)]
pub struct TimingCollector {
    samples: RwLock<HashMap<&'static str, Vec<f64>>>,
}

impl TimingCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one duration sample for a command kind
    pub fn record(&self, command: &'static str, elapsed: Duration) {
        self.samples
            .write()
            .entry(command)
            .or_default()
            .push(elapsed.as_secs_f64());
    }

    /// Number of samples recorded for a command kind
    pub fn count(&self, command: &str) -> usize {
        self.samples
            .read()
            .get(command)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Aggregate all samples into per-command statistics.
    ///
    /// The snapshot is taken under the lock, so it is internally consistent
    /// even while other sessions keep appending.
    pub fn snapshot(&self) -> BTreeMap<String, CommandTiming> {
        let samples = self.samples.read();
        samples
            .iter()
            .filter(|(_, times)| !times.is_empty())
            .map(|(command, times)| ((*command).to_string(), aggregate(times)))
            .collect()
    }
}

fn aggregate(times: &[f64]) -> CommandTiming {
    let count = times.len();
    let sum: f64 = times.iter().sum();
    let avg = sum / count as f64;
    let min = times.iter().copied().fold(f64::INFINITY, f64::min);
    let max = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    // Sample (n-1) standard deviation, matching the benchmark tooling
    let std_dev = if count > 1 {
        let variance: f64 =
            times.iter().map(|t| (t - avg).powi(2)).sum::<f64>() / (count - 1) as f64;
        Some(variance.sqrt())
    } else {
        None
    };

    CommandTiming {
        count,
        avg_time: avg,
        min_time: min,
        max_time: max,
        std_dev,
    }
}
