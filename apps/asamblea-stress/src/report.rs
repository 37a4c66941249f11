//! Per-operation latency accounting for a stress run.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Nearest-rank percentile over an ascending-sorted sample set.
fn percentile_ms(sorted: &[u64], percentile: u8) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (f64::from(percentile) / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success { op: &'static str, elapsed: Duration },
    Failure { op: &'static str },
    /// The backend reported the operation as already done (duplicate vote).
    /// Counted apart from failures.
    AlreadyDone { op: &'static str },
}

#[derive(Debug, Default)]
struct OpRecord {
    latencies_ms: Vec<u64>,
    failures: u64,
    already_done: u64,
}

#[derive(Debug, Default)]
pub struct Recorder {
    ops: BTreeMap<&'static str, OpRecord>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Success { op, elapsed } => {
                self.ops
                    .entry(op)
                    .or_default()
                    .latencies_ms
                    .push(elapsed.as_millis() as u64);
            }
            Outcome::Failure { op } => self.ops.entry(op).or_default().failures += 1,
            Outcome::AlreadyDone { op } => self.ops.entry(op).or_default().already_done += 1,
        }
    }

    pub fn finish(self, run: RunMeta) -> Report {
        let ops = self
            .ops
            .into_iter()
            .map(|(op, mut record)| {
                record.latencies_ms.sort_unstable();
                let sorted = &record.latencies_ms;
                (
                    op.to_string(),
                    OpSummary {
                        count: sorted.len() as u64,
                        failures: record.failures,
                        already_done: record.already_done,
                        p50_ms: percentile_ms(sorted, 50),
                        p95_ms: percentile_ms(sorted, 95),
                        p99_ms: percentile_ms(sorted, 99),
                        max_ms: sorted.last().copied().unwrap_or(0),
                    },
                )
            })
            .collect();
        Report { run, ops }
    }
}

#[derive(Debug, Serialize)]
pub struct RunMeta {
    pub users: usize,
    pub ramp_seconds: u64,
    pub vote_ratio_si: f64,
    pub asamblea_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct OpSummary {
    pub count: u64,
    pub failures: u64,
    pub already_done: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub max_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub run: RunMeta,
    pub ops: BTreeMap<String, OpSummary>,
}
