//! Per-job duration histograms, served by /stats/latency.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

/// 1ms to 10 minutes, 3 significant figures. Values in milliseconds.
const MAX_TRACKED_MS: u64 = 600_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobLatency {
    pub samples: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub max_ms: u64,
}

#[derive(Default)]
pub struct LatencyStats {
    inner: Mutex<BTreeMap<&'static str, Histogram<u64>>>,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, job: &'static str, d: Duration) {
        let ms = (d.as_millis().min(u128::from(MAX_TRACKED_MS)) as u64).max(1);
        let Ok(mut jobs) = self.inner.lock() else {
            return;
        };
        if !jobs.contains_key(job) {
            let Ok(h) = Histogram::new_with_bounds(1, MAX_TRACKED_MS, 3) else {
                return;
            };
            jobs.insert(job, h);
        }
        if let Some(h) = jobs.get_mut(job) {
            let _ = h.record(ms);
        }
    }

    pub fn snapshot(&self) -> BTreeMap<&'static str, JobLatency> {
        let Ok(jobs) = self.inner.lock() else {
            return BTreeMap::new();
        };
        jobs.iter()
            .filter(|(_, h)| h.len() > 0)
            .map(|(job, h)| {
                (
                    *job,
                    JobLatency {
                        samples: h.len(),
                        p50_ms: h.value_at_quantile(0.5),
                        p95_ms: h.value_at_quantile(0.95),
                        p99_ms: h.value_at_quantile(0.99),
                        max_ms: h.max(),
                    },
                )
            })
            .collect()
    }
}
