//! Shared health state for the /health endpoint.
//! Updated by the cron handlers after every job run.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of the most recent run of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobRun {
    pub at: DateTime<Utc>,
    pub ok: bool,
    pub duration_ms: u64,
}

#[derive(Default)]
pub struct HealthState {
    runs_total: AtomicU64,
    failures_total: AtomicU64,
    last_runs: Mutex<BTreeMap<&'static str, JobRun>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run(&self, job: &'static str, run: JobRun) {
        self.runs_total.fetch_add(1, Ordering::Relaxed);
        if !run.ok {
            self.failures_total.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut runs) = self.last_runs.lock() {
            runs.insert(job, run);
        }
    }

    pub fn runs_total(&self) -> u64 {
        self.runs_total.load(Ordering::Relaxed)
    }

    pub fn failures_total(&self) -> u64 {
        self.failures_total.load(Ordering::Relaxed)
    }

    pub fn last_runs(&self) -> BTreeMap<&'static str, JobRun> {
        self.last_runs.lock().map(|r| r.clone()).unwrap_or_default()
    }
}
