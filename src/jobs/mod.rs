//! Scheduled jobs behind `/api/cron/*`.
//!
//! Every job takes `now` from the caller, works through its items in fixed
//! batches, records per-item failures and keeps going, and answers with a
//! `JobReport`.

pub mod breakouts;
pub mod cleanup;
pub mod pcr;
pub mod reference;
pub mod sectors;
pub mod snapshots;
pub mod token_refresh;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;

use crate::clock;
use crate::config::{Config, BATCH_DELAY_MS, MAX_REPORTED_ERRORS, QUOTE_BATCH_SIZE};
use crate::db::Store;
use crate::fetcher::{IndexSource, OptionChainSource, QuoteChain};
use crate::token::{TokenCache, TokenIssuer};
use crate::universe::TrackedStock;

pub const OUTSIDE_MARKET_HOURS: &str = "Outside market hours";

/// Everything a job needs. Built once in `main`, shared by the HTTP layer.
pub struct JobContext {
    pub cfg: Config,
    pub store: Store,
    /// Intraday prices: Groww, then Groww web, then NSE.
    pub live_quotes: QuoteChain,
    /// Completed-session OHLC: Groww, then Yahoo.
    pub eod_quotes: QuoteChain,
    pub indices: Arc<dyn IndexSource>,
    pub option_chains: Arc<dyn OptionChainSource>,
    pub tokens: Arc<TokenCache>,
    /// `None` when API key or secret is not configured.
    pub token_issuer: Option<Arc<dyn TokenIssuer>>,
    pub universe: Vec<TrackedStock>,
}

impl JobContext {
    /// True when intraday jobs should stand down.
    pub fn market_closed(&self, now: DateTime<Utc>) -> bool {
        self.cfg.enforce_market_hours && !clock::is_market_open(now)
    }
}

/// Common response body: `{success, message?, ..summary, errors, error_count}`.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport<S> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub summary: S,
    /// First `MAX_REPORTED_ERRORS` failures only; `error_count` has the total.
    pub errors: Vec<String>,
    pub error_count: usize,
}

impl<S> JobReport<S> {
    pub fn new(summary: S, mut errors: Vec<String>) -> Self {
        let error_count = errors.len();
        errors.truncate(MAX_REPORTED_ERRORS);
        Self {
            success: true,
            message: None,
            summary,
            errors,
            error_count,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl<S: Default> JobReport<S> {
    /// Successful no-op, e.g. outside market hours.
    pub fn skipped(message: impl Into<String>) -> Self {
        Self::new(S::default(), Vec::new()).with_message(message)
    }
}

/// Run `f` over `items` in batches of `QUOTE_BATCH_SIZE`, concurrently within
/// a batch, pausing `BATCH_DELAY_MS` between batches. Output order matches input.
pub async fn run_batched<T, R, F, Fut>(items: &[T], f: F) -> Vec<R>
where
    T: Clone,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let mut out = Vec::with_capacity(items.len());
    for (i, chunk) in items.chunks(QUOTE_BATCH_SIZE).enumerate() {
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(BATCH_DELAY_MS)).await;
        }
        out.extend(join_all(chunk.iter().cloned().map(&f)).await);
    }
    out
}
