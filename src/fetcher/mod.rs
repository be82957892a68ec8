//! Outbound market-data providers.
//!
//! Each provider sits behind a small async trait so jobs can be driven by
//! mocks in tests. Parsing is kept in free functions over `serde_json::Value`
//! so payload handling is testable without the network.

pub mod groww;
pub mod nse;
pub mod yahoo;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde_json::Value;
use tracing::debug;

use crate::clock;
use crate::config::{HTTP_TIMEOUT_SECS, USER_AGENT};
use crate::detector::OptionChain;
use crate::error::{AppError, Result};
use crate::types::{IndexQuote, Quote};

pub use groww::{GrowwQuotes, GrowwTokenIssuer, GrowwWebQuotes};
pub use nse::NseClient;
pub use yahoo::YahooQuotes;

/// Per-symbol quotes.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Short provider label, stored as a snapshot's `source`.
    fn name(&self) -> &'static str;

    async fn quote(&self, symbol: &str) -> Result<Quote>;
}

/// Whole-market index feed.
#[async_trait]
pub trait IndexSource: Send + Sync {
    async fn all_indices(&self) -> Result<Vec<IndexQuote>>;
}

#[async_trait]
pub trait OptionChainSource: Send + Sync {
    /// Nearest-expiry chain for an index.
    async fn option_chain(&self, index: &str) -> Result<OptionChainQuote>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionChainQuote {
    pub symbol: String,
    pub spot: f64,
    pub expiry: Option<String>,
    pub chain: OptionChain,
}

/// Ordered list of quote providers. The first quote `accept` approves wins.
#[derive(Clone)]
pub struct QuoteChain {
    sources: Vec<Arc<dyn QuoteSource>>,
}

impl QuoteChain {
    pub fn new(sources: Vec<Arc<dyn QuoteSource>>) -> Self {
        Self { sources }
    }

    pub async fn fetch(
        &self,
        symbol: &str,
        accept: impl Fn(&Quote) -> bool,
    ) -> Result<(Quote, &'static str)> {
        let mut failures = Vec::new();
        for source in &self.sources {
            match source.quote(symbol).await {
                Ok(q) if accept(&q) => return Ok((q, source.name())),
                Ok(_) => failures.push(format!("{} returned no usable data", source.name())),
                Err(e) => {
                    debug!(symbol, source = source.name(), "Quote failed: {e}");
                    failures.push(format!("{}: {e}", source.name()));
                }
            }
        }
        if failures.is_empty() {
            return Err(AppError::Upstream("no quote sources configured".to_string()));
        }
        Err(AppError::Upstream(failures.join("; ")))
    }
}

/// Shared client for every provider: timeout, browser UA, cookie jar (NSE needs it).
pub fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .cookie_store(true)
        .build()?)
}

/// Send and decode JSON, turning a non-2xx status into `Upstream`.
pub(crate) async fn get_json(req: reqwest::RequestBuilder) -> Result<Value> {
    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(AppError::Upstream(format!("HTTP {status}")));
    }
    Ok(resp.json().await?)
}

/// Number or numeric string. Providers are inconsistent about which they send.
pub(crate) fn num(v: &Value) -> Option<f64> {
    let parsed = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|x| x.is_finite())
}

/// `num` of `v[key]`, treating zero as absent.
pub(crate) fn positive(v: Option<&Value>, key: &str) -> Option<f64> {
    v.and_then(|o| o.get(key)).and_then(num).filter(|x| *x > 0.0)
}

/// IST trading day of the epoch timestamp at `v[key]`. Seconds and
/// milliseconds are both accepted.
pub(crate) fn epoch_day(v: Option<&Value>, key: &str) -> Option<NaiveDate> {
    let raw = positive(v, key)? as i64;
    let at = if raw >= 100_000_000_000 {
        DateTime::from_timestamp_millis(raw)
    } else {
        DateTime::from_timestamp(raw, 0)
    };
    at.map(clock::trading_day)
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Canned quotes keyed by symbol. Unknown symbols fail.
    pub struct MockQuotes {
        pub name: &'static str,
        pub quotes: HashMap<String, Quote>,
        pub calls: AtomicUsize,
    }

    impl MockQuotes {
        pub fn new(name: &'static str, quotes: impl IntoIterator<Item = Quote>) -> Self {
            Self {
                name,
                quotes: quotes.into_iter().map(|q| (q.symbol.clone(), q)).collect(),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl QuoteSource for MockQuotes {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn quote(&self, symbol: &str) -> Result<Quote> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.quotes
                .get(symbol)
                .cloned()
                .ok_or_else(|| AppError::Upstream(format!("no data for {symbol}")))
        }
    }

    pub fn live(symbol: &str, price: f64) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            open: Some(price),
            last_price: Some(price),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{live, MockQuotes};
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn chain_falls_through_to_next_source() {
        let primary = Arc::new(MockQuotes::new("primary", [live("TCS", 0.0)]));
        let backup = Arc::new(MockQuotes::new("backup", [live("TCS", 3_900.0)]));
        let chain = QuoteChain::new(vec![primary.clone(), backup.clone()]);

        let (q, source) = chain.fetch("TCS", Quote::has_live_price).await.unwrap();
        assert_eq!(source, "backup");
        assert_eq!(q.last_price, Some(3_900.0));
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn chain_stops_at_first_accepted() {
        let primary = Arc::new(MockQuotes::new("primary", [live("TCS", 3_900.0)]));
        let backup = Arc::new(MockQuotes::new("backup", [live("TCS", 1.0)]));
        let chain = QuoteChain::new(vec![primary, backup.clone()]);

        let (_, source) = chain.fetch("TCS", Quote::has_live_price).await.unwrap();
        assert_eq!(source, "primary");
        assert_eq!(backup.calls(), 0);
    }

    #[tokio::test]
    async fn chain_reports_every_failure() {
        let chain = QuoteChain::new(vec![
            Arc::new(MockQuotes::new("a", [])),
            Arc::new(MockQuotes::new("b", [])),
        ]);
        let err = chain.fetch("TCS", Quote::has_live_price).await.unwrap_err().to_string();
        assert!(err.contains("a: no data for TCS"));
        assert!(err.contains("b: no data for TCS"));
    }

    #[test]
    fn num_accepts_strings() {
        assert_eq!(num(&json!(12.5)), Some(12.5));
        assert_eq!(num(&json!("1,234.50")), Some(1_234.5));
        assert_eq!(num(&json!("-")), None);
        assert_eq!(num(&json!(null)), None);
        assert_eq!(positive(Some(&json!({"open": 0})), "open"), None);
    }

    #[test]
    fn epoch_day_is_the_ist_date() {
        // 2026-01-09T10:00:00Z, Friday 15:30 IST.
        let friday = NaiveDate::from_ymd_opt(2026, 1, 9);
        assert_eq!(epoch_day(Some(&json!({"t": 1_767_952_800_000_i64})), "t"), friday);
        assert_eq!(epoch_day(Some(&json!({"t": 1_767_952_800})), "t"), friday);
        assert_eq!(epoch_day(Some(&json!({"t": 0})), "t"), None);
        assert_eq!(epoch_day(Some(&json!({})), "t"), None);
    }
}
