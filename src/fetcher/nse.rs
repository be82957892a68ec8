use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, REFERER};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::detector::{OptionChain, StrikeOi};
use crate::error::{AppError, Result};
use crate::fetcher::{get_json, num, positive, IndexSource, OptionChainQuote, OptionChainSource, QuoteSource};
use crate::types::{IndexQuote, Quote};

/// NSE public JSON API. The API answers 401 until the client carries the
/// cookies set by the home page, so the first call warms the jar up.
pub struct NseClient {
    client: reqwest::Client,
    base_url: String,
    warmed: OnceCell<()>,
}

impl NseClient {
    /// `client` must have a cookie store (see `fetcher::http_client`).
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            warmed: OnceCell::new(),
        }
    }

    async fn warm_up(&self) {
        self.warmed
            .get_or_init(|| async {
                match self.client.get(&self.base_url).header(ACCEPT, "text/html").send().await {
                    Ok(resp) => debug!(status = %resp.status(), "NSE session warmed up"),
                    Err(e) => warn!("NSE home page warm-up failed: {e}"),
                }
            })
            .await;
    }

    async fn api(&self, path_and_query: &str) -> Result<Value> {
        self.warm_up().await;
        get_json(
            self.client
                .get(format!("{}{path_and_query}", self.base_url))
                .header(ACCEPT, "application/json")
                .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
                .header(REFERER, format!("{}/", self.base_url)),
        )
        .await
    }
}

#[async_trait]
impl IndexSource for NseClient {
    async fn all_indices(&self) -> Result<Vec<IndexQuote>> {
        let body = self.api("/api/allIndices").await?;
        parse_all_indices(&body)
    }
}

#[async_trait]
impl QuoteSource for NseClient {
    fn name(&self) -> &'static str {
        "nse"
    }

    async fn quote(&self, symbol: &str) -> Result<Quote> {
        let body = self.api(&format!("/api/quote-equity?symbol={symbol}")).await?;
        parse_equity_quote(symbol, &body)
    }
}

#[async_trait]
impl OptionChainSource for NseClient {
    async fn option_chain(&self, index: &str) -> Result<OptionChainQuote> {
        let body = self
            .api(&format!("/api/option-chain-indices?symbol={index}"))
            .await?;
        parse_option_chain(index, &body)
    }
}

/// `{"data":[{"index":"NIFTY IT","last":..,"open":..,"previousClose":..,"percentChange":..,"variation":..}]}`
pub fn parse_all_indices(v: &Value) -> Result<Vec<IndexQuote>> {
    let rows = v
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::Upstream("allIndices response has no data array".to_string()))?;

    Ok(rows
        .iter()
        .filter_map(|row| {
            let index = row.get("index").and_then(Value::as_str)?;
            let last = positive(Some(row), "last")?;
            Some(IndexQuote {
                index: index.to_string(),
                last,
                open: row.get("open").and_then(num).unwrap_or(0.0),
                previous_close: row.get("previousClose").and_then(num).unwrap_or(0.0),
                percent_change: row.get("percentChange").and_then(num).unwrap_or(0.0),
                variation: row.get("variation").and_then(num).unwrap_or(0.0),
            })
        })
        .collect())
}

/// `priceInfo.{lastPrice,open,close,intraDayHighLow.{max,min}}`
pub fn parse_equity_quote(symbol: &str, v: &Value) -> Result<Quote> {
    let info = v
        .get("priceInfo")
        .ok_or_else(|| AppError::Upstream("quote-equity response has no priceInfo".to_string()))?;
    let range = info.get("intraDayHighLow");

    Ok(Quote {
        symbol: symbol.to_string(),
        open: positive(Some(info), "open"),
        high: positive(range, "max"),
        low: positive(range, "min"),
        close: positive(Some(info), "close"),
        last_price: positive(Some(info), "lastPrice"),
        session: None,
    })
}

/// Nearest-expiry chain out of `records`. Rows for later expiries are skipped
/// when the expiry list is present; a side with no `openInterest` counts as 0.
pub fn parse_option_chain(symbol: &str, v: &Value) -> Result<OptionChainQuote> {
    let records = v
        .get("records")
        .ok_or_else(|| AppError::Upstream("option chain response has no records".to_string()))?;
    let spot = records
        .get("underlyingValue")
        .and_then(num)
        .filter(|s| *s > 0.0)
        .ok_or_else(|| AppError::Upstream("option chain has no underlying value".to_string()))?;
    let expiry = records
        .get("expiryDates")
        .and_then(Value::as_array)
        .and_then(|dates| dates.first())
        .and_then(Value::as_str)
        .map(str::to_string);

    let rows = records.get("data").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
    let oi = |row: &Value, side: &str| -> i64 {
        row.get(side)
            .and_then(|s| s.get("openInterest"))
            .and_then(num)
            .map(|x| x.max(0.0) as i64)
            .unwrap_or(0)
    };

    let mut chain = OptionChain::new();
    for row in rows {
        if let Some(want) = &expiry {
            if row.get("expiryDate").and_then(Value::as_str).is_some_and(|d| d != want) {
                continue;
            }
        }
        let Some(strike) = row.get("strikePrice").and_then(num) else {
            continue;
        };
        chain.insert(
            strike,
            StrikeOi {
                call_oi: oi(row, "CE"),
                put_oi: oi(row, "PE"),
            },
        );
    }

    Ok(OptionChainQuote {
        symbol: symbol.to_string(),
        spot,
        expiry,
        chain,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn all_indices_skips_rows_without_price() {
        let body = json!({
            "data": [
                {"index": "NIFTY IT", "last": 35210.5, "open": 35000, "previousClose": 34900.0,
                 "percentChange": 0.89, "variation": 310.5},
                {"index": "NIFTY BANK", "last": "-"},
                {"last": 100.0}
            ]
        });
        let rows = parse_all_indices(&body).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].index, "NIFTY IT");
        assert_eq!(rows[0].previous_close, 34_900.0);
        assert!(parse_all_indices(&json!({})).is_err());
    }

    #[test]
    fn equity_quote_uses_intraday_range() {
        let body = json!({
            "priceInfo": {
                "lastPrice": 1520.0, "open": 1500.0, "close": 0, "previousClose": 1490.0,
                "intraDayHighLow": {"min": 1495.5, "max": 1525.0, "value": 1520.0}
            }
        });
        let q = parse_equity_quote("INFY", &body).unwrap();
        assert_eq!(q.last_price, Some(1520.0));
        assert_eq!(q.high, Some(1525.0));
        assert_eq!(q.low, Some(1495.5));
        assert_eq!(q.close, None);
    }

    #[test]
    fn option_chain_keeps_nearest_expiry() {
        let body = json!({
            "records": {
                "underlyingValue": 24180.35,
                "expiryDates": ["15-Jan-2026", "22-Jan-2026"],
                "data": [
                    {"strikePrice": 24150, "expiryDate": "15-Jan-2026",
                     "CE": {"openInterest": 100}, "PE": {"openInterest": 150}},
                    {"strikePrice": 24200, "expiryDate": "15-Jan-2026",
                     "CE": {"openInterest": 200}},
                    {"strikePrice": 24200, "expiryDate": "22-Jan-2026",
                     "CE": {"openInterest": 9999}, "PE": {"openInterest": 9999}}
                ]
            }
        });
        let q = parse_option_chain("NIFTY", &body).unwrap();
        assert_eq!(q.spot, 24_180.35);
        assert_eq!(q.expiry.as_deref(), Some("15-Jan-2026"));
        assert_eq!(q.chain.len(), 2);
        assert_eq!(q.chain.get(24_200.0), Some(StrikeOi { call_oi: 200, put_oi: 0 }));
    }

    #[test]
    fn option_chain_without_spot_is_an_error() {
        let body = json!({"records": {"underlyingValue": 0, "data": []}});
        assert!(parse_option_chain("NIFTY", &body).is_err());
    }
}
