use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;

use crate::clock;
use crate::error::{AppError, Result};
use crate::fetcher::{get_json, num, QuoteSource};
use crate::types::Quote;

/// Daily candles from Yahoo's chart API. Used for end-of-day levels only.
pub struct YahooQuotes {
    client: reqwest::Client,
    base_url: String,
}

impl YahooQuotes {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl QuoteSource for YahooQuotes {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn quote(&self, symbol: &str) -> Result<Quote> {
        let url = format!(
            "{}/v8/finance/chart/{symbol}.NS?interval=1d&range=10d",
            self.base_url
        );
        let body = get_json(self.client.get(&url)).await?;
        parse_chart(symbol, &body)
    }
}

/// Latest usable daily candle. A candle is usable when all four prices are
/// positive, they are not all equal (a placeholder bar), and volume is non-zero.
/// The quote's `session` is the candle's IST date.
pub fn parse_chart(symbol: &str, v: &Value) -> Result<Quote> {
    let chart = v
        .get("chart")
        .ok_or_else(|| AppError::Upstream("chart response missing".to_string()))?;
    if let Some(err) = chart.get("error").filter(|e| !e.is_null()) {
        let desc = err.get("description").and_then(Value::as_str).unwrap_or("unknown error");
        return Err(AppError::Upstream(format!("Yahoo: {desc}")));
    }

    let result = chart
        .get("result")
        .and_then(Value::as_array)
        .and_then(|r| r.first())
        .ok_or_else(|| AppError::Upstream("chart has no result".to_string()))?;
    let timestamps = result.get("timestamp").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
    let candles = result
        .get("indicators")
        .and_then(|i| i.get("quote"))
        .and_then(Value::as_array)
        .and_then(|q| q.first())
        .ok_or_else(|| AppError::Upstream("chart has no quote indicators".to_string()))?;

    let series = |key: &str, i: usize| -> Option<f64> {
        candles.get(key)?.as_array()?.get(i).and_then(num).filter(|x| *x > 0.0)
    };

    for (i, ts) in timestamps.iter().enumerate().rev() {
        let (Some(open), Some(high), Some(low), Some(close), Some(_volume)) = (
            series("open", i),
            series("high", i),
            series("low", i),
            series("close", i),
            series("volume", i),
        ) else {
            continue;
        };
        if open == high && high == low && low == close {
            continue;
        }
        let Some(at) = ts.as_i64().and_then(|s| DateTime::from_timestamp(s, 0)) else {
            continue;
        };

        return Ok(Quote {
            symbol: symbol.to_string(),
            open: Some(open),
            high: Some(high),
            low: Some(low),
            close: Some(close),
            last_price: Some(close),
            session: Some(clock::trading_day(at)),
        });
    }

    Err(AppError::Upstream("no valid daily candle".to_string()))
}
