use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{AppError, Result};
use crate::fetcher::{epoch_day, get_json, num, positive, QuoteSource};
use crate::token::{IssuedToken, TokenCache, TokenIssuer};
use crate::types::Quote;

/// Authenticated live-data API (`api.groww.in`).
pub struct GrowwQuotes {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenCache>,
}

impl GrowwQuotes {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, tokens: Arc<TokenCache>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            tokens,
        }
    }
}

#[async_trait]
impl QuoteSource for GrowwQuotes {
    fn name(&self) -> &'static str {
        "groww"
    }

    async fn quote(&self, symbol: &str) -> Result<Quote> {
        let token = self
            .tokens
            .get()
            .await?
            .ok_or_else(|| AppError::Upstream("no Groww API token available".to_string()))?;

        let url = format!(
            "{}/v1/live-data/quote?exchange=NSE&segment=CASH&trading_symbol={symbol}",
            self.base_url
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header("X-API-VERSION", "1.0")
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        check_status(&self.tokens, symbol, resp.status()).await?;

        let body: Value = resp.json().await?;
        parse_live_quote(symbol, &body)
    }
}

/// A rejected token is dropped from the memory tier so the next lookup goes
/// to the store.
async fn check_status(tokens: &TokenCache, symbol: &str, status: StatusCode) -> Result<()> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        warn!(symbol, %status, "Groww rejected the cached token");
        tokens.invalidate().await;
    }
    if !status.is_success() {
        return Err(AppError::Upstream(format!("HTTP {status}")));
    }
    Ok(())
}

/// `{"status":"SUCCESS","payload":{"last_price":..,"last_trade_time":..,"ohlc":{..}}}`
///
/// The session is the IST date of the last trade, when the payload has one.
pub fn parse_live_quote(symbol: &str, v: &Value) -> Result<Quote> {
    if let Some(status) = v.get("status").and_then(Value::as_str) {
        if status != "SUCCESS" {
            return Err(AppError::Upstream(format!("Groww status {status}")));
        }
    }
    let payload = v
        .get("payload")
        .filter(|p| p.is_object())
        .ok_or_else(|| AppError::Upstream("Groww response has no payload".to_string()))?;
    let ohlc = payload.get("ohlc");

    Ok(Quote {
        symbol: symbol.to_string(),
        open: positive(ohlc, "open").or_else(|| positive(Some(payload), "open")),
        high: positive(ohlc, "high").or_else(|| positive(Some(payload), "high")),
        low: positive(ohlc, "low").or_else(|| positive(Some(payload), "low")),
        close: positive(ohlc, "close").or_else(|| positive(Some(payload), "close")),
        last_price: positive(Some(payload), "last_price").or_else(|| positive(Some(payload), "ltp")),
        session: epoch_day(Some(payload), "last_trade_time"),
    })
}

/// Public web endpoint on `groww.in`. No token needed.
pub struct GrowwWebQuotes {
    client: reqwest::Client,
    base_url: String,
}

impl GrowwWebQuotes {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl QuoteSource for GrowwWebQuotes {
    fn name(&self) -> &'static str {
        "groww-web"
    }

    async fn quote(&self, symbol: &str) -> Result<Quote> {
        let url = format!(
            "{}/v1/api/stocks_data/v1/tr_live_prices/exchange/NSE/segment/CASH/{symbol}/latest",
            self.base_url
        );
        let body = get_json(self.client.get(&url)).await?;
        Ok(parse_web_quote(symbol, &body))
    }
}

pub fn parse_web_quote(symbol: &str, v: &Value) -> Quote {
    let v = Some(v);
    Quote {
        symbol: symbol.to_string(),
        open: positive(v, "open"),
        high: positive(v, "high"),
        low: positive(v, "low"),
        close: positive(v, "close"),
        last_price: positive(v, "ltp").or_else(|| positive(v, "last")),
        session: epoch_day(v, "tsInMillis"),
    }
}

/// Mints access tokens from the API key and secret.
pub struct GrowwTokenIssuer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl GrowwTokenIssuer {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }
}

#[async_trait]
impl TokenIssuer for GrowwTokenIssuer {
    async fn issue(&self) -> Result<IssuedToken> {
        let timestamp = Utc::now().timestamp().to_string();
        let body = json!({
            "key_type": "approval",
            "checksum": checksum(&self.api_secret, &timestamp),
            "timestamp": timestamp,
        });
        let resp = get_json(
            self.client
                .post(format!("{}/v1/token/api/access", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&body),
        )
        .await?;
        parse_token_response(&resp)
    }
}

/// Hex SHA-256 of `secret ‖ timestamp`.
pub fn checksum(secret: &str, timestamp: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(timestamp.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn parse_token_response(v: &Value) -> Result<IssuedToken> {
    let token = v
        .get("token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Upstream("token response has no token".to_string()))?;
    if v.get("active").and_then(Value::as_bool) == Some(false) {
        return Err(AppError::Upstream("issued token is not active".to_string()));
    }
    let expiry = v
        .get("expiry")
        .and_then(Value::as_str)
        .and_then(|e| DateTime::parse_from_rfc3339(e).ok())
        .map(|e| e.with_timezone(&Utc))
        .or_else(|| {
            // Some responses carry epoch millis instead.
            v.get("expiry").and_then(num).and_then(|ms| DateTime::from_timestamp_millis(ms as i64))
        });

    Ok(IssuedToken {
        token: token.to_string(),
        expiry,
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::config::GROWW_TOKEN_ID;
    use crate::db::Store;
    use crate::types::StoredToken;

    #[test]
    fn checksum_is_sha256_of_concatenation() {
        assert_eq!(
            checksum("a", "bc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    async fn save(store: &Store, token: &str) {
        store
            .save_token(&StoredToken {
                id: GROWW_TOKEN_ID.to_string(),
                token: token.to_string(),
                expiry: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejected_token_is_dropped_from_memory() {
        let store = Store::in_memory().await.unwrap();
        let tokens = TokenCache::new(store.clone(), None);
        save(&store, "first").await;
        assert_eq!(tokens.get().await.unwrap().as_deref(), Some("first"));

        // Rotated elsewhere; memory still holds the old token.
        save(&store, "second").await;
        assert!(check_status(&tokens, "TCS", StatusCode::INTERNAL_SERVER_ERROR).await.is_err());
        assert_eq!(tokens.get().await.unwrap().as_deref(), Some("first"));

        assert!(check_status(&tokens, "TCS", StatusCode::UNAUTHORIZED).await.is_err());
        assert_eq!(tokens.get().await.unwrap().as_deref(), Some("second"));

        save(&store, "third").await;
        assert!(check_status(&tokens, "TCS", StatusCode::FORBIDDEN).await.is_err());
        assert_eq!(tokens.get().await.unwrap().as_deref(), Some("third"));

        assert!(check_status(&tokens, "TCS", StatusCode::OK).await.is_ok());
    }

    #[test]
    fn live_quote_prefers_ohlc_block() {
        let body = json!({
            "status": "SUCCESS",
            "payload": {
                "last_price": 3912.4,
                "open": 1.0,
                "ohlc": {"open": 3890.0, "high": 3925.0, "low": 3880.5, "close": 3901.0}
            }
        });
        let q = parse_live_quote("TCS", &body).unwrap();
        assert_eq!(q.session, None);
        assert_eq!(q.last_price, Some(3912.4));
        assert_eq!(q.open, Some(3890.0));
        assert_eq!(q.low, Some(3880.5));
        assert!(q.has_range());
    }

    #[test]
    fn live_quote_is_dated_by_last_trade() {
        // Friday 2026-01-09 15:29:59 IST, read on Monday morning.
        let body = json!({
            "status": "SUCCESS",
            "payload": {
                "last_price": 3901.0,
                "last_trade_time": 1_767_952_799_000_i64,
                "ohlc": {"open": 3890.0, "high": 3925.0, "low": 3880.5, "close": 3901.0}
            }
        });
        let q = parse_live_quote("TCS", &body).unwrap();
        assert_eq!(q.session, NaiveDate::from_ymd_opt(2026, 1, 9));

        let web = parse_web_quote("TCS", &json!({"ltp": 3901.0, "tsInMillis": 1_767_952_799}));
        assert_eq!(web.session, NaiveDate::from_ymd_opt(2026, 1, 9));
    }

    #[test]
    fn live_quote_failure_status() {
        let body = json!({"status": "FAILURE", "error": {"code": "GA001"}});
        assert!(parse_live_quote("TCS", &body).is_err());
        assert!(parse_live_quote("TCS", &json!({"status": "SUCCESS"})).is_err());
    }

    #[test]
    fn web_quote_zero_ltp_is_missing() {
        let q = parse_web_quote("TCS", &json!({"ltp": 0, "last": 3901.5, "open": 3890}));
        assert_eq!(q.last_price, Some(3901.5));
        assert_eq!(q.high, None);
    }

    #[test]
    fn token_response_parsing() {
        let ok = parse_token_response(&json!({
            "token": "abc",
            "active": true,
            "expiry": "2026-01-13T06:00:00+05:30"
        }))
        .unwrap();
        assert_eq!(ok.token, "abc");
        assert_eq!(
            ok.expiry,
            DateTime::parse_from_rfc3339("2026-01-13T00:30:00Z").ok().map(|e| e.with_timezone(&Utc))
        );

        assert!(parse_token_response(&json!({"token": "abc", "active": false})).is_err());
        assert!(parse_token_response(&json!({"active": true})).is_err());
    }
}
