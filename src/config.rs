use crate::error::{AppError, Result};

pub const NSE_BASE_URL: &str = "https://www.nseindia.com";
pub const GROWW_API_URL: &str = "https://api.groww.in";
pub const GROWW_WEB_URL: &str = "https://groww.in";
pub const YAHOO_API_URL: &str = "https://query1.finance.yahoo.com";

/// Browser-like UA; NSE and the public Groww endpoints reject obvious bots.
pub const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Per-request timeout for every outbound provider call (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 15;

/// Symbols fetched concurrently per batch.
pub const QUOTE_BATCH_SIZE: usize = 20;

/// Fixed pause between batches to stay under provider rate limits.
pub const BATCH_DELAY_MS: u64 = 100;

/// Cap on per-item error strings echoed in a job response.
pub const MAX_REPORTED_ERRORS: usize = 10;

/// Snapshot timestamps are floored to this many minutes so one capture cycle
/// shares a single `captured_at` across all rows.
pub const SNAPSHOT_BUCKET_MINUTES: u32 = 5;

/// PCR rows are floored to the minute.
pub const PCR_BUCKET_MINUTES: u32 = 1;

/// Sector snapshots farther than this from the requested time are not returned.
pub const NEAREST_MATCH_TOLERANCE_SECS: i64 = 150;

/// A prior session older than this (calendar days) is treated as stale and
/// breakout detection is skipped.
pub const MAX_REFERENCE_AGE_DAYS: i64 = 5;

/// Reference levels and session opens older than this are pruned by cleanup.
pub const REFERENCE_RETENTION_DAYS: i64 = 30;

/// In-memory token tier is trusted for at most this long before re-reading the store.
pub const TOKEN_CACHE_TTL_SECS: i64 = 3_600;

/// Treat a token as expired this many seconds before its stated expiry.
pub const TOKEN_EXPIRY_MARGIN_SECS: i64 = 300;

/// Row id of the Groww token in `api_tokens`.
pub const GROWW_TOKEN_ID: &str = "groww_api_token";

/// Strikes taken on each side of the ATM strike.
pub const PCR_STRIKE_WINDOW: usize = 10;

/// PCR sentiment cut-offs. Fixed, not configurable.
pub mod pcr_thresholds {
    pub const BULLISH_BELOW: f64 = 0.91;
    pub const BEARISH_ABOVE: f64 = 1.09;
}

/// NSE cash session in IST.
pub mod market_hours {
    pub const IST_OFFSET_SECS: i32 = 5 * 3_600 + 30 * 60;
    pub const OPEN_MINUTE: u32 = 9 * 60 + 15;
    pub const CLOSE_MINUTE: u32 = 15 * 60 + 30;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Shared secret for `/api/cron/*` (CRON_SECRET). Unset means every cron call is rejected.
    pub cron_secret: Option<String>,
    pub groww_api_key: Option<String>,
    pub groww_api_secret: Option<String>,
    /// Static token used when neither cache tier has one (GROWW_API_TOKEN).
    pub groww_api_token: Option<String>,
    pub nse_base_url: String,
    pub groww_api_url: String,
    pub groww_web_url: String,
    pub yahoo_api_url: String,
    /// Skip intraday jobs outside 09:15-15:30 IST on weekdays (ENFORCE_MARKET_HOURS).
    pub enforce_market_hours: bool,
    /// Indices the PCR job covers (PCR_INDICES, comma-separated).
    pub pcr_indices: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            db_path: "pulse.db".to_string(),
            api_port: 3000,
            cron_secret: None,
            groww_api_key: None,
            groww_api_secret: None,
            groww_api_token: None,
            nse_base_url: NSE_BASE_URL.to_string(),
            groww_api_url: GROWW_API_URL.to_string(),
            groww_web_url: GROWW_WEB_URL.to_string(),
            yahoo_api_url: YAHOO_API_URL.to_string(),
            enforce_market_hours: true,
            pcr_indices: vec![
                "NIFTY".to_string(),
                "BANKNIFTY".to_string(),
                "FINNIFTY".to_string(),
            ],
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            db_path: std::env::var("DB_PATH").unwrap_or(defaults.db_path),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            cron_secret: non_empty_var("CRON_SECRET"),
            groww_api_key: non_empty_var("GROWW_API_KEY"),
            groww_api_secret: non_empty_var("GROWW_API_SECRET"),
            groww_api_token: non_empty_var("GROWW_API_TOKEN"),
            nse_base_url: std::env::var("NSE_BASE_URL").unwrap_or(defaults.nse_base_url),
            groww_api_url: std::env::var("GROWW_API_URL").unwrap_or(defaults.groww_api_url),
            groww_web_url: std::env::var("GROWW_WEB_URL").unwrap_or(defaults.groww_web_url),
            yahoo_api_url: std::env::var("YAHOO_API_URL").unwrap_or(defaults.yahoo_api_url),
            enforce_market_hours: std::env::var("ENFORCE_MARKET_HOURS")
                .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
            pcr_indices: match std::env::var("PCR_INDICES") {
                Ok(raw) => parse_list(&raw),
                Err(_) => defaults.pcr_indices,
            },
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}
