use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// One capture of a tracked stock. Append-only per capture bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub symbol: String,
    pub sector: String,
    pub captured_at: DateTime<Utc>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub last_price: f64,
    pub source: String,
}

impl PriceSnapshot {
    /// Percent move of the last price against the session open.
    pub fn change_percent(&self) -> Option<f64> {
        match self.open {
            Some(open) if open > 0.0 => Some((self.last_price - open) / open * 100.0),
            _ => None,
        }
    }
}

/// One capture of an NSE sectoral index, renamed to our sector label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorSnapshot {
    pub sector_name: String,
    pub captured_at: DateTime<Utc>,
    pub last_price: f64,
    pub open_price: f64,
    pub previous_close: f64,
    pub change_percent: f64,
    pub variation: f64,
}

// ---------------------------------------------------------------------------
// Reference levels
// ---------------------------------------------------------------------------

/// A completed session's OHLC for one symbol. Keyed by `(symbol, trading_day)`
/// and never rewritten once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceLevel {
    pub symbol: String,
    pub sector: String,
    pub trading_day: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub source: String,
    pub captured_at: DateTime<Utc>,
}

/// Live open of a session, captured shortly after the bell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOpen {
    pub symbol: String,
    pub trading_day: NaiveDate,
    pub open: f64,
    pub captured_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Threshold events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Live price above the prior session high.
    Breakout,
    /// Live price below the prior session low.
    Breakdown,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Breakout => write!(f, "breakout"),
            EventKind::Breakdown => write!(f, "breakdown"),
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "breakout" => Ok(EventKind::Breakout),
            "breakdown" => Ok(EventKind::Breakdown),
            other => Err(format!("unknown event kind: {other}")),
        }
    }
}

/// Point-in-time detection. Carries the reference value and its trading day so
/// it never needs to be re-joined against `reference_levels`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEvent {
    pub kind: EventKind,
    pub symbol: String,
    pub sector: String,
    /// Session in which the crossing was observed.
    pub trading_day: NaiveDate,
    /// Session the reference level belongs to.
    pub reference_day: NaiveDate,
    pub detected_at: DateTime<Utc>,
    pub last_price: f64,
    pub reference_level: f64,
    pub deviation_pct: f64,
}

// ---------------------------------------------------------------------------
// PCR
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentiment {
    Bullish,
    Neutral,
    Bearish,
}

impl Sentiment {
    pub fn from_pcr(pcr: f64) -> Self {
        use crate::config::pcr_thresholds::*;
        if pcr < BULLISH_BELOW {
            Sentiment::Bullish
        } else if pcr > BEARISH_ABOVE {
            Sentiment::Bearish
        } else {
            Sentiment::Neutral
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Sentiment::Bullish => "Bullish",
            Sentiment::Neutral => "Neutral",
            Sentiment::Bearish => "Bearish",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Bullish" => Ok(Sentiment::Bullish),
            "Neutral" => Ok(Sentiment::Neutral),
            "Bearish" => Ok(Sentiment::Bearish),
            other => Err(format!("unknown sentiment: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcrRecord {
    pub index_name: String,
    pub captured_at: DateTime<Utc>,
    pub total_put_oi: i64,
    pub total_call_oi: i64,
    pub pcr_value: f64,
    pub sentiment: Sentiment,
    pub spot_price: f64,
    pub atm_strike: f64,
    pub strikes_used: i64,
}

// ---------------------------------------------------------------------------
// Provider payloads
// ---------------------------------------------------------------------------

/// Normalised quote from any provider. Fields a provider does not report stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub last_price: Option<f64>,
    /// Session the OHLC belongs to, when the provider says so.
    pub session: Option<NaiveDate>,
}

impl Quote {
    pub fn has_live_price(&self) -> bool {
        self.last_price.is_some_and(|p| p.is_finite() && p > 0.0)
    }

    pub fn has_range(&self) -> bool {
        matches!((self.high, self.low), (Some(h), Some(l)) if h > 0.0 && l > 0.0)
    }
}

/// One row of NSE's all-indices feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexQuote {
    pub index: String,
    pub last: f64,
    pub open: f64,
    pub previous_close: f64,
    pub percent_change: f64,
    pub variation: f64,
}

/// Token as persisted in the store's `api_tokens` table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredToken {
    pub id: String,
    pub token: String,
    pub expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
