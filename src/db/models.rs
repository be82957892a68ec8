//! Database row types matching `migrations/0001_init.sql`, and their
//! conversions into the domain types in `crate::types`.

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{AppError, Result};
use crate::types::{
    PcrRecord, PriceSnapshot, ReferenceLevel, SectorSnapshot, SessionOpen, StoredToken,
    ThresholdEvent,
};

pub(crate) const DAY_FORMAT: &str = "%Y-%m-%d";

pub(crate) fn ms_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub(crate) fn parse_day(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DAY_FORMAT)
        .map_err(|e| AppError::Database(sqlx::Error::Decode(Box::new(e))))
}

fn decode_err(msg: String) -> AppError {
    AppError::Database(sqlx::Error::Decode(msg.into()))
}

#[derive(Debug, sqlx::FromRow)]
pub struct StockSnapshotRow {
    pub symbol: String,
    pub sector: String,
    pub captured_at: i64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub last_price: f64,
    pub source: String,
}

impl From<StockSnapshotRow> for PriceSnapshot {
    fn from(r: StockSnapshotRow) -> Self {
        PriceSnapshot {
            symbol: r.symbol,
            sector: r.sector,
            captured_at: ms_to_utc(r.captured_at),
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            last_price: r.last_price,
            source: r.source,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SectorSnapshotRow {
    pub sector_name: String,
    pub captured_at: i64,
    pub last_price: f64,
    pub open_price: f64,
    pub previous_close: f64,
    pub change_percent: f64,
    pub variation: f64,
}

impl From<SectorSnapshotRow> for SectorSnapshot {
    fn from(r: SectorSnapshotRow) -> Self {
        SectorSnapshot {
            sector_name: r.sector_name,
            captured_at: ms_to_utc(r.captured_at),
            last_price: r.last_price,
            open_price: r.open_price,
            previous_close: r.previous_close,
            change_percent: r.change_percent,
            variation: r.variation,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct ReferenceLevelRow {
    pub symbol: String,
    pub trading_day: String,
    pub sector: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub source: String,
    pub captured_at: i64,
}

impl TryFrom<ReferenceLevelRow> for ReferenceLevel {
    type Error = AppError;

    fn try_from(r: ReferenceLevelRow) -> Result<Self> {
        Ok(ReferenceLevel {
            trading_day: parse_day(&r.trading_day)?,
            symbol: r.symbol,
            sector: r.sector,
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            source: r.source,
            captured_at: ms_to_utc(r.captured_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SessionOpenRow {
    pub symbol: String,
    pub trading_day: String,
    pub open: f64,
    pub captured_at: i64,
}

impl TryFrom<SessionOpenRow> for SessionOpen {
    type Error = AppError;

    fn try_from(r: SessionOpenRow) -> Result<Self> {
        Ok(SessionOpen {
            trading_day: parse_day(&r.trading_day)?,
            symbol: r.symbol,
            open: r.open,
            captured_at: ms_to_utc(r.captured_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct ThresholdEventRow {
    pub kind: String,
    pub symbol: String,
    pub sector: String,
    pub trading_day: String,
    pub reference_day: String,
    pub detected_at: i64,
    pub last_price: f64,
    pub reference_level: f64,
    pub deviation_pct: f64,
}

impl TryFrom<ThresholdEventRow> for ThresholdEvent {
    type Error = AppError;

    fn try_from(r: ThresholdEventRow) -> Result<Self> {
        Ok(ThresholdEvent {
            kind: r.kind.parse().map_err(decode_err)?,
            trading_day: parse_day(&r.trading_day)?,
            reference_day: parse_day(&r.reference_day)?,
            symbol: r.symbol,
            sector: r.sector,
            detected_at: ms_to_utc(r.detected_at),
            last_price: r.last_price,
            reference_level: r.reference_level,
            deviation_pct: r.deviation_pct,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct PcrRow {
    pub index_name: String,
    pub captured_at: i64,
    pub total_put_oi: i64,
    pub total_call_oi: i64,
    pub pcr_value: f64,
    pub sentiment: String,
    pub spot_price: f64,
    pub atm_strike: f64,
    pub strikes_used: i64,
}

impl TryFrom<PcrRow> for PcrRecord {
    type Error = AppError;

    fn try_from(r: PcrRow) -> Result<Self> {
        Ok(PcrRecord {
            sentiment: r.sentiment.parse().map_err(decode_err)?,
            index_name: r.index_name,
            captured_at: ms_to_utc(r.captured_at),
            total_put_oi: r.total_put_oi,
            total_call_oi: r.total_call_oi,
            pcr_value: r.pcr_value,
            spot_price: r.spot_price,
            atm_strike: r.atm_strike,
            strikes_used: r.strikes_used,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct TokenRow {
    pub id: String,
    pub token: String,
    pub expiry: Option<String>,
    pub created_at: i64,
}

impl From<TokenRow> for StoredToken {
    /// An expiry we cannot parse is dropped; the cache TTL still bounds the token's life.
    fn from(r: TokenRow) -> Self {
        StoredToken {
            id: r.id,
            token: r.token,
            expiry: r
                .expiry
                .as_deref()
                .and_then(|e| DateTime::parse_from_rfc3339(e).ok())
                .map(|e| e.with_timezone(&Utc)),
            created_at: ms_to_utc(r.created_at),
        }
    }
}
