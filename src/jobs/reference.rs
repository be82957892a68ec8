//! Session-level captures: the end-of-day reference range and the morning open.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::clock;
use crate::error::Result;
use crate::jobs::{run_batched, JobContext, JobReport, OUTSIDE_MARKET_HOURS};
use crate::types::{Quote, ReferenceLevel, SessionOpen};
use crate::universe::TrackedStock;

pub const SESSION_IN_PROGRESS: &str = "Trading session still in progress";

#[derive(Debug, Default, Serialize)]
pub struct ReferenceSummary {
    pub attempted: usize,
    pub saved: usize,
    /// New rows; a session already stored for a symbol is left untouched.
    pub inserted: u64,
    pub by_source: BTreeMap<&'static str, usize>,
    pub trading_days: Vec<NaiveDate>,
}

/// End-of-day OHLC for every tracked stock → `reference_levels`, keyed by the
/// session the candle belongs to. An undated quote is only saved after today's
/// close, when it can only describe today's session.
pub async fn save_daily_high_low(
    ctx: &JobContext,
    now: DateTime<Utc>,
) -> Result<JobReport<ReferenceSummary>> {
    // A range captured mid-session would be stored for good.
    if ctx.cfg.enforce_market_hours && clock::is_market_open(now) {
        return Ok(JobReport::skipped(SESSION_IN_PROGRESS));
    }

    let today = clock::trading_day(now);
    // Before today's close only a dated quote can be placed; an undated one
    // falls through to the next provider.
    let closed = clock::closed_session(now);
    let results = run_batched(&ctx.universe, |stock: TrackedStock| async move {
        let (q, source) = ctx
            .eod_quotes
            .fetch(&stock.symbol, |q| q.has_range() && (q.session.is_some() || closed.is_some()))
            .await
            .map_err(|e| format!("{}: {e}", stock.symbol))?;
        let level =
            to_reference(&stock, &q, source, today, now).map_err(|e| format!("{}: {e}", stock.symbol))?;
        Ok::<_, String>((level, source))
    })
    .await;

    let mut levels = Vec::new();
    let mut by_source = BTreeMap::new();
    let mut errors = Vec::new();
    for r in results {
        match r {
            Ok((level, source)) => {
                *by_source.entry(source).or_insert(0) += 1;
                levels.push(level);
            }
            Err(e) => {
                warn!(job = "save-daily-high-low", "{e}");
                errors.push(e);
            }
        }
    }

    let mut trading_days: Vec<NaiveDate> = levels.iter().map(|l| l.trading_day).collect();
    trading_days.sort();
    trading_days.dedup();

    let inserted = match ctx.store.insert_reference_levels(&levels).await {
        Ok(n) => n,
        Err(e) => {
            errors.push(format!("store: {e}"));
            0
        }
    };
    info!(
        job = "save-daily-high-low",
        ok = levels.len(),
        failed = errors.len(),
        inserted,
        "Reference levels saved"
    );

    Ok(JobReport::new(
        ReferenceSummary {
            attempted: ctx.universe.len(),
            saved: levels.len(),
            inserted,
            by_source,
            trading_days,
        },
        errors,
    ))
}

/// Missing open falls back to the last price, then the high; missing close to
/// the last price, then the low.
fn to_reference(
    stock: &TrackedStock,
    q: &Quote,
    source: &str,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> std::result::Result<ReferenceLevel, String> {
    let (Some(high), Some(low)) = (q.high, q.low) else {
        return Err("incomplete OHLC".to_string());
    };
    if high < low {
        return Err(format!("high {high} below low {low}"));
    }
    let trading_day = match q.session {
        Some(day) if day > today => return Err(format!("{source} dated the quote {day}, after today")),
        Some(day) => day,
        None => clock::closed_session(now)
            .ok_or_else(|| format!("{source} quote is undated and today's session has not closed"))?,
    };
    Ok(ReferenceLevel {
        symbol: stock.symbol.clone(),
        sector: stock.sector.clone(),
        trading_day,
        open: q.open.or(q.last_price).unwrap_or(high),
        high,
        low,
        close: q.close.or(q.last_price).unwrap_or(low),
        source: source.to_string(),
        captured_at: now,
    })
}

#[derive(Debug, Default, Serialize)]
pub struct MorningOpenSummary {
    pub trading_day: Option<NaiveDate>,
    pub attempted: usize,
    pub stored: usize,
    pub already_present: usize,
}

/// Today's live open per stock → `session_opens`. The persisted token is
/// re-read first so a refresh made elsewhere overnight is used.
pub async fn populate_morning_open(
    ctx: &JobContext,
    now: DateTime<Utc>,
) -> Result<JobReport<MorningOpenSummary>> {
    if ctx.market_closed(now) {
        return Ok(JobReport::skipped(OUTSIDE_MARKET_HOURS));
    }

    let mut errors = Vec::new();
    if let Err(e) = ctx.tokens.reload_from_store(now).await {
        warn!(job = "populate-morning-open", "Token reload failed: {e}");
        errors.push(format!("token: {e}"));
    }

    let today = clock::trading_day(now);
    let results = run_batched(&ctx.universe, |stock: TrackedStock| async move {
        let (q, _) = ctx
            .live_quotes
            .fetch(&stock.symbol, |q| q.open.is_some_and(|o| o > 0.0))
            .await
            .map_err(|e| format!("{}: {e}", stock.symbol))?;
        Ok::<_, String>(SessionOpen {
            symbol: stock.symbol.clone(),
            trading_day: today,
            open: q.open.unwrap_or_default(),
            captured_at: now,
        })
    })
    .await;

    let mut stored = 0;
    let mut already_present = 0;
    for r in results {
        match r {
            Ok(open) => match ctx.store.insert_session_open(&open).await {
                Ok(true) => stored += 1,
                Ok(false) => already_present += 1,
                Err(e) => errors.push(format!("{}: {e}", open.symbol)),
            },
            Err(e) => {
                warn!(job = "populate-morning-open", "{e}");
                errors.push(e);
            }
        }
    }
    info!(
        job = "populate-morning-open",
        ok = stored,
        already_present,
        failed = errors.len(),
        "Session opens captured"
    );

    Ok(JobReport::new(
        MorningOpenSummary {
            trading_day: Some(today),
            attempted: ctx.universe.len(),
            stored,
            already_present,
        },
        errors,
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fetcher::mock::{live, MockQuotes};
    use crate::fetcher::QuoteChain;
    use crate::jobs::testing::{at, context, market_time, stock};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, d).unwrap()
    }

    fn candle(symbol: &str, high: f64, low: f64, session: Option<NaiveDate>) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            open: Some(low + 1.0),
            high: Some(high),
            low: Some(low),
            close: Some(high - 1.0),
            last_price: Some(high - 1.0),
            session,
        }
    }

    /// Monday 2026-01-12, 16:30 IST.
    fn after_close() -> DateTime<Utc> {
        at("2026-01-12T11:00:00Z")
    }

    #[tokio::test]
    async fn saves_under_the_candle_session() {
        let mut ctx = context(vec![], vec![], vec![stock("TCS", "IT"), stock("INFY", "IT")]).await;
        ctx.eod_quotes = QuoteChain::new(vec![
            Arc::new(MockQuotes::new("groww", [candle("TCS", 110.0, 100.0, None)])),
            Arc::new(MockQuotes::new("yahoo", [candle("INFY", 1_550.0, 1_500.0, Some(day(9)))])),
        ]);

        let report = save_daily_high_low(&ctx, after_close()).await.unwrap();
        assert_eq!(report.summary.saved, 2);
        assert_eq!(report.summary.by_source.get("yahoo"), Some(&1));
        assert_eq!(report.summary.trading_days, vec![day(9), day(12)]);

        let infy = ctx.store.reference_levels_for(day(9), Some("INFY")).await.unwrap();
        assert_eq!(infy[0].high, 1_550.0);
        assert_eq!(infy[0].source, "yahoo");
        let tcs = ctx.store.reference_levels_for(day(12), Some("TCS")).await.unwrap();
        assert_eq!(tcs[0].low, 100.0);
    }

    #[tokio::test]
    async fn rerun_does_not_overwrite() {
        let mut ctx = context(vec![], vec![], vec![stock("TCS", "IT")]).await;
        ctx.eod_quotes = QuoteChain::new(vec![Arc::new(MockQuotes::new(
            "groww",
            [candle("TCS", 110.0, 100.0, None)],
        ))]);
        save_daily_high_low(&ctx, after_close()).await.unwrap();

        ctx.eod_quotes = QuoteChain::new(vec![Arc::new(MockQuotes::new(
            "groww",
            [candle("TCS", 999.0, 1.0, None)],
        ))]);
        let report = save_daily_high_low(&ctx, after_close()).await.unwrap();
        assert_eq!(report.summary.inserted, 0);

        let tcs = ctx.store.reference_levels_for(day(12), Some("TCS")).await.unwrap();
        assert_eq!(tcs[0].high, 110.0);
    }

    #[tokio::test]
    async fn undated_quote_before_the_open_is_not_saved() {
        let mut ctx = context(vec![], vec![], vec![stock("TCS", "IT")]).await;
        // 08:00 IST Monday: the provider still shows Friday's range.
        ctx.eod_quotes = QuoteChain::new(vec![Arc::new(MockQuotes::new(
            "groww",
            [candle("TCS", 110.0, 100.0, None)],
        ))]);
        let early = save_daily_high_low(&ctx, at("2026-01-12T02:30:00Z")).await.unwrap();
        assert_eq!(early.summary.saved, 0);
        assert_eq!(early.error_count, 1);
        assert!(early.errors[0].starts_with("TCS: "));

        ctx.eod_quotes = QuoteChain::new(vec![Arc::new(MockQuotes::new(
            "groww",
            [candle("TCS", 130.0, 120.0, None)],
        ))]);
        let evening = save_daily_high_low(&ctx, after_close()).await.unwrap();
        assert_eq!(evening.summary.inserted, 1);

        let tcs = ctx.store.reference_levels_for(day(12), Some("TCS")).await.unwrap();
        assert_eq!(tcs[0].high, 130.0);
        assert_eq!(tcs[0].low, 120.0);
    }

    #[tokio::test]
    async fn dated_quote_before_the_open_keeps_its_session() {
        let mut ctx = context(vec![], vec![], vec![stock("TCS", "IT")]).await;
        ctx.eod_quotes = QuoteChain::new(vec![Arc::new(MockQuotes::new(
            "groww",
            [candle("TCS", 110.0, 100.0, Some(day(9)))],
        ))]);
        let report = save_daily_high_low(&ctx, at("2026-01-12T02:30:00Z")).await.unwrap();
        assert_eq!(report.summary.trading_days, vec![day(9)]);
        assert!(ctx.store.reference_levels_for(day(12), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn undated_quote_before_the_close_falls_back_to_a_dated_one() {
        let mut ctx = context(vec![], vec![], vec![stock("TCS", "IT")]).await;
        ctx.eod_quotes = QuoteChain::new(vec![
            Arc::new(MockQuotes::new("groww", [candle("TCS", 110.0, 100.0, None)])),
            Arc::new(MockQuotes::new("yahoo", [candle("TCS", 111.0, 101.0, Some(day(9)))])),
        ]);
        let report = save_daily_high_low(&ctx, at("2026-01-12T02:30:00Z")).await.unwrap();
        assert_eq!(report.summary.by_source.get("yahoo"), Some(&1));

        let tcs = ctx.store.reference_levels_for(day(9), Some("TCS")).await.unwrap();
        assert_eq!(tcs[0].high, 111.0);
    }

    #[tokio::test]
    async fn undated_quote_at_the_weekend_is_not_saved() {
        let mut ctx = context(vec![], vec![], vec![stock("TCS", "IT")]).await;
        ctx.eod_quotes = QuoteChain::new(vec![Arc::new(MockQuotes::new(
            "groww",
            [candle("TCS", 110.0, 100.0, None)],
        ))]);
        // Saturday 2026-01-10, 17:30 IST.
        let report = save_daily_high_low(&ctx, at("2026-01-10T12:00:00Z")).await.unwrap();
        assert_eq!(report.summary.saved, 0);
        assert!(ctx.store.latest_reference_day().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refuses_during_session() {
        let ctx = context(vec![], vec![], vec![stock("TCS", "IT")]).await;
        let report = save_daily_high_low(&ctx, market_time()).await.unwrap();
        assert_eq!(report.message.as_deref(), Some(SESSION_IN_PROGRESS));
    }

    #[tokio::test]
    async fn morning_open_is_written_once() {
        let ctx = context(
            vec![live("TCS", 3_900.0)],
            vec![],
            vec![stock("TCS", "IT"), stock("INFY", "IT")],
        )
        .await;
        let now = at("2026-01-12T03:50:00Z");

        let first = populate_morning_open(&ctx, now).await.unwrap();
        assert_eq!(first.summary.stored, 1);
        assert_eq!(first.error_count, 1);

        let second = populate_morning_open(&ctx, now).await.unwrap();
        assert_eq!(second.summary.already_present, 1);

        let opens = ctx.store.session_opens_for(day(12)).await.unwrap();
        assert_eq!(opens.len(), 1);
        assert_eq!(opens[0].open, 3_900.0);
    }
}
