use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::clock;
use crate::config::SNAPSHOT_BUCKET_MINUTES;
use crate::error::Result;
use crate::jobs::{run_batched, JobContext, JobReport, OUTSIDE_MARKET_HOURS};
use crate::types::{PriceSnapshot, Quote};
use crate::universe::TrackedStock;

#[derive(Debug, Default, Serialize)]
pub struct StockSnapshotSummary {
    pub captured_at: Option<DateTime<Utc>>,
    pub attempted: usize,
    pub captured: usize,
    pub inserted: u64,
}

/// Live quote for every tracked stock → `stock_snapshots`.
pub async fn update_stock_snapshots(
    ctx: &JobContext,
    now: DateTime<Utc>,
) -> Result<JobReport<StockSnapshotSummary>> {
    if ctx.market_closed(now) {
        return Ok(JobReport::skipped(OUTSIDE_MARKET_HOURS));
    }

    let captured_at = clock::bucket(now, SNAPSHOT_BUCKET_MINUTES);
    let results = run_batched(&ctx.universe, |stock: TrackedStock| async move {
        ctx.live_quotes
            .fetch(&stock.symbol, Quote::has_live_price)
            .await
            .map(|(q, source)| PriceSnapshot {
                last_price: q.last_price.unwrap_or_default(),
                symbol: stock.symbol.clone(),
                sector: stock.sector.clone(),
                captured_at,
                open: q.open,
                high: q.high,
                low: q.low,
                close: q.close,
                source: source.to_string(),
            })
            .map_err(|e| format!("{}: {e}", stock.symbol))
    })
    .await;

    let mut rows = Vec::new();
    let mut errors = Vec::new();
    for r in results {
        match r {
            Ok(row) => rows.push(row),
            Err(e) => {
                warn!(job = "update-stock-snapshots", "{e}");
                errors.push(e);
            }
        }
    }

    let inserted = match ctx.store.insert_stock_snapshots(&rows).await {
        Ok(n) => n,
        Err(e) => {
            errors.push(format!("store: {e}"));
            0
        }
    };
    info!(
        job = "update-stock-snapshots",
        ok = rows.len(),
        failed = errors.len(),
        inserted,
        "Stock snapshots captured"
    );

    Ok(JobReport::new(
        StockSnapshotSummary {
            captured_at: Some(captured_at),
            attempted: ctx.universe.len(),
            captured: rows.len(),
            inserted,
        },
        errors,
    ))
}
