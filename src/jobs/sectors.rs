use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::clock;
use crate::config::SNAPSHOT_BUCKET_MINUTES;
use crate::error::Result;
use crate::jobs::{JobContext, JobReport, OUTSIDE_MARKET_HOURS};
use crate::types::SectorSnapshot;
use crate::universe::{sector_for_index, NSE_SECTOR_INDICES};

#[derive(Debug, Default, Serialize)]
pub struct SectorCaptureSummary {
    pub captured_at: Option<DateTime<Utc>>,
    pub captured: usize,
    pub inserted: u64,
}

/// NSE all-indices feed → `sector_snapshots`, one row per mapped sector index.
pub async fn capture_market_data(
    ctx: &JobContext,
    now: DateTime<Utc>,
) -> Result<JobReport<SectorCaptureSummary>> {
    if ctx.market_closed(now) {
        return Ok(JobReport::skipped(OUTSIDE_MARKET_HOURS));
    }

    let captured_at = clock::bucket(now, SNAPSHOT_BUCKET_MINUTES);
    let feed = ctx.indices.all_indices().await?;

    let rows: Vec<SectorSnapshot> = feed
        .iter()
        .filter_map(|q| {
            let sector = sector_for_index(&q.index)?;
            Some(SectorSnapshot {
                sector_name: sector.to_string(),
                captured_at,
                last_price: q.last,
                open_price: q.open,
                previous_close: q.previous_close,
                change_percent: q.percent_change,
                variation: q.variation,
            })
        })
        .collect();

    let errors: Vec<String> = NSE_SECTOR_INDICES
        .iter()
        .filter(|(index, _)| !feed.iter().any(|q| q.index == *index))
        .map(|(index, _)| format!("{index}: missing from index feed"))
        .collect();
    for e in &errors {
        warn!(job = "capture-market-data", "{e}");
    }

    let inserted = ctx.store.insert_sector_snapshots(&rows).await?;
    info!(
        job = "capture-market-data",
        captured = rows.len(),
        inserted,
        failed = errors.len(),
        "Sector snapshots captured"
    );

    Ok(JobReport::new(
        SectorCaptureSummary {
            captured_at: Some(captured_at),
            captured: rows.len(),
            inserted,
        },
        errors,
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::jobs::testing::{at, context, market_time, MockIndices};
    use crate::types::IndexQuote;

    fn index(name: &str, last: f64) -> IndexQuote {
        IndexQuote {
            index: name.to_string(),
            last,
            open: last - 10.0,
            previous_close: last - 20.0,
            percent_change: 0.5,
            variation: 20.0,
        }
    }

    #[tokio::test]
    async fn maps_indices_to_sectors_and_buckets() {
        let mut ctx = context(vec![], vec![], vec![]).await;
        ctx.indices = Arc::new(MockIndices(vec![
            index("NIFTY IT", 35_000.0),
            index("NIFTY 50", 24_000.0),
        ]));

        let now = market_time() + chrono::Duration::seconds(97);
        let report = capture_market_data(&ctx, now).await.unwrap();
        assert_eq!(report.summary.captured, 1);
        assert_eq!(report.summary.captured_at, Some(market_time()));
        // Every other mapped index is reported missing.
        assert_eq!(report.error_count, NSE_SECTOR_INDICES.len() - 1);

        let rows = ctx
            .store
            .sector_snapshots_between(market_time(), market_time())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sector_name, "IT");

        // Second run in the same bucket does not duplicate.
        let again = capture_market_data(&ctx, now).await.unwrap();
        assert_eq!(again.summary.inserted, 0);
    }

    #[tokio::test]
    async fn weekend_is_skipped() {
        let ctx = context(vec![], vec![], vec![]).await;
        let report = capture_market_data(&ctx, at("2026-01-10T06:40:00Z")).await.unwrap();
        assert_eq!(report.message.as_deref(), Some(OUTSIDE_MARKET_HOURS));
        assert_eq!(report.summary.captured, 0);
    }
}
