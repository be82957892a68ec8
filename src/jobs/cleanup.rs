use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::info;

use crate::clock;
use crate::config::REFERENCE_RETENTION_DAYS;
use crate::db::PurgeCounts;
use crate::error::Result;
use crate::jobs::{JobContext, JobReport};

#[derive(Debug, Default, Serialize)]
pub struct CleanupSummary {
    pub kept_from: Option<NaiveDate>,
    pub deleted: PurgeCounts,
    pub reference_levels_pruned: u64,
    pub session_opens_pruned: u64,
}

/// Drop intraday rows from before today (IST) and session-level rows past retention.
pub async fn cleanup_intraday(ctx: &JobContext, now: DateTime<Utc>) -> Result<JobReport<CleanupSummary>> {
    let today = clock::trading_day(now);
    let deleted = ctx
        .store
        .purge_intraday_before(clock::day_start(today), today)
        .await?;
    let (reference_levels_pruned, session_opens_pruned) = ctx
        .store
        .prune_reference_before(today - Duration::days(REFERENCE_RETENTION_DAYS))
        .await?;

    info!(
        job = "cleanup-intraday",
        stock_snapshots = deleted.stock_snapshots,
        sector_snapshots = deleted.sector_snapshots,
        pcr_records = deleted.pcr_records,
        threshold_events = deleted.threshold_events,
        reference_levels_pruned,
        "Cleanup complete"
    );

    Ok(JobReport::new(
        CleanupSummary {
            kept_from: Some(today),
            deleted,
            reference_levels_pruned,
            session_opens_pruned,
        },
        Vec::new(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::tests::level;
    use crate::jobs::testing::{at, context};

    #[tokio::test]
    async fn keeps_recent_reference_levels() {
        let ctx = context(vec![], vec![], vec![]).await;
        let day = |m: u32, d: u32| NaiveDate::from_ymd_opt(2026, m, d).unwrap();
        ctx.store
            .insert_reference_levels(&[
                level("TCS", day(1, 2), 100.0, 90.0),
                level("TCS", day(2, 9), 100.0, 90.0),
            ])
            .await
            .unwrap();

        // 2026-02-12 00:30 IST.
        let report = cleanup_intraday(&ctx, at("2026-02-11T19:00:00Z")).await.unwrap();
        assert_eq!(report.summary.kept_from, Some(day(2, 12)));
        assert_eq!(report.summary.reference_levels_pruned, 1);
        assert_eq!(ctx.store.latest_reference_day().await.unwrap(), Some(day(2, 9)));
    }
}
