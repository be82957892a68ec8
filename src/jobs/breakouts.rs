use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::clock;
use crate::config::MAX_REFERENCE_AGE_DAYS;
use crate::detector::evaluate;
use crate::error::Result;
use crate::jobs::{run_batched, JobContext, JobReport, OUTSIDE_MARKET_HOURS};
use crate::types::{EventKind, Quote, ReferenceLevel};

pub const NO_REFERENCE_LEVELS: &str = "No reference levels stored";
pub const STALE_REFERENCE_LEVELS: &str = "Reference levels are stale";
pub const NO_LIVE_PRICES: &str = "No live prices; detections unchanged";

#[derive(Debug, Default, Serialize)]
pub struct BreakoutSummary {
    pub trading_day: Option<NaiveDate>,
    pub prior_session: Option<NaiveDate>,
    pub checked: usize,
    pub priced: usize,
    pub breakouts: usize,
    pub breakdowns: usize,
}

/// Compare live prices against the prior session's range and replace today's
/// detections with this cycle's.
pub async fn check_breakouts(
    ctx: &JobContext,
    now: DateTime<Utc>,
) -> Result<JobReport<BreakoutSummary>> {
    if ctx.market_closed(now) {
        return Ok(JobReport::skipped(OUTSIDE_MARKET_HOURS));
    }

    let today = clock::trading_day(now);
    let Some(prior) = ctx.store.prior_session(today).await? else {
        warn!(job = "check-breakouts", %today, "No prior session in reference_levels");
        return Ok(JobReport::skipped(NO_REFERENCE_LEVELS));
    };

    let mut summary = BreakoutSummary {
        trading_day: Some(today),
        prior_session: Some(prior),
        ..Default::default()
    };
    if (today - prior).num_days() > MAX_REFERENCE_AGE_DAYS {
        warn!(job = "check-breakouts", %today, %prior, "Prior session too old, skipping detection");
        return Ok(JobReport::new(summary, Vec::new()).with_message(STALE_REFERENCE_LEVELS));
    }

    let levels = ctx.store.reference_levels_for(prior, None).await?;
    summary.checked = levels.len();

    let results = run_batched(&levels, |level: ReferenceLevel| async move {
        let (q, _) = ctx
            .live_quotes
            .fetch(&level.symbol, Quote::has_live_price)
            .await
            .map_err(|e| format!("{}: {e}", level.symbol))?;
        let price = q.last_price.unwrap_or_default();
        Ok::<_, String>(evaluate(price, &level, prior, today, now))
    })
    .await;

    let mut events = Vec::new();
    let mut errors = Vec::new();
    for r in results {
        match r {
            Ok(event) => {
                summary.priced += 1;
                events.extend(event);
            }
            Err(e) => {
                warn!(job = "check-breakouts", "{e}");
                errors.push(e);
            }
        }
    }
    summary.breakouts = events.iter().filter(|e| e.kind == EventKind::Breakout).count();
    summary.breakdowns = events.len() - summary.breakouts;

    // A cycle that priced nothing says nothing about today; keep the last set.
    if summary.priced == 0 && summary.checked > 0 {
        return Ok(JobReport::new(summary, errors).with_message(NO_LIVE_PRICES));
    }

    ctx.store.replace_threshold_events(today, &events).await?;
    info!(
        job = "check-breakouts",
        %prior,
        ok = summary.priced,
        failed = errors.len(),
        breakouts = summary.breakouts,
        breakdowns = summary.breakdowns,
        "Threshold check complete"
    );

    Ok(JobReport::new(summary, errors))
}
