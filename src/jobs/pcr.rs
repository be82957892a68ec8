use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::clock;
use crate::config::PCR_BUCKET_MINUTES;
use crate::detector::aggregate;
use crate::error::Result;
use crate::jobs::{run_batched, JobContext, JobReport, OUTSIDE_MARKET_HOURS};
use crate::types::PcrRecord;

#[derive(Debug, Default, Serialize)]
pub struct PcrJobSummary {
    pub captured_at: Option<DateTime<Utc>>,
    pub inserted: usize,
    pub duplicates: usize,
    pub results: Vec<PcrRecord>,
}

/// Option chain → PCR record for every configured index.
pub async fn calculate_pcr(ctx: &JobContext, now: DateTime<Utc>) -> Result<JobReport<PcrJobSummary>> {
    if ctx.market_closed(now) {
        return Ok(JobReport::skipped(OUTSIDE_MARKET_HOURS));
    }

    let captured_at = clock::bucket(now, PCR_BUCKET_MINUTES);
    let results = run_batched(&ctx.cfg.pcr_indices, |index: String| async move {
        let quote = ctx
            .option_chains
            .option_chain(&index)
            .await
            .map_err(|e| format!("{index}: {e}"))?;
        let summary = aggregate(&quote.chain, quote.spot)
            .ok_or_else(|| format!("{index}: empty option chain"))?;
        Ok::<_, String>(summary.into_record(&index, captured_at))
    })
    .await;

    let mut summary = PcrJobSummary {
        captured_at: Some(captured_at),
        ..Default::default()
    };
    let mut errors = Vec::new();
    for r in results {
        let record = match r {
            Ok(record) => record,
            Err(e) => {
                warn!(job = "calculate-pcr", "{e}");
                errors.push(e);
                continue;
            }
        };
        match ctx.store.insert_pcr(&record).await {
            Ok(true) => summary.inserted += 1,
            Ok(false) => summary.duplicates += 1,
            Err(e) => {
                errors.push(format!("{}: {e}", record.index_name));
                continue;
            }
        }
        summary.results.push(record);
    }
    info!(
        job = "calculate-pcr",
        ok = summary.results.len(),
        failed = errors.len(),
        inserted = summary.inserted,
        "PCR calculated"
    );

    Ok(JobReport::new(summary, errors))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::detector::{OptionChain, StrikeOi};
    use crate::fetcher::OptionChainQuote;
    use crate::jobs::testing::{context, market_time, MockChains};
    use crate::types::Sentiment;

    fn nifty() -> OptionChainQuote {
        let chain: OptionChain = (0..11)
            .map(|i| {
                let strike = 24_000.0 + 50.0 * i as f64;
                (strike, StrikeOi { call_oi: 100, put_oi: 150 })
            })
            .collect();
        OptionChainQuote {
            symbol: "NIFTY".to_string(),
            spot: 24_180.0,
            expiry: None,
            chain,
        }
    }

    #[tokio::test]
    async fn records_each_index_once_per_minute() {
        let mut ctx = context(vec![], vec![], vec![]).await;
        let mut chains = HashMap::new();
        chains.insert("NIFTY".to_string(), nifty());
        chains.insert(
            "FINNIFTY".to_string(),
            OptionChainQuote {
                symbol: "FINNIFTY".to_string(),
                spot: 23_000.0,
                expiry: None,
                chain: OptionChain::new(),
            },
        );
        ctx.option_chains = Arc::new(MockChains(chains));

        let report = calculate_pcr(&ctx, market_time()).await.unwrap();
        assert_eq!(report.summary.inserted, 1);
        // BANKNIFTY has no chain, FINNIFTY's is empty.
        assert_eq!(report.error_count, 2);
        let nifty = &report.summary.results[0];
        assert_eq!(nifty.atm_strike, 24_200.0);
        assert_eq!(nifty.strikes_used, 11);
        assert_eq!(nifty.sentiment, Sentiment::Bearish);

        let again = calculate_pcr(&ctx, market_time() + chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(again.summary.inserted, 0);
        assert_eq!(again.summary.duplicates, 1);
    }
}
