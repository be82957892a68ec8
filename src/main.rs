mod api;
mod clock;
mod config;
mod db;
mod detector;
mod error;
mod fetcher;
mod jobs;
mod snapshot;
mod token;
mod types;
mod universe;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::db::Store;
use crate::error::Result;
use crate::fetcher::{
    http_client, GrowwQuotes, GrowwTokenIssuer, GrowwWebQuotes, NseClient, QuoteChain, QuoteSource,
    YahooQuotes,
};
use crate::jobs::JobContext;
use crate::token::{TokenCache, TokenIssuer};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let store = Store::connect(&cfg.db_path).await?;
    store.migrate().await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Providers ---
    let client = http_client()?;
    let tokens = Arc::new(TokenCache::new(store.clone(), cfg.groww_api_token.clone()));
    let nse = Arc::new(NseClient::new(client.clone(), cfg.nse_base_url.clone()));
    let groww: Arc<dyn QuoteSource> = Arc::new(GrowwQuotes::new(
        client.clone(),
        cfg.groww_api_url.clone(),
        Arc::clone(&tokens),
    ));
    let groww_web: Arc<dyn QuoteSource> =
        Arc::new(GrowwWebQuotes::new(client.clone(), cfg.groww_web_url.clone()));
    let yahoo: Arc<dyn QuoteSource> = Arc::new(YahooQuotes::new(client.clone(), cfg.yahoo_api_url.clone()));
    let nse_quotes: Arc<dyn QuoteSource> = nse.clone();

    let token_issuer: Option<Arc<dyn TokenIssuer>> =
        match (cfg.groww_api_key.clone(), cfg.groww_api_secret.clone()) {
            (Some(key), Some(secret)) => Some(Arc::new(GrowwTokenIssuer::new(
                client.clone(),
                cfg.groww_api_url.clone(),
                key,
                secret,
            ))),
            _ => {
                warn!("GROWW_API_KEY/GROWW_API_SECRET not set; token refresh disabled");
                None
            }
        };
    if cfg.cron_secret.is_none() {
        warn!("CRON_SECRET not set; every /api/cron call will be rejected");
    }

    let universe = universe::tracked_stocks();
    info!(
        stocks = universe.len(),
        pcr_indices = %cfg.pcr_indices.join(","),
        market_hours_enforced = cfg.enforce_market_hours,
        "Tracking universe loaded"
    );

    let ctx = JobContext {
        live_quotes: QuoteChain::new(vec![groww.clone(), groww_web, nse_quotes]),
        eod_quotes: QuoteChain::new(vec![groww, yahoo]),
        indices: nse.clone(),
        option_chains: nse,
        tokens,
        token_issuer,
        universe,
        store,
        cfg: cfg.clone(),
    };

    // --- HTTP API server ---
    let api_state = ApiState {
        ctx: Arc::new(ctx),
        health: Arc::new(HealthState::new()),
        latency: Arc::new(LatencyStats::new()),
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
