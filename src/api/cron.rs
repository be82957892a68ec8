//! `/api/cron/*`: bearer-authenticated job triggers.

use std::future::Future;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::{self, Next},
    response::Response,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::api::health::JobRun;
use crate::api::routes::ApiState;
use crate::error::{AppError, Result};
use crate::jobs::{self, JobReport};

pub fn router(state: ApiState) -> Router<ApiState> {
    Router::new()
        .route("/capture-market-data", get(capture_market_data))
        .route("/update-stock-snapshots", get(update_stock_snapshots))
        .route("/save-daily-high-low", get(save_daily_high_low))
        .route("/populate-morning-open", get(populate_morning_open))
        .route("/check-breakouts", get(check_breakouts))
        .route("/calculate-pcr", get(calculate_pcr))
        .route("/refresh-groww-token", get(refresh_groww_token))
        .route("/cleanup-intraday", get(cleanup_intraday))
        .route_layer(middleware::from_fn_with_state(state, require_cron_secret))
}

/// Rejects unless `Authorization: Bearer <CRON_SECRET>` matches.
/// With no secret configured every request is rejected.
async fn require_cron_secret(
    State(state): State<ApiState>,
    req: Request,
    next: Next,
) -> std::result::Result<Response, AppError> {
    let provided = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match (state.ctx.cfg.cron_secret.as_deref(), provided) {
        (Some(expected), Some(given)) if expected == given => Ok(next.run(req).await),
        (None, _) => {
            warn!(path = %req.uri().path(), "Cron call rejected: CRON_SECRET not configured");
            Err(AppError::Unauthorized)
        }
        _ => {
            warn!(path = %req.uri().path(), "Cron call rejected: bad or missing bearer token");
            Err(AppError::Unauthorized)
        }
    }
}

/// Time a job, record it for /health and /stats/latency, and log the outcome.
async fn run_job<S, F>(state: &ApiState, job: &'static str, fut: F) -> Result<Json<JobReport<S>>>
where
    S: Serialize,
    F: Future<Output = Result<JobReport<S>>>,
{
    let started = Instant::now();
    let result = fut.await;
    let elapsed = started.elapsed();

    state.latency.record(job, elapsed);
    state.health.record_run(
        job,
        JobRun {
            at: Utc::now(),
            ok: result.is_ok(),
            duration_ms: elapsed.as_millis() as u64,
        },
    );

    match &result {
        Ok(report) => info!(
            job,
            elapsed_ms = elapsed.as_millis() as u64,
            error_count = report.error_count,
            "Job finished"
        ),
        Err(e) => error!(job, "Job failed: {e}"),
    }
    result.map(Json)
}

async fn capture_market_data(
    State(state): State<ApiState>,
) -> Result<Json<JobReport<jobs::sectors::SectorCaptureSummary>>> {
    run_job(
        &state,
        "capture-market-data",
        jobs::sectors::capture_market_data(&state.ctx, Utc::now()),
    )
    .await
}

async fn update_stock_snapshots(
    State(state): State<ApiState>,
) -> Result<Json<JobReport<jobs::snapshots::StockSnapshotSummary>>> {
    run_job(
        &state,
        "update-stock-snapshots",
        jobs::snapshots::update_stock_snapshots(&state.ctx, Utc::now()),
    )
    .await
}

async fn save_daily_high_low(
    State(state): State<ApiState>,
) -> Result<Json<JobReport<jobs::reference::ReferenceSummary>>> {
    run_job(
        &state,
        "save-daily-high-low",
        jobs::reference::save_daily_high_low(&state.ctx, Utc::now()),
    )
    .await
}

async fn populate_morning_open(
    State(state): State<ApiState>,
) -> Result<Json<JobReport<jobs::reference::MorningOpenSummary>>> {
    run_job(
        &state,
        "populate-morning-open",
        jobs::reference::populate_morning_open(&state.ctx, Utc::now()),
    )
    .await
}

async fn check_breakouts(
    State(state): State<ApiState>,
) -> Result<Json<JobReport<jobs::breakouts::BreakoutSummary>>> {
    run_job(
        &state,
        "check-breakouts",
        jobs::breakouts::check_breakouts(&state.ctx, Utc::now()),
    )
    .await
}

async fn calculate_pcr(
    State(state): State<ApiState>,
) -> Result<Json<JobReport<jobs::pcr::PcrJobSummary>>> {
    run_job(&state, "calculate-pcr", jobs::pcr::calculate_pcr(&state.ctx, Utc::now())).await
}

async fn refresh_groww_token(
    State(state): State<ApiState>,
) -> Result<Json<JobReport<jobs::token_refresh::TokenRefreshSummary>>> {
    run_job(
        &state,
        "refresh-groww-token",
        jobs::token_refresh::refresh_groww_token(&state.ctx, Utc::now()),
    )
    .await
}

async fn cleanup_intraday(
    State(state): State<ApiState>,
) -> Result<Json<JobReport<jobs::cleanup::CleanupSummary>>> {
    run_job(
        &state,
        "cleanup-intraday",
        jobs::cleanup::cleanup_intraday(&state.ctx, Utc::now()),
    )
    .await
}
