use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::api::cron;
use crate::api::health::{HealthState, JobRun};
use crate::api::latency::{JobLatency, LatencyStats};
use crate::clock;
use crate::config::NEAREST_MATCH_TOLERANCE_SECS;
use crate::db::models::DAY_FORMAT;
use crate::error::AppError;
use crate::jobs::JobContext;
use crate::snapshot::{midpoint, nearest_per_group};
use crate::types::{EventKind, PcrRecord, PriceSnapshot, ReferenceLevel, SectorSnapshot, ThresholdEvent};
use crate::universe::stocks_for_sector;

#[derive(Clone)]
pub struct ApiState {
    pub ctx: Arc<JobContext>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/snapshots", get(get_snapshots))
        .route("/api/breakout-stocks", get(get_breakout_stocks))
        .route("/api/breakdown-stocks", get(get_breakdown_stocks))
        .route("/api/pcr-trendline", get(get_pcr_trendline))
        .route("/api/pcr-data", get(get_pcr_data))
        .route("/api/daily-high-low", get(get_daily_high_low))
        .route("/api/sector-stocks", get(get_sector_stocks))
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .nest("/api/cron", cron::router(state.clone()))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SnapshotsQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub sector: Option<String>,
}

#[derive(Deserialize)]
pub struct PcrTrendlineQuery {
    pub symbol: Option<String>,
    pub date: Option<String>,
}

#[derive(Deserialize)]
pub struct PcrDataQuery {
    pub index: Option<String>,
}

#[derive(Deserialize)]
pub struct DailyHighLowQuery {
    pub symbol: Option<String>,
    pub date: Option<String>,
}

#[derive(Deserialize)]
pub struct SectorStocksQuery {
    pub sector: Option<String>,
    pub symbols: Option<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(untagged)]
pub enum SnapshotRows {
    Sector(Vec<SectorSnapshot>),
    Stock(Vec<PriceSnapshot>),
}

#[derive(Serialize)]
pub struct SnapshotsResponse {
    pub success: bool,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Only set for sector queries.
    pub target: Option<DateTime<Utc>>,
    pub count: usize,
    pub data: SnapshotRows,
}

#[derive(Serialize)]
pub struct ThresholdResponse {
    pub success: bool,
    pub date: NaiveDate,
    pub count: usize,
    pub data: Vec<ThresholdEvent>,
}

#[derive(Serialize)]
pub struct PcrTrendlineResponse {
    pub success: bool,
    pub symbol: String,
    pub date: NaiveDate,
    pub count: usize,
    pub data: Vec<PcrRecord>,
}

#[derive(Serialize)]
pub struct PcrDataResponse {
    pub success: bool,
    pub data: Vec<PcrRecord>,
}

#[derive(Serialize)]
pub struct DailyHighLowResponse {
    pub success: bool,
    pub date: Option<NaiveDate>,
    pub count: usize,
    pub data: Vec<ReferenceLevel>,
}

#[derive(Debug, Serialize)]
pub struct StockMove {
    pub symbol: String,
    pub sector: String,
    pub last_price: f64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub change_percent: Option<f64>,
    pub as_of: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct SectorStocksResponse {
    pub success: bool,
    /// Table the rows came from: `stock_snapshots`, `reference_levels`, or `none`.
    pub source: &'static str,
    pub count: usize,
    pub data: Vec<StockMove>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub db_ok: bool,
    pub market_open: bool,
    pub trading_day: NaiveDate,
    pub runs_total: u64,
    pub failures_total: u64,
    pub jobs: std::collections::BTreeMap<&'static str, JobRun>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn required<'a>(v: &'a Option<String>, name: &str) -> Result<&'a str, AppError> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("Missing required parameter: {name}")))
}

fn parse_instant(raw: &str, name: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| AppError::BadRequest(format!("{name} must be an RFC 3339 timestamp")))
}

fn parse_date(raw: Option<&str>) -> Result<Option<NaiveDate>, AppError> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            NaiveDate::parse_from_str(s, DAY_FORMAT)
                .map_err(|_| AppError::BadRequest("date must be YYYY-MM-DD".to_string()))
        })
        .transpose()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_snapshots(
    State(state): State<ApiState>,
    Query(params): Query<SnapshotsQuery>,
) -> Result<Json<SnapshotsResponse>, AppError> {
    let kind = required(&params.kind, "type")?;
    let start = parse_instant(required(&params.start, "start")?, "start")?;
    let end = parse_instant(required(&params.end, "end")?, "end")?;
    if end < start {
        return Err(AppError::BadRequest("end must not be before start".to_string()));
    }
    let store = &state.ctx.store;

    match kind {
        "sector" => {
            let target = midpoint(start, end);
            let rows = store.sector_snapshots_between(start, end).await?;
            let nearest = nearest_per_group(
                rows,
                target,
                Duration::seconds(NEAREST_MATCH_TOLERANCE_SECS),
                |s: &SectorSnapshot| s.sector_name.clone(),
                |s: &SectorSnapshot| s.captured_at,
            );
            Ok(Json(SnapshotsResponse {
                success: true,
                kind: "sector",
                start,
                end,
                target: Some(target),
                count: nearest.len(),
                data: SnapshotRows::Sector(nearest),
            }))
        }
        "stock" => {
            let sector = params.sector.as_deref().map(str::trim).filter(|s| !s.is_empty());
            let rows = store.stock_snapshots_between(start, end, sector).await?;
            Ok(Json(SnapshotsResponse {
                success: true,
                kind: "stock",
                start,
                end,
                target: None,
                count: rows.len(),
                data: SnapshotRows::Stock(rows),
            }))
        }
        other => Err(AppError::BadRequest(format!(
            "Unknown snapshot type '{other}', expected 'sector' or 'stock'"
        ))),
    }
}

async fn threshold_events(state: &ApiState, kind: EventKind) -> Result<Json<ThresholdResponse>, AppError> {
    let date = clock::trading_day(Utc::now());
    let data = state.ctx.store.threshold_events(date, kind).await?;
    Ok(Json(ThresholdResponse {
        success: true,
        date,
        count: data.len(),
        data,
    }))
}

async fn get_breakout_stocks(State(state): State<ApiState>) -> Result<Json<ThresholdResponse>, AppError> {
    threshold_events(&state, EventKind::Breakout).await
}

async fn get_breakdown_stocks(State(state): State<ApiState>) -> Result<Json<ThresholdResponse>, AppError> {
    threshold_events(&state, EventKind::Breakdown).await
}

/// From the session open of `date`; past sessions stop at the close.
async fn get_pcr_trendline(
    State(state): State<ApiState>,
    Query(params): Query<PcrTrendlineQuery>,
) -> Result<Json<PcrTrendlineResponse>, AppError> {
    let symbol = required(&params.symbol, "symbol")?.to_uppercase();
    let today = clock::trading_day(Utc::now());
    let date = parse_date(params.date.as_deref())?.unwrap_or(today);

    let (open, close) = clock::session_bounds(date);
    let end = (date < today).then_some(close);
    let data = state.ctx.store.pcr_between(&symbol, open, end).await?;

    Ok(Json(PcrTrendlineResponse {
        success: true,
        symbol,
        date,
        count: data.len(),
        data,
    }))
}

async fn get_pcr_data(
    State(state): State<ApiState>,
    Query(params): Query<PcrDataQuery>,
) -> Result<Json<PcrDataResponse>, AppError> {
    let indices = match params.index.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(index) => vec![index.to_uppercase()],
        None => state.ctx.cfg.pcr_indices.clone(),
    };

    let mut data = Vec::new();
    for index in &indices {
        if let Some(record) = state.ctx.store.latest_pcr(index).await? {
            data.push(record);
        }
    }
    Ok(Json(PcrDataResponse { success: true, data }))
}

async fn get_daily_high_low(
    State(state): State<ApiState>,
    Query(params): Query<DailyHighLowQuery>,
) -> Result<Json<DailyHighLowResponse>, AppError> {
    let store = &state.ctx.store;
    let date = match parse_date(params.date.as_deref())? {
        Some(d) => Some(d),
        None => store.latest_reference_day().await?,
    };
    let symbol = params
        .symbol
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase);

    let data = match date {
        Some(d) => store.reference_levels_for(d, symbol.as_deref()).await?,
        None => Vec::new(),
    };
    Ok(Json(DailyHighLowResponse {
        success: true,
        date,
        count: data.len(),
        data,
    }))
}

/// Today's latest snapshot per symbol; if there are none yet today, the most
/// recent reference levels.
async fn get_sector_stocks(
    State(state): State<ApiState>,
    Query(params): Query<SectorStocksQuery>,
) -> Result<Json<SectorStocksResponse>, AppError> {
    let symbols: Vec<String> = if let Some(sector) = params.sector.as_deref().filter(|s| !s.trim().is_empty()) {
        stocks_for_sector(sector)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown sector '{sector}'")))?
            .iter()
            .map(|s| s.to_string())
            .collect()
    } else if let Some(list) = params.symbols.as_deref() {
        list.split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect()
    } else {
        Vec::new()
    };
    if symbols.is_empty() {
        return Err(AppError::BadRequest("Provide sector or symbols".to_string()));
    }

    let store = &state.ctx.store;
    let today = clock::trading_day(Utc::now());

    let snapshots = store.latest_stock_snapshots(&symbols, clock::day_start(today)).await?;
    if !snapshots.is_empty() {
        let opens: HashMap<String, f64> = store
            .session_opens_for(today)
            .await?
            .into_iter()
            .map(|o| (o.symbol, o.open))
            .collect();
        let data: Vec<StockMove> = snapshots
            .into_iter()
            .map(|s| {
                let open = s.open.or_else(|| opens.get(&s.symbol).copied());
                let change_percent = s.change_percent().or_else(|| percent_change(s.last_price, open));
                StockMove {
                    change_percent,
                    symbol: s.symbol,
                    sector: s.sector,
                    last_price: s.last_price,
                    open,
                    high: s.high,
                    low: s.low,
                    as_of: s.captured_at,
                }
            })
            .collect();
        return Ok(Json(SectorStocksResponse {
            success: true,
            source: "stock_snapshots",
            count: data.len(),
            data,
        }));
    }

    let levels = store.latest_reference_levels(&symbols).await?;
    let source = if levels.is_empty() { "none" } else { "reference_levels" };
    let data: Vec<StockMove> = levels
        .into_iter()
        .map(|l| StockMove {
            change_percent: percent_change(l.close, Some(l.open)),
            symbol: l.symbol,
            sector: l.sector,
            last_price: l.close,
            open: Some(l.open),
            high: Some(l.high),
            low: Some(l.low),
            as_of: l.captured_at,
        })
        .collect();
    Ok(Json(SectorStocksResponse {
        success: true,
        source,
        count: data.len(),
        data,
    }))
}

fn percent_change(last: f64, open: Option<f64>) -> Option<f64> {
    open.filter(|o| *o > 0.0).map(|o| (last - o) / o * 100.0)
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let now = Utc::now();
    let db_ok = state.ctx.store.ping().await;
    Json(HealthResponse {
        status: if db_ok { "ok" } else { "degraded" },
        db_ok,
        market_open: clock::is_market_open(now),
        trading_day: clock::trading_day(now),
        runs_total: state.health.runs_total(),
        failures_total: state.health.failures_total(),
        jobs: state.health.last_runs(),
    })
}

async fn get_stats_latency(
    State(state): State<ApiState>,
) -> Json<std::collections::BTreeMap<&'static str, JobLatency>> {
    Json(state.latency.snapshot())
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::jobs::testing::context;

    async fn app(secret: Option<&str>) -> (Router, ApiState) {
        let mut ctx = context(vec![], vec![], vec![]).await;
        ctx.cfg.cron_secret = secret.map(str::to_string);
        let state = ApiState {
            ctx: Arc::new(ctx),
            health: Arc::new(HealthState::new()),
            latency: Arc::new(LatencyStats::new()),
        };
        (router(state.clone()), state)
    }

    async fn get(app: Router, uri: &str, bearer: Option<&str>) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().uri(uri);
        if let Some(token) = bearer {
            req = req.header("authorization", format!("Bearer {token}"));
        }
        let resp = app.oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn cron_requires_matching_bearer() {
        let (app, _) = app(Some("s3cret")).await;
        let (status, body) = get(app.clone(), "/api/cron/cleanup-intraday", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Unauthorized");

        let (status, _) = get(app.clone(), "/api/cron/cleanup-intraday", Some("wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = get(app, "/api/cron/cleanup-intraday", Some("s3cret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn cron_rejects_everything_without_configured_secret() {
        let (app, state) = app(None).await;
        let (status, _) = get(app, "/api/cron/check-breakouts", Some("anything")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        // Rejected before the job ran.
        assert_eq!(state.health.runs_total(), 0);
    }

    #[tokio::test]
    async fn token_refresh_without_credentials_is_500() {
        let (app, state) = app(Some("s3cret")).await;
        let (status, body) = get(app, "/api/cron/refresh-groww-token", Some("s3cret")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(state.health.failures_total(), 1);
    }

    #[tokio::test]
    async fn snapshots_validates_params() {
        let (app, _) = app(None).await;
        let (status, _) = get(app.clone(), "/api/snapshots?type=sector", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get(
            app,
            "/api/snapshots?type=weekly&start=2026-01-12T06:35:00Z&end=2026-01-12T06:45:00Z",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sector_snapshots_pick_nearest_to_midpoint() {
        let (app, state) = app(None).await;
        let at = |s: &str| DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc);
        let snap = |sector: &str, t: &str, last: f64| SectorSnapshot {
            sector_name: sector.to_string(),
            captured_at: at(t),
            last_price: last,
            open_price: last,
            previous_close: last,
            change_percent: 0.0,
            variation: 0.0,
        };
        state
            .ctx
            .store
            .insert_sector_snapshots(&[
                snap("IT", "2026-01-12T06:35:00Z", 1.0),
                snap("IT", "2026-01-12T06:41:00Z", 2.0),
                snap("Auto", "2026-01-12T06:30:00Z", 3.0),
            ])
            .await
            .unwrap();

        let (status, body) = get(
            app,
            "/api/snapshots?type=sector&start=2026-01-12T06:30:00Z&end=2026-01-12T06:50:00Z",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        // Midpoint 06:40; Auto at 06:30 is outside the tolerance.
        assert_eq!(body["count"], 1);
        assert_eq!(body["data"][0]["sector_name"], "IT");
        assert_eq!(body["data"][0]["last_price"], 2.0);
    }

    #[tokio::test]
    async fn sector_stocks_needs_a_selector() {
        let (app, _) = app(None).await;
        let (status, _) = get(app.clone(), "/api/sector-stocks", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = get(app, "/api/sector-stocks?sector=it", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source"], "none");
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn read_endpoints_flag_success() {
        let (app, _) = app(None).await;
        for uri in [
            "/api/breakout-stocks",
            "/api/breakdown-stocks",
            "/api/pcr-data",
            "/api/daily-high-low",
            "/api/pcr-trendline?symbol=NIFTY",
            "/api/snapshots?type=stock&start=2026-01-12T03:45:00Z&end=2026-01-12T10:00:00Z",
        ] {
            let (status, body) = get(app.clone(), uri, None).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert_eq!(body["success"], true, "{uri}");
            assert!(body["data"].is_array(), "{uri}");
        }
    }

    #[tokio::test]
    async fn breakouts_are_served_largest_first() {
        let (app, state) = app(None).await;
        let today = clock::trading_day(Utc::now());
        let event = |symbol: &str, deviation: f64| ThresholdEvent {
            kind: EventKind::Breakout,
            symbol: symbol.to_string(),
            sector: "IT".to_string(),
            trading_day: today,
            reference_day: today.pred_opt().unwrap(),
            detected_at: Utc::now(),
            last_price: 100.0 + deviation,
            reference_level: 100.0,
            deviation_pct: deviation,
        };
        state
            .ctx
            .store
            .replace_threshold_events(today, &[event("TCS", 1.5), event("INFY", 4.0)])
            .await
            .unwrap();

        let (status, body) = get(app, "/api/breakout-stocks", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["count"], 2);
        assert_eq!(body["data"][0]["symbol"], "INFY");
    }

    #[tokio::test]
    async fn health_reports_db() {
        let (app, _) = app(None).await;
        let (status, body) = get(app, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["db_ok"], true);
    }

    #[test]
    fn percent_change_needs_positive_open() {
        assert_eq!(percent_change(110.0, Some(100.0)), Some(10.0));
        assert_eq!(percent_change(110.0, Some(0.0)), None);
        assert_eq!(percent_change(110.0, None), None);
    }
}
