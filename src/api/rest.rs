// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Reads are public; candle ingest
// requires a valid Bearer token checked via the `AuthBearer` extractor.
//
//   GET  /api/v1/health
//   GET  /api/v1/klines?symbol=BTC&timeframe=hour&limit=100
//   POST /api/v1/klines                                  (authenticated)
//   GET  /api/v1/freshness?symbol=BTC&timeframe=hour
//   GET  /api/v1/data-quality?symbol=BTC
//   GET  /api/v1/data-quality/latest
//   GET  /api/v1/statistics?symbol=BTC&timeframe=hour&limit=100
//   GET  /api/v1/latest-prices
//
// Every body is wrapped in `ApiResponse { success, data, error }`.
// CORS is configured permissively for development.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::market_data::CandleRow;
use crate::timestamps::TimestampInput;
use crate::types::Granularity;

const DEFAULT_SYMBOL: &str = "BTC";
const DEFAULT_TIMEFRAME: Granularity = Granularity::Hour;

// =============================================================================
// Response envelope
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

type ApiError = (StatusCode, Json<ApiResponse<()>>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::error(message)))
}

fn parse_timeframe(timeframe: Option<&str>) -> Result<Granularity, ApiError> {
    match timeframe {
        None => Ok(DEFAULT_TIMEFRAME),
        Some(tf) => tf.parse().map_err(|e: crate::error::CoreError| bad_request(e.to_string())),
    }
}

fn symbol_or_default(symbol: Option<String>) -> String {
    symbol
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SYMBOL.to_string())
}

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS and tracing middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/klines", get(get_klines).post(ingest_klines))
        .route("/api/v1/freshness", get(freshness))
        .route("/api/v1/data-quality", get(data_quality))
        .route("/api/v1/data-quality/latest", get(latest_data_quality))
        .route("/api/v1/statistics", get(statistics))
        .route("/api/v1/latest-prices", get(latest_prices))
        // ── Middleware & State ───────────────────────────────────────
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    uptime_secs: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ApiResponse::ok(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        server_time: state.kline_service.now().timestamp_millis(),
    }))
}

// =============================================================================
// K-lines with indicators
// =============================================================================

#[derive(Debug, Deserialize)]
struct KlineQuery {
    symbol: Option<String>,
    timeframe: Option<String>,
    limit: Option<usize>,
}

async fn get_klines(
    State(state): State<Arc<AppState>>,
    Query(q): Query<KlineQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let granularity = parse_timeframe(q.timeframe.as_deref())?;
    let symbol = symbol_or_default(q.symbol);
    let limit = state.runtime_config.read().clamp_limit(q.limit);

    let response = state
        .kline_service
        .series_with_indicators(&symbol, granularity, limit)
        .await;
    Ok(Json(ApiResponse::ok(response)))
}

// =============================================================================
// Price statistics
// =============================================================================

async fn statistics(
    State(state): State<Arc<AppState>>,
    Query(q): Query<KlineQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let granularity = parse_timeframe(q.timeframe.as_deref())?;
    let symbol = symbol_or_default(q.symbol);
    let limit = state.runtime_config.read().clamp_limit(q.limit);

    let response = state.kline_service.statistics(&symbol, granularity, limit).await;
    Ok(Json(ApiResponse::ok(response)))
}

async fn latest_prices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let symbols = state.runtime_config.read().symbols.clone();
    let prices = state.kline_service.latest_prices(&symbols).await;
    Json(ApiResponse::ok(prices))
}

// =============================================================================
// Ingest (authenticated)
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Millis(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct IngestCandle {
    timestamp: WireTimestamp,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

impl From<IngestCandle> for CandleRow {
    fn from(c: IngestCandle) -> Self {
        let timestamp = match c.timestamp {
            WireTimestamp::Millis(ms) => TimestampInput::EpochMillis(ms),
            WireTimestamp::Text(text) => TimestampInput::Text(text),
        };
        CandleRow {
            timestamp,
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    symbol: String,
    timeframe: String,
    candles: Vec<IngestCandle>,
}

#[derive(Serialize)]
struct IngestResponse {
    symbol: String,
    granularity: Granularity,
    accepted: usize,
    series_len: usize,
}

async fn ingest_klines(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let granularity = parse_timeframe(Some(req.timeframe.as_str()))?;
    let symbol = req.symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(bad_request("symbol must not be empty"));
    }

    let accepted = req.candles.len();
    let rows: Vec<CandleRow> = req.candles.into_iter().map(CandleRow::from).collect();

    let series_len = state.ingest(&symbol, granularity, rows).map_err(|e| {
        warn!(symbol = %symbol, granularity = %granularity, error = %e, "ingest rejected");
        bad_request(e.to_string())
    })?;

    Ok(Json(ApiResponse::ok(IngestResponse {
        symbol,
        granularity,
        accepted,
        series_len,
    })))
}

// =============================================================================
// Freshness & data quality
// =============================================================================

#[derive(Debug, Deserialize)]
struct FreshnessQuery {
    symbol: Option<String>,
    timeframe: Option<String>,
}

async fn freshness(
    State(state): State<Arc<AppState>>,
    Query(q): Query<FreshnessQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let granularity = parse_timeframe(q.timeframe.as_deref())?;
    let symbol = symbol_or_default(q.symbol);
    let report = state.kline_service.freshness_report(&symbol, granularity).await;
    Ok(Json(ApiResponse::ok(report)))
}

#[derive(Debug, Deserialize)]
struct QualityQuery {
    symbol: Option<String>,
}

async fn data_quality(
    State(state): State<Arc<AppState>>,
    Query(q): Query<QualityQuery>,
) -> impl IntoResponse {
    let symbol = symbol_or_default(q.symbol);
    let report = state.quality_monitor.health_report(&symbol).await;
    Json(ApiResponse::ok(report))
}

async fn latest_data_quality(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    match state.latest_health_report() {
        Some(report) => Ok(Json(ApiResponse::ok(report))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("no health report generated yet")),
        )),
    }
}

// =============================================================================
// Tests
// =============================================================================
