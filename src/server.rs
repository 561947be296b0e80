//! Web server module for brewlog.
//!
//! Provides the JSON API over the query services plus health checks.

use axum::{
    Json, Router,
    extract::{Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::ingest::IngestStats;
use crate::query::{HistoricalQuery, HistoricalQueryService, QueryError, RealtimeQueryService};
use crate::storage::{DurableStore, with_deadline};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub realtime: RealtimeQueryService,
    pub historical: HistoricalQueryService,
    pub reports: Arc<dyn DurableStore>,
    pub ingest_stats: Arc<IngestStats>,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    db: Option<String>,
}

/// Error body returned by API endpoints.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// API-level error, mapped to an HTTP status.
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Query(QueryError),
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        Self::Query(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Query(err @ QueryError::Timeout(_)) => {
                tracing::warn!(error = %err, "Query timed out");
                (StatusCode::GATEWAY_TIMEOUT, err.to_string())
            }
            Self::Query(err @ QueryError::Store(_)) => {
                tracing::error!(error = %err, "Query failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/api/realtime", get(realtime_handler))
        .route("/api/historical", get(historical_handler))
        .route("/api/ingest/stats", get(ingest_stats_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

/// Liveness check.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        db: None,
    })
}

/// Readiness check that verifies the document store is reachable.
async fn readyz_handler(State(state): State<Arc<AppState>>) -> Response {
    let timeout = state.historical.store_timeout();
    let db_status = with_deadline(timeout, state.reports.ping())
        .await
        .map(|_| "ready".to_string())
        .map_err(|e| e.to_string());

    match db_status {
        Ok(db) => Json(HealthResponse {
            status: "ok".to_string(),
            db: Some(db),
        })
        .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "not_ready".to_string(),
                    db: Some(err),
                }),
            )
                .into_response()
        }
    }
}

/// Newest cached reports, newest first.
async fn realtime_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let reports = state.realtime.latest().await?;
    Ok(Json(reports).into_response())
}

/// Paginated report history, optionally filtered by batch.
async fn historical_handler(
    State(state): State<Arc<AppState>>,
    params: Result<Query<HistoricalQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let page = state.historical.query(&query).await?;
    Ok(Json(page).into_response())
}

/// Ingestion counters since startup.
async fn ingest_stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.ingest_stats.snapshot())
}
