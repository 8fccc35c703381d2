// =============================================================================
// REST Handlers — status, state, filter control, CSV export
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::filter::FilterConfig;

use super::{ws, ApiState};

/// Operator-visible engine status.
#[derive(Debug, Serialize)]
struct StatusResponse {
    connected: bool,
    symbol_count: usize,
    uptime_secs: u64,
    ingest_batches: u64,
    pending_signals: usize,
    completed_signals: usize,
    filter: String,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/state", get(get_state))
        .route("/api/v1/filter/:preset", post(set_filter_preset))
        .route("/api/v1/signals/export", get(export_signals_csv))
        .route("/api/v1/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn get_status(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(StatusResponse {
        connected: state.connected.load(Ordering::SeqCst),
        symbol_count: state.store.symbol_count(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        ingest_batches: state.scheduler.ingest_pulse(),
        pending_signals: state.tracker.pending_count(),
        completed_signals: state.tracker.completed_count(),
        filter: state.assembler.filter_config().name,
    })
}

async fn get_state(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.assembler.build())
}

async fn set_filter_preset(
    State(state): State<Arc<ApiState>>,
    Path(preset): Path<String>,
) -> impl IntoResponse {
    match FilterConfig::preset(&preset) {
        Some(config) => {
            state.assembler.set_filter(config);
            StatusCode::NO_CONTENT.into_response()
        }
        None => (
            StatusCode::BAD_REQUEST,
            format!("unknown filter preset: {preset}"),
        )
            .into_response(),
    }
}

async fn export_signals_csv(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    match state.persistence.export_completed_csv() {
        Ok(csv) => (
            StatusCode::OK,
            [("content-type", "text/csv; charset=utf-8")],
            csv,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "CSV export failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "export failed").into_response()
        }
    }
}
