//! REST API endpoints for the greenhouse service.
//!
//! Handlers call straight into the [`Engine`](greenhouse_core::Engine); none
//! of its operations block on I/O except connect and reconnect, which are
//! async.
//!
//! ## Error Handling
//!
//! Client errors (unknown device or metric, malformed body) return HTTP 400
//! with a JSON `{"error": ...}` body via [`AppError`]. Controller problems
//! never surface here: the engine falls back to simulation and the
//! connection endpoints report the state.
//!
//! # Example
//!
//! ```ignore
//! use greenhouse_service::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use greenhouse_core::ConnectionStatus;
use greenhouse_types::{DeviceState, HistoryPoint, Metric, Reading};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

use crate::influx::StorageStatus;
use crate::state::AppState;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        .route("/api/history", get(get_history))
        .route("/api/control", post(control_device))
        .route("/api/connection", get(get_connection))
        .route("/api/connection/reconnect", post(reconnect))
        .route("/api/storage", get(get_storage))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Current values and device intents.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub reading: Reading,
    pub devices: DeviceState,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Refresh and return the current values.
async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let reading = state.engine.refresh();
    Json(StatusResponse {
        reading,
        devices: state.engine.devices(),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Query parameters for history.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// Metric name; defaults to `temperature`.
    pub metric: Option<String>,
}

/// Recorded points of one metric, oldest first.
async fn get_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryPoint>>, AppError> {
    let name = query.metric.as_deref().unwrap_or("temperature");
    let metric = Metric::from_str(name).map_err(|e| AppError::BadRequest(e.to_string()))?;
    Ok(Json(state.engine.history(metric.as_str())))
}

/// Request to switch a device.
#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub device: String,
    pub status: bool,
}

/// Result of a control request.
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub success: bool,
    pub devices: DeviceState,
}

async fn control_device(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ControlRequest>, JsonRejection>,
) -> Result<Json<ControlResponse>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    if !state.engine.set_device(&request.device, request.status) {
        return Err(AppError::BadRequest(format!(
            "unknown device: {}",
            request.device
        )));
    }

    Ok(Json(ControlResponse {
        success: true,
        devices: state.engine.devices(),
    }))
}

async fn get_connection(State(state): State<Arc<AppState>>) -> Json<ConnectionStatus> {
    Json(state.engine.connection_status())
}

/// Result of a reconnect request.
#[derive(Debug, Serialize)]
pub struct ReconnectResponse {
    pub success: bool,
    pub message: &'static str,
    pub status: ConnectionStatus,
}

/// Drop the current link and search for a controller again.
async fn reconnect(State(state): State<Arc<AppState>>) -> Json<ReconnectResponse> {
    info!("Reconnect requested via API");
    let success = state.engine.reconnect().await;
    Json(ReconnectResponse {
        success,
        message: if success {
            "reconnected"
        } else {
            "reconnect failed"
        },
        status: state.engine.connection_status(),
    })
}

async fn get_storage(State(state): State<Arc<AppState>>) -> Json<StorageStatus> {
    Json(state.storage_status())
}

/// API error type.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
