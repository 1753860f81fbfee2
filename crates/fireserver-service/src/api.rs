//! REST API endpoints for the fire server.
//!
//! Devices post readings to `/api/sensor`; dashboards read live state and
//! history and set operator overrides through `/api/control/*`.
//!
//! # Concurrency
//!
//! Handlers never hold a lock across a database call. Live state and command
//! locks live inside [`FireCore`](fireserver_core::FireCore); history queries
//! run on the blocking pool through [`HistoryStore`](crate::persist::HistoryStore).
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]. Payload
//! validation failures return HTTP 400 and are neither stored nor broadcast.
//! A failed history write never fails an ingestion; the response reports
//! `"history": "failed"` instead.
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use fireserver_service::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{error, warn};

use fireserver_core::{HubStats, validate_device_id};
use fireserver_store::HistoryQuery;
use fireserver_types::{CommandField, CommandState, FlameUpdate, HistoryRecord, LiveState, SensorId};

use crate::persist::{PersistStats, PersistenceError};
use crate::state::AppState;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(index))
        // Health and status
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        // Ingestion
        .route("/api/sensor", post(ingest))
        .route("/api/flame", post(ingest))
        // History and live state
        .route("/api/history", get(get_history))
        .route("/api/devices/{id}/state", get(get_live_state))
        .route("/api/devices/{id}/commands", get(get_commands))
        // Operator controls
        .route("/api/control/buzzer", post(control_buzzer))
        .route("/api/control/led", post(control_led))
        .route("/api/control/sensor", post(control_sensor))
}

async fn index() -> &'static str {
    "FireServer is running!"
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

// ==========================================================================
// Service Status
// ==========================================================================

/// Service status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Service version.
    pub version: &'static str,
    /// Current timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub uptime_seconds: u64,
    /// Realtime delivery counters.
    pub realtime: HubStats,
    /// History write counters.
    pub persistence: PersistenceStatus,
    /// Devices with a live state.
    pub devices: Vec<String>,
}

/// History writer status.
#[derive(Debug, Serialize)]
pub struct PersistenceStatus {
    #[serde(flatten)]
    pub stats: PersistStats,
    /// Entries waiting for the writer.
    pub pending: usize,
}

/// Get service status: uptime, realtime and persistence counters, known devices.
async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let now = OffsetDateTime::now_utc();
    let uptime_seconds = (now - state.started_at).whole_seconds().max(0) as u64;

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        timestamp: now,
        started_at: state.started_at,
        uptime_seconds,
        realtime: state.core.hub().stats(),
        persistence: PersistenceStatus {
            stats: state.persist.stats(),
            pending: state.persist.pending(),
        },
        devices: state.core.known_devices().await,
    })
}

// ==========================================================================
// Ingestion
// ==========================================================================

/// Ingestion response: the broadcast shape plus the history outcome.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    #[serde(flatten)]
    pub update: FlameUpdate,
    /// `stored`, `queued` or `failed`.
    pub history: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_id: Option<i64>,
}

/// Accept a reading from a device.
///
/// The response carries the computed state and the device's current command
/// overrides so the next device cycle can honor them.
///
/// # Errors
///
/// Returns [`AppError::BadRequest`] if the body is not JSON or the payload
/// fails validation.
async fn ingest(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<IngestResponse>, AppError> {
    let Json(payload) = body.map_err(|e| {
        warn!("Rejected reading: {}", e.body_text());
        AppError::BadRequest(e.body_text())
    })?;

    let (ingested, outcome) = state.ingest(&payload).await.map_err(|e| {
        warn!(
            device_id = ?payload.get("device_id"),
            shape = %payload_shape(&payload),
            "Rejected reading: {}", e
        );
        AppError::BadRequest(e.to_string())
    })?;

    Ok(Json(IngestResponse {
        update: ingested.update,
        history: outcome.label(),
        history_id: outcome.id(),
    }))
}

/// Field names and JSON types of a payload, for logs.
fn payload_shape(payload: &Value) -> String {
    match payload {
        Value::Object(map) => {
            let fields: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}:{}", k, json_kind(v)))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        other => json_kind(other).to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ==========================================================================
// History and live state
// ==========================================================================

/// Query parameters for history.
#[derive(Debug, Deserialize, Default)]
pub struct HistoryParams {
    pub device_id: Option<String>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl HistoryParams {
    /// Validate the query parameters.
    /// Returns an error if `since > until`.
    pub fn validate(&self) -> Result<(), AppError> {
        if let (Some(since), Some(until)) = (self.since, self.until)
            && since > until
        {
            return Err(AppError::BadRequest(format!(
                "Invalid time range: 'since' ({}) must be less than or equal to 'until' ({})",
                since, until
            )));
        }
        Ok(())
    }
}

fn parse_timestamp(name: &str, value: i64) -> Result<OffsetDateTime, AppError> {
    OffsetDateTime::from_unix_timestamp(value)
        .map_err(|_| AppError::BadRequest(format!("Invalid '{}' timestamp: {}", name, value)))
}

/// Paginated response wrapper with metadata.
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    /// The data items.
    pub data: Vec<T>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// Pagination metadata.
#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    /// Number of items returned.
    pub count: usize,
    /// Offset from the beginning.
    pub offset: u32,
    /// Effective limit after clamping.
    pub limit: u32,
    /// Whether there are more items available.
    pub has_more: bool,
}

/// Get recent history, newest first.
///
/// # Query Parameters
///
/// - `device_id`: only this device
/// - `since`: Unix timestamp to filter records from (inclusive)
/// - `until`: Unix timestamp to filter records until (inclusive)
/// - `limit`: maximum records (default and cap from `[history]`)
/// - `offset`: records to skip
///
/// # Errors
///
/// - Returns [`AppError::BadRequest`] if a parameter does not parse, the
///   device id is invalid, or `since > until`
/// - Returns [`AppError::Store`] if the database query fails
async fn get_history(
    State(state): State<Arc<AppState>>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<PaginatedResponse<HistoryRecord>>, AppError> {
    let Query(params) = params.map_err(|e| AppError::BadRequest(e.body_text()))?;
    params.validate()?;

    let limit = state.config.history.clamp(params.limit);
    let offset = params.offset.unwrap_or(0);

    // Request one extra item to determine if there are more
    let mut query = HistoryQuery::new().limit(limit.saturating_add(1)).offset(offset);
    if let Some(device_id) = &params.device_id {
        query = query.device(device_id_param(device_id)?);
    }
    if let Some(since) = params.since {
        query = query.since(parse_timestamp("since", since)?);
    }
    if let Some(until) = params.until {
        query = query.until(parse_timestamp("until", until)?);
    }

    let mut history = state.history.read(move |store| store.recent(&query)).await?;

    let has_more = history.len() > limit as usize;
    if has_more {
        history.pop();
    }

    Ok(Json(PaginatedResponse {
        pagination: PaginationMeta {
            count: history.len(),
            offset,
            limit,
            has_more,
        },
        data: history,
    }))
}

/// Live state of one device.
///
/// A device that has not reported yet is served its default safe state.
async fn get_live_state(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<LiveState>, AppError> {
    let id = device_id_param(&id)?;
    Ok(Json(state.core.live_state(id).await))
}

/// Command overrides for one device, as polled by the device.
async fn get_commands(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CommandState>, AppError> {
    let id = device_id_param(&id)?;
    Ok(Json(state.core.commands(id).await))
}

fn device_id_param(id: &str) -> Result<&str, AppError> {
    validate_device_id(id).map_err(|e| AppError::BadRequest(e.to_string()))
}

// ==========================================================================
// Operator controls
// ==========================================================================

/// Body of `/api/control/buzzer`.
#[derive(Debug, Deserialize)]
pub struct BuzzerRequest {
    pub device_id: Option<String>,
    pub test_alarm: bool,
}

/// Body of `/api/control/led`.
#[derive(Debug, Deserialize)]
pub struct LedRequest {
    pub device_id: Option<String>,
    pub mute_alarm: bool,
}

/// Body of `/api/control/sensor`.
#[derive(Debug, Deserialize)]
pub struct SensorToggleRequest {
    pub device_id: Option<String>,
    /// Sensor number, 1 to 3.
    pub sensor: u8,
    pub enabled: bool,
}

/// Response for control actions: the recomputed state that was broadcast.
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub success: bool,
    /// The field that was set, e.g. `test_alarm` or `sensor2_enabled`.
    pub field: String,
    pub value: bool,
    pub state: FlameUpdate,
}

/// Set or clear the test-alarm override.
async fn control_buzzer(
    State(state): State<Arc<AppState>>,
    body: Result<Json<BuzzerRequest>, JsonRejection>,
) -> Result<Json<ControlResponse>, AppError> {
    let Json(request) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    apply_command(
        &state,
        request.device_id.as_deref(),
        CommandField::TestAlarm,
        request.test_alarm,
    )
    .await
}

/// Set or clear the mute override.
///
/// With `classifier.honor_mute = false` the flag is stored and echoed but
/// never silences the alarm.
async fn control_led(
    State(state): State<Arc<AppState>>,
    body: Result<Json<LedRequest>, JsonRejection>,
) -> Result<Json<ControlResponse>, AppError> {
    let Json(request) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    apply_command(
        &state,
        request.device_id.as_deref(),
        CommandField::MuteAlarm,
        request.mute_alarm,
    )
    .await
}

/// Enable or disable one sensor.
///
/// # Errors
///
/// Returns [`AppError::BadRequest`] if `sensor` is not 1, 2 or 3.
async fn control_sensor(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SensorToggleRequest>, JsonRejection>,
) -> Result<Json<ControlResponse>, AppError> {
    let Json(request) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let sensor =
        SensorId::try_from(request.sensor).map_err(|e| AppError::BadRequest(e.to_string()))?;
    apply_command(
        &state,
        request.device_id.as_deref(),
        CommandField::SensorEnabled(sensor),
        request.enabled,
    )
    .await
}

async fn apply_command(
    state: &AppState,
    device_id: Option<&str>,
    field: CommandField,
    value: bool,
) -> Result<Json<ControlResponse>, AppError> {
    let device_id = match device_id {
        Some(id) => device_id_param(id)?,
        None => state.core.default_device(),
    };
    let update = state
        .core
        .set_command(device_id, field, value)
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    Ok(Json(ControlResponse {
        success: true,
        field: field.to_string(),
        value,
        state: update,
    }))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Store(PersistenceError),
}

impl From<PersistenceError> for AppError {
    fn from(e: PersistenceError) -> Self {
        AppError::Store(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Store(e) => {
                error!("History query failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
