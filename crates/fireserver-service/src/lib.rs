//! HTTP and WebSocket front end for the fire-sensor pipeline.
//!
//! This crate provides a service that:
//! - Accepts sensor readings from devices over HTTP
//! - Classifies them and broadcasts the live state to dashboards over WebSocket
//! - Writes every accepted reading to the history database in the background
//! - Serves history, live state and operator command overrides
//!
//! # REST API Endpoints
//!
//! - `GET /` - Banner
//! - `GET /api/health` - Service health check
//! - `GET /api/status` - Realtime and persistence counters
//! - `POST /api/sensor` (alias `/api/flame`) - Ingest a reading
//! - `GET /api/history` - Recent history, newest first
//! - `GET /api/devices/{id}/state` - Live state of a device
//! - `GET /api/devices/{id}/commands` - Command overrides, polled by devices
//! - `POST /api/control/buzzer` - Test-alarm override
//! - `POST /api/control/led` - Mute override
//! - `POST /api/control/sensor` - Enable or disable a sensor
//! - `WS /api/ws` - Realtime `flame_update` stream
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/fireserver/server.toml`:
//!
//! ```toml
//! default_device = "default"
//!
//! [server]
//! bind = "127.0.0.1:8080"
//! subscriber_buffer = 32
//! overflow = "drop_oldest"
//! max_devices = 1024
//!
//! [storage]
//! path = "~/.local/share/fireserver/history.db"
//!
//! [persistence]
//! queue_capacity = 256
//! write_timeout_ms = 2000
//!
//! [classifier]
//! analog_threshold = 100
//! severity = "four_level"
//! honor_mute = true
//! ```

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod persist;
pub mod state;
pub mod ws;

pub use config::{
    ClassifierSection, Config, ConfigError, HistoryConfig, PersistenceConfig, ServerConfig,
    StorageConfig,
};
pub use persist::{
    HistoryStore, PendingWrite, PersistOutcome, PersistQueue, PersistStats, PersistenceError,
};
pub use state::{AppState, FlameEvent};

/// Build the full application router with tracing and CORS layers.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(api::router())
        .merge(ws::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
