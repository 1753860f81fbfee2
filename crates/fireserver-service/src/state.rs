//! Application state shared across handlers.
//!
//! # Realtime delivery
//!
//! Realtime events go through the [`BroadcastHub`](fireserver_core::BroadcastHub)
//! owned by [`FireCore`]. Key characteristics:
//!
//! - **Buffer size**: Configurable via `server.subscriber_buffer` (default: 32)
//! - **Overflow**: `server.overflow` picks drop-oldest or disconnect for a
//!   subscriber that falls behind
//! - **No blocking**: Publishing never waits on a subscriber
//!
//! ## Example Configuration
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//! subscriber_buffer = 64
//! overflow = "disconnect"
//! ```
//!
//! # Ordering
//!
//! Readings are published and queued for the history writer under one
//! lock, so history rows of a device are stored in the order dashboards saw
//! them, also when two requests for the same device race.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::warn;

use fireserver_core::{FireCore, Ingested};
use fireserver_store::NewHistoryEntry;
use fireserver_types::{FlameUpdate, ValidationError};

use crate::config::Config;
use crate::persist::{HistoryStore, PersistOutcome, PersistQueue};

/// Shared application state.
pub struct AppState {
    /// Classification pipeline, live registers and broadcast hub.
    pub core: FireCore,
    /// History database handle for queries.
    pub history: HistoryStore,
    /// History write queue.
    pub persist: PersistQueue,
    /// Effective configuration.
    pub config: Config,
    pub started_at: OffsetDateTime,
    /// Held from publish until the history entry is queued.
    ingest_order: Mutex<()>,
}

impl AppState {
    /// Create new application state.
    ///
    /// The pipeline is built from `config`; `persist` should write to the same
    /// database `history` reads from.
    pub fn new(config: Config, history: HistoryStore, persist: PersistQueue) -> Arc<Self> {
        Arc::new(Self {
            core: FireCore::new(config.core_config()),
            history,
            persist,
            config,
            started_at: OffsetDateTime::now_utc(),
            ingest_order: Mutex::new(()),
        })
    }

    /// Run one ingestion: validate, classify, update live state, broadcast,
    /// then hand the record to the history writer.
    ///
    /// Only validation (including the device cap) can fail; a failed history
    /// write is reported in the returned outcome.
    pub async fn ingest(
        &self,
        payload: &Value,
    ) -> Result<(Ingested, PersistOutcome), ValidationError> {
        let normalized = self.core.normalize(payload)?;

        let (ingested, pending) = {
            let _order = self.ingest_order.lock().await;
            let ingested = self.core.ingest(normalized).await?;
            let live = &ingested.live;
            let entry = NewHistoryEntry::new(live.reading.clone(), live.state, live.alarm);
            let pending = self.persist.enqueue(entry).await;
            (ingested, pending)
        };

        let outcome = pending.outcome().await;
        let live = &ingested.live;
        if let PersistOutcome::Failed(e) = &outcome {
            warn!(device_id = %live.device_id(), "Reading broadcast but not stored: {}", e);
        }

        Ok((ingested, outcome))
    }
}

/// Realtime frame sent to dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct FlameEvent {
    /// Always `flame_update`.
    pub event: &'static str,
    pub data: FlameUpdate,
}

impl From<FlameUpdate> for FlameEvent {
    fn from(data: FlameUpdate) -> Self {
        Self {
            event: "flame_update",
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fireserver_core::Topic;
    use fireserver_store::HistoryQuery;
    use fireserver_types::{Alarm, FireState};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use crate::config::PersistenceConfig;

    fn create_test_state(await_write: bool) -> Arc<AppState> {
        let mut config = Config::default();
        config.persistence = PersistenceConfig {
            await_write,
            ..Default::default()
        };
        let history = HistoryStore::in_memory().unwrap();
        let (persist, _) =
            PersistQueue::start(history.clone(), config.persistence.clone(), CancellationToken::new());
        AppState::new(config, history, persist)
    }

    #[tokio::test]
    async fn test_app_state_new() {
        let state = create_test_state(false);
        assert_eq!(state.config.server.bind, "127.0.0.1:8080");
        assert_eq!(state.core.default_device(), "default");
        assert_eq!(state.core.hub().config().subscriber_buffer, 32);
    }

    #[tokio::test]
    async fn test_ingest_stores_and_broadcasts() {
        let state = create_test_state(true);
        let mut sub = state.core.subscribe(Topic::All).await;
        sub.recv().await.unwrap();

        let (ingested, outcome) = state
            .ingest(&json!({"sensor_1": 0, "sensor_2": 1, "sensor_3": 1}))
            .await
            .unwrap();
        assert_eq!(ingested.live.state, FireState::Warning);
        assert_eq!(ingested.live.alarm, Alarm::On);
        assert_eq!(ingested.delivered, 1);

        let id = outcome.id().unwrap();
        let stored = state.history.read(|s| s.latest("default")).await.unwrap().unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.state, FireState::Warning);

        assert_eq!(sub.recv().await.unwrap().status, FireState::Warning);
    }

    #[tokio::test]
    async fn test_invalid_payload_neither_stored_nor_broadcast() {
        let state = create_test_state(true);
        let mut sub = state.core.subscribe(Topic::All).await;
        sub.recv().await.unwrap();

        let result = state.ingest(&json!({"sensor_1": -1})).await;
        assert!(result.is_err());
        assert!(sub.try_recv().is_none());
        assert_eq!(state.history.read(|s| s.count(None)).await.unwrap(), 0);
        assert_eq!(state.persist.stats().queued, 0);
    }

    #[tokio::test]
    async fn test_failed_persistence_still_broadcasts() {
        let mut config = Config::default();
        config.persistence.await_write = true;
        let history = HistoryStore::in_memory().unwrap();
        let cancel = CancellationToken::new();
        let (persist, worker) =
            PersistQueue::start(history.clone(), config.persistence.clone(), cancel.clone());
        cancel.cancel();
        worker.await.unwrap();
        let state = AppState::new(config, history, persist);

        let mut sub = state.core.subscribe(Topic::All).await;
        sub.recv().await.unwrap();

        let (_, outcome) = state
            .ingest(&json!({"sensor_1": 0, "sensor_2": 0, "sensor_3": 0}))
            .await
            .unwrap();
        assert_eq!(outcome.label(), "failed");
        assert_eq!(sub.recv().await.unwrap().status, FireState::Fire);
    }

    #[tokio::test]
    async fn test_repeated_payload_is_stored_twice() {
        let state = create_test_state(true);
        let payload = json!({"device_id": "lab", "sensor_1": 0, "sensor_2": 0, "sensor_3": 1});

        let (_, first) = state.ingest(&payload).await.unwrap();
        let (_, second) = state.ingest(&payload).await.unwrap();
        assert_ne!(first.id().unwrap(), second.id().unwrap());

        assert_eq!(state.history.read(|s| s.count(None)).await.unwrap(), 2);
        let rows = state
            .history
            .read(|s| s.recent(&HistoryQuery::new().device("lab")))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.state == FireState::Danger));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_history_order_matches_broadcast_order() {
        let config = Config::default();
        let history = HistoryStore::in_memory().unwrap();
        let cancel = CancellationToken::new();
        let (persist, worker) =
            PersistQueue::start(history.clone(), config.persistence.clone(), cancel.clone());
        let state = AppState::new(config, history, persist);

        let mut sub = state.core.subscribe(Topic::Device("lab".into())).await;
        sub.recv().await.unwrap();

        let mut handles = Vec::new();
        for task in 0..4u16 {
            let state = Arc::clone(&state);
            handles.push(tokio::spawn(async move {
                for i in 0..5u16 {
                    let payload = json!({"device_id": "lab", "raw_1": task * 10 + i});
                    state.ingest(&payload).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        cancel.cancel();
        worker.await.unwrap();

        let mut broadcast = Vec::new();
        while let Some(event) = sub.try_recv() {
            broadcast.push(event.raw_1.unwrap());
        }
        let stored: Vec<u16> = state
            .history
            .read(|s| s.recent(&HistoryQuery::new().device("lab").oldest_first()))
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.reading.raw_1.unwrap())
            .collect();

        assert_eq!(broadcast.len(), 20);
        assert_eq!(stored, broadcast);
    }

    #[test]
    fn test_flame_event_serialization() {
        let live = fireserver_types::LiveState::default_safe("lab");
        let event = FlameEvent::from(FlameUpdate::new(&live, Default::default()));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "flame_update");
        assert_eq!(json["data"]["device_id"], "lab");
        assert_eq!(json["data"]["status"], "Aman");
        assert!(json["data"]["updated_at"].is_null());
    }
}
