//! The classification and fan-out pipeline.
//!
//! [`FireCore`] owns the live state register, the command register and the
//! broadcast hub. It is constructed once at startup and shared by handle.
//!
//! Lock order is always live state, then commands. Publishing happens while
//! the live state lock is held, and subscribing takes the same lock, so a
//! new subscriber's initial snapshot and the stream that follows it never
//! overlap or leave a gap.
//!
//! Both registers are bounded by `max_devices`. A device that is not yet
//! known is refused once the cap is reached, both for readings and for
//! operator commands.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use fireserver_types::{CommandField, CommandState, FlameUpdate, LiveState, ValidationResult};

use crate::classify::{Classifier, ClassifierConfig};
use crate::commands::CommandRegister;
use crate::hub::{BroadcastHub, HubConfig, Subscription, Topic};
use crate::live::{DEFAULT_MAX_DEVICES, LiveStateRegister};
use crate::normalize::{NormalizedReading, NormalizerConfig, ReadingNormalizer};

/// Pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub normalizer: NormalizerConfig,
    pub classifier: ClassifierConfig,
    pub hub: HubConfig,
    /// Distinct devices kept in the live and command registers.
    pub max_devices: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            normalizer: NormalizerConfig::default(),
            classifier: ClassifierConfig::default(),
            hub: HubConfig::default(),
            max_devices: DEFAULT_MAX_DEVICES,
        }
    }
}

/// Outcome of one ingestion.
#[derive(Debug, Clone)]
pub struct Ingested {
    /// Live state after the update.
    pub live: LiveState,
    /// Command snapshot the classification used.
    pub commands: CommandState,
    /// The event that was broadcast.
    pub update: FlameUpdate,
    /// Subscribers the event was queued for.
    pub delivered: usize,
}

/// Shared pipeline state.
pub struct FireCore {
    normalizer: ReadingNormalizer,
    classifier: Classifier,
    live: Mutex<LiveStateRegister>,
    commands: RwLock<CommandRegister>,
    hub: BroadcastHub,
}

impl FireCore {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            normalizer: ReadingNormalizer::new(config.normalizer),
            classifier: Classifier::new(config.classifier),
            live: Mutex::new(LiveStateRegister::with_max_devices(config.max_devices)),
            commands: RwLock::new(CommandRegister::new()),
            hub: BroadcastHub::new(config.hub),
        }
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Device id used when a payload or request names none.
    pub fn default_device(&self) -> &str {
        &self.normalizer.config().default_device
    }

    /// Validate and canonicalize an ingestion payload.
    pub fn normalize(&self, payload: &Value) -> ValidationResult<NormalizedReading> {
        self.normalizer.normalize(payload)
    }

    /// Classify a normalized reading, update the live state and publish it.
    ///
    /// Persistence is left to the caller; this only touches in-memory state
    /// and never waits on a subscriber. Fails only when the reading names a
    /// new device and the device cap is reached; nothing is published then.
    pub async fn ingest(&self, normalized: NormalizedReading) -> ValidationResult<Ingested> {
        let NormalizedReading {
            reading,
            reported_state,
            encoding,
        } = normalized;

        let mut live = self.live.lock().await;
        live.admit(&reading.device_id)?;
        let commands = self.commands.read().await.get(&reading.device_id);
        let verdict = self.classifier.evaluate(&reading, &commands, reported_state);

        let state = LiveState {
            reading,
            reported_state,
            state: verdict.state,
            alarm: verdict.alarm,
            last_updated: Some(OffsetDateTime::now_utc()),
        };
        live.update(state.clone())?;

        let update = FlameUpdate::new(&state, commands);
        let delivered = self.hub.publish(update.clone());
        drop(live);

        debug!(
            device_id = %state.device_id(),
            state = %state.state,
            alarm = %state.alarm,
            %encoding,
            delivered,
            "Reading ingested"
        );

        Ok(Ingested {
            live: state,
            commands,
            update,
            delivered,
        })
    }

    /// Set one operator override and broadcast the recomputed state.
    ///
    /// The device's last reading is re-classified against the new commands.
    /// A device that never reported starts from the default safe state, and
    /// is refused once the device cap is reached.
    pub async fn set_command(
        &self,
        device_id: &str,
        field: CommandField,
        value: bool,
    ) -> ValidationResult<FlameUpdate> {
        let mut live = self.live.lock().await;
        live.admit(device_id)?;
        let commands = self.commands.write().await.set(device_id, field, value);

        let mut state = live.get(device_id);
        let verdict = self
            .classifier
            .evaluate(&state.reading, &commands, state.reported_state);
        state.state = verdict.state;
        state.alarm = verdict.alarm;
        state.last_updated = Some(OffsetDateTime::now_utc());
        live.update(state.clone())?;

        let update = FlameUpdate::new(&state, commands);
        let delivered = self.hub.publish(update.clone());
        drop(live);

        info!(
            device_id,
            %field,
            value,
            state = %state.state,
            alarm = %state.alarm,
            delivered,
            "Command applied"
        );
        Ok(update)
    }

    /// Current overrides for a device.
    pub async fn commands(&self, device_id: &str) -> CommandState {
        self.commands.read().await.get(device_id)
    }

    /// Last known state of a device, or the default safe state.
    pub async fn live_state(&self, device_id: &str) -> LiveState {
        self.live.lock().await.get(device_id)
    }

    /// Whether the device has reported or been commanded since start.
    pub async fn is_known(&self, device_id: &str) -> bool {
        self.live.lock().await.contains(device_id)
    }

    /// Devices with a live state, sorted.
    pub async fn known_devices(&self) -> Vec<String> {
        self.live.lock().await.devices()
    }

    /// Register a subscriber.
    ///
    /// A device subscriber first receives that device's current state. An
    /// all-devices subscriber first receives every known device, or the
    /// default device's safe state when nothing has reported yet.
    pub async fn subscribe(&self, topic: Topic) -> Subscription {
        let live = self.live.lock().await;
        let commands = self.commands.read().await;

        let initial = match &topic {
            Topic::Device(id) => vec![FlameUpdate::new(&live.get(id), commands.get(id))],
            Topic::All if live.is_empty() => {
                let id = self.default_device();
                vec![FlameUpdate::new(&LiveState::default_safe(id), commands.get(id))]
            }
            Topic::All => live
                .snapshot()
                .iter()
                .map(|state| FlameUpdate::new(state, commands.get(state.device_id())))
                .collect(),
        };
        drop(commands);

        let subscription = self.hub.subscribe(topic, initial);
        drop(live);
        subscription
    }
}

impl Default for FireCore {
    fn default() -> Self {
        Self::new(CoreConfig::default())
    }
}

impl std::fmt::Debug for FireCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FireCore")
            .field("normalizer", &self.normalizer)
            .field("classifier", &self.classifier)
            .field("hub", &self.hub.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use fireserver_types::{Alarm, FireState, SensorId, ValidationError};
    use serde_json::json;

    use crate::hub::OverflowPolicy;

    async fn ingest(core: &FireCore, payload: Value) -> Ingested {
        let normalized = core.normalize(&payload).unwrap();
        core.ingest(normalized).await.unwrap()
    }

    #[tokio::test]
    async fn test_ingest_warning() {
        let core = FireCore::default();
        let out = ingest(&core, json!({"sensor_1": 0, "sensor_2": 1, "sensor_3": 1})).await;

        assert_eq!(out.live.state, FireState::Warning);
        assert_eq!(out.live.alarm, Alarm::On);
        assert_eq!(out.update.status, FireState::Warning);
        assert_eq!(out.update.device_id, "default");
        assert!(out.live.last_updated.is_some());
        assert_eq!(out.delivered, 0);

        let live = core.live_state("default").await;
        assert_eq!(live.state, FireState::Warning);
    }

    #[tokio::test]
    async fn test_disabled_sensor_keeps_device_safe() {
        let core = FireCore::default();
        core.set_command("default", CommandField::SensorEnabled(SensorId::One), false)
            .await
            .unwrap();
        let out = ingest(&core, json!({"sensor_1": 0, "sensor_2": 1, "sensor_3": 1})).await;
        assert_eq!(out.live.state, FireState::Safe);
        assert_eq!(out.live.alarm, Alarm::Off);
        assert!(!out.commands.sensor_1_enabled);
    }

    #[tokio::test]
    async fn test_reported_state_overrides_classification() {
        let core = FireCore::default();
        let out = ingest(
            &core,
            json!({"sensor_1": 1, "sensor_2": 1, "sensor_3": 1, "state": "Kebakaran"}),
        )
        .await;
        assert_eq!(out.live.state, FireState::Fire);
        assert_eq!(out.live.alarm, Alarm::On);
    }

    #[tokio::test]
    async fn test_subscriber_gets_current_state_then_new_events() {
        let core = FireCore::default();
        for _ in 0..3 {
            ingest(&core, json!({"sensor_1": 0, "sensor_2": 0, "sensor_3": 0})).await;
        }

        let mut sub = core.subscribe(Topic::Device("default".into())).await;
        ingest(&core, json!({"sensor_1": 1, "sensor_2": 1, "sensor_3": 1})).await;

        let first = sub.recv().await.unwrap();
        assert_eq!(first.status, FireState::Fire);
        let second = sub.recv().await.unwrap();
        assert_eq!(second.status, FireState::Safe);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_unknown_device_gets_default_safe() {
        let core = FireCore::default();
        let mut sub = core.subscribe(Topic::Device("nowhere".into())).await;
        let first = sub.recv().await.unwrap();
        assert_eq!(first.device_id, "nowhere");
        assert_eq!(first.status, FireState::Safe);
        assert_eq!(first.alarm, Alarm::Off);
        assert!(first.updated_at.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_all_snapshot() {
        let core = FireCore::default();
        let mut empty = core.subscribe(Topic::All).await;
        assert_eq!(empty.recv().await.unwrap().device_id, "default");

        ingest(&core, json!({"device_id": "b", "sensor_1": 0})).await;
        ingest(&core, json!({"device_id": "a", "sensor_1": 1})).await;

        let mut sub = core.subscribe(Topic::All).await;
        assert_eq!(sub.recv().await.unwrap().device_id, "a");
        assert_eq!(sub.recv().await.unwrap().device_id, "b");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_retry_appends_another_broadcast() {
        let core = FireCore::default();
        let mut sub = core.subscribe(Topic::All).await;
        sub.recv().await.unwrap();

        let payload = json!({"sensor_1": 0, "sensor_2": 0, "sensor_3": 1});
        ingest(&core, payload.clone()).await;
        ingest(&core, payload).await;

        assert_eq!(sub.recv().await.unwrap().status, FireState::Danger);
        assert_eq!(sub.recv().await.unwrap().status, FireState::Danger);
        assert_eq!(core.hub().stats().published, 2);
    }

    #[tokio::test]
    async fn test_control_triggers_broadcast() {
        let core = FireCore::default();
        ingest(&core, json!({"sensor_1": 1, "sensor_2": 1, "sensor_3": 1})).await;
        let mut sub = core.subscribe(Topic::Device("default".into())).await;
        assert_eq!(sub.recv().await.unwrap().alarm, Alarm::Off);

        let update = core
            .set_command("default", CommandField::TestAlarm, true)
            .await
            .unwrap();
        assert_eq!(update.alarm, Alarm::On);
        assert!(update.commands.test_alarm);

        let event = sub.recv().await.unwrap();
        assert_eq!(event.alarm, Alarm::On);
        assert_eq!(event.status, FireState::Safe);
    }

    #[tokio::test]
    async fn test_mute_silences_fire() {
        let core = FireCore::default();
        ingest(&core, json!({"sensor_1": 0, "sensor_2": 0, "sensor_3": 0})).await;
        let update = core
            .set_command("default", CommandField::MuteAlarm, true)
            .await
            .unwrap();
        assert_eq!(update.status, FireState::Fire);
        assert_eq!(update.alarm, Alarm::Off);

        let out = ingest(&core, json!({"sensor_1": 0, "sensor_2": 0, "sensor_3": 0})).await;
        assert_eq!(out.live.alarm, Alarm::Off);
    }

    #[tokio::test]
    async fn test_disable_reclassifies_last_reading() {
        let core = FireCore::default();
        ingest(&core, json!({"sensor_1": 0, "sensor_2": 1, "sensor_3": 1})).await;
        let update = core
            .set_command("default", CommandField::SensorEnabled(SensorId::One), false)
            .await
            .unwrap();
        assert_eq!(update.status, FireState::Safe);
        assert_eq!(core.live_state("default").await.state, FireState::Safe);
    }

    #[tokio::test]
    async fn test_command_on_unknown_device_registers_it() {
        let core = FireCore::default();
        assert!(!core.is_known("lab").await);
        core.set_command("lab", CommandField::TestAlarm, true)
            .await
            .unwrap();
        assert!(core.is_known("lab").await);
        assert_eq!(core.known_devices().await, vec!["lab".to_string()]);
        assert!(core.commands("lab").await.test_alarm);
    }

    #[tokio::test]
    async fn test_concurrent_ingest_per_device_order() {
        let core = Arc::new(FireCore::default());
        let mut sub = core.subscribe(Topic::All).await;
        sub.recv().await.unwrap();

        let mut handles = Vec::new();
        for device in ["a", "b", "c"] {
            let core = Arc::clone(&core);
            handles.push(tokio::spawn(async move {
                for i in 0..5u16 {
                    let payload = json!({
                        "device_id": device,
                        "sensor_1": 1,
                        "sensor_2": 1,
                        "sensor_3": 1,
                        "raw_1": i,
                    });
                    let normalized = core.normalize(&payload).unwrap();
                    core.ingest(normalized).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut last: std::collections::HashMap<String, u16> = Default::default();
        while let Some(event) = sub.try_recv() {
            let raw = event.raw_1.unwrap();
            if let Some(prev) = last.insert(event.device_id.clone(), raw) {
                assert!(raw > prev);
            }
        }
        assert_eq!(last.len(), 3);
        assert!(last.values().all(|raw| *raw == 4));
    }

    #[tokio::test]
    async fn test_snapshot_larger_than_buffer_survives_next_publish() {
        for overflow in [OverflowPolicy::Disconnect, OverflowPolicy::DropOldest] {
            let core = FireCore::new(CoreConfig {
                hub: HubConfig {
                    subscriber_buffer: 4,
                    overflow,
                },
                ..CoreConfig::default()
            });
            for device in ["a", "b", "c", "d", "e"] {
                ingest(&core, json!({"device_id": device, "sensor_1": 1})).await;
            }

            let mut sub = core.subscribe(Topic::All).await;
            let out = ingest(&core, json!({"device_id": "f", "sensor_1": 0})).await;
            assert_eq!(out.delivered, 1, "{overflow:?}");

            let mut seen = Vec::new();
            while let Some(event) = sub.try_recv() {
                seen.push(event.device_id);
            }
            assert_eq!(seen, ["a", "b", "c", "d", "e", "f"], "{overflow:?}");
            assert!(!sub.is_closed());

            let stats = core.hub().stats();
            assert_eq!(stats.disconnected, 0);
            assert_eq!(stats.dropped, 0);
            assert_eq!(stats.subscribers, 1);
        }
    }

    #[tokio::test]
    async fn test_device_cap_refuses_new_devices() {
        let core = FireCore::new(CoreConfig {
            max_devices: 2,
            ..CoreConfig::default()
        });
        let mut sub = core.subscribe(Topic::All).await;
        sub.recv().await.unwrap();

        ingest(&core, json!({"device_id": "a", "sensor_1": 1})).await;
        core.set_command("b", CommandField::TestAlarm, true)
            .await
            .unwrap();

        let normalized = core
            .normalize(&json!({"device_id": "c", "sensor_1": 0}))
            .unwrap();
        let err = core.ingest(normalized).await.unwrap_err();
        assert_eq!(err, ValidationError::TooManyDevices(2));

        let err = core
            .set_command("d", CommandField::MuteAlarm, true)
            .await
            .unwrap_err();
        assert_eq!(err, ValidationError::TooManyDevices(2));

        // Nothing was published or registered for the refused devices.
        assert_eq!(core.known_devices().await, vec!["a".to_string(), "b".to_string()]);
        assert!(!core.commands("d").await.mute_alarm);
        assert_eq!(sub.recv().await.unwrap().device_id, "a");
        assert_eq!(sub.recv().await.unwrap().device_id, "b");
        assert!(sub.try_recv().is_none());

        // Known devices keep working at the cap.
        let out = ingest(&core, json!({"device_id": "a", "sensor_1": 0})).await;
        assert_eq!(out.live.state, FireState::Warning);
    }
}
