//! Classification and realtime fan-out for fire-sensor readings.
//!
//! The pipeline turns a raw ingestion payload into a canonical reading,
//! classifies it against the operator's command overrides, stores it as the
//! device's live state and publishes it to every connected dashboard.
//!
//! - [`ReadingNormalizer`]: payload validation and encoding detection
//! - [`Classifier`]: state and alarm derivation
//! - [`LiveStateRegister`] / [`CommandRegister`]: per-device registers
//! - [`BroadcastHub`]: per-subscriber bounded fan-out
//! - [`FireCore`]: the service object tying them together
//!
//! Persistence lives in `fireserver-store`; the HTTP and WebSocket surface in
//! `fireserver-service`.
//!
//! # Example
//!
//! ```
//! use fireserver_core::{FireCore, Topic};
//! use fireserver_types::FireState;
//! use serde_json::json;
//!
//! # tokio_test_block_on(async {
//! let core = FireCore::default();
//! let mut dashboard = core.subscribe(Topic::All).await;
//! assert_eq!(dashboard.recv().await.unwrap().status, FireState::Safe);
//!
//! let reading = core.normalize(&json!({"sensor_1": 0, "sensor_2": 1, "sensor_3": 1})).unwrap();
//! let out = core.ingest(reading).await.unwrap();
//! assert_eq!(out.live.state, FireState::Warning);
//! assert_eq!(dashboard.recv().await.unwrap().status, FireState::Warning);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

pub mod classify;
pub mod commands;
pub mod hub;
pub mod live;
pub mod normalize;
pub mod pipeline;

pub use classify::{Classifier, ClassifierConfig, Severity, Verdict, classify, resolve_alarm};
pub use commands::CommandRegister;
pub use hub::{
    BroadcastHub, DEFAULT_SUBSCRIBER_BUFFER, HubConfig, HubStats, OverflowPolicy, Subscription,
    Topic,
};
pub use live::{DEFAULT_MAX_DEVICES, LiveStateRegister};
pub use normalize::{
    DEFAULT_ANALOG_THRESHOLD, Encoding, MAX_DEVICE_ID_LEN, NormalizedReading, NormalizerConfig,
    ReadingNormalizer, validate_device_id,
};
pub use pipeline::{CoreConfig, FireCore, Ingested};
