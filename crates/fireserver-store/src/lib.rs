//! History persistence for fire-sensor readings.
//!
//! This crate provides an append-only SQLite table of classified readings.
//! The table is the source of truth for what happened; the live registers
//! in `fireserver-core` are only caches.
//!
//! # Features
//!
//! - Append a classified reading, returning its row id
//! - Query newest-first with device, time range and pagination filters
//! - Count records per device
//!
//! # Example
//!
//! ```
//! use fireserver_store::{HistoryQuery, NewHistoryEntry, Store};
//! use fireserver_types::{Alarm, FireState, SensorReading};
//!
//! let store = Store::open_in_memory()?;
//! let reading = SensorReading::from_flags("kitchen", [0, 1, 1]);
//! store.append(&NewHistoryEntry::new(reading, FireState::Warning, Alarm::On))?;
//!
//! let newest = store.recent(&HistoryQuery::new().device("kitchen").limit(1))?;
//! assert_eq!(newest[0].state, FireState::Warning);
//! # Ok::<(), fireserver_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::NewHistoryEntry;
pub use queries::HistoryQuery;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/fireserver/history.db`
/// - macOS: `~/Library/Application Support/fireserver/history.db`
/// - Windows: `C:\Users\<user>\AppData\Local\fireserver\history.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("fireserver")
        .join("history.db")
}
