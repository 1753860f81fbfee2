//! Row models.

use time::OffsetDateTime;

use fireserver_types::{Alarm, FireState, SensorReading};

/// A classified reading ready to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryEntry {
    pub reading: SensorReading,
    pub state: FireState,
    pub alarm: Alarm,
    pub created_at: OffsetDateTime,
}

impl NewHistoryEntry {
    /// Entry stamped with the current time.
    pub fn new(reading: SensorReading, state: FireState, alarm: Alarm) -> Self {
        Self {
            reading,
            state,
            alarm,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn at(mut self, created_at: OffsetDateTime) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn device_id(&self) -> &str {
        &self.reading.device_id
    }
}
