//! Domain types for fire-sensor readings.
//!
//! This crate provides the types shared by the classification pipeline
//! (fireserver-core), the history store (fireserver-store) and the HTTP
//! service (fireserver-service).
//!
//! # Features
//!
//! - Canonical [`SensorReading`] with three digital flags and optional raw values
//! - [`FireState`] taxonomy ordered by severity
//! - Operator [`CommandState`] and the [`LiveState`] register entry
//! - The [`FlameUpdate`] shape broadcast to dashboards
//!
//! # Example
//!
//! ```
//! use fireserver_types::{FireState, SensorReading, SensorId};
//!
//! let reading = SensorReading::from_flags("kitchen", [0, 1, 1]);
//! assert!(reading.is_triggered(SensorId::One));
//! assert_eq!(FireState::Warning.label(), "Bahaya");
//! ```

pub mod error;
pub mod types;

pub use error::{ValidationError, ValidationResult};
pub use types::{
    Alarm, CLEAR, CommandField, CommandState, DEFAULT_DEVICE_ID, FireState, FlameUpdate,
    HistoryRecord, LiveState, SENSOR_COUNT, SensorId, SensorReading, TRIGGERED,
};

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    // --- FireState tests ---

    #[test]
    fn test_fire_state_ordering() {
        assert!(FireState::Safe < FireState::Warning);
        assert!(FireState::Warning < FireState::Danger);
        assert!(FireState::Danger < FireState::Fire);
    }

    #[test]
    fn test_fire_state_labels_round_trip() {
        for state in [
            FireState::Safe,
            FireState::Warning,
            FireState::Danger,
            FireState::Fire,
        ] {
            assert_eq!(FireState::from_label(state.label()), Some(state));
            assert_eq!(FireState::from_label(state.name()), Some(state));
        }
    }

    #[test]
    fn test_fire_state_from_label_case_insensitive() {
        assert_eq!(FireState::from_label("AMAN"), Some(FireState::Safe));
        assert_eq!(FireState::from_label("  bahaya "), Some(FireState::Warning));
        assert_eq!(FireState::from_label("peringatan"), Some(FireState::Danger));
        assert_eq!(FireState::from_label("fire"), Some(FireState::Fire));
        assert_eq!(FireState::from_label("smoke"), None);
        assert_eq!(FireState::from_label(""), None);
    }

    #[test]
    fn test_fire_state_from_str_error() {
        let err = "unknown".parse::<FireState>().unwrap_err();
        assert_eq!(err, ValidationError::UnknownState("unknown".to_string()));
        assert!(err.to_string().contains("unknown"));
    }

    #[test]
    fn test_fire_state_three_level() {
        assert_eq!(FireState::Safe.three_level(), FireState::Safe);
        assert_eq!(FireState::Warning.three_level(), FireState::Warning);
        assert_eq!(FireState::Danger.three_level(), FireState::Warning);
        assert_eq!(FireState::Fire.three_level(), FireState::Fire);
    }

    #[test]
    fn test_fire_state_serialization() {
        assert_eq!(serde_json::to_string(&FireState::Safe).unwrap(), "\"Aman\"");
        assert_eq!(
            serde_json::to_string(&FireState::Danger).unwrap(),
            "\"Peringatan\""
        );
        let parsed: FireState = serde_json::from_str("\"Fire\"").unwrap();
        assert_eq!(parsed, FireState::Fire);
        let parsed: FireState = serde_json::from_str("\"Kebakaran\"").unwrap();
        assert_eq!(parsed, FireState::Fire);
    }

    // --- Alarm tests ---

    #[test]
    fn test_alarm_serialization() {
        assert_eq!(serde_json::to_string(&Alarm::On).unwrap(), "\"ON\"");
        assert_eq!(serde_json::to_string(&Alarm::Off).unwrap(), "\"OFF\"");
        assert_eq!(Alarm::from(true), Alarm::On);
        assert_eq!(Alarm::from_label("off"), Some(Alarm::Off));
        assert_eq!(Alarm::from_label("maybe"), None);
    }

    // --- SensorId tests ---

    #[test]
    fn test_sensor_id_conversions() {
        for (n, id) in [(1u8, SensorId::One), (2, SensorId::Two), (3, SensorId::Three)] {
            assert_eq!(SensorId::try_from(n), Ok(id));
            assert_eq!(id.number(), n);
        }
        assert_eq!(SensorId::try_from(0), Err(ValidationError::UnknownSensor(0)));
        assert_eq!(SensorId::Two.to_string(), "sensor_2");
    }

    // --- SensorReading tests ---

    #[test]
    fn test_sensor_reading_from_flags_normalizes_non_zero() {
        let reading = SensorReading::from_flags("dev", [0, 7, 1]);
        assert_eq!(reading.flags(), [TRIGGERED, CLEAR, CLEAR]);
        assert!(reading.is_triggered(SensorId::One));
        assert!(!reading.is_triggered(SensorId::Two));
    }

    #[test]
    fn test_sensor_reading_serialization_skips_missing_raw() {
        let reading = SensorReading::from_flags("dev", [0, 1, 1]);
        let json = serde_json::to_string(&reading).unwrap();
        assert!(json.contains("\"sensor_1\":0"));
        assert!(!json.contains("raw_1"));

        let reading = reading.with_raw([Some(40), None, Some(800)]);
        let json = serde_json::to_string(&reading).unwrap();
        assert!(json.contains("\"raw_1\":40"));
        assert!(json.contains("\"raw_3\":800"));
        assert!(!json.contains("raw_2"));
    }

    // --- CommandState tests ---

    #[test]
    fn test_command_state_default() {
        let commands = CommandState::default();
        assert_eq!(commands.enabled(), [true, true, true]);
        assert!(!commands.test_alarm);
        assert!(!commands.mute_alarm);
    }

    #[test]
    fn test_command_state_apply() {
        let mut commands = CommandState::default();
        commands.apply(CommandField::SensorEnabled(SensorId::Two), false);
        commands.apply(CommandField::TestAlarm, true);
        assert!(!commands.is_enabled(SensorId::Two));
        assert!(commands.is_enabled(SensorId::One));
        assert!(commands.test_alarm);

        commands.apply(CommandField::MuteAlarm, true);
        assert!(commands.mute_alarm);
    }

    #[test]
    fn test_command_state_wire_names() {
        let json = serde_json::to_string(&CommandState::default()).unwrap();
        assert!(json.contains("\"sensor1_enabled\":true"));
        assert!(json.contains("\"sensor3_enabled\":true"));
        assert!(json.contains("\"mute_alarm\":false"));
        assert_eq!(
            CommandField::SensorEnabled(SensorId::Three).to_string(),
            "sensor3_enabled"
        );
    }

    // --- LiveState / FlameUpdate tests ---

    #[test]
    fn test_live_state_default_safe() {
        let live = LiveState::default_safe("lab");
        assert_eq!(live.device_id(), "lab");
        assert_eq!(live.state, FireState::Safe);
        assert_eq!(live.alarm, Alarm::Off);
        assert_eq!(live.reading.flags(), [CLEAR; SENSOR_COUNT]);
        assert!(live.last_updated.is_none());
    }

    #[test]
    fn test_flame_update_shape() {
        let live = LiveState {
            reading: SensorReading::from_flags("lab", [0, 1, 1]),
            reported_state: None,
            state: FireState::Warning,
            alarm: Alarm::On,
            last_updated: Some(OffsetDateTime::UNIX_EPOCH),
        };
        let update = FlameUpdate::new(&live, CommandState::default());
        let json: serde_json::Value = serde_json::to_value(&update).unwrap();

        assert_eq!(json["device_id"], "lab");
        assert_eq!(json["status"], "Bahaya");
        assert_eq!(json["alarm"], "ON");
        assert_eq!(json["sensor_1"], 0);
        assert_eq!(json["sensor2_enabled"], true);
        assert_eq!(json["test_alarm"], false);
        assert_eq!(json["updated_at"], "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_history_record_serialization() {
        let record = HistoryRecord {
            id: 42,
            reading: SensorReading::from_flags("lab", [0, 0, 0]),
            state: FireState::Fire,
            alarm: Alarm::On,
            created_at: OffsetDateTime::UNIX_EPOCH,
        };
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], 42);
        assert_eq!(json["device_id"], "lab");
        assert_eq!(json["status"], "Kebakaran");
        assert_eq!(json["sensor_3"], 0);
        assert!(json["created_at"].is_string());
    }
}
