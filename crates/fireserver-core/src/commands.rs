//! Command register.
//!
//! Operator overrides per device. Devices read them back on their next
//! poll or in the ingestion response; enable flags take effect on the next
//! classification.

use std::collections::HashMap;

use fireserver_types::{CommandField, CommandState};

/// Operator overrides per device.
#[derive(Debug, Default)]
pub struct CommandRegister {
    commands: HashMap<String, CommandState>,
}

impl CommandRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one field and return the resulting state.
    pub fn set(&mut self, device_id: &str, field: CommandField, value: bool) -> CommandState {
        let commands = self.commands.entry(device_id.to_string()).or_default();
        commands.apply(field, value);
        *commands
    }

    /// Overrides for a device; defaults when none were ever set.
    #[must_use]
    pub fn get(&self, device_id: &str) -> CommandState {
        self.commands.get(device_id).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fireserver_types::SensorId;

    #[test]
    fn test_get_defaults() {
        let register = CommandRegister::new();
        assert_eq!(register.get("any"), CommandState::default());
    }

    #[test]
    fn test_set_returns_new_state() {
        let mut register = CommandRegister::new();
        let state = register.set("dev", CommandField::SensorEnabled(SensorId::Three), false);
        assert!(!state.sensor_3_enabled);
        assert_eq!(register.get("dev"), state);

        // Test and mute are stored independently.
        register.set("dev", CommandField::TestAlarm, true);
        let state = register.set("dev", CommandField::MuteAlarm, true);
        assert!(state.test_alarm);
        assert!(state.mute_alarm);
        assert!(!state.sensor_3_enabled);
    }

    #[test]
    fn test_devices_are_independent() {
        let mut register = CommandRegister::new();
        register.set("a", CommandField::TestAlarm, true);
        assert!(register.get("a").test_alarm);
        assert!(!register.get("b").test_alarm);
    }
}
