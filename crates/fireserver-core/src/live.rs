//! Live state register.
//!
//! Holds the latest [`LiveState`] per device so a dashboard that connects
//! now can be shown the current situation without replaying history. The
//! register is a cache and starts empty on every process start.
//!
//! The number of devices is capped; once full, unknown device ids are
//! rejected while known ones keep updating.

use std::collections::HashMap;

use fireserver_types::{LiveState, ValidationError, ValidationResult};

/// Default cap on distinct devices.
pub const DEFAULT_MAX_DEVICES: usize = 1024;

/// Latest known state per device.
#[derive(Debug)]
pub struct LiveStateRegister {
    states: HashMap<String, LiveState>,
    max_devices: usize,
}

impl Default for LiveStateRegister {
    fn default() -> Self {
        Self::with_max_devices(DEFAULT_MAX_DEVICES)
    }
}

impl LiveStateRegister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_devices(max_devices: usize) -> Self {
        Self {
            states: HashMap::new(),
            max_devices,
        }
    }

    pub fn max_devices(&self) -> usize {
        self.max_devices
    }

    /// Check that the device is already known or that there is room for it.
    pub fn admit(&self, device_id: &str) -> ValidationResult<()> {
        if self.states.contains_key(device_id) || self.states.len() < self.max_devices {
            Ok(())
        } else {
            Err(ValidationError::TooManyDevices(self.max_devices))
        }
    }

    /// Replace the entry for the state's device.
    pub fn update(&mut self, state: LiveState) -> ValidationResult<()> {
        self.admit(state.device_id())?;
        self.states.insert(state.device_id().to_string(), state);
        Ok(())
    }

    /// Current state of a device, or the default safe state if it never reported.
    #[must_use]
    pub fn get(&self, device_id: &str) -> LiveState {
        self.states
            .get(device_id)
            .cloned()
            .unwrap_or_else(|| LiveState::default_safe(device_id))
    }

    /// Whether the device has reported since start.
    #[must_use]
    pub fn contains(&self, device_id: &str) -> bool {
        self.states.contains_key(device_id)
    }

    /// Known device ids, sorted.
    #[must_use]
    pub fn devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self.states.keys().cloned().collect();
        devices.sort();
        devices
    }

    /// Every known state, sorted by device id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LiveState> {
        let mut states: Vec<LiveState> = self.states.values().cloned().collect();
        states.sort_by(|a, b| a.device_id().cmp(b.device_id()));
        states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
