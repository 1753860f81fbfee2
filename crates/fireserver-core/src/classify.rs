//! Fire-state classification and alarm policy.
//!
//! Classification is a pure function of the digital flags and the enable
//! mask from the command register. A sensor that an operator disabled is
//! left out of the evaluation entirely.
//!
//! | triggered (of enabled) | state |
//! |------------------------|-------|
//! | 0 | `Safe` |
//! | all enabled | `Fire` |
//! | 1 | `Warning` |
//! | 2 | `Danger` |
//!
//! With a single enabled sensor one trigger is already `Fire`.
//!
//! # Example
//!
//! ```
//! use fireserver_core::classify;
//! use fireserver_types::FireState;
//!
//! assert_eq!(classify([1, 1, 1], [true; 3]), FireState::Safe);
//! assert_eq!(classify([0, 1, 1], [true; 3]), FireState::Warning);
//! assert_eq!(classify([0, 0, 1], [true; 3]), FireState::Danger);
//! assert_eq!(classify([0, 0, 0], [true; 3]), FireState::Fire);
//!
//! // A disabled sensor does not count.
//! assert_eq!(classify([0, 1, 1], [false, true, true]), FireState::Safe);
//! ```

use serde::{Deserialize, Serialize};

use fireserver_types::{Alarm, CommandState, FireState, SENSOR_COUNT, SensorReading, TRIGGERED};

/// Severity taxonomy in use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// `Safe`, `Warning`, `Danger`, `Fire`.
    #[default]
    FourLevel,
    /// `Safe`, `Warning`, `Fire`; two triggered sensors stay at `Warning`.
    ThreeLevel,
}

/// Classifier settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub severity: Severity,
    /// When false the mute override is stored but has no effect on the alarm.
    pub honor_mute: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            severity: Severity::FourLevel,
            honor_mute: true,
        }
    }
}

/// Result of evaluating one reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub state: FireState,
    pub alarm: Alarm,
}

/// Map digital flags to a fire state, counting only enabled sensors.
#[must_use]
pub fn classify(flags: [u8; SENSOR_COUNT], enabled: [bool; SENSOR_COUNT]) -> FireState {
    let enabled_count = enabled.iter().filter(|e| **e).count();
    let triggered = flags
        .iter()
        .zip(enabled)
        .filter(|(flag, on)| *on && **flag == TRIGGERED)
        .count();

    match triggered {
        0 => FireState::Safe,
        t if t >= enabled_count => FireState::Fire,
        1 => FireState::Warning,
        _ => FireState::Danger,
    }
}

/// Combine a state with the operator overrides.
///
/// Mute wins over everything, a test forces the buzzer on, otherwise the
/// buzzer follows the state.
#[must_use]
pub fn resolve_alarm(state: FireState, commands: &CommandState, honor_mute: bool) -> Alarm {
    if honor_mute && commands.mute_alarm {
        Alarm::Off
    } else if commands.test_alarm {
        Alarm::On
    } else {
        Alarm::from(!state.is_safe())
    }
}

/// Configured classifier.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify a reading.
    ///
    /// A recognized state reported by the device is returned unchanged; the
    /// firmware may debounce or filter in ways the server cannot see.
    #[must_use]
    pub fn classify(
        &self,
        reading: &SensorReading,
        commands: &CommandState,
        reported: Option<FireState>,
    ) -> FireState {
        if let Some(state) = reported {
            return state;
        }
        let state = classify(reading.flags(), commands.enabled());
        match self.config.severity {
            Severity::FourLevel => state,
            Severity::ThreeLevel => state.three_level(),
        }
    }

    /// Classify a reading and resolve the alarm output.
    #[must_use]
    pub fn evaluate(
        &self,
        reading: &SensorReading,
        commands: &CommandState,
        reported: Option<FireState>,
    ) -> Verdict {
        let state = self.classify(reading, commands, reported);
        Verdict {
            state,
            alarm: resolve_alarm(state, commands, self.config.honor_mute),
        }
    }
}
