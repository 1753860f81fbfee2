//! Core types for fire-sensor data.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ValidationError;

/// Identifier used when a payload does not name its device.
pub const DEFAULT_DEVICE_ID: &str = "default";

/// Number of flame sensors on a device.
pub const SENSOR_COUNT: usize = 3;

/// Digital flag value of a sensor that sees fire.
pub const TRIGGERED: u8 = 0;

/// Digital flag value of a sensor that sees nothing.
pub const CLEAR: u8 = 1;

/// One of the three flame sensors of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SensorId {
    One,
    Two,
    Three,
}

impl SensorId {
    /// Zero-based position of this sensor.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            SensorId::One => 0,
            SensorId::Two => 1,
            SensorId::Three => 2,
        }
    }

    /// One-based number as printed on the device (`sensor_1`).
    #[must_use]
    pub fn number(self) -> u8 {
        self.index() as u8 + 1
    }
}

impl TryFrom<u8> for SensorId {
    type Error = ValidationError;

    /// Convert a one-based sensor number to a `SensorId`.
    ///
    /// # Examples
    ///
    /// ```
    /// use fireserver_types::SensorId;
    ///
    /// assert_eq!(SensorId::try_from(1), Ok(SensorId::One));
    /// assert!(SensorId::try_from(4).is_err());
    /// ```
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SensorId::One),
            2 => Ok(SensorId::Two),
            3 => Ok(SensorId::Three),
            _ => Err(ValidationError::UnknownSensor(value)),
        }
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sensor_{}", self.number())
    }
}

/// Fire-risk state of a device.
///
/// # Ordering
///
/// States are ordered by severity: `Safe < Warning < Danger < Fire`, so
/// comparisons like `state >= FireState::Warning` read naturally.
///
/// # Labels
///
/// Serialization uses the labels the device firmware and dashboards speak
/// (`Aman`, `Bahaya`, `Peringatan`, `Kebakaran`). Parsing also accepts the
/// English names, case-insensitively.
///
/// ```
/// use fireserver_types::FireState;
///
/// assert_eq!(FireState::Warning.label(), "Bahaya");
/// assert_eq!("kebakaran".parse::<FireState>(), Ok(FireState::Fire));
/// assert_eq!("Danger".parse::<FireState>(), Ok(FireState::Danger));
/// assert!(FireState::Fire > FireState::Danger);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FireState {
    /// No sensor sees fire.
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "Aman", alias = "Safe"))]
    Safe,
    /// One sensor sees fire.
    #[cfg_attr(feature = "serde", serde(rename = "Bahaya", alias = "Warning"))]
    Warning,
    /// Two sensors see fire.
    #[cfg_attr(feature = "serde", serde(rename = "Peringatan", alias = "Danger"))]
    Danger,
    /// Every enabled sensor sees fire.
    #[cfg_attr(feature = "serde", serde(rename = "Kebakaran", alias = "Fire"))]
    Fire,
}

impl FireState {
    /// Label used on the wire.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            FireState::Safe => "Aman",
            FireState::Warning => "Bahaya",
            FireState::Danger => "Peringatan",
            FireState::Fire => "Kebakaran",
        }
    }

    /// English name of the state.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            FireState::Safe => "Safe",
            FireState::Warning => "Warning",
            FireState::Danger => "Danger",
            FireState::Fire => "Fire",
        }
    }

    /// Match a label or English name, ignoring case and surrounding whitespace.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        [
            FireState::Safe,
            FireState::Warning,
            FireState::Danger,
            FireState::Fire,
        ]
        .into_iter()
        .find(|s| s.label().eq_ignore_ascii_case(label) || s.name().eq_ignore_ascii_case(label))
    }

    /// Whether this is the quiet state.
    #[must_use]
    pub fn is_safe(self) -> bool {
        self == FireState::Safe
    }

    /// Collapse into the three-level taxonomy, which has no `Danger` tier.
    #[must_use]
    pub fn three_level(self) -> Self {
        match self {
            FireState::Danger => FireState::Warning,
            other => other,
        }
    }
}

impl FromStr for FireState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FireState::from_label(s).ok_or_else(|| ValidationError::UnknownState(s.to_string()))
    }
}

impl fmt::Display for FireState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Alarm output (buzzer) of a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum Alarm {
    On,
    #[default]
    Off,
}

impl Alarm {
    /// Label used on the wire (`ON` / `OFF`).
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Alarm::On => "ON",
            Alarm::Off => "OFF",
        }
    }

    /// Parse a wire label, ignoring case.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        if label.eq_ignore_ascii_case("ON") {
            Some(Alarm::On)
        } else if label.eq_ignore_ascii_case("OFF") {
            Some(Alarm::Off)
        } else {
            None
        }
    }
}

impl From<bool> for Alarm {
    fn from(on: bool) -> Self {
        if on { Alarm::On } else { Alarm::Off }
    }
}

impl fmt::Display for Alarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Canonical sensor reading produced by the normalizer.
///
/// Flags follow the device convention: [`TRIGGERED`] (0) means the sensor
/// sees fire, [`CLEAR`] (1) means it does not. Raw analog values are kept
/// for the history record only and never influence classification once the
/// flags are derived.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorReading {
    /// Device that produced the reading.
    pub device_id: String,
    pub sensor_1: u8,
    pub sensor_2: u8,
    pub sensor_3: u8,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub raw_1: Option<u16>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub raw_2: Option<u16>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub raw_3: Option<u16>,
}

impl SensorReading {
    /// A reading with every sensor clear.
    pub fn clear(device_id: impl Into<String>) -> Self {
        Self::from_flags(device_id, [CLEAR; SENSOR_COUNT])
    }

    /// Build a reading from digital flags. Any non-zero flag counts as clear.
    pub fn from_flags(device_id: impl Into<String>, flags: [u8; SENSOR_COUNT]) -> Self {
        let flag = |v: u8| if v == TRIGGERED { TRIGGERED } else { CLEAR };
        Self {
            device_id: device_id.into(),
            sensor_1: flag(flags[0]),
            sensor_2: flag(flags[1]),
            sensor_3: flag(flags[2]),
            raw_1: None,
            raw_2: None,
            raw_3: None,
        }
    }

    /// Attach raw analog values for the audit trail.
    #[must_use]
    pub fn with_raw(mut self, raw: [Option<u16>; SENSOR_COUNT]) -> Self {
        self.raw_1 = raw[0];
        self.raw_2 = raw[1];
        self.raw_3 = raw[2];
        self
    }

    /// Digital flags in sensor order.
    #[must_use]
    pub fn flags(&self) -> [u8; SENSOR_COUNT] {
        [self.sensor_1, self.sensor_2, self.sensor_3]
    }

    /// Raw analog values in sensor order.
    #[must_use]
    pub fn raw(&self) -> [Option<u16>; SENSOR_COUNT] {
        [self.raw_1, self.raw_2, self.raw_3]
    }

    #[must_use]
    pub fn is_triggered(&self, sensor: SensorId) -> bool {
        self.flags()[sensor.index()] == TRIGGERED
    }
}

/// Operator overrides for one device.
///
/// Field names on the wire match what the firmware reads back from the
/// ingestion response (`sensor1_enabled`, `test_alarm`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CommandState {
    #[cfg_attr(feature = "serde", serde(rename = "sensor1_enabled"))]
    pub sensor_1_enabled: bool,
    #[cfg_attr(feature = "serde", serde(rename = "sensor2_enabled"))]
    pub sensor_2_enabled: bool,
    #[cfg_attr(feature = "serde", serde(rename = "sensor3_enabled"))]
    pub sensor_3_enabled: bool,
    /// Force the buzzer on for a test.
    pub test_alarm: bool,
    /// Silence the buzzer.
    pub mute_alarm: bool,
}

impl Default for CommandState {
    fn default() -> Self {
        Self {
            sensor_1_enabled: true,
            sensor_2_enabled: true,
            sensor_3_enabled: true,
            test_alarm: false,
            mute_alarm: false,
        }
    }
}

impl CommandState {
    #[must_use]
    pub fn is_enabled(&self, sensor: SensorId) -> bool {
        self.enabled()[sensor.index()]
    }

    /// Enable flags in sensor order.
    #[must_use]
    pub fn enabled(&self) -> [bool; SENSOR_COUNT] {
        [
            self.sensor_1_enabled,
            self.sensor_2_enabled,
            self.sensor_3_enabled,
        ]
    }

    /// Apply a single field change.
    pub fn apply(&mut self, field: CommandField, value: bool) {
        match field {
            CommandField::SensorEnabled(SensorId::One) => self.sensor_1_enabled = value,
            CommandField::SensorEnabled(SensorId::Two) => self.sensor_2_enabled = value,
            CommandField::SensorEnabled(SensorId::Three) => self.sensor_3_enabled = value,
            CommandField::TestAlarm => self.test_alarm = value,
            CommandField::MuteAlarm => self.mute_alarm = value,
        }
    }
}

/// A settable field of [`CommandState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandField {
    SensorEnabled(SensorId),
    TestAlarm,
    MuteAlarm,
}

impl fmt::Display for CommandField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandField::SensorEnabled(sensor) => write!(f, "sensor{}_enabled", sensor.number()),
            CommandField::TestAlarm => f.write_str("test_alarm"),
            CommandField::MuteAlarm => f.write_str("mute_alarm"),
        }
    }
}

/// Latest known state of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LiveState {
    pub reading: SensorReading,
    /// State the device computed itself, when it sent a recognized one.
    pub reported_state: Option<FireState>,
    pub state: FireState,
    pub alarm: Alarm,
    /// `None` until the first ingestion for this device.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339::option"))]
    pub last_updated: Option<OffsetDateTime>,
}

impl LiveState {
    /// The state served for a device that has never reported.
    pub fn default_safe(device_id: impl Into<String>) -> Self {
        Self {
            reading: SensorReading::clear(device_id),
            reported_state: None,
            state: FireState::Safe,
            alarm: Alarm::Off,
            last_updated: None,
        }
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.reading.device_id
    }
}

/// The shape shared by the ingestion response and the realtime
/// `flame_update` event.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FlameUpdate {
    pub device_id: String,
    pub status: FireState,
    pub alarm: Alarm,
    pub sensor_1: u8,
    pub sensor_2: u8,
    pub sensor_3: u8,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub raw_1: Option<u16>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub raw_2: Option<u16>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub raw_3: Option<u16>,
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub commands: CommandState,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339::option"))]
    pub updated_at: Option<OffsetDateTime>,
}

impl FlameUpdate {
    /// Combine a live state with the command snapshot it was computed under.
    pub fn new(live: &LiveState, commands: CommandState) -> Self {
        let reading = &live.reading;
        Self {
            device_id: reading.device_id.clone(),
            status: live.state,
            alarm: live.alarm,
            sensor_1: reading.sensor_1,
            sensor_2: reading.sensor_2,
            sensor_3: reading.sensor_3,
            raw_1: reading.raw_1,
            raw_2: reading.raw_2,
            raw_3: reading.raw_3,
            commands,
            updated_at: live.last_updated,
        }
    }
}

/// An immutable history row.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HistoryRecord {
    /// Monotonic row id.
    pub id: i64,
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub reading: SensorReading,
    #[cfg_attr(feature = "serde", serde(rename = "status"))]
    pub state: FireState,
    pub alarm: Alarm,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub created_at: OffsetDateTime,
}
