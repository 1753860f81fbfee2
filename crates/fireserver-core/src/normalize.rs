//! Reading normalization.
//!
//! Turns an ingestion payload into a canonical [`SensorReading`]. Devices in
//! the field send one of three encodings:
//!
//! - **Digital**: `sensor_1..3` carry 0 (fire) or 1 (clear).
//! - **Analog**: `raw_1..3` carry ADC values; a value at or below the
//!   threshold means the sensor sees fire.
//! - **Legacy analog**: ADC values sent directly in `sensor_1..3`. Any value
//!   above 1 switches the whole payload to this encoding.
//!
//! Digital payloads may also carry `raw_1..3` for the audit trail; the raw
//! values are then stored but not used for the flags. A missing sensor is
//! always clear, so absent data never raises an alarm.
//!
//! # Example
//!
//! ```
//! use fireserver_core::{NormalizerConfig, ReadingNormalizer};
//! use serde_json::json;
//!
//! let normalizer = ReadingNormalizer::new(NormalizerConfig::default());
//! let normalized = normalizer
//!     .normalize(&json!({"sensor_1": 40, "sensor_2": 700, "sensor_3": 650}))
//!     .unwrap();
//! assert_eq!(normalized.reading.flags(), [0, 1, 1]);
//! assert_eq!(normalized.reading.raw_1, Some(40));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::warn;

use fireserver_types::{
    CLEAR, DEFAULT_DEVICE_ID, FireState, SENSOR_COUNT, SensorReading, TRIGGERED, ValidationError,
    ValidationResult,
};

/// Default analog threshold: readings at or below it mean fire.
pub const DEFAULT_ANALOG_THRESHOLD: u16 = 100;

/// Longest accepted device identifier.
pub const MAX_DEVICE_ID_LEN: usize = 64;

const SENSOR_FIELDS: [&str; SENSOR_COUNT] = ["sensor_1", "sensor_2", "sensor_3"];
const RAW_FIELDS: [&str; SENSOR_COUNT] = ["raw_1", "raw_2", "raw_3"];

/// Normalizer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Analog value at or below which a sensor counts as triggered.
    pub analog_threshold: u16,
    /// Device id used when the payload carries none.
    pub default_device: String,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            analog_threshold: DEFAULT_ANALOG_THRESHOLD,
            default_device: DEFAULT_DEVICE_ID.to_string(),
        }
    }
}

/// How the flags of a payload were derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    Digital,
    Analog,
    LegacyAnalog,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Digital => f.write_str("digital"),
            Encoding::Analog => f.write_str("analog"),
            Encoding::LegacyAnalog => f.write_str("legacy-analog"),
        }
    }
}

/// Output of the normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedReading {
    pub reading: SensorReading,
    /// Recognized state label sent by the device, if any.
    pub reported_state: Option<FireState>,
    pub encoding: Encoding,
}

/// Strict payload validator producing typed readings.
#[derive(Debug, Clone, Default)]
pub struct ReadingNormalizer {
    config: NormalizerConfig,
}

impl ReadingNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Validate a payload and derive its canonical reading.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when the payload is not an object, a
    /// sensor value is not a non-negative integer, the device id is
    /// malformed, the state field is not a string, or analog values are
    /// supplied in both `sensor_N` and `raw_N`.
    pub fn normalize(&self, payload: &Value) -> ValidationResult<NormalizedReading> {
        let obj = payload
            .as_object()
            .ok_or_else(|| ValidationError::NotAnObject(json_type(payload)))?;

        let device_id = self.device_id(obj)?;
        let sensors = read_fields(obj, SENSOR_FIELDS)?;
        let raws = read_fields(obj, RAW_FIELDS)?;
        let reported_state = reported_state(obj, &device_id)?;

        let sensors_present = sensors.iter().any(Option::is_some);
        let sensors_analog = sensors.iter().flatten().any(|v| *v > u16::from(CLEAR));
        let raws_present = raws.iter().any(Option::is_some);

        let (flags, raw, encoding) = if sensors_analog {
            if raws_present {
                return Err(ValidationError::AmbiguousEncoding);
            }
            (sensors.map(|v| self.threshold(v)), sensors, Encoding::LegacyAnalog)
        } else if sensors_present || !raws_present {
            let flags = sensors.map(|v| v.map_or(CLEAR, |v| v as u8));
            (flags, raws, Encoding::Digital)
        } else {
            (raws.map(|v| self.threshold(v)), raws, Encoding::Analog)
        };

        Ok(NormalizedReading {
            reading: SensorReading::from_flags(device_id, flags).with_raw(raw),
            reported_state,
            encoding,
        })
    }

    fn threshold(&self, value: Option<u16>) -> u8 {
        match value {
            Some(v) if v <= self.config.analog_threshold => TRIGGERED,
            _ => CLEAR,
        }
    }

    fn device_id(&self, obj: &Map<String, Value>) -> ValidationResult<String> {
        match obj.get("device_id") {
            None | Some(Value::Null) => Ok(self.config.default_device.clone()),
            Some(Value::String(id)) => validate_device_id(id).map(str::to_string),
            Some(_) => Err(ValidationError::NotAString("device_id")),
        }
    }
}

/// Check a device identifier and return it trimmed.
pub fn validate_device_id(id: &str) -> ValidationResult<&str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ValidationError::InvalidDeviceId(
            "device id cannot be empty".to_string(),
        ));
    }
    if id.chars().count() > MAX_DEVICE_ID_LEN {
        return Err(ValidationError::InvalidDeviceId(format!(
            "device id longer than {} characters",
            MAX_DEVICE_ID_LEN
        )));
    }
    if id.chars().any(char::is_control) {
        return Err(ValidationError::InvalidDeviceId(
            "device id contains control characters".to_string(),
        ));
    }
    Ok(id)
}

fn read_fields(
    obj: &Map<String, Value>,
    fields: [&'static str; SENSOR_COUNT],
) -> ValidationResult<[Option<u16>; SENSOR_COUNT]> {
    Ok([
        read_value(obj, fields[0])?,
        read_value(obj, fields[1])?,
        read_value(obj, fields[2])?,
    ])
}

fn read_value(obj: &Map<String, Value>, field: &'static str) -> ValidationResult<Option<u16>> {
    let invalid = |reason: String| ValidationError::InvalidNumber { field, reason };

    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => number_to_u16(n)
            .map(Some)
            .ok_or_else(|| invalid(format!("{} is not an integer in 0-65535", n))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|e| invalid(format!("{:?}: {}", s, e))),
        Some(other) => Err(invalid(format!("expected a number, got {}", json_type(other)))),
    }
}

fn number_to_u16(n: &Number) -> Option<u16> {
    if let Some(v) = n.as_u64() {
        return u16::try_from(v).ok();
    }
    // Some firmware serializes integers as floats (512.0).
    n.as_f64()
        .filter(|f| f.fract() == 0.0 && (0.0..=f64::from(u16::MAX)).contains(f))
        .map(|f| f as u16)
}

fn reported_state(obj: &Map<String, Value>, device_id: &str) -> ValidationResult<Option<FireState>> {
    let (field, value) = match (obj.get("state"), obj.get("status")) {
        (Some(v), _) if !v.is_null() => ("state", v),
        (_, Some(v)) if !v.is_null() => ("status", v),
        _ => return Ok(None),
    };

    let Value::String(label) = value else {
        return Err(ValidationError::NotAString(field));
    };

    let state = FireState::from_label(label);
    if state.is_none() {
        warn!(device_id = %device_id, label = %label, "Ignoring unrecognized fire state label");
    }
    Ok(state)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
