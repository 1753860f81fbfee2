//! Error types for payload validation in fireserver-types.

use thiserror::Error;

/// Reasons an ingestion payload or operator input is rejected.
///
/// A rejected payload is never persisted and never broadcast.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ValidationError {
    /// The payload is not a JSON object.
    #[error("Payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// A numeric field is missing its value or cannot be parsed.
    #[error("Field `{field}` is not a valid sensor value: {reason}")]
    InvalidNumber { field: &'static str, reason: String },

    /// A field that must be a string has another JSON type.
    #[error("Field `{0}` must be a string")]
    NotAString(&'static str),

    /// The device identifier is empty or too long.
    #[error("Invalid device id: {0}")]
    InvalidDeviceId(String),

    /// Analog values were supplied both in `sensor_N` and in `raw_N`.
    #[error("Ambiguous payload: analog values supplied in both sensor_N and raw_N fields")]
    AmbiguousEncoding,

    /// A state label is not part of the fire-state taxonomy.
    #[error("Unknown fire state: {0}")]
    UnknownState(String),

    /// A sensor index outside 1..=3.
    #[error("Unknown sensor {0} (expected 1-3)")]
    UnknownSensor(u8),

    /// A new device id arrived while the device registers are full.
    #[error("Device limit of {0} reached, new device ids are rejected")]
    TooManyDevices(usize),
}

/// Result type alias using fireserver-types' ValidationError type.
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;
