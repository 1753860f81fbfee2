//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fireserver_core::{
    ClassifierConfig, CoreConfig, DEFAULT_ANALOG_THRESHOLD, DEFAULT_MAX_DEVICES,
    DEFAULT_SUBSCRIBER_BUFFER, HubConfig, NormalizerConfig, OverflowPolicy, Severity,
    validate_device_id,
};
use fireserver_types::DEFAULT_DEVICE_ID;

/// Upper bound for the per-subscriber buffer.
pub const MAX_SUBSCRIBER_BUFFER: usize = 10_000;
/// Upper bound for the persistence write timeout (1 minute).
pub const MAX_WRITE_TIMEOUT_MS: u64 = 60_000;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device id used when a payload or control request names none.
    pub default_device: String,
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// History write queue settings.
    pub persistence: PersistenceConfig,
    /// Classification settings.
    pub classifier: ClassifierSection,
    /// History endpoint settings.
    pub history: HistoryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_device: DEFAULT_DEVICE_ID.to_string(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            persistence: PersistenceConfig::default(),
            classifier: ClassifierSection::default(),
            history: HistoryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = self.to_toml()?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate the configuration and return any errors.
    ///
    /// Every section is checked and all problems are reported together.
    ///
    /// # Example
    ///
    /// ```
    /// use fireserver_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if let Err(e) = validate_device_id(&self.default_device) {
            errors.push(ValidationError {
                field: "default_device".to_string(),
                message: e.to_string(),
            });
        }
        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.persistence.validate());
        errors.extend(self.history.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Pipeline settings derived from this configuration.
    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            normalizer: NormalizerConfig {
                analog_threshold: self.classifier.analog_threshold,
                default_device: self.default_device.clone(),
            },
            classifier: ClassifierConfig {
                severity: self.classifier.severity,
                honor_mute: self.classifier.honor_mute,
            },
            hub: HubConfig {
                subscriber_buffer: self.server.subscriber_buffer,
                overflow: self.server.overflow,
            },
            max_devices: self.server.max_devices,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
    /// Events queued per realtime subscriber before the overflow policy applies.
    pub subscriber_buffer: usize,
    /// What to do with a subscriber whose queue is full.
    pub overflow: OverflowPolicy,
    /// Distinct devices tracked in memory; readings and commands for further
    /// new device ids are rejected.
    pub max_devices: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            overflow: OverflowPolicy::DropOldest,
            max_devices: DEFAULT_MAX_DEVICES,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: "bind address cannot be empty".to_string(),
            });
        } else {
            let parts: Vec<&str> = self.bind.rsplitn(2, ':').collect();
            if parts.len() != 2 {
                errors.push(ValidationError {
                    field: "server.bind".to_string(),
                    message: format!(
                        "invalid bind address '{}': expected format 'host:port'",
                        self.bind
                    ),
                });
            } else {
                // Port 0 is allowed: the OS picks a free port.
                let port_str = parts[0];
                if port_str.parse::<u16>().is_err() {
                    errors.push(ValidationError {
                        field: "server.bind".to_string(),
                        message: format!("invalid port '{}': must be a number 0-65535", port_str),
                    });
                }
            }
        }

        if self.subscriber_buffer == 0 || self.subscriber_buffer > MAX_SUBSCRIBER_BUFFER {
            errors.push(ValidationError {
                field: "server.subscriber_buffer".to_string(),
                message: format!(
                    "subscriber buffer {} out of range (1-{})",
                    self.subscriber_buffer, MAX_SUBSCRIBER_BUFFER
                ),
            });
        }

        if self.max_devices == 0 {
            errors.push(ValidationError {
                field: "server.max_devices".to_string(),
                message: "device limit must be at least 1".to_string(),
            });
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: fireserver_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.path".to_string(),
                message: "database path cannot be empty".to_string(),
            });
        }

        errors
    }
}

/// History write queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Appends waiting for the writer.
    pub queue_capacity: usize,
    /// Per-append timeout; a timeout is recorded as a failed write.
    pub write_timeout_ms: u64,
    /// How long ingestion waits for queue space. 0 rejects immediately.
    pub enqueue_wait_ms: u64,
    /// Wait for the append result before answering the device.
    pub await_write: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            write_timeout_ms: 2_000,
            enqueue_wait_ms: 0,
            await_write: false,
        }
    }
}

impl PersistenceConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn enqueue_wait(&self) -> Duration {
        Duration::from_millis(self.enqueue_wait_ms)
    }

    /// Validate persistence configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.queue_capacity == 0 {
            errors.push(ValidationError {
                field: "persistence.queue_capacity".to_string(),
                message: "queue capacity must be at least 1".to_string(),
            });
        }

        if self.write_timeout_ms == 0 || self.write_timeout_ms > MAX_WRITE_TIMEOUT_MS {
            errors.push(ValidationError {
                field: "persistence.write_timeout_ms".to_string(),
                message: format!(
                    "write timeout {}ms out of range (1-{}ms)",
                    self.write_timeout_ms, MAX_WRITE_TIMEOUT_MS
                ),
            });
        }

        if self.enqueue_wait_ms > self.write_timeout_ms {
            errors.push(ValidationError {
                field: "persistence.enqueue_wait_ms".to_string(),
                message: format!(
                    "enqueue wait {}ms exceeds write timeout {}ms",
                    self.enqueue_wait_ms, self.write_timeout_ms
                ),
            });
        }

        errors
    }
}

/// Classification configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSection {
    /// Raw analog value at or below which a sensor counts as triggered.
    pub analog_threshold: u16,
    /// `four_level` or `three_level`.
    pub severity: Severity,
    /// When false the mute control is stored but never silences the alarm.
    pub honor_mute: bool,
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            analog_threshold: DEFAULT_ANALOG_THRESHOLD,
            severity: Severity::FourLevel,
            honor_mute: true,
        }
    }
}

/// History endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Records returned when the request names no limit.
    pub default_limit: u32,
    /// Larger requested limits are clamped to this.
    pub max_limit: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: 200,
            max_limit: 500,
        }
    }
}

impl HistoryConfig {
    /// Effective limit for a requested one.
    pub fn clamp(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }

    /// Validate history configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.max_limit == 0 {
            errors.push(ValidationError {
                field: "history.max_limit".to_string(),
                message: "max limit must be at least 1".to_string(),
            });
        }

        if self.default_limit == 0 || self.default_limit > self.max_limit {
            errors.push(ValidationError {
                field: "history.default_limit".to_string(),
                message: format!(
                    "default limit {} must be between 1 and max limit {}",
                    self.default_limit, self.max_limit
                ),
            });
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `history.max_limit`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fireserver")
        .join("server.toml")
}
