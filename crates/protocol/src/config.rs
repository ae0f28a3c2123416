use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::curve::{CurveError, CurveParameters, ParameterPolicy, RawCurveParameters};
use crate::profile::DeviceKind;

/// Settings for one control surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub device: DeviceKind,
    /// Exact MIDI port name. When unset the port is picked by name.
    pub midi_port: Option<String>,
    pub curve_policy: ParameterPolicy,
    /// Kept unvalidated so a bad file still loads and can be reported.
    pub velocity_curve: RawCurveParameters,
    pub transfer_timeout_ms: u64,
    pub ack_wait_ms: u64,
    pub pace_frames: bool,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            device: DeviceKind::Push3,
            midi_port: None,
            curve_policy: ParameterPolicy::Reject,
            velocity_curve: CurveParameters::default().into(),
            transfer_timeout_ms: 1000,
            ack_wait_ms: 250,
            pace_frames: true,
        }
    }
}

impl SurfaceConfig {
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn ack_wait(&self) -> Duration {
        Duration::from_millis(self.ack_wait_ms)
    }

    /// The configured curve, after applying `curve_policy`.
    pub fn curve_parameters(&self) -> Result<CurveParameters, CurveError> {
        CurveParameters::with_policy(self.velocity_curve, self.curve_policy)
    }
}

/// Configuration manager for surface settings.
/// Settings are persisted as JSON, wrapped with a version and timestamps.
pub struct ConfigManager {
    config_path: PathBuf,
    settings: SurfaceConfig,
    created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub transfer_timeout_ms: ConfigOption<u64>,
    pub ack_wait_ms: ConfigOption<u64>,
    pub device: ConfigOption<DeviceKind>,
    pub curve_policy: ConfigOption<ParameterPolicy>,
    pub pace_frames: ConfigOption<bool>,
}

/// Configuration option with validation and available choices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOption<T> {
    pub default: T,
    pub valid_range: Option<(T, T)>,
    pub valid_choices: Option<Vec<T>>,
    pub description: String,
}

/// Persisted configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    pub settings: SurfaceConfig,
    pub created_at: String,
    pub modified_at: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(String),

    #[error("failed to write config file: {0}")]
    Write(String),

    #[error("failed to parse config file: {0}")]
    Parse(String),

    #[error("failed to serialize config: {0}")]
    Serialize(String),

    #[error("unknown device kind {0:?} (expected \"push2\" or \"push3\")")]
    UnknownDevice(String),

    #[error("config validation errors: {}", .0.join(", "))]
    Validation(Vec<String>),
}

impl ConfigManager {
    /// Defaults to [`default_path`](Self::default_path).
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self {
            config_path: config_path.unwrap_or_else(Self::default_path),
            settings: SurfaceConfig::default(),
            created_at: None,
        }
    }

    /// `~/.surface/surface.json`, or `surface.json` in the working
    /// directory when there is no home directory.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .map(|home| home.join(".surface"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("surface.json")
    }

    /// Load settings, writing a default file if none exists.
    /// Invalid settings are rejected with every violation listed.
    pub fn load(&mut self) -> Result<SurfaceConfig, ConfigError> {
        if !self.config_path.exists() {
            tracing::info!(path = %self.config_path.display(), "creating default config");
            self.created_at = Some(chrono::Utc::now().to_rfc3339());
            self.save()?;
            return Ok(self.settings.clone());
        }

        let content =
            fs::read_to_string(&self.config_path).map_err(|e| ConfigError::Read(e.to_string()))?;
        let config_file: ConfigFile =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        if config_file.version != env!("CARGO_PKG_VERSION") {
            tracing::warn!(
                file_version = %config_file.version,
                version = env!("CARGO_PKG_VERSION"),
                "config version mismatch, using defaults for new settings"
            );
        }

        Self::validate_settings(&config_file.settings).map_err(ConfigError::Validation)?;

        self.settings = config_file.settings;
        self.created_at = Some(config_file.created_at);
        Ok(self.settings.clone())
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            if parent != Path::new("") && parent != Path::new(".") {
                fs::create_dir_all(parent).map_err(|e| ConfigError::Write(e.to_string()))?;
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        let config_file = ConfigFile {
            version: env!("CARGO_PKG_VERSION").to_string(),
            settings: self.settings.clone(),
            created_at: self.created_at.clone().unwrap_or_else(|| now.clone()),
            modified_at: now,
        };

        let content = serde_json::to_string_pretty(&config_file)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        fs::write(&self.config_path, content).map_err(|e| ConfigError::Write(e.to_string()))?;

        tracing::debug!(path = %self.config_path.display(), "config saved");
        Ok(())
    }

    /// Validate, then store and save.
    pub fn update_settings(&mut self, settings: SurfaceConfig) -> Result<(), ConfigError> {
        Self::validate_settings(&settings).map_err(ConfigError::Validation)?;
        self.settings = settings;
        self.save()
    }

    pub fn settings(&self) -> &SurfaceConfig {
        &self.settings
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn schema() -> ConfigSchema {
        let defaults = SurfaceConfig::default();
        ConfigSchema {
            transfer_timeout_ms: ConfigOption {
                default: defaults.transfer_timeout_ms,
                valid_range: Some((10, 10_000)),
                valid_choices: None,
                description: "Deadline for a single USB bulk write in milliseconds".to_string(),
            },
            ack_wait_ms: ConfigOption {
                default: defaults.ack_wait_ms,
                valid_range: Some((0, 5000)),
                valid_choices: None,
                description: "How long to wait for the user mode acknowledgement".to_string(),
            },
            device: ConfigOption {
                default: defaults.device,
                valid_range: None,
                valid_choices: Some(DeviceKind::ALL.to_vec()),
                description: "Hardware generation".to_string(),
            },
            curve_policy: ConfigOption {
                default: defaults.curve_policy,
                valid_range: None,
                valid_choices: Some(vec![ParameterPolicy::Reject, ParameterPolicy::Clamp]),
                description: "Out-of-range curve parameters are rejected or clamped".to_string(),
            },
            pace_frames: ConfigOption {
                default: defaults.pace_frames,
                valid_range: None,
                valid_choices: None,
                description: "Sleep out the remainder of each frame interval".to_string(),
            },
        }
    }

    /// Validate settings against the schema, collecting every violation.
    pub fn validate_settings(settings: &SurfaceConfig) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let schema = Self::schema();

        if let Some((min, max)) = schema.transfer_timeout_ms.valid_range {
            if settings.transfer_timeout_ms < min || settings.transfer_timeout_ms > max {
                errors.push(format!("transfer_timeout_ms must be between {} and {}", min, max));
            }
        }

        if let Some((min, max)) = schema.ack_wait_ms.valid_range {
            if settings.ack_wait_ms < min || settings.ack_wait_ms > max {
                errors.push(format!("ack_wait_ms must be between {} and {}", min, max));
            }
        }

        if let Some(port) = &settings.midi_port {
            if port.trim().is_empty() {
                errors.push("midi_port must not be empty".to_string());
            }
        }

        if let Err(e) = settings.curve_parameters() {
            errors.push(format!("velocity_curve: {}", e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.settings = SurfaceConfig::default();
        self.save()
    }
}
