//! Service configuration
//!
//! Read from `$VOLUME_KNOB_CONFIG` or `<config dir>/volume-knob/config.toml`.
//! A missing file is not an error: every value has a default and the service
//! runs with those. Any section or key may be left out.
//!
//! ```toml
//! [source]
//! primary = "command"          # or "device"
//! fallback = true
//! device_path = "/dev/input/event259"
//! command = ["wev"]
//! first_event_timeout_ms = 5000
//! poll_timeout_ms = 100
//!
//! [normalizer]
//! hires_divisor = 120
//! media_key_codes = ["165", "166", "167", "163", "164"]
//! mute_key = 113             # 0 disables the mute key
//!
//! [dispatch]
//! debounce_ms = 50
//! sensitivity = 2
//!
//! [actuator]
//! sink = "@DEFAULT_SINK@"
//! notifications = true
//! notify_timeout_ms = 1000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::actuator::pactl::DEFAULT_SINK;
use crate::input::normalizer::{Normalizer, NormalizerSettings};
use crate::input::source::{SourceKind, SourceSpec};
use crate::input::supervisor::FallbackSettings;
use crate::mapping::{ActionDispatcher, RateLimiter};

pub const CONFIG_ENV: &str = "VOLUME_KNOB_CONFIG";
const CONFIG_DIR: &str = "volume-knob";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct KnobConfig {
    pub source: SourceConfig,
    pub normalizer: NormalizerSettings,
    pub dispatch: DispatchConfig,
    pub actuator: ActuatorConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    /// Source tried first; the other one is the fallback
    pub primary: SourceKind,
    pub fallback: bool,
    pub device_path: PathBuf,
    /// Monitoring command and its arguments
    pub command: Vec<String>,
    pub first_event_timeout_ms: u64,
    pub poll_timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            primary: SourceKind::Command,
            fallback: true,
            device_path: PathBuf::from("/dev/input/event259"),
            command: vec!["wev".to_string()],
            first_event_timeout_ms: 5000,
            poll_timeout_ms: 100,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    pub debounce_ms: u64,
    /// Volume percent points per tick
    pub sensitivity: i32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 50,
            sensitivity: 2,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ActuatorConfig {
    pub sink: String,
    pub notifications: bool,
    pub notify_timeout_ms: u32,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            sink: DEFAULT_SINK.to_string(),
            notifications: true,
            notify_timeout_ms: 1000,
        }
    }
}

impl KnobConfig {
    /// `$VOLUME_KNOB_CONFIG`, else the per-user config directory
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if !exists {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        info!("Loaded config from {}", path.display());
        debug!("Config: {:?}", config);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Writes the default configuration, creating parent directories
    pub async fn write_default(path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        let content = Self::default().to_toml()?;
        tokio::fs::write(path, content).await.map_err(io_error)?;
        info!("Wrote default config to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.normalizer.hires_divisor == 0 {
            return Err(ConfigError::Invalid(
                "normalizer.hires_divisor must not be zero".to_string(),
            ));
        }
        if self.normalizer.media_key_codes.iter().all(|code| code.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "normalizer.media_key_codes must name at least one key code".to_string(),
            ));
        }
        if self.source.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "source.poll_timeout_ms must be positive".to_string(),
            ));
        }
        if self.source.command.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "source.command must name a program".to_string(),
            ));
        }
        if self.dispatch.sensitivity == 0 {
            warn!("dispatch.sensitivity is zero, the knob will not change the volume");
        }
        Ok(())
    }

    fn spec_for(&self, kind: SourceKind) -> SourceSpec {
        match kind {
            SourceKind::Device => SourceSpec::Device {
                path: self.source.device_path.clone(),
            },
            SourceKind::Command => SourceSpec::Command {
                program: self.source.command.first().cloned().unwrap_or_default(),
                args: self.source.command.iter().skip(1).cloned().collect(),
            },
        }
    }

    pub fn primary_spec(&self) -> SourceSpec {
        self.spec_for(self.source.primary)
    }

    pub fn secondary_spec(&self) -> Option<SourceSpec> {
        if !self.source.fallback {
            return None;
        }
        let secondary = match self.source.primary {
            SourceKind::Device => SourceKind::Command,
            SourceKind::Command => SourceKind::Device,
        };
        Some(self.spec_for(secondary))
    }

    pub fn fallback_settings(&self) -> FallbackSettings {
        FallbackSettings {
            first_event_timeout: Duration::from_millis(self.source.first_event_timeout_ms),
            poll_timeout: self.poll_timeout(),
            secondary_configured: self.source.fallback,
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.source.poll_timeout_ms)
    }

    pub fn normalizer(&self) -> Normalizer {
        Normalizer::new(self.normalizer.clone())
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::from_millis(self.dispatch.debounce_ms)
    }

    pub fn dispatcher(&self) -> ActionDispatcher {
        ActionDispatcher::new(self.dispatch.sensitivity)
    }
}
