//! Configuration module for mirrorsync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for mirrorsync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub device: DeviceConfig,
    pub state: StateConfig,
    pub logging: LoggingConfig,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Whether synchronization runs at all (the settings toggle).
    pub enabled: bool,
    /// Directory holding the user's bookmark files.
    pub local_dir: PathBuf,
    /// Provider-backed directory the local directory is mirrored into.
    pub cloud_dir: PathBuf,
    /// Only files with this extension take part in synchronization.
    pub file_extension: String,
    /// Maximum number of actions executed at the same time.
    pub max_concurrent_actions: usize,
    /// Seconds to wait for the bookmarks engine to confirm a reload.
    pub reload_timeout_secs: u64,
    /// Seconds in-flight work may keep running after entering the background.
    pub background_grace_secs: u64,
    /// Seconds between periodic rescans of both directories.
    pub poll_interval_secs: u64,
    /// Milliseconds to wait for a burst of file events to settle.
    pub debounce_ms: u64,
}

/// Identity of this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Embedded in the names of copies made during initial sync conflicts.
    pub name: String,
}

/// Durable state settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// JSON file recording whether the initial synchronization finished.
    pub file: PathBuf,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/mirrorsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("mirrorsync")
            .join("config.yaml")
    }
}

impl SyncConfig {
    pub fn reload_timeout(&self) -> Duration {
        Duration::from_secs(self.reload_timeout_secs)
    }

    pub fn background_grace(&self) -> Duration {
        Duration::from_secs(self.background_grace_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("mirrorsync")
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            local_dir: data_dir().join("bookmarks"),
            cloud_dir: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join("CloudMirror")
                .join("Bookmarks"),
            file_extension: "kml".to_string(),
            max_concurrent_actions: 4,
            reload_timeout_secs: 30,
            background_grace_secs: 25,
            poll_interval_secs: 15,
            debounce_ms: 500,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let name = std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| "device".to_string());
        Self { name }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            file: data_dir().join("state.json"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.poll_interval_secs"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if self.sync.local_dir.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "sync.local_dir".into(),
                message: "must not be empty".into(),
            });
        }
        if self.sync.cloud_dir.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "sync.cloud_dir".into(),
                message: "must not be empty".into(),
            });
        }
        if !self.sync.local_dir.as_os_str().is_empty()
            && self.sync.local_dir == self.sync.cloud_dir
        {
            errors.push(ValidationError {
                field: "sync.cloud_dir".into(),
                message: "must differ from sync.local_dir".into(),
            });
        }
        let ext = &self.sync.file_extension;
        if ext.is_empty() || ext.starts_with('.') || ext.contains(['/', '\\']) {
            errors.push(ValidationError {
                field: "sync.file_extension".into(),
                message: format!("invalid extension '{ext}'; expected e.g. 'kml'"),
            });
        }
        if self.sync.max_concurrent_actions == 0 || self.sync.max_concurrent_actions > 32 {
            errors.push(ValidationError {
                field: "sync.max_concurrent_actions".into(),
                message: "must be in range 1..=32".into(),
            });
        }
        if self.sync.reload_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "sync.reload_timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.poll_interval_secs == 0 {
            errors.push(ValidationError {
                field: "sync.poll_interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.debounce_ms == 0 {
            errors.push(ValidationError {
                field: "sync.debounce_ms".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- device ---
        if self.device.name.trim().is_empty() {
            errors.push(ValidationError {
                field: "device.name".into(),
                message: "must not be empty".into(),
            });
        }
        if self.device.name.contains(['/', '\\']) {
            errors.push(ValidationError {
                field: "device.name".into(),
                message: "must not contain a path separator".into(),
            });
        }

        // --- state ---
        if self.state.file.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "state.file".into(),
                message: "must not be empty".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use mirrorsync_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .local_dir(PathBuf::from("/home/user/bookmarks"))
///     .cloud_dir(PathBuf::from("/home/user/CloudMirror/Bookmarks"))
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.sync.enabled = enabled;
        self
    }

    pub fn local_dir(mut self, dir: PathBuf) -> Self {
        self.config.sync.local_dir = dir;
        self
    }

    pub fn cloud_dir(mut self, dir: PathBuf) -> Self {
        self.config.sync.cloud_dir = dir;
        self
    }

    pub fn file_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.sync.file_extension = ext.into();
        self
    }

    pub fn max_concurrent_actions(mut self, n: usize) -> Self {
        self.config.sync.max_concurrent_actions = n;
        self
    }

    pub fn reload_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.sync.reload_timeout_secs = seconds;
        self
    }

    pub fn background_grace_secs(mut self, seconds: u64) -> Self {
        self.config.sync.background_grace_secs = seconds;
        self
    }

    pub fn poll_interval_secs(mut self, seconds: u64) -> Self {
        self.config.sync.poll_interval_secs = seconds;
        self
    }

    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.config.sync.debounce_ms = ms;
        self
    }

    // --- device ---

    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.config.device.name = name.into();
        self
    }

    // --- state ---

    pub fn state_file(mut self, file: PathBuf) -> Self {
        self.config.state.file = file;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
