//! Configuration for the acquisition worker and the demo binary
//!
//! This module handles:
//! - Worker tuning (service path, tick period, poller buffer sizes)
//! - Demo signal generators and run time
//! - Loading and saving configuration files
//!
//! # Config Location
//!
//! The default configuration file lives in the platform config directory:
//! - **Linux**: `~/.config/digitizer-rs/config.toml`
//! - **macOS**: `~/Library/Application Support/digitizer-rs/config.toml`
//! - **Windows**: `%APPDATA%\digitizer-rs\config.toml`
//!
//! Files ending in `.json` are read and written as JSON, everything else as TOML.
//!
//! # Example
//!
//! ```ignore
//! use digitizer_rs::config::AppConfig;
//!
//! let config = AppConfig::load_or_default("digitizer.toml");
//! println!("tick period: {:?}", config.worker.tick_period());
//! ```

use crate::error::{AcquisitionError, Result};
use crate::graph::blocks::SignalGeneratorConfig;
use crate::graph::sink::PollerCapacity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for config directories
pub const APP_ID: &str = "digitizer-rs";

/// Default config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Default service path subscriptions must address
pub const DEFAULT_SERVICE_PATH: &str = "/acquisition";

/// Default lifecycle tick period in milliseconds
pub const DEFAULT_TICK_PERIOD_MS: u64 = 100;

// ==================== Config Directory ====================

/// Get the application config directory path
pub fn app_config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path of the default config file
pub fn default_config_path() -> Option<PathBuf> {
    app_config_dir().map(|p| p.join(CONFIG_FILE))
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

// ==================== Worker Config ====================

/// Tuning of one acquisition worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Service path subscriptions must address to be served
    pub service_path: String,
    /// Lifecycle tick period (one reconciliation pass per tick)
    pub tick_period_ms: u64,
    /// Sleep between flush passes while draining
    pub drain_poll_interval_ms: u64,
    /// Sleep of the execution thread when the graph reports no work
    pub scheduler_idle_sleep_ms: u64,
    /// Queue capacity of streaming pollers (blocks)
    pub streaming_buffer_capacity: usize,
    /// Queue capacity of dataset pollers (captures)
    pub dataset_buffer_capacity: usize,
    /// Queue capacity of each broker subscriber (replies)
    pub subscriber_capacity: usize,
    /// Capacity of the worker event channel
    pub event_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            service_path: DEFAULT_SERVICE_PATH.to_string(),
            tick_period_ms: DEFAULT_TICK_PERIOD_MS,
            drain_poll_interval_ms: 1,
            scheduler_idle_sleep_ms: 5,
            streaming_buffer_capacity: 1024,
            dataset_buffer_capacity: 64,
            subscriber_capacity: 1024,
            event_capacity: 256,
        }
    }
}

impl WorkerConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms.max(1))
    }

    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_interval_ms)
    }

    pub fn scheduler_idle_sleep(&self) -> Duration {
        Duration::from_millis(self.scheduler_idle_sleep_ms)
    }

    /// Poller queue sizes for an in-memory sink registry
    pub fn poller_capacity(&self) -> PollerCapacity {
        PollerCapacity {
            streaming: self.streaming_buffer_capacity,
            dataset: self.dataset_buffer_capacity,
        }
    }

    /// Reject values the worker cannot run with
    pub fn validate(&self) -> Result<()> {
        if !self.service_path.starts_with('/') {
            return Err(AcquisitionError::Config(format!(
                "service_path '{}' must start with '/'",
                self.service_path
            )));
        }
        if self.tick_period_ms == 0 {
            return Err(AcquisitionError::Config(
                "tick_period_ms must be positive".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(AcquisitionError::Config(
                "event_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ==================== App Config ====================

/// Configuration of the demo binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub worker: WorkerConfig,
    /// Signals produced by the demo graph
    pub generators: Vec<SignalGeneratorConfig>,
    /// How long the demo runs before shutting down
    pub run_time_secs: u64,
    /// Optional log file; a daily rolling file is written next to it
    pub log_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut current = SignalGeneratorConfig::new("current");
        current.unit = "A".to_string();
        current.frequency = 2.0;

        Self {
            worker: WorkerConfig::default(),
            generators: vec![SignalGeneratorConfig::new("voltage"), current],
            run_time_secs: 5,
            log_file: None,
        }
    }
}

impl AppConfig {
    /// Load a config file (TOML, or JSON for `.json` paths)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AcquisitionError::Config(format!("Failed to read config {:?}: {}", path, e))
        })?;

        let config: Self = if is_json(path) {
            serde_json::from_str(&content).map_err(|e| {
                AcquisitionError::Config(format!("Failed to parse config {:?}: {}", path, e))
            })?
        } else {
            toml::from_str(&content).map_err(|e| {
                AcquisitionError::Config(format!("Failed to parse config {:?}: {}", path, e))
            })?
        };
        config.worker.validate()?;
        Ok(config)
    }

    /// Load a config file, returning defaults if it is missing or invalid
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the config (TOML, or JSON for `.json` paths)
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AcquisitionError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = if is_json(path) {
            serde_json::to_string_pretty(self)
                .map_err(|e| AcquisitionError::Serialization(e.to_string()))?
        } else {
            toml::to_string_pretty(self)
                .map_err(|e| AcquisitionError::Serialization(e.to_string()))?
        };

        std::fs::write(path, content).map_err(|e| {
            AcquisitionError::Config(format!("Failed to write config {:?}: {}", path, e))
        })
    }

    pub fn run_time(&self) -> Duration {
        Duration::from_secs(self.run_time_secs)
    }
}
