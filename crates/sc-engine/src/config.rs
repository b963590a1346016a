//! Engine configuration
//!
//! Tuning constants for scheduling, loading and output, persisted as JSON.
//! Every section defaults field-by-field, so partial files are valid.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{EngineError, EngineResult};

/// Full engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub loading: LoadingConfig,
    pub output: OutputConfig,
    pub driver: DriverConfig,
    pub defaults: MixDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            loading: LoadingConfig::default(),
            output: OutputConfig::default(),
            driver: DriverConfig::default(),
            defaults: MixDefaults::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration, falling back to defaults if the file is missing
    pub fn load_from<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> EngineResult<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let json =
            serde_json::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Reconciliation tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// In-progress segments with less than this left are treated as elapsed
    pub min_remaining_secs: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_remaining_secs: 0.05,
        }
    }
}

/// Player factory tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadingConfig {
    /// Full-buffer decode budget before falling back to streaming
    pub decode_timeout_ms: u64,
    /// Budget for the streaming fallback to open and probe its source
    pub stream_ready_timeout_ms: u64,
    /// Read-ahead of a streaming voice
    pub stream_buffer_secs: f64,
}

impl Default for LoadingConfig {
    fn default() -> Self {
        Self {
            decode_timeout_ms: 4000,
            stream_ready_timeout_ms: 2000,
            stream_buffer_secs: 1.0,
        }
    }
}

impl LoadingConfig {
    pub fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms)
    }

    pub fn stream_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_ready_timeout_ms)
    }
}

/// Output sink tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Anti-click ramp applied when a voice starts or is stopped
    pub fade_ms: f64,
    /// How long `initialize` waits for the device stream to come up
    pub start_timeout_ms: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            fade_ms: 5.0,
            start_timeout_ms: 2000,
        }
    }
}

impl OutputConfig {
    pub fn fade_frames(&self, sample_rate: u32) -> usize {
        ((self.fade_ms.max(0.0) / 1000.0) * sample_rate as f64).round() as usize
    }
}

/// Background tick driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub tick_interval_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 16,
        }
    }
}

impl DriverConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Initial mix values for a new session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixDefaults {
    pub master_volume: f64,
}

impl Default for MixDefaults {
    fn default() -> Self {
        Self { master_volume: 1.0 }
    }
}
