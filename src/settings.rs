use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::{ByteOrder, OutputError, SampleFormat, SinkOption};

/// Errors from explicit settings file access
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to access settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Returns the path to the settings file: `~/.config/crossfade-rs/output.json`
pub fn settings_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("crossfade-rs");
    path.push("output.json");
    path
}

fn default_sink() -> String {
    if cfg!(feature = "cpal") {
        "cpal".to_string()
    } else {
        "null".to_string()
    }
}

/// Output and crossfade configuration.
///
/// Serialized as JSON to the platform config directory.
/// Fields use `#[serde(default)]` so that adding new settings
/// won't break existing config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    // Buffer
    pub buffer_size_kb: usize,
    pub frame_capacity_bytes: usize,

    // Sink
    pub sink_name: String,
    pub sink_options: Vec<SinkOption>,
    pub retry_backoff_ms: u64,

    // Sample format
    pub bit_depth: u16,
    pub sample_rate: u32,
    pub channels: u16,
    pub byte_order: ByteOrder,

    // Song transitions
    pub crossfade: bool,
    pub crossfade_start_secs: f32,
    pub crossfade_duration_secs: f32,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            buffer_size_kb: 100,
            frame_capacity_bytes: 4096,

            sink_name: default_sink(),
            sink_options: Vec::new(),
            retry_backoff_ms: 1000,

            bit_depth: 16,
            sample_rate: 44100,
            channels: 2,
            byte_order: ByteOrder::Native,

            crossfade: true,
            crossfade_start_secs: 5.0,
            crossfade_duration_secs: 6.0,
        }
    }
}

impl OutputSettings {
    /// Load settings from disk, falling back to defaults on any error.
    pub fn load() -> Self {
        let path = settings_path();
        match Self::load_from(&path) {
            Ok(settings) => {
                log::info!("Loaded settings from {}", path.display());
                settings
            }
            Err(SettingsError::Io(e)) => {
                log::info!("No settings file found ({}), using defaults", e);
                Self::default()
            }
            Err(e) => {
                log::warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save settings to disk as pretty JSON.
    pub fn save(&self) {
        if let Err(e) = self.save_to(&settings_path()) {
            log::warn!("Failed to write settings: {}", e);
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check the buffer geometry and sample format once, up front
    pub fn validate(&self) -> Result<(), OutputError> {
        if !matches!(self.bit_depth, 8 | 16 | 24 | 32) {
            return Err(OutputError::Config(format!(
                "unsupported bit depth {}",
                self.bit_depth
            )));
        }
        if self.sample_rate == 0 || self.channels == 0 {
            return Err(OutputError::Config(
                "sample rate and channel count must be positive".to_string(),
            ));
        }
        if self.frame_capacity_bytes == 0 {
            return Err(OutputError::Config("frame capacity must be positive".to_string()));
        }
        if self.slot_count() < 2 {
            return Err(OutputError::Config(format!(
                "buffer of {} kB cannot hold a single {} byte frame",
                self.buffer_size_kb, self.frame_capacity_bytes
            )));
        }
        if self.crossfade && (self.crossfade_duration_secs.is_nan() || self.crossfade_duration_secs <= 0.0) {
            return Err(OutputError::Config(
                "crossfade duration must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of ring slots: `1024 * buffer_size_kb / frame_capacity + 1`.
    ///
    /// 0 when the buffer size overflows or the frame capacity is 0.
    pub fn slot_count(&self) -> usize {
        self.buffer_size_kb
            .checked_mul(1024)
            .and_then(|bytes| bytes.checked_div(self.frame_capacity_bytes))
            .map_or(0, |n| n + 1)
    }

    pub fn sample_format(&self) -> SampleFormat {
        SampleFormat {
            bits: self.bit_depth,
            rate: self.sample_rate,
            channels: self.channels,
            byte_order: self.byte_order,
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}
