//! Download configuration.
//!
//! [`DownloadConfig`] carries every tunable of a download run. Values come
//! from three layers, later layers winning:
//!
//! 1. Built-in defaults (`DownloadConfig::default()`)
//! 2. The `[download]` section of an INI file ([`ConfigFile`])
//! 3. Command-line flags, applied by the caller through the `with_*` builders
//!
//! ```ini
//! [download]
//! min_chunk_size = 10MiB
//! max_chunk_size = 100MiB
//! connect_timeout = 360
//! progress_interval_ms = 1000
//! channel_capacity = 100
//! eager_cancel = false
//! temp_dir = /var/tmp
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::size::parse_size;

/// Default lower bound for a segment (10 MiB).
pub const DEFAULT_MIN_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Default upper bound for a segment (100 MiB).
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 100 * 1024 * 1024;

/// Default connect timeout for segment requests (6 minutes).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 6 * 60;

/// Largest byte count reported in a single progress event (10 MiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// Default progress reporting tick.
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 1000;

/// Default capacity of the progress channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

const CONFIG_DIR_NAME: &str = "splitfetch";
const CONFIG_FILE_NAME: &str = "config.ini";
const DOWNLOAD_SECTION: &str = "download";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read or parsed.
    #[error("failed to load {}: {reason}", .path.display())]
    Load { path: PathBuf, reason: String },

    /// A key has a value of the wrong shape.
    #[error("invalid value for '{key}': {value}")]
    InvalidValue { key: String, value: String },

    /// Chunk bounds are zero or inverted.
    #[error("invalid chunk bounds: min {min} / max {max}")]
    InvalidChunkBounds { min: u64, max: u64 },
}

/// Configuration for a single segmented download.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Smallest segment size the planner aims for.
    pub min_chunk_size: u64,

    /// Largest segment size the planner aims for (within the part cap).
    pub max_chunk_size: u64,

    /// Connect timeout for every HTTP request.
    ///
    /// There is intentionally no read timeout: an idle connection can stall
    /// a segment indefinitely.
    pub connect_timeout: Duration,

    /// Largest byte count reported per progress event.
    pub read_buffer_size: usize,

    /// Progress aggregator tick.
    pub progress_interval: Duration,

    /// Capacity of the bounded progress channel.
    pub channel_capacity: usize,

    /// Cancel sibling segments as soon as one fails.
    pub eager_cancel: bool,

    /// Parent directory for the per-download segment directory.
    ///
    /// `None` uses the system temp directory.
    pub temp_dir: Option<PathBuf>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            progress_interval: Duration::from_millis(DEFAULT_PROGRESS_INTERVAL_MS),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            eager_cancel: false,
            temp_dir: None,
        }
    }
}

impl DownloadConfig {
    /// Set both chunk bounds.
    pub fn with_chunk_bounds(mut self, min: u64, max: u64) -> Self {
        self.min_chunk_size = min;
        self.max_chunk_size = max;
        self
    }

    /// Set the minimum chunk size.
    pub fn with_min_chunk_size(mut self, min: u64) -> Self {
        self.min_chunk_size = min;
        self
    }

    /// Set the maximum chunk size.
    pub fn with_max_chunk_size(mut self, max: u64) -> Self {
        self.max_chunk_size = max;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-event read buffer cap.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Set the progress tick.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Set the progress channel capacity (minimum 1).
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Enable or disable eager cancellation of sibling segments.
    pub fn with_eager_cancel(mut self, eager: bool) -> Self {
        self.eager_cancel = eager;
        self
    }

    /// Set the parent directory for segment files.
    pub fn with_temp_dir(mut self, path: PathBuf) -> Self {
        self.temp_dir = Some(path);
        self
    }

    /// Check that the values are usable by the planner and the progress
    /// channel.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_chunk_size == 0
            || self.max_chunk_size == 0
            || self.min_chunk_size > self.max_chunk_size
        {
            return Err(ConfigError::InvalidChunkBounds {
                min: self.min_chunk_size,
                max: self.max_chunk_size,
            });
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "channel_capacity".to_string(),
                value: "0".to_string(),
            });
        }
        if self.progress_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "progress_interval_ms".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

/// Optional values read from an INI config file.
///
/// Every field is optional so that only keys present in the file override
/// the defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub min_chunk_size: Option<u64>,
    pub max_chunk_size: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub progress_interval_ms: Option<u64>,
    pub channel_capacity: Option<usize>,
    pub eager_cancel: Option<bool>,
    pub temp_dir: Option<PathBuf>,
}

impl ConfigFile {
    /// Default config file location, `$XDG_CONFIG_HOME/splitfetch/config.ini`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load the config file from the default location.
    ///
    /// A missing file is not an error and yields an empty config.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load the config file from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    /// Parse config values from INI text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(content).map_err(|e| ConfigError::Load {
            path: PathBuf::from("<string>"),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let Some(section) = ini.section(Some(DOWNLOAD_SECTION)) else {
            return Ok(Self::default());
        };

        let size = |key: &str| -> Result<Option<u64>, ConfigError> {
            section
                .get(key)
                .map(|v| parse_size(v).ok_or_else(|| invalid(key, v)))
                .transpose()
        };
        let number = |key: &str| -> Result<Option<u64>, ConfigError> {
            section
                .get(key)
                .map(|v| v.trim().parse::<u64>().map_err(|_| invalid(key, v)))
                .transpose()
        };

        let eager_cancel = section
            .get("eager_cancel")
            .map(|v| parse_bool(v).ok_or_else(|| invalid("eager_cancel", v)))
            .transpose()?;

        Ok(Self {
            min_chunk_size: size("min_chunk_size")?,
            max_chunk_size: size("max_chunk_size")?,
            connect_timeout_secs: number("connect_timeout")?,
            progress_interval_ms: number("progress_interval_ms")?,
            channel_capacity: number("channel_capacity")?.map(|n| n as usize),
            eager_cancel,
            temp_dir: section
                .get("temp_dir")
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        })
    }

    /// Overlay the values present in this file onto `config`.
    pub fn apply_to(&self, mut config: DownloadConfig) -> DownloadConfig {
        if let Some(min) = self.min_chunk_size {
            config = config.with_min_chunk_size(min);
        }
        if let Some(max) = self.max_chunk_size {
            config = config.with_max_chunk_size(max);
        }
        if let Some(secs) = self.connect_timeout_secs {
            config = config.with_connect_timeout(Duration::from_secs(secs));
        }
        if let Some(ms) = self.progress_interval_ms {
            config = config.with_progress_interval(Duration::from_millis(ms));
        }
        if let Some(capacity) = self.channel_capacity {
            config = config.with_channel_capacity(capacity);
        }
        if let Some(eager) = self.eager_cancel {
            config = config.with_eager_cancel(eager);
        }
        if let Some(ref dir) = self.temp_dir {
            config = config.with_temp_dir(dir.clone());
        }
        config
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}
