//! Configuration using Figment.
//!
//! Settings are loaded from:
//! 1. `config/egm.toml` (or the file passed on the command line)
//! 2. Environment variables prefixed with `EGM_DAQ_`, with `__` separating sections,
//!    e.g. `EGM_DAQ_SERIAL__PORT=/dev/ttyUSB0`
//!
//! Every section has defaults, so a missing file yields a usable configuration.
//!
//! # Example
//! ```no_run
//! use egm_daq::config::Settings;
//!
//! let settings = Settings::load()?;
//! settings.validate()?;
//! println!("Application: {}", settings.application.name);
//! # Ok::<(), egm_daq::error::DaqError>(())
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::analysis::flux::{ChamberGeometry, DEFAULT_WINDOW};
use crate::error::{AppResult, DaqError};
use crate::ingest::IngestSettings;
use crate::protocol::SrcLayout;
use crate::store::{TimelineSettings, DEFAULT_CAPACITY};
use crate::transport::{DEFAULT_READ_TIMEOUT, EGM_BAUD_RATE};

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/egm.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "EGM_DAQ_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application settings.
    pub application: ApplicationConfig,
    /// Serial link and ingestion timing.
    pub serial: SerialConfig,
    /// Channel store sizing and timeline folding.
    pub store: StoreConfig,
    /// Flux regression and chamber geometry.
    pub flux: FluxConfig,
    /// Session storage.
    pub persistence: PersistenceConfig,
    /// Record layouts.
    pub layout: LayoutConfig,
}

/// Application-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name.
    pub name: String,
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log output format (pretty, compact, json).
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "EGM DAQ".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Serial link configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port to open when none is given on the command line.
    pub port: Option<String>,
    /// Line speed.
    pub baud_rate: u32,
    /// Timeout of a single read, milliseconds.
    pub read_timeout_ms: u64,
    /// Maximum bytes per read.
    pub read_chunk_bytes: usize,
    /// Pause after a failed read, milliseconds.
    pub retry_delay_ms: u64,
    /// Period of the device presence check, milliseconds.
    pub liveness_interval_ms: u64,
    /// Longest wait for the read loop on disconnect, milliseconds.
    pub shutdown_timeout_ms: u64,
    /// Frames longer than this many bytes are force-split.
    pub max_frame_bytes: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        let ingest = IngestSettings::default();
        Self {
            port: None,
            baud_rate: EGM_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT.as_millis() as u64,
            read_chunk_bytes: ingest.read_chunk,
            retry_delay_ms: ingest.retry_delay.as_millis() as u64,
            liveness_interval_ms: ingest.liveness_interval.as_millis() as u64,
            shutdown_timeout_ms: ingest.shutdown_timeout.as_millis() as u64,
            max_frame_bytes: ingest.max_frame_len,
        }
    }
}

impl SerialConfig {
    /// Per-read timeout.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Channel store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Samples retained per plot and channel.
    pub capacity: usize,
    /// Spacing inserted between measurement cycles, seconds.
    pub cycle_gap_s: f64,
    /// Elapsed-time drop that starts a new cycle, seconds.
    pub reset_tolerance_s: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let timeline = TimelineSettings::default();
        Self {
            capacity: DEFAULT_CAPACITY,
            cycle_gap_s: timeline.cycle_gap_s,
            reset_tolerance_s: timeline.reset_tolerance_s,
        }
    }
}

/// Flux analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluxConfig {
    /// Samples in the regression window.
    pub window: usize,
    /// Chamber headspace volume, litres.
    pub chamber_volume_l: f64,
    /// Enclosed soil area, cm².
    pub chamber_area_cm2: f64,
}

impl Default for FluxConfig {
    fn default() -> Self {
        let geometry = ChamberGeometry::default();
        Self {
            window: DEFAULT_WINDOW,
            chamber_volume_l: geometry.volume_l,
            chamber_area_cm2: geometry.area_cm2,
        }
    }
}

impl FluxConfig {
    /// Chamber geometry.
    pub fn geometry(&self) -> ChamberGeometry {
        ChamberGeometry {
            volume_l: self.chamber_volume_l,
            area_cm2: self.chamber_area_cm2,
        }
    }
}

/// Session storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Write measurements to disk.
    pub enabled: bool,
    /// Directory of the session files.
    pub directory: PathBuf,
    /// Readings buffered before new ones are dropped.
    pub queue_capacity: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from("data/sessions"),
            queue_capacity: 1024,
        }
    }
}

/// Record layout overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// End-anchored SRC-1 offsets.
    pub src: SrcLayout,
}

impl Settings {
    /// Load from the default file and environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path. A missing file is not an error.
    ///
    /// Environment variables override the file, for example
    /// `EGM_DAQ_APPLICATION__LOG_LEVEL=debug`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Self::figment(path.as_ref()).extract().map_err(DaqError::from)
    }

    /// The layered provider used by [`load_from`](Self::load_from).
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(DaqError::Configuration(msg));

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        if self.serial.baud_rate == 0 {
            return invalid("serial.baud_rate must be positive".to_string());
        }
        if self.serial.read_timeout_ms == 0 {
            return invalid("serial.read_timeout_ms must be positive".to_string());
        }
        if self.serial.read_chunk_bytes == 0 {
            return invalid("serial.read_chunk_bytes must be positive".to_string());
        }
        if self.serial.liveness_interval_ms == 0 {
            return invalid("serial.liveness_interval_ms must be positive".to_string());
        }
        if self.serial.max_frame_bytes < 64 {
            return invalid(format!(
                "serial.max_frame_bytes {} is shorter than an instrument record",
                self.serial.max_frame_bytes
            ));
        }

        if self.store.capacity == 0 {
            return invalid("store.capacity must be positive".to_string());
        }
        if !(self.store.cycle_gap_s >= 0.0) || !(self.store.reset_tolerance_s >= 0.0) {
            return invalid("store timeline thresholds must be non-negative".to_string());
        }

        if self.flux.window < 2 {
            return invalid(format!(
                "flux.window must be at least 2, got {}",
                self.flux.window
            ));
        }
        if !(self.flux.chamber_volume_l > 0.0) || !(self.flux.chamber_area_cm2 > 0.0) {
            return invalid("flux chamber volume and area must be positive".to_string());
        }

        if self.persistence.enabled && self.persistence.queue_capacity == 0 {
            return invalid("persistence.queue_capacity must be positive".to_string());
        }

        self.layout.src.validate().map_err(DaqError::Configuration)
    }

    /// Timing and sizing for the ingestion controller.
    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            read_chunk: self.serial.read_chunk_bytes,
            retry_delay: Duration::from_millis(self.serial.retry_delay_ms),
            liveness_interval: Duration::from_millis(self.serial.liveness_interval_ms),
            shutdown_timeout: Duration::from_millis(self.serial.shutdown_timeout_ms),
            max_frame_len: self.serial.max_frame_bytes,
            ..IngestSettings::default()
        }
    }

    /// Cycle folding thresholds for the channel store.
    pub fn timeline_settings(&self) -> TimelineSettings {
        TimelineSettings {
            cycle_gap_s: self.store.cycle_gap_s,
            reset_tolerance_s: self.store.reset_tolerance_s,
        }
    }
}
