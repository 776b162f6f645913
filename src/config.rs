//! Configuration System using Figment
//!
//! Configuration is loaded from:
//! 1. `config/spectro.toml` (base configuration)
//! 2. Environment variables prefixed with `SPECTRO_DAQ_`, nested keys separated by `__`
//!
//! Every section has defaults, so a missing file yields a usable configuration.
//!
//! # Example
//! ```no_run
//! use spectro_daq::config::SpectroConfig;
//!
//! let config = SpectroConfig::load()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), spectro_daq::SessionError>(())
//! ```

use crate::error::{SessionError, SessionResult};
use crate::parameters::{AcquisitionParameters, OptionToken, RegionValidation};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/spectro.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SPECTRO_DAQ_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectroConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Session controller settings
    pub session: SessionConfig,
    /// Parameters applied when the caller supplies none
    pub acquisition: AcquisitionParameters,
    /// Simulated instrument used by the binary and tests
    pub simulation: SimulationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Spectro DAQ".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Session controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Capacity of the bounded hardware event queue
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
    /// Capacity of the subscriber broadcast channel
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
    /// How long `wait_for_state` callers wait for initialization, in milliseconds
    #[serde(default = "default_initialize_timeout")]
    pub initialize_timeout_ms: u64,
    /// How long `acquire` waits for the completion event, in milliseconds
    #[serde(default = "default_acquisition_timeout")]
    pub acquisition_timeout_ms: u64,
    /// Whether out-of-bounds regions are logged or refused
    #[serde(default)]
    pub region_validation: RegionValidation,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: default_event_queue_capacity(),
            notification_capacity: default_notification_capacity(),
            initialize_timeout_ms: default_initialize_timeout(),
            acquisition_timeout_ms: default_acquisition_timeout(),
            region_validation: RegionValidation::default(),
        }
    }
}

impl SessionConfig {
    /// Initialization timeout as a `Duration`.
    pub fn initialize_timeout(&self) -> Duration {
        Duration::from_millis(self.initialize_timeout_ms)
    }

    /// Acquisition timeout as a `Duration`.
    pub fn acquisition_timeout(&self) -> Duration {
        Duration::from_millis(self.acquisition_timeout_ms)
    }
}

/// One simulated catalog unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedDevice {
    /// Unique id
    pub id: String,
    /// Display name
    pub name: String,
}

impl SimulatedDevice {
    /// Device with `id` and display `name`.
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}

/// Simulated instrument configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Monochromators in catalog order
    pub monochromators: Vec<SimulatedDevice>,
    /// Detectors in catalog order
    pub detectors: Vec<SimulatedDevice>,
    /// Chip width in pixels
    pub chip_width: u32,
    /// Chip height in pixels
    pub chip_height: u32,
    /// Gain option table
    pub gain_options: Vec<OptionToken>,
    /// ADC option table
    pub adc_options: Vec<OptionToken>,
    /// Reported detector temperature in degrees Celsius
    pub temperature_c: f64,
    /// Sample generation seed
    pub seed: u64,
    /// Delay before the initialized event, in milliseconds
    pub initialize_delay_ms: u64,
    /// Delay before the acquisition-complete event, in milliseconds
    pub acquisition_delay_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            monochromators: vec![SimulatedDevice::new("M1", "MonoA")],
            detectors: vec![SimulatedDevice::new("D1", "CcdA")],
            chip_width: 1024,
            chip_height: 256,
            gain_options: vec![
                OptionToken::new(0, "High Sensitivity"),
                OptionToken::new(1, "Best Dynamic Range"),
                OptionToken::new(2, "High Light"),
            ],
            adc_options: vec![OptionToken::new(0, "45kHz"), OptionToken::new(1, "1MHz")],
            temperature_c: -70.0,
            seed: 42,
            initialize_delay_ms: 250,
            acquisition_delay_ms: 100,
        }
    }
}

// Default value functions
fn default_event_queue_capacity() -> usize {
    256
}

fn default_notification_capacity() -> usize {
    1024
}

fn default_initialize_timeout() -> u64 {
    30_000
}

fn default_acquisition_timeout() -> u64 {
    60_000
}

impl SpectroConfig {
    /// Load configuration from `config/spectro.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `SPECTRO_DAQ_`.
    /// Example: `SPECTRO_DAQ_SESSION__REGION_VALIDATION=strict`
    pub fn load() -> SessionResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path and validate it
    pub fn load_from<P: AsRef<Path>>(path: P) -> SessionResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> SessionResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(SessionError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(SessionError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.session.event_queue_capacity == 0 || self.session.notification_capacity == 0 {
            return Err(SessionError::Configuration(
                "event_queue_capacity and notification_capacity must be non-zero".to_string(),
            ));
        }

        if self.session.initialize_timeout_ms == 0 || self.session.acquisition_timeout_ms == 0 {
            return Err(SessionError::Configuration(
                "initialize_timeout_ms and acquisition_timeout_ms must be non-zero".to_string(),
            ));
        }

        self.acquisition
            .validate()
            .map_err(|e| SessionError::Configuration(format!("Invalid acquisition: {e}")))?;

        let mut ids = HashSet::new();
        for device in self
            .simulation
            .monochromators
            .iter()
            .chain(&self.simulation.detectors)
        {
            if !ids.insert(&device.id) {
                return Err(SessionError::Configuration(format!(
                    "Duplicate simulated device ID: {}",
                    device.id
                )));
            }
        }

        Ok(())
    }

    /// Serialize the effective configuration as TOML
    pub fn to_toml(&self) -> SessionResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SessionError::Configuration(format!("Cannot serialize: {e}")))
    }
}
