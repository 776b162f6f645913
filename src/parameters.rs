//! Acquisition parameters and the detector capability set.
//!
//! [`AcquisitionParameters`] is the record applied to the detector before each acquisition.
//! [`CapabilitySet`] is what the controller learns about the detector once initialization
//! completes. Region coordinates are 1-based, as the detector addresses its pixels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Readout layout of an acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionFormat {
    /// Spectrum: rows binned into a single line.
    #[default]
    Scan,
    /// Full two-dimensional image.
    Image,
}

impl fmt::Display for AcquisitionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionFormat::Scan => write!(f, "scan"),
            AcquisitionFormat::Image => write!(f, "image"),
        }
    }
}

fn default_bin() -> u32 {
    1
}

/// Region of interest on the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// First column (1-based).
    pub x_start: u32,
    /// First row (1-based).
    pub y_start: u32,
    /// Number of columns.
    pub x_size: u32,
    /// Number of rows.
    pub y_size: u32,
    /// Horizontal binning factor.
    #[serde(default = "default_bin")]
    pub x_bin: u32,
    /// Vertical binning factor.
    #[serde(default = "default_bin")]
    pub y_bin: u32,
}

impl Default for Region {
    fn default() -> Self {
        Self {
            x_start: 1,
            y_start: 1,
            x_size: 1024,
            y_size: 256,
            x_bin: 1,
            y_bin: 256,
        }
    }
}

impl Region {
    /// Describe every way this region exceeds a `chip_width` x `chip_height` chip.
    ///
    /// Empty when the region fits.
    pub fn bounds_violations(&self, chip_width: u32, chip_height: u32) -> Vec<String> {
        let mut violations = Vec::new();
        if self.x_start == 0 || self.y_start == 0 {
            violations.push(format!(
                "start ({}, {}) is not 1-based",
                self.x_start, self.y_start
            ));
        }
        let x_end = u64::from(self.x_start) + u64::from(self.x_size);
        if x_end > u64::from(chip_width) + 1 {
            violations.push(format!(
                "columns {}..{} exceed chip width {}",
                self.x_start,
                x_end - 1,
                chip_width
            ));
        }
        let y_end = u64::from(self.y_start) + u64::from(self.y_size);
        if y_end > u64::from(chip_height) + 1 {
            violations.push(format!(
                "rows {}..{} exceed chip height {}",
                self.y_start,
                y_end - 1,
                chip_height
            ));
        }
        violations
    }

    /// Frame size after binning, in the given format.
    ///
    /// A scan always yields a single line.
    pub fn binned_dimensions(&self, format: AcquisitionFormat) -> (usize, usize) {
        let width = (self.x_size / self.x_bin.max(1)).max(1) as usize;
        match format {
            AcquisitionFormat::Scan => (width, 1),
            AcquisitionFormat::Image => {
                let height = (self.y_size / self.y_bin.max(1)).max(1) as usize;
                (width, height)
            }
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}) {}x{} bin {}x{}",
            self.x_start, self.y_start, self.x_size, self.y_size, self.x_bin, self.y_bin
        )
    }
}

/// Parameters applied to the detector before an acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionParameters {
    /// Gain token, as enumerated by the detector.
    pub gain_token: i32,
    /// ADC token, as enumerated by the detector.
    pub adc_token: i32,
    /// Integration time in milliseconds.
    pub integration_time_ms: f64,
    /// Readout format.
    pub format: AcquisitionFormat,
    /// Region of interest.
    pub region: Region,
}

impl Default for AcquisitionParameters {
    fn default() -> Self {
        Self {
            gain_token: 0,
            adc_token: 0,
            integration_time_ms: 10.0,
            format: AcquisitionFormat::Scan,
            region: Region::default(),
        }
    }
}

impl AcquisitionParameters {
    /// Check values that no detector could accept.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.integration_time_ms.is_finite() && self.integration_time_ms > 0.0) {
            return Err(format!(
                "integration time must be positive, got {}",
                self.integration_time_ms
            ));
        }
        let r = &self.region;
        if r.x_size == 0 || r.y_size == 0 {
            return Err(format!("region size must be non-zero, got {}x{}", r.x_size, r.y_size));
        }
        if r.x_bin == 0 || r.y_bin == 0 {
            return Err(format!("binning must be non-zero, got {}x{}", r.x_bin, r.y_bin));
        }
        Ok(())
    }
}

/// One enumerated gain or ADC option.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionToken {
    /// Selector passed back to the detector.
    pub token: i32,
    /// Human-readable name.
    pub name: String,
}

impl OptionToken {
    /// Create an option.
    pub fn new(token: i32, name: impl Into<String>) -> Self {
        Self {
            token,
            name: name.into(),
        }
    }
}

impl fmt::Display for OptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.token)
    }
}

/// Detector capabilities discovered after initialization.
///
/// Each query is made independently, so any field may be missing when the hardware refused
/// it. The set is replaced wholesale on re-initialization and cleared on teardown.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CapabilitySet {
    /// Chip width in pixels.
    pub chip_width: Option<u32>,
    /// Chip height in pixels.
    pub chip_height: Option<u32>,
    /// Default integration time units.
    pub default_integration_units: Option<String>,
    /// Integration time read back at initialization.
    pub integration_time: Option<f64>,
    /// Gain token selected at initialization.
    pub current_gain: Option<i32>,
    /// ADC token selected at initialization.
    pub current_adc: Option<i32>,
    /// Gain options in enumeration order.
    pub gain_options: Vec<OptionToken>,
    /// ADC options in enumeration order.
    pub adc_options: Vec<OptionToken>,
}

impl CapabilitySet {
    /// Chip geometry, if both dimensions are known.
    pub fn chip_geometry(&self) -> Option<(u32, u32)> {
        self.chip_width.zip(self.chip_height)
    }

    /// Whether `token` was enumerated as a gain option.
    pub fn supports_gain(&self, token: i32) -> bool {
        self.gain_options.iter().any(|o| o.token == token)
    }

    /// Whether `token` was enumerated as an ADC option.
    pub fn supports_adc(&self, token: i32) -> bool {
        self.adc_options.iter().any(|o| o.token == token)
    }
}

/// How region bounds are enforced against the chip geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionValidation {
    /// Log and notify, then apply anyway.
    #[default]
    Advisory,
    /// Refuse to apply.
    Strict,
}
