//! Server arguments and the tunable parameters of the digitization pipeline.
//!
//! `DigitizeConfig` is plain data threaded through every call; nothing here
//! is global. It can be built in code or loaded from a JSON file:
//!
//! ```no_run
//! use ecg_digitize::config::DigitizeConfig;
//! use std::path::Path;
//!
//! let config = DigitizeConfig::from_json_file(Path::new("digitize.json"))?;
//! # Ok::<(), ecg_digitize::DigitizeError>(())
//! ```

use crate::error::{DigitizeError, Result};
use crate::extractors::ExtractionMethod;
use crate::signal::scaling::BaselineMethod;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug, Clone)]
#[command(name = "ecg-digitize-server")]
#[command(about = "Digitize scanned ECG images into calibrated signals over HTTP")]
#[command(version)]
pub struct Args {
    /// Host address to bind to
    #[arg(long, env = "ECG_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "ECG_PORT", default_value = "9393")]
    pub port: u16,

    /// Maximum upload size in bytes (default: 50MB)
    #[arg(long, env = "ECG_MAX_FILE_SIZE", default_value = "52428800")]
    pub max_file_size: usize,

    /// JSON file with pipeline parameters (defaults are used when absent)
    #[arg(long, env = "ECG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_file_size: usize,
    pub config_path: Option<PathBuf>,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            max_file_size: args.max_file_size,
            config_path: args.config,
        }
    }
}

/// Complete set of pipeline parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigitizeConfig {
    pub detection: DetectionConfig,
    pub extraction: ExtractionConfig,
    pub grid: GridConfig,
    pub rotation: RotationConfig,
    pub scale: ScaleConfig,
}

/// Trace mask detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Rows with a larger active fraction are treated as grid lines and cleared
    pub max_row_fraction: f64,
    /// Columns with a larger active fraction are treated as grid lines and cleared
    pub max_column_fraction: f64,
    /// Initial multiplier applied to the Otsu level
    pub max_hedge: f64,
    /// Lowest multiplier tried while the grid is still visible in the mask
    pub min_hedge: f64,
    pub hedge_step: f64,
    /// Autocorrelation floor above which the mask still counts as showing
    /// the grid while hedging
    pub grid_peak_height: f64,
    pub grid_peak_prominence: f64,
    /// Morphological opening of the final mask
    pub denoise: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            max_row_fraction: 0.9,
            max_column_fraction: 0.9,
            max_hedge: 1.0,
            min_hedge: 0.6,
            hedge_step: 0.05,
            grid_peak_height: 0.3,
            grid_peak_prominence: 0.05,
            denoise: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub method: ExtractionMethod,
    pub viterbi: ViterbiConfig,
}

/// Cost model of the dynamic-programming tracer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViterbiConfig {
    /// Largest row change allowed between adjacent columns
    pub max_jump: u32,
    /// Scale of the transition cost
    pub jump_weight: f64,
    /// Jumps up to this size cost quadratically, larger ones linearly
    pub jump_knee: u32,
    /// Cost per row of distance to the nearest ink run
    pub emission_weight: f64,
    /// Distance beyond which the emission cost stops growing
    pub max_emission_distance: u32,
    /// Half-width in columns of the quadratic fit that refines each sample
    /// along the path; 0 keeps the raw run centres
    pub smoothing_radius: u32,
}

impl Default for ViterbiConfig {
    fn default() -> Self {
        Self {
            max_jump: 40,
            jump_weight: 0.1,
            jump_knee: 3,
            emission_weight: 1.0,
            max_emission_distance: 20,
            smoothing_radius: 3,
        }
    }
}

/// Grid mask detection and spacing estimation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Pixels darker than this (after white-point adjustment) may be grid
    pub dark_threshold: u8,
    /// Subtract the dilated trace mask from the dark pixels
    pub remove_trace: bool,
    pub trace_dilation: u8,
    /// Thin the grid lines with a final erosion
    pub erode: bool,
    /// Autocorrelation noise floor a peak must clear
    pub min_peak_height: f64,
    pub min_peak_prominence: f64,
    /// Half-width of the window used for sub-pixel peak refinement
    pub interpolation_radius: usize,
    /// Expected large box / small box ratio
    pub large_box_ratio: f64,
    /// Calibrations below this confidence raise a warning
    pub min_confidence: f64,
    /// Used with zero confidence when no spacing can be estimated
    pub fallback_small_box_pixels: Option<f64>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            dark_threshold: 230,
            remove_trace: true,
            trace_dilation: 2,
            erode: false,
            min_peak_height: 0.3,
            min_peak_prominence: 0.05,
            interpolation_radius: 1,
            large_box_ratio: 5.0,
            min_confidence: 0.5,
            fallback_small_box_pixels: None,
        }
    }
}

/// Skew estimation of the full input image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Estimate and correct skew before cropping leads
    pub enabled: bool,
    /// Hough vote threshold as a fraction of the image width
    pub hough_threshold_fraction: f64,
    /// Lines further than this from an axis are ignored
    pub max_skew_degrees: f64,
    /// Angles closer than this fall in the same cluster
    pub cluster_tolerance_degrees: f64,
    /// Polish the Hough estimate with a projection-profile search
    pub refine: bool,
    /// Fill intensity for pixels uncovered by the rotation
    pub background: u8,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hough_threshold_fraction: 0.25,
            max_skew_degrees: 30.0,
            cluster_tolerance_degrees: 2.0,
            refine: true,
            background: 255,
        }
    }
}

/// Paper speed and gain used to turn pixels into seconds and millivolts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    pub mm_per_second: f64,
    pub mm_per_millivolt: f64,
    /// Physical size of one small grid box
    pub small_box_mm: f64,
    pub baseline: BaselineMethod,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            mm_per_second: 25.0,
            mm_per_millivolt: 10.0,
            small_box_mm: 1.0,
            baseline: BaselineMethod::Mode,
        }
    }
}

impl DigitizeConfig {
    /// Load and validate a configuration from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DigitizeError::invalid_parameter("config", format!("{}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| DigitizeError::invalid_parameter("config", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        let d = &self.detection;
        for (name, value) in [
            ("detection.max_row_fraction", d.max_row_fraction),
            ("detection.max_column_fraction", d.max_column_fraction),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(DigitizeError::invalid_parameter(name, value));
            }
        }
        if !(d.min_hedge > 0.0 && d.min_hedge <= d.max_hedge) {
            return Err(DigitizeError::invalid_parameter(
                "detection.min_hedge",
                d.min_hedge,
            ));
        }
        if !(d.grid_peak_height > 0.0 && d.grid_peak_height <= 1.0) {
            return Err(DigitizeError::invalid_parameter(
                "detection.grid_peak_height",
                d.grid_peak_height,
            ));
        }
        if d.grid_peak_prominence < 0.0 {
            return Err(DigitizeError::invalid_parameter(
                "detection.grid_peak_prominence",
                d.grid_peak_prominence,
            ));
        }
        if d.hedge_step <= 0.0 {
            return Err(DigitizeError::invalid_parameter(
                "detection.hedge_step",
                d.hedge_step,
            ));
        }

        let v = &self.extraction.viterbi;
        if v.max_jump == 0 {
            return Err(DigitizeError::invalid_parameter(
                "extraction.viterbi.max_jump",
                v.max_jump,
            ));
        }
        if v.jump_weight < 0.0 || v.emission_weight < 0.0 {
            return Err(DigitizeError::invalid_parameter(
                "extraction.viterbi weights",
                format!("{}/{}", v.jump_weight, v.emission_weight),
            ));
        }

        let g = &self.grid;
        if g.large_box_ratio <= 1.0 {
            return Err(DigitizeError::invalid_parameter(
                "grid.large_box_ratio",
                g.large_box_ratio,
            ));
        }
        if !(0.0..=1.0).contains(&g.min_confidence) {
            return Err(DigitizeError::invalid_parameter(
                "grid.min_confidence",
                g.min_confidence,
            ));
        }
        if let Some(pixels) = g.fallback_small_box_pixels {
            if !(pixels > 0.0) {
                return Err(DigitizeError::invalid_parameter(
                    "grid.fallback_small_box_pixels",
                    pixels,
                ));
            }
        }

        let s = &self.scale;
        for (name, value) in [
            ("scale.mm_per_second", s.mm_per_second),
            ("scale.mm_per_millivolt", s.mm_per_millivolt),
            ("scale.small_box_mm", s.small_box_mm),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(DigitizeError::invalid_parameter(name, value));
            }
        }

        Ok(())
    }
}
