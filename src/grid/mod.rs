//! Paper grid isolation and pixel-spacing calibration

pub mod detection;
pub mod extraction;
pub mod frequency;

pub use detection::{all_dark_pixels, detect_grid_mask};
pub use extraction::estimate_spacing;

use crate::error::{DigitizeError, Result};
use serde::{Deserialize, Serialize};

/// Pixel size of the paper's grid boxes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridCalibration {
    pub small_box_pixels: f64,
    pub large_box_pixels: f64,
    /// 0 = guessed, 1 = unambiguous periodicity
    pub confidence: f64,
}

impl GridCalibration {
    pub fn new(small_box_pixels: f64, large_box_pixels: f64, confidence: f64) -> Result<Self> {
        if !(small_box_pixels > 0.0 && small_box_pixels.is_finite()) {
            return Err(DigitizeError::invalid_parameter(
                "small_box_pixels",
                small_box_pixels,
            ));
        }
        if !(large_box_pixels > 0.0 && large_box_pixels.is_finite()) {
            return Err(DigitizeError::invalid_parameter(
                "large_box_pixels",
                large_box_pixels,
            ));
        }
        Ok(Self {
            small_box_pixels,
            large_box_pixels,
            confidence: if confidence.is_nan() {
                0.0
            } else {
                confidence.clamp(0.0, 1.0)
            },
        })
    }

    /// Calibration from a known small box size, assuming the usual ratio
    pub fn from_small_box(small_box_pixels: f64, large_box_ratio: f64, confidence: f64) -> Result<Self> {
        Self::new(small_box_pixels, small_box_pixels * large_box_ratio, confidence)
    }

    /// Re-check the invariants of a calibration received from outside
    pub fn validated(self) -> Result<Self> {
        Self::new(self.small_box_pixels, self.large_box_pixels, self.confidence)
    }

    /// Mean of several estimates
    pub fn average(calibrations: &[GridCalibration]) -> Option<Self> {
        if calibrations.is_empty() {
            return None;
        }
        let n = calibrations.len() as f64;
        let sum = |f: fn(&GridCalibration) -> f64| calibrations.iter().map(f).sum::<f64>() / n;
        Some(Self {
            small_box_pixels: sum(|c| c.small_box_pixels),
            large_box_pixels: sum(|c| c.large_box_pixels),
            confidence: sum(|c| c.confidence),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibration_rejects_non_positive_spacing() {
        assert!(GridCalibration::new(0.0, 5.0, 1.0).is_err());
        assert!(GridCalibration::new(1.0, -5.0, 1.0).is_err());
        assert!(GridCalibration::new(f64::NAN, 5.0, 1.0).is_err());
    }

    #[test]
    fn test_confidence_is_clamped() {
        let calibration = GridCalibration::new(4.0, 20.0, 1.7).unwrap();
        assert_eq!(calibration.confidence, 1.0);
        let calibration = GridCalibration::new(4.0, 20.0, -0.2).unwrap();
        assert_eq!(calibration.confidence, 0.0);
    }

    #[test]
    fn test_average() {
        let a = GridCalibration::from_small_box(10.0, 5.0, 0.8).unwrap();
        let b = GridCalibration::from_small_box(12.0, 5.0, 0.4).unwrap();
        let mean = GridCalibration::average(&[a, b]).unwrap();
        assert_eq!(mean.small_box_pixels, 11.0);
        assert_eq!(mean.large_box_pixels, 55.0);
        assert!((mean.confidence - 0.6).abs() < 1e-12);
        assert!(GridCalibration::average(&[]).is_none());
    }
}
