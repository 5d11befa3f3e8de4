//! End-to-end digitization of a scanned ECG page.
//!
//! A call runs these stages, each timed:
//! 1. grayscale conversion and optional deskew (explicit angle or estimate)
//! 2. grid calibration from the override, the grid region, or the lead ROIs
//! 3. per-lead trace detection, extraction, gap filling and scaling
//!
//! Leads are independent: they run in parallel on the rayon pool and a failing
//! lead is reported in [`Digitization::failures`] without affecting the others.

use crate::config::DigitizeConfig;
use crate::error::{DigitizeError, Region, Result};
use crate::extractor::{ExtractionWorkspace, SignalExtractor};
use crate::grid::{detect_grid_mask, estimate_spacing, GridCalibration};
use crate::image::{GrayscaleImage, Image, Rect};
use crate::lead::{LeadGeometry, LeadId};
use crate::rotation::estimate_rotation;
use crate::signal::scaling::scale_signal;
use crate::signal::{detect_trace, CalibratedSignal};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Skews smaller than this are left uncorrected
const MIN_ROTATION_DEGREES: f64 = 0.1;

/// Caller-supplied inputs that take precedence over estimation
#[derive(Debug, Clone, Default)]
pub struct DigitizeOptions {
    /// Known pixel spacing; skips grid estimation entirely
    pub calibration: Option<GridCalibration>,
    /// Area of the page showing clean grid paper
    pub grid_region: Option<Rect>,
    /// Known clockwise skew of the page in degrees
    pub rotation: Option<f64>,
}

/// Where the calibration of a digitization came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationSource {
    Override,
    GridRegion,
    /// Mean of the estimates of every lead ROI
    Leads,
    /// Configured fallback spacing
    Fallback,
}

/// Timing information for a single pipeline step
#[derive(Debug, Clone, Serialize)]
pub struct StepTiming {
    pub name: String,
    pub time_ms: u64,
}

/// A lead that could not be digitized
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadFailure {
    pub lead: LeadId,
    pub error: DigitizeError,
}

/// Result of digitizing one page
#[derive(Debug, Clone, Serialize)]
pub struct Digitization {
    pub method: &'static str,
    pub calibration: GridCalibration,
    pub calibration_source: CalibrationSource,
    /// Clockwise skew removed before cropping, in degrees
    pub rotation: f64,
    /// One signal per successfully digitized lead, in request order
    pub signals: Vec<CalibratedSignal>,
    pub failures: Vec<LeadFailure>,
    /// Non-fatal problems such as a low-confidence calibration
    pub warnings: Vec<DigitizeError>,
    pub total_time_ms: u64,
    pub steps: Vec<StepTiming>,
}

impl Digitization {
    pub fn signal(&self, lead: LeadId) -> Option<&CalibratedSignal> {
        self.signals.iter().find(|s| s.lead == lead)
    }

    pub fn failure(&self, lead: LeadId) -> Option<&DigitizeError> {
        self.failures
            .iter()
            .find(|f| f.lead == lead)
            .map(|f| &f.error)
    }
}

/// Digitization pipeline bound to a configuration and an extraction strategy
pub struct Digitizer {
    config: DigitizeConfig,
    extractor: Arc<dyn SignalExtractor>,
}

impl Digitizer {
    /// Pipeline using the extraction method named in `config`
    pub fn new(config: DigitizeConfig) -> Result<Self> {
        let extractor = config.extraction.method.build(&config.extraction);
        Self::with_extractor(config, extractor)
    }

    pub fn with_extractor(
        config: DigitizeConfig,
        extractor: Arc<dyn SignalExtractor>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, extractor })
    }

    pub fn config(&self) -> &DigitizeConfig {
        &self.config
    }

    pub fn extractor_name(&self) -> &'static str {
        self.extractor.name()
    }

    /// Digitize every lead of `image`.
    ///
    /// Fails as a whole only when no calibration can be established or the
    /// request itself is invalid; lead-level problems land in `failures`.
    pub fn digitize(
        &self,
        image: &Image,
        leads: &[LeadGeometry],
        options: &DigitizeOptions,
    ) -> Result<Digitization> {
        if leads.is_empty() {
            return Err(DigitizeError::invalid_parameter("leads", "empty list"));
        }

        let start = Instant::now();
        let mut steps = Vec::new();

        let gray = run_step("grayscale", &mut steps, || image.to_grayscale());

        let skew = match options.rotation {
            Some(angle) if !angle.is_finite() => {
                return Err(DigitizeError::invalid_parameter("rotation", angle));
            }
            Some(angle) => Some(angle),
            None if self.config.rotation.enabled => run_step("estimate_rotation", &mut steps, || {
                estimate_rotation(&gray, &self.config)
            }),
            None => None,
        };

        let (gray, rotation) = match skew {
            Some(angle) if angle.abs() >= MIN_ROTATION_DEGREES => {
                let background = self.config.rotation.background;
                let rotated = run_step("deskew", &mut steps, || {
                    gray.rotate(-angle as f32, background)
                });
                (rotated, angle)
            }
            _ => (gray, 0.0),
        };

        let (calibration, calibration_source) = run_step("calibration", &mut steps, || {
            self.calibrate(&gray, leads, options)
        })?;

        let mut warnings = Vec::new();
        if calibration_source != CalibrationSource::Override
            && calibration.confidence < self.config.grid.min_confidence
        {
            warn!(
                confidence = calibration.confidence,
                minimum = self.config.grid.min_confidence,
                "Low confidence grid calibration"
            );
            warnings.push(DigitizeError::LowConfidenceCalibration {
                region: Region::Grid,
                confidence: calibration.confidence,
                minimum: self.config.grid.min_confidence,
            });
        }

        let results: Vec<std::result::Result<CalibratedSignal, LeadFailure>> =
            run_step("leads", &mut steps, || {
                leads
                    .par_iter()
                    .map_init(ExtractionWorkspace::default, |workspace, geometry| {
                        self.process_lead(&gray, geometry, &calibration, workspace)
                            .map_err(|error| LeadFailure {
                                lead: geometry.lead,
                                error: error.attributed_to(Region::Lead(geometry.lead)),
                            })
                    })
                    .collect()
            });

        let mut signals = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(signal) => signals.push(signal),
                Err(failure) => {
                    warn!(lead = %failure.lead, error = %failure.error, "Lead digitization failed");
                    failures.push(failure);
                }
            }
        }

        let total_time_ms = start.elapsed().as_millis() as u64;
        info!(
            method = self.extractor.name(),
            leads = leads.len(),
            succeeded = signals.len(),
            failed = failures.len(),
            small_box_pixels = calibration.small_box_pixels,
            rotation,
            total_time_ms,
            "Digitization complete"
        );

        Ok(Digitization {
            method: self.extractor.name(),
            calibration,
            calibration_source,
            rotation,
            signals,
            failures,
            warnings,
            total_time_ms,
            steps,
        })
    }

    fn calibrate(
        &self,
        gray: &GrayscaleImage,
        leads: &[LeadGeometry],
        options: &DigitizeOptions,
    ) -> Result<(GridCalibration, CalibrationSource)> {
        if let Some(calibration) = options.calibration {
            return Ok((calibration.validated()?, CalibrationSource::Override));
        }

        let grid = &self.config.grid;
        let estimate = match options.grid_region {
            Some(rect) => {
                let region = gray
                    .crop(rect)
                    .map_err(|e| e.attributed_to(Region::Grid))?;
                let mask = detect_grid_mask(&region, grid, &self.config.detection);
                estimate_spacing(&mask, grid).map(|c| (c, CalibrationSource::GridRegion))
            }
            None => {
                let estimates: Vec<GridCalibration> = leads
                    .par_iter()
                    .filter_map(|geometry| {
                        let roi = gray.crop(geometry.roi).ok()?;
                        let mask = detect_grid_mask(&roi, grid, &self.config.detection);
                        estimate_spacing(&mask, grid)
                    })
                    .collect();
                debug!(estimates = estimates.len(), "Per-lead grid estimates");
                GridCalibration::average(&estimates).map(|c| (c, CalibrationSource::Leads))
            }
        };

        if let Some(found) = estimate {
            return Ok(found);
        }

        match grid.fallback_small_box_pixels {
            Some(pixels) => {
                let calibration = GridCalibration::from_small_box(pixels, grid.large_box_ratio, 0.0)?;
                Ok((calibration, CalibrationSource::Fallback))
            }
            None => Err(DigitizeError::CalibrationUnavailable {
                region: Region::Grid,
                reason: "no periodic grid found and no fallback spacing configured".to_string(),
            }),
        }
    }

    fn process_lead(
        &self,
        gray: &GrayscaleImage,
        geometry: &LeadGeometry,
        calibration: &GridCalibration,
        workspace: &mut ExtractionWorkspace,
    ) -> Result<CalibratedSignal> {
        let roi = gray.crop(geometry.roi)?;
        let mask = detect_trace(&roi, &self.config.detection);
        let signal = self.extractor.extract_with(&mask, workspace)?;
        let rows = signal.interpolated()?;

        debug!(
            lead = %geometry.lead,
            columns = rows.len(),
            missing = signal.missing_count(),
            "Lead extracted"
        );

        Ok(scale_signal(
            geometry.lead,
            &rows,
            signal.missing_count(),
            geometry.start_time,
            calibration,
            &self.config.scale,
        ))
    }
}

/// Digitize with a one-off pipeline built from `config`
pub fn digitize(
    image: &Image,
    leads: &[LeadGeometry],
    options: &DigitizeOptions,
    config: &DigitizeConfig,
) -> Result<Digitization> {
    Digitizer::new(config.clone())?.digitize(image, leads, options)
}

fn run_step<T>(name: &str, timings: &mut Vec<StepTiming>, step_fn: impl FnOnce() -> T) -> T {
    let step_start = Instant::now();
    let result = step_fn();
    timings.push(StepTiming {
        name: name.to_string(),
        time_ms: step_start.elapsed().as_millis() as u64,
    });
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::ExtractionMethod;

    fn page() -> Image {
        Image::from(image::GrayImage::from_fn(120, 60, |x, y| {
            let trace = 30 + (x / 20) % 2 * 6;
            if y == trace || y == trace + 1 {
                image::Luma([0])
            } else if x % 6 == 0 || y % 6 == 0 {
                image::Luma([200])
            } else {
                image::Luma([255])
            }
        }))
    }

    fn override_options() -> DigitizeOptions {
        DigitizeOptions {
            calibration: Some(GridCalibration::from_small_box(6.0, 5.0, 1.0).unwrap()),
            ..DigitizeOptions::default()
        }
    }

    #[test]
    fn test_empty_lead_list_is_rejected() {
        let err = digitize(&page(), &[], &override_options(), &DigitizeConfig::default())
            .unwrap_err();
        assert!(matches!(err, DigitizeError::InvalidParameter { .. }));
    }

    #[test]
    fn test_override_calibration_is_used_verbatim() {
        let leads = [LeadGeometry::new(LeadId::II, Rect::new(0, 0, 120, 60))];
        let result = digitize(&page(), &leads, &override_options(), &DigitizeConfig::default())
            .unwrap();

        assert_eq!(result.calibration_source, CalibrationSource::Override);
        assert_eq!(result.calibration.small_box_pixels, 6.0);
        assert!(result.warnings.is_empty());
        assert_eq!(result.signals.len(), 1);
        assert_eq!(result.signals[0].samples.len(), 120);
        assert_eq!(result.method, "viterbi");
    }

    #[test]
    fn test_steps_are_timed() {
        let leads = [LeadGeometry::new(LeadId::I, Rect::new(0, 0, 60, 60))];
        let options = DigitizeOptions {
            rotation: Some(2.0),
            ..override_options()
        };
        let result = digitize(&page(), &leads, &options, &DigitizeConfig::default()).unwrap();

        let names: Vec<&str> = result.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["grayscale", "deskew", "calibration", "leads"]);
        assert_eq!(result.rotation, 2.0);
    }

    #[test]
    fn test_calibration_failure_without_fallback() {
        let blank = Image::from(image::GrayImage::from_pixel(50, 50, image::Luma([255])));
        let leads = [LeadGeometry::new(LeadId::I, Rect::new(0, 0, 50, 50))];
        let err = digitize(&blank, &leads, &DigitizeOptions::default(), &DigitizeConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            DigitizeError::CalibrationUnavailable {
                region: Region::Grid,
                ..
            }
        ));
    }

    #[test]
    fn test_fallback_calibration_warns() {
        let blank = Image::from(image::GrayImage::from_pixel(50, 50, image::Luma([255])));
        let leads = [LeadGeometry::new(LeadId::I, Rect::new(0, 0, 50, 50))];
        let mut config = DigitizeConfig::default();
        config.grid.fallback_small_box_pixels = Some(8.0);

        let result = digitize(&blank, &leads, &DigitizeOptions::default(), &config).unwrap();
        assert_eq!(result.calibration_source, CalibrationSource::Fallback);
        assert_eq!(result.calibration.large_box_pixels, 40.0);
        assert!(matches!(
            result.warnings.as_slice(),
            [DigitizeError::LowConfidenceCalibration { .. }]
        ));
        assert!(matches!(
            result.failure(LeadId::I),
            Some(DigitizeError::NoSignalDetected {
                region: Region::Lead(LeadId::I)
            })
        ));
    }

    #[test]
    fn test_grid_region_outside_image() {
        let leads = [LeadGeometry::new(LeadId::I, Rect::new(0, 0, 60, 60))];
        let options = DigitizeOptions {
            grid_region: Some(Rect::new(100, 0, 50, 50)),
            ..DigitizeOptions::default()
        };
        let err = digitize(&page(), &leads, &options, &DigitizeConfig::default()).unwrap_err();
        assert_eq!(err.region(), Some(Region::Grid));
        assert_eq!(err.code(), "INVALID_GEOMETRY");
    }

    #[test]
    fn test_naive_method_from_config() {
        let mut config = DigitizeConfig::default();
        config.extraction.method = ExtractionMethod::Naive;
        let digitizer = Digitizer::new(config).unwrap();
        assert_eq!(digitizer.extractor_name(), "naive");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = DigitizeConfig::default();
        config.scale.mm_per_second = 0.0;
        assert!(Digitizer::new(config).is_err());
    }
}
