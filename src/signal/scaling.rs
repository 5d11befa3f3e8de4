//! Conversion of row positions to millivolts and column indices to seconds.

use crate::config::ScaleConfig;
use crate::grid::GridCalibration;
use crate::lead::LeadId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How the isoelectric (0 mV) row is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaselineMethod {
    /// Most frequent whole row
    #[default]
    Mode,
    Median,
    /// Row 0 of the lead ROI
    None,
}

/// One calibrated sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Seconds
    pub time: f64,
    /// Millivolts
    pub voltage: f64,
}

/// Digitized signal of one lead
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibratedSignal {
    pub lead: LeadId,
    /// Seconds between consecutive samples
    pub sampling_period: f64,
    /// Row (in ROI coordinates) mapped to 0 mV
    pub baseline_row: f64,
    /// Columns filled by interpolation
    pub missing_samples: usize,
    pub samples: Vec<Sample>,
}

impl CalibratedSignal {
    pub fn voltages(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.voltage).collect()
    }

    pub fn times(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.time).collect()
    }
}

pub fn millivolts_per_pixel(calibration: &GridCalibration, scale: &ScaleConfig) -> f64 {
    scale.small_box_mm / (calibration.small_box_pixels * scale.mm_per_millivolt)
}

pub fn seconds_per_pixel(calibration: &GridCalibration, scale: &ScaleConfig) -> f64 {
    scale.small_box_mm / (calibration.small_box_pixels * scale.mm_per_second)
}

/// Row of the isoelectric line
pub fn baseline(rows: &[f64], method: BaselineMethod) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    match method {
        BaselineMethod::Mode => {
            let mut counts: HashMap<i64, usize> = HashMap::new();
            for row in rows {
                *counts.entry(row.round() as i64).or_default() += 1;
            }
            counts
                .into_iter()
                .max_by_key(|&(row, count)| (count, std::cmp::Reverse(row)))
                .map(|(row, _)| row as f64)
                .unwrap_or(0.0)
        }
        BaselineMethod::Median => {
            let mut sorted = rows.to_vec();
            sorted.sort_by(f64::total_cmp);
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 0 {
                (sorted[mid - 1] + sorted[mid]) / 2.0
            } else {
                sorted[mid]
            }
        }
        BaselineMethod::None => 0.0,
    }
}

/// Scale gap-free row positions into (time, voltage) samples.
/// Rows grow downwards, so a trace moving up is a positive voltage.
pub fn scale_signal(
    lead: LeadId,
    rows: &[f64],
    missing_samples: usize,
    start_time: f64,
    calibration: &GridCalibration,
    scale: &ScaleConfig,
) -> CalibratedSignal {
    let millivolts = millivolts_per_pixel(calibration, scale);
    let period = seconds_per_pixel(calibration, scale);
    let baseline_row = baseline(rows, scale.baseline);

    let samples = rows
        .iter()
        .enumerate()
        .map(|(column, row)| Sample {
            time: start_time + column as f64 * period,
            voltage: -(row - baseline_row) * millivolts,
        })
        .collect();

    CalibratedSignal {
        lead,
        sampling_period: period,
        baseline_row,
        missing_samples,
        samples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn calibration(small: f64) -> GridCalibration {
        GridCalibration::from_small_box(small, 5.0, 1.0).unwrap()
    }

    #[test]
    fn test_standard_paper_ratios() {
        // 10 px per mm at 25 mm/s and 10 mm/mV
        let scale = ScaleConfig::default();
        assert_relative_eq!(millivolts_per_pixel(&calibration(10.0), &scale), 0.01);
        assert_relative_eq!(seconds_per_pixel(&calibration(10.0), &scale), 0.004);
    }

    #[test]
    fn test_baseline_methods() {
        let rows = [50.2, 49.8, 50.0, 30.0, 70.0, 50.1, 10.0];
        assert_eq!(baseline(&rows, BaselineMethod::Mode), 50.0);
        assert_eq!(baseline(&rows, BaselineMethod::Median), 50.0);
        assert_eq!(baseline(&rows, BaselineMethod::None), 0.0);
        assert_eq!(baseline(&[], BaselineMethod::Mode), 0.0);
    }

    #[test]
    fn test_scale_signal_inverts_rows_and_offsets_time() {
        let scale = ScaleConfig {
            baseline: BaselineMethod::Mode,
            ..ScaleConfig::default()
        };
        let rows = [40.0, 40.0, 30.0, 40.0, 50.0];
        let signal = scale_signal(LeadId::II, &rows, 1, 2.5, &calibration(10.0), &scale);

        assert_eq!(signal.lead, LeadId::II);
        assert_eq!(signal.baseline_row, 40.0);
        assert_eq!(signal.missing_samples, 1);
        assert_relative_eq!(signal.samples[2].voltage, 0.1);
        assert_relative_eq!(signal.samples[4].voltage, -0.1);
        assert_relative_eq!(signal.samples[0].time, 2.5);
        assert_relative_eq!(signal.samples[4].time, 2.5 + 4.0 * 0.004);
    }
}
