//! Grid spacing estimation via autocorrelation of the grid mask's density profiles.

use super::frequency::{autocorrelation, find_first_peak, local_maxima, refine_peak};
use super::GridCalibration;
use crate::config::GridConfig;
use crate::image::BinaryImage;
use tracing::debug;

/// Two axis estimates closer than this (relative) are averaged
const AXIS_AGREEMENT: f64 = 0.1;
/// Search window around the expected large-box lag, relative
const LARGE_BOX_TOLERANCE: f64 = 0.2;

/// Spacing estimate from one density profile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisPeriod {
    pub small: f64,
    pub large: f64,
    /// Autocorrelation at the small-box lag
    pub strength: f64,
}

/// Estimate small and large grid box sizes from a grid mask.
///
/// Returns `None` when neither the row nor the column profile has an
/// autocorrelation peak above the noise floor.
pub fn estimate_spacing(mask: &BinaryImage, config: &GridConfig) -> Option<GridCalibration> {
    let column = estimate_axis_period(&mask.column_density(), config);
    let row = estimate_axis_period(&mask.row_density(), config);
    debug!(?column, ?row, "Grid periods per axis");

    let chosen = match (column, row) {
        (Some(c), Some(r)) => {
            let relative = (c.small - r.small).abs() / c.small.max(r.small);
            if relative <= AXIS_AGREEMENT {
                let total = c.strength + r.strength;
                let weigh = |a: f64, b: f64| (a * c.strength + b * r.strength) / total;
                AxisPeriod {
                    small: weigh(c.small, r.small),
                    large: weigh(c.large, r.large),
                    strength: c.strength.max(r.strength),
                }
            } else if c.strength >= r.strength {
                c
            } else {
                r
            }
        }
        (Some(c), None) => c,
        (None, Some(r)) => r,
        (None, None) => return None,
    };

    GridCalibration::new(chosen.small, chosen.large, chosen.strength).ok()
}

/// Period of the grid along one axis of the mask
pub fn estimate_axis_period(profile: &[f64], config: &GridConfig) -> Option<AxisPeriod> {
    if profile.len() < 6 {
        return None;
    }

    let strengths = autocorrelation(profile, profile.len() / 2);
    let peak = find_first_peak(&strengths, config.min_peak_height, config.min_peak_prominence)?;
    let small = refine_peak(&strengths, peak, config.interpolation_radius);
    let large = estimate_large_period(&strengths, small, config)
        .unwrap_or(small * config.large_box_ratio);

    Some(AxisPeriod {
        small,
        large,
        strength: strengths[peak],
    })
}

/// Strongest autocorrelation peak near `large_box_ratio` times the small period
fn estimate_large_period(strengths: &[f64], small: f64, config: &GridConfig) -> Option<f64> {
    let expected = small * config.large_box_ratio;
    let low = (expected * (1.0 - LARGE_BOX_TOLERANCE)).floor() as usize;
    let high = (expected * (1.0 + LARGE_BOX_TOLERANCE)).ceil() as usize;
    let distance = |lag: usize| (lag as f64 - expected).abs();

    local_maxima(strengths)
        .into_iter()
        .filter(|&lag| lag >= low && lag <= high && strengths[lag] >= config.min_peak_height)
        .max_by(|&a, &b| {
            strengths[a]
                .total_cmp(&strengths[b])
                .then_with(|| distance(b).total_cmp(&distance(a)))
        })
        .map(|lag| refine_peak(strengths, lag, config.interpolation_radius))
}
