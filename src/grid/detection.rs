//! Grid line mask detection.
//!
//! Grid lines are faint, so they are picked up with a fixed high threshold
//! after normalizing the paper to white rather than with the Otsu level used
//! for the trace. The trace itself is then cut out of that mask.

use crate::config::{DetectionConfig, GridConfig};
use crate::image::{BinaryImage, GrayscaleImage};
use crate::signal::detection::detect_trace;
use tracing::debug;

/// Every pixel darker than `below` once the most common level is mapped to white
pub fn all_dark_pixels(image: &GrayscaleImage, below: u8) -> BinaryImage {
    image.white_point_adjusted().to_binary(|value| value < below)
}

/// Binary mask isolating the paper grid lines
pub fn detect_grid_mask(
    image: &GrayscaleImage,
    grid: &GridConfig,
    detection: &DetectionConfig,
) -> BinaryImage {
    let dark = all_dark_pixels(image, grid.dark_threshold);

    let mask = if grid.remove_trace {
        let trace = detect_trace(image, detection).dilate(grid.trace_dilation);
        dark.subtract(&trace)
    } else {
        dark
    };

    let mask = if grid.erode { mask.erode(1) } else { mask };
    debug!(active = mask.active_count(), "Grid mask detected");
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::estimate_spacing;

    fn ecg_like(width: u32, height: u32, period: u32) -> GrayscaleImage {
        GrayscaleImage::from_fn(width, height, |x, y| {
            let trace = (height as f64 / 2.0
                + 15.0 * (x as f64 * std::f64::consts::TAU / 60.0).sin())
            .round() as u32;
            if y == trace || y == trace + 1 {
                10
            } else if x % period == 0 || y % period == 0 {
                190
            } else {
                245
            }
        })
    }

    #[test]
    fn test_grid_mask_keeps_lines_and_drops_trace() {
        let image = ecg_like(240, 100, 8);
        let mask = detect_grid_mask(&image, &GridConfig::default(), &DetectionConfig::default());

        // Grid pixel far from the trace
        assert!(mask.is_active(8, 3));
        // Paper between lines
        assert!(!mask.is_active(4, 3));
        // Trace pixel
        let trace = (50.0 + 15.0 * (30.0f64 * std::f64::consts::TAU / 60.0).sin()).round() as u32;
        assert!(!mask.is_active(30, trace));
    }

    #[test]
    fn test_grid_mask_spacing() {
        let image = ecg_like(320, 120, 9);
        let mask = detect_grid_mask(&image, &GridConfig::default(), &DetectionConfig::default());
        let calibration = estimate_spacing(&mask, &GridConfig::default()).unwrap();
        assert!((calibration.small_box_pixels - 9.0).abs() <= 1.0);
    }

    #[test]
    fn test_all_dark_pixels_adjusts_white_point() {
        // Grey paper at 200 with lines at 160 still separates after adjustment
        let image = GrayscaleImage::from_fn(50, 50, |x, _| if x % 10 == 0 { 160 } else { 200 });
        let mask = all_dark_pixels(&image, 230);
        assert!(mask.is_active(10, 7));
        assert!(!mask.is_active(11, 7));
    }
}
