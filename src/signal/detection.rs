//! Trace mask detection.
//!
//! The lead image is binarized at its Otsu level. While the mask still shows
//! the periodicity of the paper grid the level is hedged downwards, since
//! grid lines are printed lighter than the trace. Finally rows and columns
//! that are almost entirely active are cleared: a trace is sparse along
//! each column, grid lines are not.

use crate::config::DetectionConfig;
use crate::grid::frequency::{autocorrelation, find_first_peak};
use crate::image::{BinaryImage, GrayscaleImage};
use crate::otsu;
use tracing::debug;

/// Binary mask of the trace ink in a grayscale lead image.
///
/// Columns left without active pixels are not an error; they become missing
/// samples during extraction.
pub fn detect_trace(image: &GrayscaleImage, config: &DetectionConfig) -> BinaryImage {
    let histogram = image.histogram();
    if otsu::is_uniform(&histogram) {
        debug!("Uniform lead image, trace mask is empty");
        return BinaryImage::empty(image.width(), image.height());
    }

    let level = otsu::compute_threshold(&histogram);
    let mut hedge = config.max_hedge;
    let mut mask = image.threshold(hedged_level(level, hedge));

    while grid_is_detectable(&mask, config) {
        let next = hedge - config.hedge_step;
        if next < config.min_hedge - 1e-9 {
            break;
        }
        hedge = next;
        mask = image.threshold(hedged_level(level, hedge));
    }
    debug!(
        otsu_level = level,
        hedge,
        level = hedged_level(level, hedge),
        "Trace binarization level"
    );

    let mask = suppress_grid_lines(&mask, config);
    if config.denoise {
        mask.open(1)
    } else {
        mask
    }
}

fn hedged_level(level: u8, hedge: f64) -> u8 {
    (level as f64 * hedge).floor().clamp(0.0, 255.0) as u8
}

/// Whether the column density of the mask is periodic
pub fn grid_is_detectable(mask: &BinaryImage, config: &DetectionConfig) -> bool {
    let density = mask.column_density();
    let strengths = autocorrelation(&density, density.len() / 2);
    find_first_peak(
        &strengths,
        config.grid_peak_height,
        config.grid_peak_prominence,
    )
    .is_some()
}

/// Clear rows and columns whose active fraction exceeds the configured limits
pub fn suppress_grid_lines(mask: &BinaryImage, config: &DetectionConfig) -> BinaryImage {
    let (width, height) = (mask.width() as f64, mask.height() as f64);

    let rows: Vec<u32> = mask
        .row_density()
        .iter()
        .enumerate()
        .filter(|(_, &count)| count / width > config.max_row_fraction)
        .map(|(y, _)| y as u32)
        .collect();
    let columns: Vec<u32> = mask
        .column_density()
        .iter()
        .enumerate()
        .filter(|(_, &count)| count / height > config.max_column_fraction)
        .map(|(x, _)| x as u32)
        .collect();

    if rows.is_empty() && columns.is_empty() {
        return mask.clone();
    }
    debug!(
        rows = rows.len(),
        columns = columns.len(),
        "Suppressed dense grid lines"
    );
    mask.without_lines(&rows, &columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIDTH: u32 = 200;
    const HEIGHT: u32 = 80;

    fn trace_row(x: u32) -> u32 {
        (40.0 + 20.0 * (x as f64 * std::f64::consts::TAU / 70.0).sin()).round() as u32
    }

    fn on_trace(x: u32, y: u32) -> bool {
        let here = trace_row(x);
        let prev = if x > 0 { trace_row(x - 1) } else { here };
        let (low, high) = (here.min(prev), here.max(prev) + 1);
        y >= low && y <= high
    }

    #[test]
    fn test_uniform_image_gives_empty_mask() {
        let image = GrayscaleImage::from_fn(WIDTH, HEIGHT, |_, _| 255);
        assert!(detect_trace(&image, &DetectionConfig::default()).is_empty());
    }

    #[test]
    fn test_light_grid_is_not_part_of_trace() {
        let image = GrayscaleImage::from_fn(WIDTH, HEIGHT, |x, y| {
            if on_trace(x, y) {
                0
            } else if x % 10 == 0 || y % 10 == 0 {
                200
            } else {
                255
            }
        });
        let mask = detect_trace(&image, &DetectionConfig::default());

        assert!(mask.is_active(15, trace_row(15)));
        assert!(!mask.is_active(30, 5));
        for x in 0..WIDTH {
            for y in 0..HEIGHT {
                if mask.is_active(x, y) {
                    assert!(on_trace(x, y), "({}, {}) is not trace ink", x, y);
                }
            }
        }
    }

    #[test]
    fn test_dotted_grid_removed_by_hedging() {
        // Dotted lines keep every row and column sparse, so only the
        // lowered threshold can drop them
        let image = GrayscaleImage::from_fn(WIDTH, HEIGHT, |x, y| {
            if on_trace(x, y) {
                0
            } else if (x % 5 == 0 && y % 2 == 0) || (y % 5 == 0 && x % 2 == 0) {
                150
            } else {
                255
            }
        });
        let mask = detect_trace(&image, &DetectionConfig::default());

        assert!(mask.active_count() > 0);
        for x in 0..WIDTH {
            for y in 0..HEIGHT {
                if mask.is_active(x, y) {
                    assert!(on_trace(x, y), "({}, {}) is not trace ink", x, y);
                }
            }
        }
    }

    #[test]
    fn test_grid_noise_floor_comes_from_config() {
        let image = GrayscaleImage::from_fn(WIDTH, HEIGHT, |x, y| {
            if on_trace(x, y) {
                0
            } else if (x % 5 == 0 && y % 2 == 0) || (y % 5 == 0 && x % 2 == 0) {
                150
            } else {
                255
            }
        });
        let unreachable = DetectionConfig {
            grid_peak_prominence: 2.0,
            ..DetectionConfig::default()
        };

        let full = image.threshold(otsu::threshold_image(&image));
        assert!(grid_is_detectable(&full, &DetectionConfig::default()));
        assert!(!grid_is_detectable(&full, &unreachable));

        // Without a detectable grid the level is never hedged and the dots stay
        let mask = detect_trace(&image, &unreachable);
        assert!(mask.is_active(5, 0));
    }

    #[test]
    fn test_dark_full_length_grid_lines_are_suppressed() {
        let image = GrayscaleImage::from_fn(WIDTH, HEIGHT, |x, y| {
            if on_trace(x, y) || x % 25 == 0 || y == 70 {
                0
            } else {
                255
            }
        });
        let mask = detect_trace(&image, &DetectionConfig::default());

        assert!(!mask.is_active(50, 10));
        assert!(!mask.is_active(3, 70));
        assert!(mask.is_active(12, trace_row(12)));
    }

    #[test]
    fn test_only_grid_gives_empty_mask() {
        let image =
            GrayscaleImage::from_fn(WIDTH, HEIGHT, |x, y| if x % 8 == 0 || y % 8 == 0 { 90 } else { 250 });
        assert!(detect_trace(&image, &DetectionConfig::default()).is_empty());
    }
}
