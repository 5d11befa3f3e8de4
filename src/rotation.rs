//! Skew estimation from the straight lines of the paper grid.
//!
//! Angles follow the image convention used by [`GrayscaleImage::rotate`]:
//! a positive skew means the content is turned clockwise, so deskewing is a
//! rotation by the negated skew.

use crate::config::DigitizeConfig;
use crate::grid::detect_grid_mask;
use crate::image::{BinaryImage, GrayscaleImage};
use imageproc::hough::{detect_lines, LineDetectionOptions};
use tracing::debug;

/// Non-maximum suppression radius in the Hough accumulator
const SUPPRESSION_RADIUS: u32 = 8;
/// Half-width and step of the projection search around the Hough estimate
const REFINE_SPAN_DEGREES: f64 = 1.0;
const REFINE_STEP_DEGREES: f64 = 0.1;

/// Estimate the clockwise skew of `image` in degrees.
///
/// Returns `None` when fewer than two grid lines near an axis are found.
pub fn estimate_rotation(image: &GrayscaleImage, config: &DigitizeConfig) -> Option<f64> {
    let mask = detect_grid_mask(image, &config.grid, &config.detection);
    let rotation = &config.rotation;

    let vote_threshold = ((image.width() as f64 * rotation.hough_threshold_fraction) as u32).max(1);
    let lines = detect_lines(
        mask.as_buffer(),
        LineDetectionOptions {
            vote_threshold,
            suppression_radius: SUPPRESSION_RADIUS,
        },
    );

    let offsets: Vec<f64> = lines
        .iter()
        .map(|line| axis_offset(line.angle_in_degrees as f64))
        .filter(|offset| offset.abs() < rotation.max_skew_degrees)
        .collect();

    debug!(
        lines = lines.len(),
        candidates = offsets.len(),
        vote_threshold,
        "Hough lines detected"
    );

    if offsets.len() < 2 {
        return None;
    }

    let coarse = dominant_angle(&offsets, rotation.cluster_tolerance_degrees)?;
    let estimate = if rotation.refine {
        refine_angle(&mask, coarse)
    } else {
        coarse
    };

    debug!(coarse, estimate, "Rotation estimated");
    Some(estimate)
}

/// Offset of a Hough normal angle from the nearest axis, in (-45, 45]
pub fn axis_offset(normal_degrees: f64) -> f64 {
    let offset = normal_degrees.rem_euclid(90.0);
    if offset > 45.0 {
        offset - 90.0
    } else {
        offset
    }
}

/// Mean of the largest group of angles lying within `tolerance` of a neighbour.
/// Equal-sized groups prefer the one closest to zero.
pub fn dominant_angle(angles: &[f64], tolerance: f64) -> Option<f64> {
    let mut sorted = angles.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mut clusters: Vec<Vec<f64>> = Vec::new();
    for angle in sorted {
        match clusters.last_mut() {
            Some(cluster) if cluster.last().is_some_and(|last| angle - last <= tolerance) => {
                cluster.push(angle)
            }
            _ => clusters.push(vec![angle]),
        }
    }

    clusters
        .iter()
        .map(|cluster| cluster.iter().sum::<f64>() / cluster.len() as f64)
        .zip(clusters.iter().map(Vec::len))
        .max_by(|(mean_a, len_a), (mean_b, len_b)| {
            len_a
                .cmp(len_b)
                .then_with(|| mean_b.abs().total_cmp(&mean_a.abs()))
        })
        .map(|(mean, _)| mean)
}

/// Search around `coarse` for the angle whose horizontal projection of the
/// mask has the highest variance
fn refine_angle(mask: &BinaryImage, coarse: f64) -> f64 {
    let points: Vec<(f64, f64)> = (0..mask.height())
        .flat_map(|y| (0..mask.width()).map(move |x| (x, y)))
        .filter(|&(x, y)| mask.is_active(x, y))
        .map(|(x, y)| (x as f64, y as f64))
        .collect();

    let mut best_angle = coarse;
    let mut best_variance = projection_variance(&points, mask.width(), mask.height(), coarse);

    let steps = (2.0 * REFINE_SPAN_DEGREES / REFINE_STEP_DEGREES).round() as i32;
    for step in 0..=steps {
        let angle = coarse - REFINE_SPAN_DEGREES + step as f64 * REFINE_STEP_DEGREES;
        let variance = projection_variance(&points, mask.width(), mask.height(), angle);
        if variance > best_variance {
            best_variance = variance;
            best_angle = angle;
        }
    }

    best_angle
}

/// Variance of the per-row counts of `points` after undoing a clockwise
/// rotation by `angle_degrees` about the image center
fn projection_variance(points: &[(f64, f64)], width: u32, height: u32, angle_degrees: f64) -> f64 {
    let angle = angle_degrees.to_radians();
    let (sin_a, cos_a) = angle.sin_cos();
    let cx = width as f64 / 2.0;
    let cy = height as f64 / 2.0;

    let mut row_counts = vec![0u32; height as usize];
    for &(x, y) in points {
        let dx = x - cx;
        let dy = y - cy;
        let new_y = (dy * cos_a - dx * sin_a + cy).floor();
        if new_y >= 0.0 && new_y < height as f64 {
            row_counts[new_y as usize] += 1;
        }
    }

    let mean = row_counts.iter().sum::<u32>() as f64 / row_counts.len().max(1) as f64;
    row_counts
        .iter()
        .map(|&count| (count as f64 - mean).powi(2))
        .sum::<f64>()
        / row_counts.len().max(1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Grid paper turned clockwise by `skew` degrees, drawn analytically
    fn skewed_grid(width: u32, height: u32, period: f64, skew: f64) -> GrayscaleImage {
        let (sin_s, cos_s) = skew.to_radians().sin_cos();
        let cx = width as f64 / 2.0;
        let cy = height as f64 / 2.0;
        GrayscaleImage::from_fn(width, height, |x, y| {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            let u = dx * cos_s + dy * sin_s;
            let v = -dx * sin_s + dy * cos_s;
            if u.rem_euclid(period) < 1.0 || v.rem_euclid(period) < 1.0 {
                150
            } else {
                250
            }
        })
    }

    #[test]
    fn test_axis_offset() {
        assert_eq!(axis_offset(93.0), 3.0);
        assert_eq!(axis_offset(3.0), 3.0);
        assert_eq!(axis_offset(88.0), -2.0);
        assert_eq!(axis_offset(178.0), -2.0);
        assert_eq!(axis_offset(90.0), 0.0);
    }

    #[test]
    fn test_dominant_angle_prefers_largest_cluster() {
        let angles = [3.0, 2.0, 3.0, -20.0, 2.5, 15.0];
        assert_eq!(dominant_angle(&angles, 2.0), Some(2.625));
        assert_eq!(dominant_angle(&[4.0, -1.0], 1.0), Some(-1.0));
        assert_eq!(dominant_angle(&[], 1.0), None);
    }

    #[test]
    fn test_straight_grid_has_no_skew() {
        let image = skewed_grid(300, 200, 20.0, 0.0);
        let angle = estimate_rotation(&image, &DigitizeConfig::default()).unwrap();
        assert!(angle.abs() < 0.3, "expected ~0, got {angle}");
    }

    #[test]
    fn test_clockwise_skew_is_detected() {
        let image = skewed_grid(300, 200, 20.0, 3.0);
        let angle = estimate_rotation(&image, &DigitizeConfig::default()).unwrap();
        assert!((angle - 3.0).abs() < 0.3, "expected ~3, got {angle}");
    }

    #[test]
    fn test_counter_clockwise_skew_is_detected() {
        let image = skewed_grid(300, 200, 20.0, -2.0);
        let angle = estimate_rotation(&image, &DigitizeConfig::default()).unwrap();
        assert!((angle + 2.0).abs() < 0.3, "expected ~-2, got {angle}");
    }

    #[test]
    fn test_blank_image_has_no_estimate() {
        let image = GrayscaleImage::from_fn(100, 80, |_, _| 255);
        assert_eq!(estimate_rotation(&image, &DigitizeConfig::default()), None);
    }
}
