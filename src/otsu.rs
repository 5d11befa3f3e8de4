//! Otsu's threshold selection.
//!
//! Reference: N. Otsu, "A Threshold Selection Method from Gray-Level
//! Histograms" (1979). Every split level is evaluated, so the result is
//! deterministic and independent of where a search would start.

use crate::image::GrayscaleImage;

/// Relative tolerance under which two between-class variances count as tied
const TIE_TOLERANCE: f64 = 1e-9;

/// Level in [0, 255] maximizing the between-class variance `w0·w1·(μ0−μ1)²`,
/// where class 0 holds the levels `<= k`.
///
/// When several consecutive levels reach the maximum (the histogram is empty
/// between two modes) the middle of that plateau is returned, so a
/// two-valued image yields a level strictly between its two values.
/// A histogram with a single populated level returns that level.
pub fn compute_threshold(histogram: &[u64; 256]) -> u8 {
    let total: f64 = histogram.iter().map(|&c| c as f64).sum();
    if total == 0.0 {
        return 0;
    }

    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, &count)| level as f64 * count as f64)
        .sum();

    let mut variances = [0.0f64; 256];
    let mut class0_count = 0.0;
    let mut class0_weighted = 0.0;
    for (level, &count) in histogram.iter().enumerate() {
        class0_count += count as f64;
        class0_weighted += level as f64 * count as f64;

        let class1_count = total - class0_count;
        if class0_count == 0.0 || class1_count == 0.0 {
            continue;
        }

        let w0 = class0_count / total;
        let w1 = class1_count / total;
        let mu0 = class0_weighted / class0_count;
        let mu1 = (weighted_total - class0_weighted) / class1_count;
        variances[level] = w0 * w1 * (mu0 - mu1).powi(2);
    }

    let best = variances.iter().cloned().fold(0.0f64, f64::max);
    if best <= 0.0 {
        // Uniform image
        return histogram
            .iter()
            .position(|&count| count > 0)
            .unwrap_or(0) as u8;
    }

    let tolerance = best * TIE_TOLERANCE;
    let first = variances
        .iter()
        .position(|&v| best - v <= tolerance)
        .unwrap_or(0);
    let last = first
        + variances[first..]
            .iter()
            .take_while(|&&v| best - v <= tolerance)
            .count()
        - 1;

    ((first + last) / 2) as u8
}

/// Otsu level of a grayscale image
pub fn threshold_image(image: &GrayscaleImage) -> u8 {
    compute_threshold(&image.histogram())
}

/// True when at most one intensity level is populated
pub fn is_uniform(histogram: &[u64; 256]) -> bool {
    histogram.iter().filter(|&&count| count > 0).count() <= 1
}
