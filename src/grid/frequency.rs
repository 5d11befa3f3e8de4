//! Periodicity analysis of 1-D density profiles.

/// Pearson correlation of `profile` with itself shifted by 0..`limit` lags.
///
/// Lags whose overlap has no variance correlate as 0.
pub fn autocorrelation(profile: &[f64], limit: usize) -> Vec<f64> {
    let limit = limit.min(profile.len() / 2);
    (0..limit)
        .map(|lag| pearson(&profile[..profile.len() - lag], &profile[lag..]))
        .collect()
}

/// Pearson correlation coefficient of two equally long slices
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let mean_a = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().sum::<f64>() / n as f64;

    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a[..n].iter().zip(&b[..n]) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    if var_a <= f64::EPSILON || var_b <= f64::EPSILON {
        0.0
    } else {
        cov / (var_a * var_b).sqrt()
    }
}

/// Local maxima of `signal`, excluding both ends. A flat top reports its middle index.
pub fn local_maxima(signal: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    let n = signal.len();
    let mut i = 1;
    while i + 1 < n {
        if signal[i - 1] < signal[i] {
            let mut end = i;
            while end + 1 < n && signal[end + 1] == signal[i] {
                end += 1;
            }
            if end + 1 < n && signal[end + 1] < signal[i] {
                peaks.push((i + end) / 2);
            }
            i = end + 1;
        } else {
            i += 1;
        }
    }
    peaks
}

/// Height of a peak above the higher of the two valleys separating it from
/// taller terrain (or the signal ends) on either side.
pub fn prominence(signal: &[f64], peak: usize) -> f64 {
    let height = signal[peak];

    let mut left_min = height;
    for &value in signal[..peak].iter().rev() {
        if value > height {
            break;
        }
        left_min = left_min.min(value);
    }

    let mut right_min = height;
    for &value in &signal[peak + 1..] {
        if value > height {
            break;
        }
        right_min = right_min.min(value);
    }

    height - left_min.max(right_min)
}

/// First local maximum reaching `min_height` with at least `min_prominence`
pub fn find_first_peak(signal: &[f64], min_height: f64, min_prominence: f64) -> Option<usize> {
    local_maxima(signal)
        .into_iter()
        .find(|&peak| signal[peak] >= min_height && prominence(signal, peak) >= min_prominence)
}

/// Sub-sample peak location from a least-squares parabola fitted over
/// `peak ± radius`. Falls back to the integer index when the fit is not
/// concave or its vertex leaves the window.
pub fn refine_peak(signal: &[f64], peak: usize, radius: usize) -> f64 {
    let radius = radius
        .max(1)
        .min(peak)
        .min(signal.len().saturating_sub(peak + 1));
    if radius == 0 {
        return peak as f64;
    }

    let (mut s0, mut s2, mut s4) = (0.0, 0.0, 0.0);
    let (mut sy, mut sty, mut st2y) = (0.0, 0.0, 0.0);
    for index in peak - radius..=peak + radius {
        let t = index as f64 - peak as f64;
        let y = signal[index];
        s0 += 1.0;
        s2 += t * t;
        s4 += t * t * t * t;
        sy += y;
        sty += t * y;
        st2y += t * t * y;
    }

    let b = sty / s2;
    let c = (s0 * st2y - s2 * sy) / (s0 * s4 - s2 * s2);
    if c >= 0.0 {
        return peak as f64;
    }

    let vertex = -b / (2.0 * c);
    if vertex.abs() > radius as f64 {
        peak as f64
    } else {
        peak as f64 + vertex
    }
}
