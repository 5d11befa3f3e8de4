//! Dynamic-programming trace extraction.
//!
//! Every row of every column is a hidden state. Moving between adjacent
//! columns costs a convex function of the row jump (quadratic up to a knee,
//! linear after it, hard limit at `max_jump`) and every state pays an emission
//! cost equal to its distance from the nearest ink in that column, capped at
//! `max_emission_distance`. Columns without ink emit nothing, so the path
//! coasts through gaps on transition cost alone.
//!
//! The recovered path picks one ink run per column. Each run centre is then
//! refined to a sub-pixel row by a least-squares quadratic fitted over the
//! run centres of the neighbouring path columns, which averages out the
//! one-pixel quantisation of the stroke. A column where the path leaves the
//! ink (for example a blanked column holding only an isolated speckle) is
//! reported missing and filled later by interpolation.

use crate::config::ViterbiConfig;
use crate::error::{DigitizeError, Region, Result};
use crate::extractor::{ExtractionWorkspace, SignalExtractor};
use crate::image::BinaryImage;
use crate::signal::Signal;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ViterbiExtractor {
    config: ViterbiConfig,
}

impl ViterbiExtractor {
    pub fn new(config: ViterbiConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ViterbiConfig {
        &self.config
    }

    /// Cost of moving `jump` rows between adjacent columns
    pub fn transition_cost(&self, jump: usize) -> f64 {
        let weight = self.config.jump_weight;
        let knee = self.config.jump_knee as f64;
        let jump_f = jump as f64;
        if jump <= self.config.jump_knee as usize {
            weight * jump_f * jump_f
        } else {
            weight * (2.0 * knee * jump_f - knee * knee)
        }
    }

    fn fill_emission(&self, runs: &[(u32, u32)], emission: &mut [f64]) {
        if runs.is_empty() {
            emission.fill(0.0);
            return;
        }
        let cap = self.config.max_emission_distance as f64;
        for (row, slot) in emission.iter_mut().enumerate() {
            let row = row as u32;
            let distance = runs
                .iter()
                .map(|&(start, end)| {
                    if row < start {
                        start - row
                    } else if row > end {
                        row - end
                    } else {
                        0
                    }
                })
                .min()
                .unwrap_or(0);
            *slot = self.config.emission_weight * (distance as f64).min(cap);
        }
    }
}

impl SignalExtractor for ViterbiExtractor {
    fn name(&self) -> &'static str {
        "viterbi"
    }

    fn description(&self) -> &'static str {
        "Minimum-cost smooth path through the trace mask"
    }

    fn extract_with(
        &self,
        mask: &BinaryImage,
        workspace: &mut ExtractionWorkspace,
    ) -> Result<Signal> {
        if mask.is_empty() {
            return Err(DigitizeError::NoSignalDetected {
                region: Region::Mask,
            });
        }

        let width = mask.width() as usize;
        let height = mask.height() as usize;
        let window = (self.config.max_jump as usize).min(height.saturating_sub(1));
        let jump_costs: Vec<f64> = (0..=window).map(|j| self.transition_cost(j)).collect();
        let runs: Vec<Vec<(u32, u32)>> = (0..mask.width()).map(|x| mask.column_runs(x)).collect();

        workspace.reset(width, height);

        self.fill_emission(&runs[0], &mut workspace.emission);
        workspace.cost[..height].copy_from_slice(&workspace.emission);

        // Forward pass, one column at a time
        for x in 1..width {
            self.fill_emission(&runs[x], &mut workspace.emission);

            let (done, rest) = workspace.cost.split_at_mut(x * height);
            let previous = &done[(x - 1) * height..];
            let current = &mut rest[..height];
            let back = &mut workspace.back[x * height..(x + 1) * height];

            for row in 0..height {
                // Smallest jump wins ties
                let mut best = previous[row] + jump_costs[0];
                let mut best_row = row;
                for (jump, step) in jump_costs.iter().enumerate().skip(1) {
                    if row >= jump {
                        let candidate = previous[row - jump] + step;
                        if candidate < best {
                            best = candidate;
                            best_row = row - jump;
                        }
                    }
                    if row + jump < height {
                        let candidate = previous[row + jump] + step;
                        if candidate < best {
                            best = candidate;
                            best_row = row + jump;
                        }
                    }
                }
                current[row] = best + workspace.emission[row];
                back[row] = best_row as u32;
            }
        }

        // Backtrack from the cheapest end state
        let last = &workspace.cost[(width - 1) * height..width * height];
        let mut row = last
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(index, _)| index)
            .unwrap_or(0);

        let mut path = vec![0usize; width];
        for x in (0..width).rev() {
            path[x] = row;
            if x > 0 {
                row = workspace.back[x * height + row] as usize;
            }
        }

        let samples: Vec<Option<f64>> = path
            .iter()
            .zip(&runs)
            .map(|(&row, column_runs)| {
                column_runs
                    .iter()
                    .find(|&&(start, end)| (start as usize..=end as usize).contains(&row))
                    .map(|&(start, end)| (start + end) as f64 / 2.0)
            })
            .collect();

        let signal = Signal::new(smooth_along_path(
            &samples,
            self.config.smoothing_radius as usize,
        ));
        debug!(
            width,
            height,
            window,
            missing = signal.missing_count(),
            "Viterbi path extracted"
        );

        if signal.missing_count() == signal.len() {
            return Err(DigitizeError::NoSignalDetected {
                region: Region::Mask,
            });
        }
        Ok(signal)
    }
}

/// Replace every present sample by the value at its own column of a
/// quadratic fitted to the present samples within `radius` columns.
/// Samples with fewer than four supporting points are kept as they are.
fn smooth_along_path(samples: &[Option<f64>], radius: usize) -> Vec<Option<f64>> {
    if radius == 0 {
        return samples.to_vec();
    }
    samples
        .iter()
        .enumerate()
        .map(|(x, sample)| {
            let center = (*sample)?;
            let start = x.saturating_sub(radius);
            let end = (x + radius).min(samples.len() - 1);
            Some(local_quadratic(&samples[start..=end], x - start).unwrap_or(center))
        })
        .collect()
}

/// Intercept at `origin` of the least-squares parabola through the present
/// samples of `window`, or `None` when the fit is underdetermined.
fn local_quadratic(window: &[Option<f64>], origin: usize) -> Option<f64> {
    let mut s = [0.0f64; 5];
    let mut t = [0.0f64; 3];
    let mut points = 0;
    for (index, value) in window.iter().enumerate() {
        let Some(y) = *value else { continue };
        let k = index as f64 - origin as f64;
        let mut power = 1.0;
        for (order, sum) in s.iter_mut().enumerate() {
            *sum += power;
            if order < 3 {
                t[order] += y * power;
            }
            power *= k;
        }
        points += 1;
    }
    if points < 4 {
        return None;
    }

    let det3 = |m: [[f64; 3]; 3]| {
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    };
    let normal = [[s[0], s[1], s[2]], [s[1], s[2], s[3]], [s[2], s[3], s[4]]];
    let det = det3(normal);
    if det.abs() < 1e-9 {
        return None;
    }
    // Cramer's rule for the constant term
    let numerator = det3([
        [t[0], s[1], s[2]],
        [t[1], s[2], s[3]],
        [t[2], s[3], s[4]],
    ]);
    Some(numerator / det)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::NaiveExtractor;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use std::f64::consts::TAU;

    fn extractor() -> ViterbiExtractor {
        ViterbiExtractor::new(ViterbiConfig::default())
    }

    fn assert_all_near(signal: &Signal, row: f64) {
        for sample in signal.samples() {
            assert_abs_diff_eq!(sample.unwrap(), row, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_transition_cost_is_convex_then_linear() {
        let viterbi = extractor();
        assert_abs_diff_eq!(viterbi.transition_cost(0), 0.0);
        assert_abs_diff_eq!(viterbi.transition_cost(2), 0.4, epsilon = 1e-12);
        assert_abs_diff_eq!(viterbi.transition_cost(3), 0.9, epsilon = 1e-12);
        assert_abs_diff_eq!(viterbi.transition_cost(5), 2.1, epsilon = 1e-12);
    }

    #[test]
    fn test_straight_line() {
        let mask = BinaryImage::from_fn(20, 15, |_, y| y == 7);
        let signal = extractor().extract(&mask).unwrap();

        assert_eq!(signal.len(), 20);
        assert_all_near(&signal, 7.0);
    }

    #[test]
    fn test_thick_stroke_reports_run_center() {
        let mask = BinaryImage::from_fn(10, 30, |_, y| (10..=13).contains(&y));
        let signal = extractor().extract(&mask).unwrap();
        assert_all_near(&signal, 11.5);
    }

    #[test]
    fn test_gap_column_is_missing_and_interpolates_linearly() {
        let mask = BinaryImage::from_fn(9, 20, |x, y| match x {
            4 => false,
            0..=3 => y == 8,
            _ => y == 10,
        });
        let signal = extractor().extract(&mask).unwrap();

        assert_eq!(signal.samples()[4], None);
        assert_eq!(signal.missing_count(), 1);
        let filled = signal.interpolated().unwrap();
        assert_abs_diff_eq!(filled[4], (filled[3] + filled[5]) / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_speckles_are_ignored() {
        let mask = BinaryImage::from_fn(40, 50, |x, y| match x {
            10 => y == 30 || y == 5,
            20 => y == 5,
            _ => y == 30,
        });

        let viterbi = extractor().extract(&mask).unwrap();
        assert_abs_diff_eq!(viterbi.samples()[10].unwrap(), 30.0, epsilon = 1e-9);
        assert_eq!(viterbi.samples()[20], None);

        let naive = NaiveExtractor::new().extract(&mask).unwrap();
        assert_eq!(naive.samples()[10], Some(17.5));
        assert_eq!(naive.samples()[20], Some(5.0));
    }

    #[test]
    fn test_empty_mask_is_no_signal() {
        let err = extractor().extract(&BinaryImage::empty(30, 30)).unwrap_err();
        assert_eq!(
            err,
            DigitizeError::NoSignalDetected {
                region: Region::Mask
            }
        );
    }

    #[test]
    fn test_single_row_mask() {
        let mask = BinaryImage::from_fn(5, 1, |x, _| x != 2);
        let signal = extractor().extract(&mask).unwrap();
        assert_eq!(signal.samples(), &[Some(0.0), Some(0.0), None, Some(0.0), Some(0.0)]);
    }

    #[test]
    fn test_workspace_is_reused() {
        let viterbi = extractor();
        let mut workspace = ExtractionWorkspace::default();

        let first = BinaryImage::from_fn(30, 20, |x, y| y == 5 + x / 10);
        let second = BinaryImage::from_fn(12, 20, |_, y| y == 15);

        let a = viterbi.extract_with(&first, &mut workspace).unwrap();
        let capacity = workspace.capacity();
        assert!(capacity >= 30 * 20);

        let b = viterbi.extract_with(&second, &mut workspace).unwrap();
        assert_eq!(workspace.capacity(), capacity);
        assert_eq!(b.len(), 12);
        assert_all_near(&b, 15.0);
        assert_eq!(viterbi.extract(&first).unwrap(), a);
    }

    fn rmse(estimate: &[f64], truth: &[f64]) -> f64 {
        let sum: f64 = estimate
            .iter()
            .zip(truth)
            .map(|(e, t)| (e - t).powi(2))
            .sum();
        (sum / truth.len() as f64).sqrt()
    }

    /// Mask of a sampled sine stroke with a tenth of its columns blanked
    fn blanked_sine(seed: u64) -> (BinaryImage, Vec<f64>) {
        const WIDTH: usize = 400;
        const HEIGHT: usize = 120;
        let mut rng = StdRng::seed_from_u64(seed);

        let truth: Vec<f64> = (0..WIDTH)
            .map(|x| 60.0 + 35.0 * (x as f64 * TAU / 130.0).sin())
            .collect();
        let rounded: Vec<usize> = truth.iter().map(|v| v.round() as usize).collect();

        let mut columns = vec![vec![false; HEIGHT]; WIDTH];
        for x in 0..WIDTH {
            let previous = rounded[x.saturating_sub(1)];
            let low = previous.min(rounded[x]) - 1;
            let high = previous.max(rounded[x]) + 1;
            for y in low..=high {
                columns[x][y] = true;
            }
        }

        let mut order: Vec<usize> = (1..WIDTH - 1).collect();
        order.shuffle(&mut rng);
        for &x in &order[..WIDTH / 10] {
            columns[x].fill(false);
        }

        let mask = BinaryImage::from_fn(WIDTH as u32, HEIGHT as u32, |x, y| {
            columns[x as usize][y as usize]
        });
        (mask, truth)
    }

    #[test]
    fn test_beats_naive_on_blanked_sine() {
        for seed in 0..5 {
            let (mask, truth) = blanked_sine(seed);

            let viterbi = extractor().extract(&mask).unwrap().interpolated().unwrap();
            let naive = NaiveExtractor::new()
                .extract(&mask)
                .unwrap()
                .interpolated()
                .unwrap();

            let viterbi_error = rmse(&viterbi, &truth);
            let naive_error = rmse(&naive, &truth);
            assert!(
                viterbi_error < naive_error,
                "seed {seed}: {viterbi_error} >= {naive_error}"
            );
            assert!(viterbi_error < 1.0, "seed {seed}: viterbi rmse {viterbi_error}");
        }
    }

    #[test]
    fn test_zero_smoothing_radius_keeps_run_centres() {
        let (mask, _) = blanked_sine(3);
        let raw = ViterbiExtractor::new(ViterbiConfig {
            smoothing_radius: 0,
            ..ViterbiConfig::default()
        })
        .extract(&mask)
        .unwrap();
        let naive = NaiveExtractor::new().extract(&mask).unwrap();
        assert_eq!(raw, naive);
    }

    #[test]
    fn test_local_quadratic_recovers_parabola() {
        let window: Vec<Option<f64>> = (-3..=3)
            .map(|k: i32| {
                let k = k as f64;
                (k != 1.0).then_some(2.0 + 0.5 * k - 0.25 * k * k)
            })
            .collect();
        assert_abs_diff_eq!(local_quadratic(&window, 3).unwrap(), 2.0, epsilon = 1e-9);
        assert_eq!(local_quadratic(&window[..3], 1), None);
    }
}
