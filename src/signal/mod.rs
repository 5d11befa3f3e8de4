//! Extracted trace signals, gap filling and physical scaling

pub mod detection;
pub mod scaling;

pub use detection::detect_trace;
pub use scaling::{BaselineMethod, CalibratedSignal, Sample};

use crate::error::{DigitizeError, Region, Result};

/// Per-column row position of the trace, before calibration.
///
/// Rows are fractional image coordinates (growing downwards); `None` marks a
/// column without trace evidence.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    samples: Vec<Option<f64>>,
}

impl Signal {
    pub fn new(samples: Vec<Option<f64>>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Option<f64>] {
        &self.samples
    }

    pub fn missing_count(&self) -> usize {
        self.samples.iter().filter(|s| s.is_none()).count()
    }

    /// Samples with every gap filled; see [`fill_missing`]
    pub fn interpolated(&self) -> Result<Vec<f64>> {
        fill_missing(&self.samples)
    }
}

/// Fill missing samples by linear interpolation between the nearest valid
/// neighbours; leading and trailing gaps repeat the nearest valid value.
///
/// Fails with `EmptyMask` when there is no valid sample at all.
pub fn fill_missing(samples: &[Option<f64>]) -> Result<Vec<f64>> {
    let known: Vec<(usize, f64)> = samples
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.map(|v| (i, v)))
        .collect();

    let (Some(&(first_index, first_value)), Some(&(last_index, last_value))) =
        (known.first(), known.last())
    else {
        return Err(DigitizeError::EmptyMask {
            region: Region::Mask,
        });
    };

    let mut filled = vec![0.0; samples.len()];
    filled[..=first_index].fill(first_value);
    filled[last_index..].fill(last_value);

    for pair in known.windows(2) {
        let (start, start_value) = pair[0];
        let (end, end_value) = pair[1];
        let span = (end - start) as f64;
        for (offset, slot) in filled[start..=end].iter_mut().enumerate() {
            let t = offset as f64 / span;
            *slot = start_value + (end_value - start_value) * t;
        }
    }

    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_gap_is_exact_linear_interpolation() {
        let filled = fill_missing(&[Some(1.0), Some(2.0), None, Some(7.0), Some(3.0)]).unwrap();
        assert_eq!(filled, vec![1.0, 2.0, 4.5, 7.0, 3.0]);
    }

    #[test]
    fn test_longer_gap_and_edges() {
        let filled = fill_missing(&[None, None, Some(0.0), None, None, None, Some(8.0), None]).unwrap();
        assert_eq!(filled, vec![0.0, 0.0, 0.0, 2.0, 4.0, 6.0, 8.0, 8.0]);
    }

    #[test]
    fn test_no_valid_sample_is_empty_mask() {
        let err = fill_missing(&[None, None]).unwrap_err();
        assert!(matches!(err, DigitizeError::EmptyMask { .. }));
    }

    #[test]
    fn test_signal_counts_missing() {
        let signal = Signal::new(vec![Some(3.0), None, Some(4.0), None]);
        assert_eq!(signal.len(), 4);
        assert_eq!(signal.missing_count(), 2);
        assert_eq!(signal.interpolated().unwrap(), vec![3.0, 3.5, 4.0, 4.0]);
    }
}
