//! Centroid extraction: each sample is the mean row of the column's active pixels.

use crate::error::{DigitizeError, Region, Result};
use crate::extractor::{ExtractionWorkspace, SignalExtractor};
use crate::image::BinaryImage;
use crate::signal::Signal;

#[derive(Debug, Clone, Copy, Default)]
pub struct NaiveExtractor;

impl NaiveExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl SignalExtractor for NaiveExtractor {
    fn name(&self) -> &'static str {
        "naive"
    }

    fn description(&self) -> &'static str {
        "Per-column centroid of active pixels"
    }

    fn extract_with(
        &self,
        mask: &BinaryImage,
        _workspace: &mut ExtractionWorkspace,
    ) -> Result<Signal> {
        let samples: Vec<Option<f64>> = (0..mask.width())
            .map(|x| {
                let (sum, count) = (0..mask.height())
                    .filter(|&y| mask.is_active(x, y))
                    .fold((0.0, 0usize), |(sum, count), y| (sum + y as f64, count + 1));
                (count > 0).then(|| sum / count as f64)
            })
            .collect();

        if samples.iter().all(Option::is_none) {
            return Err(DigitizeError::NoSignalDetected {
                region: Region::Mask,
            });
        }
        Ok(Signal::new(samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centroid_per_column() {
        let mask = BinaryImage::from_fn(3, 10, |x, y| match x {
            0 => y == 4,
            1 => (2..=5).contains(&y),
            _ => false,
        });
        let signal = NaiveExtractor::new().extract(&mask).unwrap();

        assert_eq!(signal.samples(), &[Some(4.0), Some(3.5), None]);
    }

    #[test]
    fn test_empty_mask_is_no_signal() {
        let err = NaiveExtractor::new()
            .extract(&BinaryImage::empty(5, 5))
            .unwrap_err();
        assert!(matches!(err, DigitizeError::NoSignalDetected { .. }));
    }
}
