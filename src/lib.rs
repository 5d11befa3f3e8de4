//! Digitization of scanned paper ECG recordings.
//!
//! The pipeline binarizes each lead's region with a hedged Otsu threshold,
//! traces the signal through the resulting mask (per-column centroid or a
//! Viterbi minimum-cost path), calibrates pixels against the paper grid
//! spacing found by autocorrelation, and returns time/voltage samples.
//!
//! ```no_run
//! use ecg_digitize::{digitize, DigitizeConfig, DigitizeOptions, Image, LeadGeometry, LeadId, Rect};
//!
//! let page = Image::from(image::open("page.png").map_err(|e| {
//!     ecg_digitize::DigitizeError::InvalidImage(e.to_string())
//! })?);
//! let leads = [LeadGeometry::new(LeadId::II, Rect::new(40, 300, 1200, 180))];
//! let result = digitize(&page, &leads, &DigitizeOptions::default(), &DigitizeConfig::default())?;
//! for signal in &result.signals {
//!     println!("{}: {} samples", signal.lead, signal.samples.len());
//! }
//! # Ok::<(), ecg_digitize::DigitizeError>(())
//! ```

pub mod config;
pub mod error;
pub mod extractor;
pub mod extractors;
pub mod grid;
pub mod image;
pub mod lead;
pub mod otsu;
pub mod pipeline;
pub mod rotation;
pub mod server;
pub mod signal;

pub use config::DigitizeConfig;
pub use error::{DigitizeError, Region, Result};
pub use extractor::{ExtractionWorkspace, SignalExtractor};
pub use extractors::{ExtractionMethod, NaiveExtractor, ViterbiExtractor};
pub use grid::GridCalibration;
pub use crate::image::{BinaryImage, ColorImage, GrayscaleImage, Image, Rect};
pub use lead::{LeadGeometry, LeadId};
pub use pipeline::{digitize, Digitization, DigitizeOptions, Digitizer, LeadFailure};
pub use rotation::estimate_rotation;
pub use signal::{CalibratedSignal, Sample, Signal};
