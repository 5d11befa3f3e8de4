use crate::error::Result;
use crate::image::BinaryImage;
use crate::signal::Signal;

/// Trait that all trace extraction strategies implement
pub trait SignalExtractor: Send + Sync {
    /// Returns the strategy identifier (e.g., "naive", "viterbi")
    fn name(&self) -> &'static str;

    /// Returns a human-readable description of the strategy
    fn description(&self) -> &'static str;

    /// Extract one sample per mask column, reusing `workspace` buffers.
    ///
    /// Fails with `NoSignalDetected` when the mask has no active pixel.
    fn extract_with(&self, mask: &BinaryImage, workspace: &mut ExtractionWorkspace)
        -> Result<Signal>;

    /// Extract with a throwaway workspace
    fn extract(&self, mask: &BinaryImage) -> Result<Signal> {
        self.extract_with(mask, &mut ExtractionWorkspace::default())
    }
}

/// Scratch memory for extraction, sized on first use and reused afterwards.
///
/// Holds the column-major cost lattice of the Viterbi tracer
/// (`index = column * height + row`) together with its back-pointers.
#[derive(Debug, Default)]
pub struct ExtractionWorkspace {
    pub(crate) cost: Vec<f64>,
    pub(crate) back: Vec<u32>,
    pub(crate) emission: Vec<f64>,
}

impl ExtractionWorkspace {
    /// Clear and size the buffers for a `width`x`height` lattice
    pub(crate) fn reset(&mut self, width: usize, height: usize) {
        let cells = width * height;
        self.cost.clear();
        self.cost.resize(cells, f64::INFINITY);
        self.back.clear();
        self.back.resize(cells, 0);
        self.emission.clear();
        self.emission.resize(height, 0.0);
    }

    /// Number of lattice cells currently allocated
    pub fn capacity(&self) -> usize {
        self.cost.capacity()
    }
}
