//! Extraction configuration.
//!
//! [`ExtractOptions`] carries the seek policy, the admission gate settings,
//! and the cost model used to weigh requests against the memory budget.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use stillframe::{CostModel, ExtractOptions, GateOptions, SeekPrecision};
//!
//! let gate = GateOptions::from_memory_ceiling(120 * 1024 * 1024, 24 * 1024 * 1024)
//!     .with_max_queue_depth(16)
//!     .with_queue_timeout(Duration::from_secs(5));
//! let options = ExtractOptions::new()
//!     .with_position_percent(30)
//!     .with_seek_precision(SeekPrecision::Keyframe)
//!     .with_gate(gate)
//!     .with_cost_model(CostModel::FileSize { bytes_per_slot: 512 * 1024 * 1024 });
//! assert_eq!(options.gate().max_concurrent_slots(), 3);
//! ```

use std::{path::Path, time::Duration};

use crate::{scaler::DEFAULT_MAX_OUTPUT_PIXELS, seek::SeekPrecision};

/// Fraction of the memory ceiling the gate may plan to use.
const CEILING_HEADROOM_PERCENT: u64 = 75;

/// Admission gate settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct GateOptions {
    max_concurrent_slots: u32,
    max_queue_depth: usize,
    queue_timeout: Duration,
}

impl Default for GateOptions {
    fn default() -> Self {
        Self {
            max_concurrent_slots: 2,
            max_queue_depth: 32,
            queue_timeout: Duration::from_secs(10),
        }
    }
}

impl GateOptions {
    /// Default settings: 2 slots, queue of 32, 10 second timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the slot count from the process memory ceiling and a
    /// conservative per-pipeline cost, keeping 25% of the ceiling free.
    ///
    /// Always yields at least one slot.
    pub fn from_memory_ceiling(ceiling_bytes: u64, per_pipeline_bytes: u64) -> Self {
        let usable = ceiling_bytes / 100 * CEILING_HEADROOM_PERCENT;
        let slots = usable.checked_div(per_pipeline_bytes).unwrap_or(1);
        Self::default().with_max_concurrent_slots(slots.clamp(1, u64::from(u32::MAX)) as u32)
    }

    /// Maximum number of slots held at once. Clamped to a minimum of 1.
    pub fn with_max_concurrent_slots(mut self, slots: u32) -> Self {
        self.max_concurrent_slots = slots.max(1);
        self
    }

    /// Maximum number of requests waiting for a slot. Zero rejects every
    /// request that cannot be admitted immediately.
    pub fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// How long a queued request waits before it is rejected.
    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    /// Configured slot count.
    pub fn max_concurrent_slots(&self) -> u32 {
        self.max_concurrent_slots
    }

    /// Configured queue depth.
    pub fn max_queue_depth(&self) -> usize {
        self.max_queue_depth
    }

    /// Configured queue timeout.
    pub fn queue_timeout(&self) -> Duration {
        self.queue_timeout
    }
}

/// How many slots a request costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CostModel {
    /// Every request costs one slot.
    #[default]
    Uniform,
    /// One slot per `bytes_per_slot` of file size, rounded up.
    FileSize {
        /// File bytes covered by one slot.
        bytes_per_slot: u64,
    },
}

impl CostModel {
    /// Estimate the cost of extracting from `path`, in slots.
    ///
    /// Only reads file metadata. Files whose size cannot be read cost one
    /// slot; the pipeline reports the real problem when it opens them.
    pub fn estimate(&self, path: &Path) -> u32 {
        match *self {
            CostModel::Uniform => 1,
            CostModel::FileSize { bytes_per_slot } => match std::fs::metadata(path) {
                Ok(metadata) => Self::slots_for_size(metadata.len(), bytes_per_slot),
                Err(_) => 1,
            },
        }
    }

    fn slots_for_size(size: u64, bytes_per_slot: u64) -> u32 {
        if bytes_per_slot == 0 {
            return 1;
        }
        size.div_ceil(bytes_per_slot).clamp(1, u64::from(u32::MAX)) as u32
    }
}

/// Configuration for a [`ThumbnailExtractor`](crate::ThumbnailExtractor).
#[derive(Debug, Clone)]
#[must_use]
pub struct ExtractOptions {
    pub(crate) position_percent: u32,
    pub(crate) seek_precision: SeekPrecision,
    pub(crate) gate: GateOptions,
    pub(crate) cost_model: CostModel,
    pub(crate) max_output_pixels: u64,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractOptions {
    /// Defaults: 25% into the stream, keyframe precision, default gate,
    /// uniform cost, 4096 × 4096 output pixels at most.
    pub fn new() -> Self {
        Self {
            position_percent: 25,
            seek_precision: SeekPrecision::Keyframe,
            gate: GateOptions::default(),
            cost_model: CostModel::Uniform,
            max_output_pixels: DEFAULT_MAX_OUTPUT_PIXELS,
        }
    }

    /// Where to take the frame, as a percentage of the stream duration.
    /// Clamped to 100.
    pub fn with_position_percent(mut self, percent: u32) -> Self {
        self.position_percent = percent.min(100);
        self
    }

    /// How close to the target the decoded frame must be.
    pub fn with_seek_precision(mut self, precision: SeekPrecision) -> Self {
        self.seek_precision = precision;
        self
    }

    /// Admission gate settings.
    pub fn with_gate(mut self, gate: GateOptions) -> Self {
        self.gate = gate;
        self
    }

    /// How requests are weighed against the slot budget.
    pub fn with_cost_model(mut self, model: CostModel) -> Self {
        self.cost_model = model;
        self
    }

    /// Largest output frame, in pixels, a request may ask for. Larger
    /// requests fail with a scale error before any output buffer is
    /// allocated. Clamped to a minimum of 1.
    pub fn with_max_output_pixels(mut self, pixels: u64) -> Self {
        self.max_output_pixels = pixels.max(1);
        self
    }

    /// Configured position percentage.
    pub fn position_percent(&self) -> u32 {
        self.position_percent
    }

    /// Configured seek precision.
    pub fn seek_precision(&self) -> SeekPrecision {
        self.seek_precision
    }

    /// Configured gate settings.
    pub fn gate(&self) -> &GateOptions {
        &self.gate
    }

    /// Configured cost model.
    pub fn cost_model(&self) -> CostModel {
        self.cost_model
    }

    /// Configured output pixel cap.
    pub fn max_output_pixels(&self) -> u64 {
        self.max_output_pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_keeps_headroom() {
        let gate = GateOptions::from_memory_ceiling(100, 25);
        assert_eq!(gate.max_concurrent_slots(), 3);
    }

    #[test]
    fn ceiling_smaller_than_one_pipeline_still_admits_one() {
        let gate = GateOptions::from_memory_ceiling(10, 1_000);
        assert_eq!(gate.max_concurrent_slots(), 1);
        let gate = GateOptions::from_memory_ceiling(10, 0);
        assert_eq!(gate.max_concurrent_slots(), 1);
    }

    #[test]
    fn zero_slots_clamps_to_one() {
        assert_eq!(
            GateOptions::new().with_max_concurrent_slots(0).max_concurrent_slots(),
            1
        );
    }

    #[test]
    fn file_size_cost_rounds_up() {
        assert_eq!(CostModel::slots_for_size(0, 100), 1);
        assert_eq!(CostModel::slots_for_size(100, 100), 1);
        assert_eq!(CostModel::slots_for_size(101, 100), 2);
        assert_eq!(CostModel::slots_for_size(1_000, 0), 1);
    }

    #[test]
    fn missing_file_costs_one_slot() {
        let model = CostModel::FileSize { bytes_per_slot: 1 };
        assert_eq!(model.estimate(Path::new("does/not/exist.mp4")), 1);
    }

    #[test]
    fn position_clamps_to_hundred() {
        assert_eq!(ExtractOptions::new().with_position_percent(250).position_percent(), 100);
    }
}
