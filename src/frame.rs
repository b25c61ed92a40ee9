//! Depth frame model.
//!
//! - `DepthFrame`: one dense grid of depth readings in millimetres, row-major.
//! - `DepthThresholds`: the immutable bounds deciding which readings count.
//!
//! A `DepthFrame` is deliberately not `Clone`. Sources hand frames out by value
//! and take them back by value on release, so a frame cannot outlive the cycle
//! that acquired it and the source is free to recycle the backing buffer.

use crate::error::BridgeError;

/// Readings at or below this floor are sensor noise (dropouts report 0).
pub const MIN_VALID_DEPTH_MM: f32 = 1.0;

/// Usable range ceiling of a Kinect v2 class sensor in a living room.
pub const DEFAULT_MAX_VALID_DEPTH_MM: f32 = 3800.0;

/// Qualifying pixels required before a frame counts as occupied.
pub const DEFAULT_PRESENCE_PIXEL_THRESHOLD: u64 = 5000;

/// Kinect v2 depth resolution.
pub const DEFAULT_FRAME_WIDTH: u32 = 512;
pub const DEFAULT_FRAME_HEIGHT: u32 = 424;

// ----------------------------------------------------------------------------
// DepthFrame
// ----------------------------------------------------------------------------

/// A single depth snapshot.
pub struct DepthFrame {
    depths: Vec<f32>,
    pub width: u32,
    pub height: u32,
    /// Per-source acquisition counter, starting at 1.
    pub sequence: u64,
}

impl DepthFrame {
    /// Build a frame from row-major millimetre readings.
    ///
    /// Fails with `BridgeError::MalformedFrame` when the grid is empty or the
    /// buffer length does not match `width * height`.
    pub fn new(width: u32, height: u32, depths: Vec<f32>) -> Result<Self, BridgeError> {
        if width == 0 || height == 0 {
            return Err(BridgeError::MalformedFrame(format!(
                "empty frame geometry {}x{}",
                width, height
            )));
        }
        let expected = cell_count(width, height);
        if depths.len() != expected {
            return Err(BridgeError::MalformedFrame(format!(
                "{} depth cells for a {}x{} frame (expected {})",
                depths.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self {
            depths,
            width,
            height,
            sequence: 0,
        })
    }

    /// Build a frame from packed little-endian 16-bit readings (Z16/Y16 and
    /// the usual raw dump layout), scaled to millimetres.
    ///
    /// `reuse` is an optional recycled buffer; its contents are overwritten.
    pub fn from_le_u16_bytes(
        width: u32,
        height: u32,
        bytes: &[u8],
        scale_mm: f32,
        reuse: Option<Vec<f32>>,
    ) -> Result<Self, BridgeError> {
        if bytes.len() % 2 != 0 {
            return Err(BridgeError::MalformedFrame(format!(
                "odd byte count {} for 16-bit depth samples",
                bytes.len()
            )));
        }
        let mut depths = reuse.unwrap_or_default();
        depths.clear();
        depths.extend(
            bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]) as f32 * scale_mm),
        );
        Self::new(width, height, depths)
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// All readings, row-major.
    pub fn depths(&self) -> &[f32] {
        &self.depths
    }

    /// Give the backing buffer back so a source can reuse it.
    pub(crate) fn into_buffer(self) -> Vec<f32> {
        self.depths
    }
}

impl std::fmt::Debug for DepthFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepthFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

pub(crate) fn cell_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

// ----------------------------------------------------------------------------
// DepthThresholds
// ----------------------------------------------------------------------------

/// Bounds for qualifying pixels, fixed for the process lifetime.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthThresholds {
    pub min_valid_depth_mm: f32,
    pub max_valid_depth_mm: f32,
    pub presence_pixel_threshold: u64,
}

impl DepthThresholds {
    pub fn new(max_valid_depth_mm: f32, presence_pixel_threshold: u64) -> Self {
        Self {
            min_valid_depth_mm: MIN_VALID_DEPTH_MM,
            max_valid_depth_mm,
            presence_pixel_threshold,
        }
    }

    /// A reading qualifies iff it lies strictly between the floor and the
    /// ceiling. NaN never qualifies.
    #[inline]
    pub fn qualifies(&self, depth_mm: f32) -> bool {
        depth_mm > self.min_valid_depth_mm && depth_mm < self.max_valid_depth_mm
    }
}

impl Default for DepthThresholds {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_VALID_DEPTH_MM, DEFAULT_PRESENCE_PIXEL_THRESHOLD)
    }
}
