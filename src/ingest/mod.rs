//! Depth frame sources.
//!
//! This module provides the sources the bridge can sample:
//! - Synthetic scenes (`stub://`) for demos and tests
//! - Raw 16-bit depth dumps replayed from a local file (`file://` or a path)
//! - V4L2 depth devices such as `/dev/video2` (feature: ingest-v4l2)
//!
//! Every source follows the same lifecycle: `start`, then strictly alternating
//! `acquire` / `release`, then `stop`. A frame must be released before the
//! next acquisition; sources refuse to hand out a second frame while one is
//! outstanding and recycle the released buffer for the next capture.

use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::frame::{DepthFrame, DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH};

pub mod file;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use file::FileDepthSource;
pub use synthetic::{ScriptStep, ScriptedDepthSource, SyntheticDepthSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2DepthSource;

/// A blocking producer of depth frames.
pub trait DepthFrameSource {
    /// Open the device or file and begin streaming.
    fn start(&mut self) -> Result<()>;

    /// Block until the next frame is available.
    fn acquire(&mut self) -> Result<DepthFrame>;

    /// Hand a frame back. Must be called exactly once per acquired frame.
    fn release(&mut self, frame: DepthFrame);

    /// Stop streaming and close the device. Safe to call more than once.
    fn stop(&mut self) -> Result<()>;

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats;
}

impl<S: DepthFrameSource + ?Sized> DepthFrameSource for Box<S> {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn acquire(&mut self) -> Result<DepthFrame> {
        (**self).acquire()
    }

    fn release(&mut self, frame: DepthFrame) {
        (**self).release(frame)
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

/// Statistics for a depth source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_acquired: u64,
    pub frames_released: u64,
    pub source: String,
}

/// Configuration shared by all depth sources.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// `stub://<name>`, `file:///path/dump.raw`, a local path, or `/dev/videoN`.
    pub uri: String,
    /// Frame geometry. Devices may negotiate a different size.
    pub width: u32,
    pub height: u32,
    /// Requested device frame rate (devices only).
    pub target_fps: u32,
    /// Millimetres per raw 16-bit unit.
    pub depth_scale_mm: f32,
    /// Surface a stalled device as an error instead of blocking forever.
    pub acquire_timeout: Option<Duration>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            uri: "stub://room".to_string(),
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
            target_fps: 30,
            depth_scale_mm: 1.0,
            acquire_timeout: None,
        }
    }
}

/// Pick a source implementation from the configured URI.
pub fn open_source(config: SourceConfig) -> Result<Box<dyn DepthFrameSource + Send>> {
    let uri = config.uri.trim().to_string();
    if uri.is_empty() {
        return Err(anyhow!("depth source URI is empty"));
    }
    if uri.starts_with("stub://") {
        return Ok(Box::new(SyntheticDepthSource::new(config)));
    }
    if uri.starts_with("/dev/video") {
        #[cfg(feature = "ingest-v4l2")]
        {
            return Ok(Box::new(V4l2DepthSource::new(config)));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            return Err(anyhow!(
                "depth source {} requires the ingest-v4l2 feature",
                uri
            ));
        }
    }
    Ok(Box::new(FileDepthSource::new(config)?))
}

// ----------------------------------------------------------------------------
// FramePool: release bookkeeping and buffer recycling
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct FramePool {
    spare: Option<Vec<f32>>,
    outstanding: bool,
    acquired: u64,
    released: u64,
}

impl FramePool {
    /// Buffer for the next capture. Fails while a frame is still out.
    pub(crate) fn take_buffer(&mut self) -> Result<Vec<f32>> {
        if self.outstanding {
            return Err(anyhow!(
                "depth frame #{} was not released before the next acquire",
                self.acquired
            ));
        }
        Ok(self.spare.take().unwrap_or_default())
    }

    /// Return an unused buffer after a failed capture.
    pub(crate) fn restore(&mut self, buffer: Vec<f32>) {
        self.spare = Some(buffer);
    }

    /// Sequence number the next lent frame will carry.
    pub(crate) fn next_sequence(&self) -> u64 {
        self.acquired + 1
    }

    /// Stamp and hand out a captured frame.
    pub(crate) fn lend(&mut self, frame: DepthFrame) -> DepthFrame {
        self.outstanding = true;
        self.acquired += 1;
        frame.with_sequence(self.acquired)
    }

    pub(crate) fn checkin(&mut self, frame: DepthFrame) {
        if !self.outstanding {
            log::warn!(
                "depth frame #{} released twice or never acquired",
                frame.sequence
            );
        }
        self.outstanding = false;
        self.released += 1;
        self.spare = Some(frame.into_buffer());
    }

    pub(crate) fn stats(&self, source: &str) -> SourceStats {
        SourceStats {
            frames_acquired: self.acquired,
            frames_released: self.released,
            source: source.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_refuses_second_frame_until_release() -> Result<()> {
        let mut pool = FramePool::default();
        let buffer = pool.take_buffer()?;
        let frame = pool.lend(DepthFrame::new(1, 1, {
            let mut b = buffer;
            b.push(1000.0);
            b
        })?);
        assert_eq!(frame.sequence, 1);
        assert!(pool.take_buffer().is_err());

        pool.checkin(frame);
        let recycled = pool.take_buffer()?;
        assert_eq!(recycled.len(), 1);
        assert_eq!(pool.stats("t").frames_released, 1);
        Ok(())
    }

    #[test]
    fn open_source_dispatches_on_uri() {
        let stub = open_source(SourceConfig::default());
        assert!(stub.is_ok());

        let empty = open_source(SourceConfig {
            uri: "  ".to_string(),
            ..SourceConfig::default()
        });
        assert!(empty.is_err());
    }

    #[test]
    #[cfg(not(feature = "ingest-v4l2"))]
    fn device_paths_require_v4l2_feature() {
        let result = open_source(SourceConfig {
            uri: "/dev/video2".to_string(),
            ..SourceConfig::default()
        });
        let err = result.err().expect("feature error");
        assert!(err.to_string().contains("ingest-v4l2"));
    }
}
