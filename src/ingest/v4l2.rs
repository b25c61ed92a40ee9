//! V4L2 depth source.
//!
//! This module provides `V4l2DepthSource` for depth cameras exposed as V4L2
//! capture nodes (RealSense `Z16`, Kinect and ToF sensors in `Y16`). Samples
//! are 16-bit little-endian and converted to millimetres with the configured
//! scale.
//!
//! The V4L2 source is responsible for:
//! - Negotiating a 16-bit depth format on the device node
//! - Bounding each capture by the optional acquisition timeout
//! - Producing `DepthFrame` instances that are released back after each cycle

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::{DepthFrameSource, FramePool, SourceConfig, SourceStats};
use crate::error::BridgeError;
use crate::frame::{cell_count, DepthFrame};

const DEPTH_FOURCCS: [&[u8; 4]; 2] = [b"Z16 ", b"Y16 "];
const STREAM_BUFFERS: u32 = 4;

pub struct V4l2DepthSource {
    config: SourceConfig,
    state: Option<DeviceState>,
    pool: FramePool,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2DepthSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            pool: FramePool::default(),
            last_frame_at: None,
            last_error: None,
        }
    }

    fn negotiate_format(&self, device: &mut v4l::Device) -> Result<v4l::Format> {
        use v4l::video::Capture;

        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;

        for fourcc in DEPTH_FOURCCS {
            format.fourcc = v4l::FourCC::new(fourcc);
            match device.set_format(&format) {
                Ok(active) if &active.fourcc.repr == fourcc => return Ok(active),
                Ok(active) => log::debug!(
                    "V4l2DepthSource: {} answered {} for {}",
                    self.config.uri,
                    active.fourcc,
                    format.fourcc
                ),
                Err(err) => log::debug!(
                    "V4l2DepthSource: {} rejected {}: {}",
                    self.config.uri,
                    format.fourcc,
                    err
                ),
            }
        }
        Err(anyhow!(
            "{} offers no 16-bit depth format (Z16/Y16)",
            self.config.uri
        ))
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

impl DepthFrameSource for V4l2DepthSource {
    fn start(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.uri)
            .with_context(|| format!("open v4l2 device {}", self.config.uri))?;
        let format = self.negotiate_format(&mut device)?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2DepthSource: failed to set fps on {}: {}",
                    self.config.uri,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        let timeout = self.config.acquire_timeout;

        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                let mut stream =
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                        .map_err(|err| {
                            anyhow::Error::new(err).context("create v4l2 buffer stream")
                        })?;
                if let Some(timeout) = timeout {
                    stream.set_timeout(timeout);
                }
                Ok::<_, anyhow::Error>(stream)
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);
        self.last_error = None;

        log::info!(
            "V4l2DepthSource: streaming {} ({}x{} {})",
            self.config.uri,
            self.active_width,
            self.active_height,
            format.fourcc
        );
        Ok(())
    }

    fn acquire(&mut self) -> Result<DepthFrame> {
        use v4l::io::traits::CaptureStream;

        let buffer = self.pool.take_buffer()?;
        let (width, height) = (self.active_width, self.active_height);
        let expected = cell_count(width, height) * 2;
        let scale = self.config.depth_scale_mm;
        let timeout = self.config.acquire_timeout;

        let state = self.state.as_mut().context("v4l2 device not started")?;
        let captured = state.with_mut(|fields| -> Result<DepthFrame> {
            let (buf, _meta) = fields.stream.next().map_err(|err| {
                if err.kind() == std::io::ErrorKind::TimedOut {
                    if let Some(timeout) = timeout {
                        return BridgeError::AcquisitionTimeout(timeout).into();
                    }
                }
                anyhow::Error::new(err).context("capture v4l2 depth frame")
            })?;
            if buf.len() < expected {
                return Err(BridgeError::MalformedFrame(format!(
                    "{} bytes captured, {}x{} Z16 needs {}",
                    buf.len(),
                    width,
                    height,
                    expected
                ))
                .into());
            }
            Ok(DepthFrame::from_le_u16_bytes(
                width,
                height,
                &buf[..expected],
                scale,
                Some(buffer),
            )?)
        });

        match captured {
            Ok(frame) => {
                self.last_frame_at = Some(Instant::now());
                self.last_error = None;
                Ok(self.pool.lend(frame))
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn release(&mut self, frame: DepthFrame) {
        self.pool.checkin(frame);
    }

    fn stop(&mut self) -> Result<()> {
        if self.state.take().is_some() {
            log::info!("V4l2DepthSource: stopped {}", self.config.uri);
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        if self.state.is_none() || self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> SourceStats {
        self.pool.stats(&self.config.uri)
    }
}
