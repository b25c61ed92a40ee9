//! Raw depth dump replay.
//!
//! This module provides `FileDepthSource` for replaying depth recordings from a
//! local file. The expected layout is the usual raw dump: frames stored back to
//! back, each `width * height` little-endian `u16` samples, no header. At end
//! of file the replay loops to the start.
//!
//! The file source MUST NOT:
//! - Fetch remote URLs
//! - Accept a trailing partial frame silently (it is reported as malformed)

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;

use super::{DepthFrameSource, FramePool, SourceConfig, SourceStats};
use crate::error::BridgeError;
use crate::frame::{cell_count, DepthFrame};

pub struct FileDepthSource {
    config: SourceConfig,
    path: PathBuf,
    reader: Option<BufReader<File>>,
    raw: Vec<u8>,
    pool: FramePool,
    loops: u64,
    last_error: Option<String>,
}

impl FileDepthSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let path = local_path(&config.uri)?;
        Ok(Self {
            raw: vec![0u8; cell_count(config.width, config.height) * 2],
            config,
            path,
            reader: None,
            pool: FramePool::default(),
            loops: 0,
            last_error: None,
        })
    }

    fn frame_bytes(&self) -> usize {
        self.raw.len()
    }

    /// Completed passes over the recording.
    pub fn loops(&self) -> u64 {
        self.loops
    }

    fn read_frame(&mut self) -> Result<()> {
        let frame_bytes = self.frame_bytes();
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| anyhow!("depth file {} not opened", self.path.display()))?;

        let mut filled = fill(reader, &mut self.raw)?;
        if filled == 0 {
            reader
                .seek(SeekFrom::Start(0))
                .with_context(|| format!("rewind depth file {}", self.path.display()))?;
            self.loops += 1;
            log::debug!(
                "FileDepthSource: looped {} (pass {})",
                self.path.display(),
                self.loops
            );
            filled = fill(reader, &mut self.raw)?;
        }
        if filled != frame_bytes {
            return Err(BridgeError::MalformedFrame(format!(
                "{} ends with a partial frame ({} of {} bytes)",
                self.path.display(),
                filled,
                frame_bytes
            ))
            .into());
        }
        Ok(())
    }
}

impl DepthFrameSource for FileDepthSource {
    fn start(&mut self) -> Result<()> {
        let file = File::open(&self.path)
            .with_context(|| format!("open depth file {}", self.path.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("stat depth file {}", self.path.display()))?
            .len();
        if len < self.frame_bytes() as u64 {
            return Err(anyhow!(
                "depth file {} holds {} bytes, less than one {}x{} frame",
                self.path.display(),
                len,
                self.config.width,
                self.config.height
            ));
        }
        self.reader = Some(BufReader::new(file));
        self.last_error = None;
        log::info!(
            "FileDepthSource: replaying {} ({} frames of {}x{})",
            self.path.display(),
            len / self.frame_bytes() as u64,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn acquire(&mut self) -> Result<DepthFrame> {
        let buffer = self.pool.take_buffer()?;
        if let Err(err) = self.read_frame() {
            self.pool.restore(buffer);
            self.last_error = Some(err.to_string());
            return Err(err);
        }
        let frame = DepthFrame::from_le_u16_bytes(
            self.config.width,
            self.config.height,
            &self.raw,
            self.config.depth_scale_mm,
            Some(buffer),
        )?;
        self.last_error = None;
        Ok(self.pool.lend(frame))
    }

    fn release(&mut self, frame: DepthFrame) {
        self.pool.checkin(frame);
    }

    fn stop(&mut self) -> Result<()> {
        if self.reader.take().is_some() {
            log::info!("FileDepthSource: closed {}", self.path.display());
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.reader.is_some() && self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        self.pool.stats(&self.config.uri)
    }
}

/// Read until `buf` is full or the reader hits end of file.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(anyhow::Error::new(err).context("read depth file")),
        }
    }
    Ok(filled)
}

fn local_path(uri: &str) -> Result<PathBuf> {
    let path = uri.strip_prefix("file://").unwrap_or(uri);
    if path.trim().is_empty() {
        return Err(anyhow!("depth file path is empty"));
    }
    if path.contains("://") {
        return Err(anyhow!(
            "depth replay only supports local files (got {})",
            uri
        ));
    }
    Ok(PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_frames(frames: &[&[u16]], trailing: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        for frame in frames {
            for sample in *frame {
                file.write_all(&sample.to_le_bytes()).expect("write");
            }
        }
        file.write_all(trailing).expect("write");
        file.flush().expect("flush");
        file
    }

    fn config_for(file: &NamedTempFile) -> SourceConfig {
        SourceConfig {
            uri: format!("file://{}", file.path().display()),
            width: 2,
            height: 2,
            ..SourceConfig::default()
        }
    }

    #[test]
    fn replays_frames_and_loops() -> Result<()> {
        let file = write_frames(&[&[0, 1000, 2000, 3000], &[500, 500, 500, 500]], &[]);
        let mut source = FileDepthSource::new(config_for(&file))?;
        source.start()?;

        let mut firsts = Vec::new();
        for _ in 0..3 {
            let frame = source.acquire()?;
            firsts.push(frame.depths()[0]);
            source.release(frame);
        }
        assert_eq!(firsts, vec![0.0, 500.0, 0.0]);
        assert_eq!(source.loops(), 1);
        assert_eq!(source.stats().frames_acquired, 3);
        Ok(())
    }

    #[test]
    fn trailing_partial_frame_is_malformed() -> Result<()> {
        let file = write_frames(&[&[1, 2, 3, 4]], &[0xAA, 0xBB, 0xCC]);
        let mut source = FileDepthSource::new(config_for(&file))?;
        source.start()?;

        let frame = source.acquire()?;
        source.release(frame);
        let err = source.acquire().unwrap_err();
        let typed = err.downcast_ref::<BridgeError>().expect("typed error");
        assert_eq!(typed.kind(), "malformed_frame");
        assert!(!source.is_healthy());
        Ok(())
    }

    #[test]
    fn start_rejects_short_file() -> Result<()> {
        let file = write_frames(&[], &[0x01, 0x02]);
        let mut source = FileDepthSource::new(config_for(&file))?;
        assert!(source.start().is_err());
        Ok(())
    }

    #[test]
    fn rejects_remote_uris() {
        let config = SourceConfig {
            uri: "http://camera.local/depth.raw".to_string(),
            ..SourceConfig::default()
        };
        assert!(FileDepthSource::new(config).is_err());
    }
}
