//! Synthetic depth sources.
//!
//! `SyntheticDepthSource` renders a simple room for `stub://` URIs: a far wall
//! beyond the usable range, sensor dropouts reported as 0 mm, and a person
//! shaped block of near readings that enters and leaves on a fixed rhythm.
//!
//! `ScriptedDepthSource` replays an explicit list of frames and failures and
//! is what the loop tests drive.

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

use super::{DepthFrameSource, FramePool, SourceConfig, SourceStats};
use crate::frame::{cell_count, DepthFrame};

/// Frames per scene phase (empty room, then occupied, then empty...).
const SCENE_PHASE_FRAMES: u64 = 20;
const WALL_DEPTH_MM: f32 = 4400.0;
const PERSON_DEPTH_MM: f32 = 1200.0;
const DROPOUT_PROBABILITY: f64 = 0.02;

pub struct SyntheticDepthSource {
    config: SourceConfig,
    pool: FramePool,
    rng: StdRng,
    started: bool,
}

impl SyntheticDepthSource {
    pub fn new(config: SourceConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic noise, for tests.
    pub fn with_seed(config: SourceConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: SourceConfig, rng: StdRng) -> Self {
        Self {
            config,
            pool: FramePool::default(),
            rng,
            started: false,
        }
    }

    /// Whether the scene holds a person for the given (1-based) frame number.
    fn occupied(frame_number: u64) -> bool {
        ((frame_number - 1) / SCENE_PHASE_FRAMES) % 2 == 1
    }

    fn render(&mut self, buffer: &mut Vec<f32>, occupied: bool) {
        let (width, height) = (self.config.width, self.config.height);
        buffer.clear();
        buffer.reserve(cell_count(width, height));

        // Person: the middle quarter of the columns, from a quarter down to
        // the floor.
        let cols = (width * 3 / 8)..(width * 5 / 8);
        let rows = (height / 4)..height;

        for y in 0..height {
            for x in 0..width {
                let depth = if self.rng.gen_bool(DROPOUT_PROBABILITY) {
                    0.0
                } else if occupied && cols.contains(&x) && rows.contains(&y) {
                    PERSON_DEPTH_MM + ((x + y) % 400) as f32
                } else {
                    WALL_DEPTH_MM + (x % 50) as f32
                };
                buffer.push(depth);
            }
        }
    }
}

impl DepthFrameSource for SyntheticDepthSource {
    fn start(&mut self) -> Result<()> {
        self.started = true;
        log::info!(
            "SyntheticDepthSource: started {} ({}x{})",
            self.config.uri,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn acquire(&mut self) -> Result<DepthFrame> {
        if !self.started {
            return Err(anyhow!("synthetic depth source not started"));
        }
        let mut buffer = self.pool.take_buffer()?;
        let occupied = Self::occupied(self.pool.next_sequence());
        self.render(&mut buffer, occupied);
        let frame = DepthFrame::new(self.config.width, self.config.height, buffer)?;
        Ok(self.pool.lend(frame))
    }

    fn release(&mut self, frame: DepthFrame) {
        self.pool.checkin(frame);
    }

    fn stop(&mut self) -> Result<()> {
        if self.started {
            log::info!("SyntheticDepthSource: stopped {}", self.config.uri);
        }
        self.started = false;
        Ok(())
    }

    fn stats(&self) -> SourceStats {
        self.pool.stats(&self.config.uri)
    }
}

// ----------------------------------------------------------------------------
// Scripted source
// ----------------------------------------------------------------------------

/// One scripted acquisition.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    /// Row-major readings; a length that does not fit the geometry produces a
    /// malformed frame error.
    Frame(Vec<f32>),
    /// The device reports an error for this acquisition.
    Fail(String),
}

impl ScriptStep {
    /// `qualifying` cells at `near_mm`, the rest at 0 mm (dropouts).
    pub fn with_near_pixels(width: u32, height: u32, qualifying: usize, near_mm: f32) -> Self {
        let total = cell_count(width, height);
        let mut depths = vec![0.0; total];
        for cell in depths.iter_mut().take(qualifying.min(total)) {
            *cell = near_mm;
        }
        Self::Frame(depths)
    }
}

pub struct ScriptedDepthSource {
    width: u32,
    height: u32,
    steps: VecDeque<ScriptStep>,
    pool: FramePool,
    fail_start: Option<String>,
    started: bool,
    stop_calls: u32,
}

impl ScriptedDepthSource {
    pub fn new(width: u32, height: u32, steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            width,
            height,
            steps: steps.into_iter().collect(),
            pool: FramePool::default(),
            fail_start: None,
            started: false,
            stop_calls: 0,
        }
    }

    /// Make `start` fail, as a missing device would.
    pub fn failing_start(mut self, reason: &str) -> Self {
        self.fail_start = Some(reason.to_string());
        self
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn stop_calls(&self) -> u32 {
        self.stop_calls
    }

    pub fn remaining_steps(&self) -> usize {
        self.steps.len()
    }
}

impl DepthFrameSource for ScriptedDepthSource {
    fn start(&mut self) -> Result<()> {
        if let Some(reason) = &self.fail_start {
            return Err(anyhow!("scripted depth source unavailable: {}", reason));
        }
        self.started = true;
        Ok(())
    }

    fn acquire(&mut self) -> Result<DepthFrame> {
        let buffer = self.pool.take_buffer()?;
        match self.steps.pop_front() {
            Some(ScriptStep::Frame(depths)) => {
                self.pool.restore(buffer);
                let frame = DepthFrame::new(self.width, self.height, depths)?;
                Ok(self.pool.lend(frame))
            }
            Some(ScriptStep::Fail(reason)) => {
                self.pool.restore(buffer);
                Err(anyhow!(reason))
            }
            None => {
                self.pool.restore(buffer);
                Err(anyhow!("depth script exhausted"))
            }
        }
    }

    fn release(&mut self, frame: DepthFrame) {
        self.pool.checkin(frame);
    }

    fn stop(&mut self) -> Result<()> {
        self.stop_calls += 1;
        self.started = false;
        Ok(())
    }

    fn stats(&self) -> SourceStats {
        self.pool.stats("script://")
    }
}
