//! The bridge loop: source → extractor → tracker → publisher, once per cycle.
//!
//! Lifecycle:
//! 1. `Initializing`: start the source, connect the publisher, announce
//!    discovery and the retained initial `OFF`. Any start/connect failure
//!    skips straight to `Stopped`.
//! 2. `Running`: one cycle per interval. Distance and count are published
//!    every cycle; presence only when it changes.
//! 3. `Draining`: the stop flag was seen at a cycle boundary.
//! 4. `Stopped`: source stopped, then publisher disconnected. This runs on
//!    every exit path.
//!
//! Acquisition failures skip the cycle. After too many in a row the loop
//! gives up with `BridgeError::AcquisitionBudgetExhausted`. Publish failures
//! never end the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::config::{BridgeConfig, Topics};
use crate::error::BridgeError;
use crate::frame::DepthThresholds;
use crate::ingest::DepthFrameSource;
use crate::presence::{presence_payload, PresenceStateTracker, PAYLOAD_OFF};
use crate::signal::extract_signals;
use crate::transport::{publish_discovery, DiscoverySettings, Publisher};

/// Upper bound on how long a stop request waits during the cadence sleep.
const STOP_POLL_SLICE: Duration = Duration::from_millis(50);
const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeState {
    Initializing,
    Running,
    Draining,
    Stopped,
}

#[derive(Clone, Debug)]
pub struct BridgeOptions {
    pub thresholds: DepthThresholds,
    pub topics: Topics,
    pub cycle_interval: Duration,
    pub max_consecutive_acquire_failures: u32,
    /// Announce Home Assistant discovery configs after connecting.
    pub discovery: Option<DiscoverySettings>,
    /// Availability topic referenced by discovery configs.
    pub availability_topic: Option<String>,
    pub health_interval: Duration,
    /// Stop after this many cycles. `None` runs until the stop flag is set.
    pub max_cycles: Option<u64>,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

impl BridgeOptions {
    pub fn from_config(cfg: &BridgeConfig) -> Self {
        let ha = &cfg.homeassistant;
        Self {
            thresholds: cfg.thresholds,
            topics: cfg.topics.clone(),
            cycle_interval: cfg.cycle_interval,
            max_consecutive_acquire_failures: cfg.max_consecutive_acquire_failures,
            discovery: ha
                .discovery
                .then(|| DiscoverySettings::new(&ha.discovery_prefix, &ha.device_name)),
            availability_topic: ha.availability.then(|| cfg.topics.availability()),
            health_interval: DEFAULT_HEALTH_INTERVAL,
            max_cycles: None,
        }
    }
}

/// Counters kept across the life of one loop.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Cycles started, including ones whose acquisition failed.
    pub cycles: u64,
    pub frames_processed: u64,
    pub acquisition_failures: u64,
    pub publish_failures: u64,
    /// Presence changes successfully published.
    pub transitions: u64,
}

pub struct BridgeLoop<S, P> {
    source: S,
    publisher: P,
    options: BridgeOptions,
    tracker: PresenceStateTracker,
    state: BridgeState,
    stats: BridgeStats,
}

impl<S: DepthFrameSource, P: Publisher> BridgeLoop<S, P> {
    pub fn new(source: S, publisher: P, options: BridgeOptions) -> Self {
        Self {
            source,
            publisher,
            options,
            tracker: PresenceStateTracker::new(),
            state: BridgeState::Initializing,
            stats: BridgeStats::default(),
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    pub fn tracker(&self) -> &PresenceStateTracker {
        &self.tracker
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    pub fn into_parts(self) -> (S, P) {
        (self.source, self.publisher)
    }

    /// Run the loop until `stop` is set, `max_cycles` is reached, or a fatal
    /// error occurs. Cleanup has always happened when this returns.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<BridgeStats, BridgeError> {
        if self.state != BridgeState::Initializing {
            return Err(BridgeError::Initialization {
                component: "bridge",
                details: "loop has already run".to_string(),
            });
        }

        let outcome = self.initialize().and_then(|()| self.run_cycles(stop));
        self.shutdown();
        outcome.map(|()| self.stats.clone())
    }

    fn initialize(&mut self) -> Result<(), BridgeError> {
        self.source
            .start()
            .map_err(|err| BridgeError::initialization("depth source", &err))?;
        self.publisher
            .connect()
            .map_err(|err| BridgeError::initialization("publisher", &err))?;

        if let Some(discovery) = &self.options.discovery {
            if let Err(err) = publish_discovery(
                &mut self.publisher,
                discovery,
                &self.options.topics,
                self.options.availability_topic.as_deref(),
            ) {
                self.stats.publish_failures += 1;
                log::warn!("startup: publish_failure for discovery: {}", err);
            }
        }

        // The tracker starts absent; say so on the bus.
        if let Err(err) = self
            .publisher
            .publish(&self.options.topics.presence, PAYLOAD_OFF, true)
        {
            self.stats.publish_failures += 1;
            self.tracker.invalidate();
            log::warn!(
                "startup: publish_failure for initial presence on {}: {}",
                self.options.topics.presence,
                err
            );
        }
        Ok(())
    }

    fn run_cycles(&mut self, stop: &AtomicBool) -> Result<(), BridgeError> {
        self.state = BridgeState::Running;
        log::info!(
            "bridge running: every {:?}, near < {} mm, presence above {} pixels, source {}",
            self.options.cycle_interval,
            self.options.thresholds.max_valid_depth_mm,
            self.options.thresholds.presence_pixel_threshold,
            self.source.stats().source
        );

        let budget = self.options.max_consecutive_acquire_failures.max(1);
        let mut consecutive_failures = 0u32;
        let mut last_health_log = Instant::now();

        loop {
            if stop.load(Ordering::SeqCst) || self.cycle_limit_reached() {
                self.state = BridgeState::Draining;
                log::info!("bridge draining after {} cycles", self.stats.cycles);
                return Ok(());
            }

            let started = Instant::now();
            self.stats.cycles += 1;
            let cycle = self.stats.cycles;

            match self.run_cycle(cycle) {
                Ok(()) => consecutive_failures = 0,
                Err(err) => {
                    self.stats.acquisition_failures += 1;
                    consecutive_failures += 1;
                    log::warn!(
                        "cycle {}: {} failure ({}/{} in a row): {}",
                        cycle,
                        err.kind(),
                        consecutive_failures,
                        budget,
                        err
                    );
                    if consecutive_failures >= budget {
                        self.state = BridgeState::Draining;
                        return Err(BridgeError::AcquisitionBudgetExhausted {
                            failures: consecutive_failures,
                            last: err.to_string(),
                        });
                    }
                }
            }

            if last_health_log.elapsed() >= self.options.health_interval {
                self.log_health();
                last_health_log = Instant::now();
            }

            if !self.cycle_limit_reached() {
                self.sleep_remaining(started, stop);
            }
        }
    }

    /// One cycle. Only acquisition can fail it; publish failures are counted
    /// and logged here.
    fn run_cycle(&mut self, cycle: u64) -> Result<(), BridgeError> {
        let frame = self.source.acquire().map_err(BridgeError::from_acquire)?;
        let signals = extract_signals(&frame, &self.options.thresholds);
        self.stats.frames_processed += 1;
        log::debug!(
            "cycle {}: frame {} near_pixels={} min_distance={}mm presence_raw={}",
            cycle,
            frame.sequence,
            signals.near_pixel_count,
            signals.min_distance_mm,
            signals.presence_raw
        );

        let topics = &self.options.topics;
        publish_logged(
            &mut self.publisher,
            &mut self.stats,
            cycle,
            &topics.distance,
            &signals.distance_payload(),
            false,
        );
        publish_logged(
            &mut self.publisher,
            &mut self.stats,
            cycle,
            &topics.count,
            signals.count_payload(),
            false,
        );

        if let Some(present) = self.tracker.observe(signals.presence_raw) {
            let changed = present != self.tracker.committed();
            let published = publish_logged(
                &mut self.publisher,
                &mut self.stats,
                cycle,
                &topics.presence,
                presence_payload(present),
                true,
            );
            if published {
                self.tracker.commit(present);
                if changed {
                    self.stats.transitions += 1;
                }
                log::info!(
                    "cycle {}: presence {} (min distance {} mm, {} near pixels)",
                    cycle,
                    presence_payload(present),
                    signals.min_distance_mm,
                    signals.near_pixel_count
                );
            }
        }

        self.source.release(frame);
        Ok(())
    }

    fn cycle_limit_reached(&self) -> bool {
        self.options
            .max_cycles
            .map(|max| self.stats.cycles >= max)
            .unwrap_or(false)
    }

    fn sleep_remaining(&self, started: Instant, stop: &AtomicBool) {
        let deadline = started + self.options.cycle_interval;
        while !stop.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(STOP_POLL_SLICE));
        }
    }

    fn log_health(&self) {
        let source = self.source.stats();
        log::info!(
            "health: source={} healthy={} frames={} cycles={} presence={} transitions={} acquisition_failures={} publish_failures={}",
            source.source,
            self.source.is_healthy(),
            source.frames_acquired,
            self.stats.cycles,
            presence_payload(self.tracker.committed()),
            self.stats.transitions,
            self.stats.acquisition_failures,
            self.stats.publish_failures
        );
    }

    fn shutdown(&mut self) {
        if let Err(err) = self.source.stop() {
            log::warn!("failed to stop depth source: {:#}", err);
        }
        if let Err(err) = self.publisher.disconnect() {
            log::warn!("failed to disconnect publisher: {:#}", err);
        }
        self.state = BridgeState::Stopped;
        log::info!(
            "bridge stopped: {} cycles, {} transitions, {} acquisition failures, {} publish failures",
            self.stats.cycles,
            self.stats.transitions,
            self.stats.acquisition_failures,
            self.stats.publish_failures
        );
    }
}

/// Publish, logging and counting a failure. Returns whether it went out.
fn publish_logged<P: Publisher>(
    publisher: &mut P,
    stats: &mut BridgeStats,
    cycle: u64,
    topic: &str,
    payload: &str,
    retained: bool,
) -> bool {
    match publisher.publish(topic, payload, retained) {
        Ok(()) => true,
        Err(err) => {
            stats.publish_failures += 1;
            log::warn!("cycle {}: publish_failure on {}: {}", cycle, topic, err);
            false
        }
    }
}
