//! depth-presence
//!
//! Bridges a depth camera to MQTT: each cycle samples one depth frame, reduces
//! it to a presence flag, a minimum distance and a coarse occupancy count, and
//! publishes them for Home Assistant.
//!
//! # Module Structure
//!
//! - `frame`: depth grid (`DepthFrame`) and the qualifying-pixel thresholds
//! - `signal`: the pure frame-to-signal reduction
//! - `presence`: change-only presence tracking
//! - `ingest`: depth frame sources (synthetic, file replay, V4L2)
//! - `transport`: publishers (MQTT, in-memory, log), TLS, HA discovery
//! - `bridge`: the cycle loop and its lifecycle
//! - `config`: file and environment configuration

pub mod bridge;
pub mod config;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod presence;
pub mod signal;
pub mod transport;
pub mod ui;

pub use bridge::{BridgeLoop, BridgeOptions, BridgeState, BridgeStats};
pub use config::{BridgeConfig, HomeAssistantSettings, Topics};
pub use error::{BridgeError, PublishError};
pub use frame::{DepthFrame, DepthThresholds};
pub use ingest::{open_source, DepthFrameSource, SourceConfig, SourceStats};
pub use presence::{presence_payload, PresenceStateTracker};
pub use signal::{extract_signals, FrameSignals};
pub use transport::{
    LogPublisher, MemoryPublisher, MqttPublisher, MqttSettings, Publisher, TlsMaterials,
};
