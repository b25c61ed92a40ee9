//! The publish sink seen by the bridge loop.
//!
//! `Publisher` is the only thing the loop knows about the bus: connect once,
//! fire-and-forget publishes that report success or failure, disconnect once.
//! Delivery, retries and reconnects belong to the implementation.

use anyhow::{anyhow, Result};
use std::collections::HashMap;

use crate::error::PublishError;

pub trait Publisher {
    /// Open the session. Does nothing when already connected.
    fn connect(&mut self) -> Result<()>;

    fn publish(&mut self, topic: &str, payload: &str, retained: bool) -> Result<(), PublishError>;

    /// Close the session. Safe to call when never connected.
    fn disconnect(&mut self) -> Result<()>;
}

impl<P: Publisher + ?Sized> Publisher for Box<P> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn publish(&mut self, topic: &str, payload: &str, retained: bool) -> Result<(), PublishError> {
        (**self).publish(topic, payload, retained)
    }

    fn disconnect(&mut self) -> Result<()> {
        (**self).disconnect()
    }
}

/// A message as handed to a publisher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
    pub retained: bool,
}

// ----------------------------------------------------------------------------
// MemoryPublisher: records messages, injects failures
// ----------------------------------------------------------------------------

/// In-memory publisher for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    messages: Vec<PublishedMessage>,
    connected: bool,
    connect_error: Option<String>,
    pending_failures: HashMap<String, u32>,
    failed_attempts: u32,
    connect_calls: u32,
    disconnect_calls: u32,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `connect` fail, as an unreachable broker would.
    pub fn failing_connect(mut self, reason: &str) -> Self {
        self.connect_error = Some(reason.to_string());
        self
    }

    /// Fail the next `times` publishes to `topic`.
    pub fn fail_next(&mut self, topic: &str, times: u32) {
        *self.pending_failures.entry(topic.to_string()).or_default() += times;
    }

    /// Messages accepted so far, in order.
    pub fn messages(&self) -> &[PublishedMessage] {
        &self.messages
    }

    /// Accepted payloads for one topic, in order.
    pub fn payloads(&self, topic: &str) -> Vec<&str> {
        self.messages
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.as_str())
            .collect()
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.disconnect_calls
    }
}

impl Publisher for MemoryPublisher {
    fn connect(&mut self) -> Result<()> {
        self.connect_calls += 1;
        if let Some(reason) = &self.connect_error {
            return Err(anyhow!("broker unreachable: {}", reason));
        }
        self.connected = true;
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &str, retained: bool) -> Result<(), PublishError> {
        if !self.connected {
            self.failed_attempts += 1;
            return Err(PublishError::NotConnected);
        }
        if let Some(remaining) = self.pending_failures.get_mut(topic) {
            if *remaining > 0 {
                *remaining -= 1;
                self.failed_attempts += 1;
                return Err(PublishError::transport(topic, "injected failure"));
            }
        }
        self.messages.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
            retained,
        });
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.disconnect_calls += 1;
        self.connected = false;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// LogPublisher: dry run
// ----------------------------------------------------------------------------

/// Writes every publish to the log instead of a broker.
#[derive(Debug, Default)]
pub struct LogPublisher {
    published: u64,
}

impl LogPublisher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Publisher for LogPublisher {
    fn connect(&mut self) -> Result<()> {
        log::info!("dry run: messages are logged, not sent");
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &str, retained: bool) -> Result<(), PublishError> {
        self.published += 1;
        log::info!(
            "publish {} = {}{}",
            topic,
            payload,
            if retained { " (retained)" } else { "" }
        );
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        log::info!("dry run: {} messages logged", self.published);
        Ok(())
    }
}
