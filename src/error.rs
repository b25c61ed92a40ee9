//! Failure taxonomy for the bridge.
//!
//! Plumbing code propagates `anyhow::Error` with context. The loop classifies
//! those errors into `BridgeError` kinds so every log line names the failure
//! kind, and only initialization failures end the process with a nonzero
//! status.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Source or sink unavailable at startup. Fatal.
    #[error("initialization failed ({component}): {details}")]
    Initialization {
        component: &'static str,
        details: String,
    },

    /// The source errored or stalled mid-run.
    #[error("frame acquisition failed: {0}")]
    Acquisition(String),

    /// The source did not deliver a frame within the configured timeout.
    #[error("no depth frame within {0:?}")]
    AcquisitionTimeout(Duration),

    /// Frame shape or payload violates the extractor's precondition.
    #[error("malformed depth frame: {0}")]
    MalformedFrame(String),

    /// Too many consecutive acquisition failures; the loop gives up.
    #[error("{failures} consecutive acquisition failures, last: {last}")]
    AcquisitionBudgetExhausted { failures: u32, last: String },
}

impl BridgeError {
    pub fn initialization(component: &'static str, err: &anyhow::Error) -> Self {
        Self::Initialization {
            component,
            details: format!("{:#}", err),
        }
    }

    /// Short stable label used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initialization { .. } => "initialization",
            Self::Acquisition(_) => "acquisition",
            Self::AcquisitionTimeout(_) => "acquisition_timeout",
            Self::MalformedFrame(_) => "malformed_frame",
            Self::AcquisitionBudgetExhausted { .. } => "acquisition_budget_exhausted",
        }
    }

    /// Classify an error raised by a frame source.
    ///
    /// Typed errors raised by frame construction or timeouts keep their kind;
    /// anything else is a generic acquisition failure.
    pub fn from_acquire(err: anyhow::Error) -> Self {
        match err.downcast::<BridgeError>() {
            Ok(typed) => typed,
            Err(other) => Self::Acquisition(format!("{:#}", other)),
        }
    }
}

/// Result of a single publish attempt. Always non-fatal to the loop.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publisher is not connected")]
    NotConnected,

    #[error("publish to '{topic}' failed: {details}")]
    Transport { topic: String, details: String },
}

impl PublishError {
    pub fn transport(topic: &str, details: impl ToString) -> Self {
        Self::Transport {
            topic: topic.to_string(),
            details: details.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn typed_errors_survive_anyhow_roundtrip() {
        let err: anyhow::Error = BridgeError::MalformedFrame("3 cells for 2x2".into()).into();
        let classified = BridgeError::from_acquire(err);
        assert_eq!(classified.kind(), "malformed_frame");
    }

    #[test]
    fn untyped_errors_become_acquisition_failures() {
        let err = Err::<(), _>(std::io::Error::other("usb reset"))
            .context("capture depth frame")
            .unwrap_err();
        let classified = BridgeError::from_acquire(err);
        assert_eq!(classified.kind(), "acquisition");
        assert!(classified.to_string().contains("usb reset"));
    }
}
