//! Change-only presence tracking.
//!
//! The tracker remembers the last presence value that was successfully
//! published. `observe` proposes a change; the loop calls `commit` only after
//! the retained presence message went out. A failed publish therefore leaves
//! the committed value untouched and the same change is proposed again on the
//! next cycle.
//!
//! `invalidate` covers the case where even the starting value never reached
//! the bus: the next observation is proposed whether or not it differs.

pub const PAYLOAD_ON: &str = "ON";
pub const PAYLOAD_OFF: &str = "OFF";

/// `"ON"` / `"OFF"` payload for a presence value.
pub fn presence_payload(present: bool) -> &'static str {
    if present {
        PAYLOAD_ON
    } else {
        PAYLOAD_OFF
    }
}

#[derive(Debug)]
pub struct PresenceStateTracker {
    previous_presence: bool,
    announced: bool,
}

impl Default for PresenceStateTracker {
    fn default() -> Self {
        Self {
            previous_presence: false,
            announced: true,
        }
    }
}

impl PresenceStateTracker {
    /// Starts absent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last committed presence value.
    pub fn committed(&self) -> bool {
        self.previous_presence
    }

    /// `Some(new)` when `presence_raw` differs from the committed value.
    /// Also `Some` for any value while the tracker is invalidated.
    pub fn observe(&self, presence_raw: bool) -> Option<bool> {
        (!self.announced || presence_raw != self.previous_presence).then_some(presence_raw)
    }

    /// Record that `value` has been published.
    pub fn commit(&mut self, value: bool) {
        self.previous_presence = value;
        self.announced = true;
    }

    /// The committed value is not known to be on the bus.
    pub fn invalidate(&mut self) {
        self.announced = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_absent_emits_nothing() {
        let tracker = PresenceStateTracker::new();
        assert!(!tracker.committed());
        assert_eq!(tracker.observe(false), None);
    }

    #[test]
    fn emits_once_per_transition() {
        let mut tracker = PresenceStateTracker::new();
        let mut emitted = Vec::new();
        for raw in [true, true, true, false, false, true] {
            if let Some(value) = tracker.observe(raw) {
                emitted.push(value);
                tracker.commit(value);
            }
        }
        assert_eq!(emitted, vec![true, false, true]);
    }

    #[test]
    fn uncommitted_change_is_offered_again() {
        let mut tracker = PresenceStateTracker::new();
        assert_eq!(tracker.observe(true), Some(true));
        // publish failed: no commit
        assert_eq!(tracker.observe(true), Some(true));
        tracker.commit(true);
        assert_eq!(tracker.observe(true), None);
        assert!(tracker.committed());
    }

    #[test]
    fn invalidated_tracker_reoffers_unchanged_value() {
        let mut tracker = PresenceStateTracker::new();
        tracker.invalidate();
        assert_eq!(tracker.observe(false), Some(false));
        tracker.commit(false);
        assert_eq!(tracker.observe(false), None);
        assert!(!tracker.committed());
    }

    #[test]
    fn payloads() {
        assert_eq!(presence_payload(true), "ON");
        assert_eq!(presence_payload(false), "OFF");
    }
}
