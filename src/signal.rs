//! Frame-to-signal reduction.
//!
//! `extract_signals` is pure: one frame and the thresholds in, three signals
//! out. It assumes a well-formed grid; shape checks happen when the frame is
//! built.

use crate::frame::{DepthFrame, DepthThresholds};

/// Signals derived from one frame. Ephemeral, one per cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameSignals {
    /// Pixels strictly inside the valid depth range.
    pub near_pixel_count: u64,
    /// Closest qualifying reading, truncated to whole millimetres. 0 when no
    /// pixel qualifies.
    pub min_distance_mm: u32,
    /// `near_pixel_count > presence_pixel_threshold`.
    pub presence_raw: bool,
}

impl FrameSignals {
    /// Coarse occupancy count payload: `"1"` when occupied, else `"0"`.
    pub fn count_payload(&self) -> &'static str {
        if self.presence_raw {
            "1"
        } else {
            "0"
        }
    }

    /// Minimum distance payload as a decimal integer string.
    pub fn distance_payload(&self) -> String {
        self.min_distance_mm.to_string()
    }
}

pub fn extract_signals(frame: &DepthFrame, thresholds: &DepthThresholds) -> FrameSignals {
    let mut near_pixel_count = 0u64;
    let mut closest = f32::INFINITY;
    for &depth in frame.depths() {
        if thresholds.qualifies(depth) {
            near_pixel_count += 1;
            closest = closest.min(depth);
        }
    }

    // Qualifying readings are finite and above the floor, so the cast only
    // truncates the fraction.
    let min_distance_mm = if near_pixel_count == 0 {
        0
    } else {
        closest as u32
    };

    FrameSignals {
        near_pixel_count,
        min_distance_mm,
        presence_raw: near_pixel_count > thresholds.presence_pixel_threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(depths: Vec<f32>) -> DepthFrame {
        let width = depths.len() as u32;
        DepthFrame::new(width, 1, depths).unwrap()
    }

    #[test]
    fn counts_only_cells_strictly_inside_bounds() {
        let t = DepthThresholds::new(3000.0, 1);
        let f = frame(vec![0.0, 1.0, 1.01, 2999.9, 3000.0, 4500.0, f32::NAN, -1.0]);
        let s = extract_signals(&f, &t);
        assert_eq!(s.near_pixel_count, 2);
        assert_eq!(s.min_distance_mm, 1);
        assert!(s.presence_raw);
    }

    #[test]
    fn empty_qualifying_set_yields_zero_distance() {
        let t = DepthThresholds::new(3800.0, 5);
        let s = extract_signals(&frame(vec![0.0; 64]), &t);
        assert_eq!(s, FrameSignals::default());
        assert_eq!(s.distance_payload(), "0");
        assert_eq!(s.count_payload(), "0");
    }

    #[test]
    fn only_far_pixels_is_not_an_error() {
        let t = DepthThresholds::new(3800.0, 0);
        let s = extract_signals(&frame(vec![4000.0, 5000.0]), &t);
        assert_eq!(s.near_pixel_count, 0);
        assert_eq!(s.min_distance_mm, 0);
        assert!(!s.presence_raw);
    }

    #[test]
    fn threshold_is_strict() {
        let t = DepthThresholds::new(3800.0, 3);
        let at = extract_signals(&frame(vec![1500.0; 3]), &t);
        assert_eq!(at.near_pixel_count, 3);
        assert!(!at.presence_raw);

        let above = extract_signals(&frame(vec![1500.0; 4]), &t);
        assert!(above.presence_raw);
        assert_eq!(above.count_payload(), "1");
    }

    #[test]
    fn min_distance_truncates_toward_zero() {
        let t = DepthThresholds::new(3800.0, 0);
        let s = extract_signals(&frame(vec![2500.0, 812.9, 1200.4]), &t);
        assert_eq!(s.min_distance_mm, 812);
        assert_eq!(s.distance_payload(), "812");
    }

    #[test]
    fn count_matches_brute_force_over_varied_grids() {
        let t = DepthThresholds::new(2000.0, 10);
        for seed in 0u32..32 {
            let depths: Vec<f32> = (0..97u32)
                .map(|i| ((i * 37 + seed * 101) % 2600) as f32 - 100.0)
                .collect();
            let expected = depths.iter().filter(|&&d| d > 1.0 && d < 2000.0).count() as u64;
            let s = extract_signals(&frame(depths), &t);
            assert_eq!(s.near_pixel_count, expected, "seed {}", seed);
            assert_eq!(s.presence_raw, expected > 10);
        }
    }
}
