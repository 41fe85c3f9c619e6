// Minimum tracking over a moving interval

use crate::constants::{INTERVAL, INTERVAL_SPACES};

/// One candidate sample: a value and the position on the t axis where it
/// was observed. For TSval-driven use the t axis is in ticks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinSample {
    pub v: f64,
    pub t: i64,
}

/// Tracks the minimum value over a moving window of the t axis.
///
/// The candidate list holds non-decreasing values at strictly increasing
/// t. The front is the window minimum. Candidates above the current
/// minimum are only retained every `sub` ticks, which bounds memory to
/// roughly `interval / sub` entries per window.
#[derive(Debug, Clone)]
pub struct MovingMin {
    min_list: Vec<MinSample>,
    nxt_intr: i64,
    interval: i64,
    sub: i64,
}

impl MovingMin {
    pub fn new(interval: i64, spaces: i64) -> Self {
        MovingMin {
            min_list: Vec::new(),
            nxt_intr: 0,
            interval,
            sub: interval / spaces,
        }
    }

    /// Start interval accounting at `t`; the first boundary is one full
    /// interval later.
    pub fn set_first_interval(&mut self, t: i64) {
        self.nxt_intr = t + self.interval;
    }

    pub fn add_sample(&mut self, v: f64, t: i64) {
        let reset = match (self.min_list.first(), self.min_list.last()) {
            (Some(front), Some(back)) => v <= front.v || t > back.t + self.interval,
            _ => true,
        };
        if reset {
            self.min_list.clear();
            self.min_list.push(MinSample { v, t });
            return;
        }
        // drop candidates that fell out of the window ending at t
        let first = self
            .min_list
            .iter()
            .position(|s| s.t + self.interval >= t)
            .unwrap_or(0);
        if first != 0 {
            self.min_list.drain(..first);
        }
        if let Some(back) = self.min_list.last() {
            if v > back.v {
                if back.t + self.sub < t {
                    self.min_list.push(MinSample { v, t });
                }
                return;
            }
        }
        // v undercuts an interior candidate; everything at or above it
        // can never be the window minimum again
        if let Some(i) = self.min_list.iter().position(|s| v <= s.v) {
            self.min_list.truncate(i);
            self.min_list.push(MinSample { v, t });
        }
    }

    /// True exactly once per interval boundary crossed; advances the
    /// boundary in whole intervals until it exceeds `t`.
    pub fn new_interval(&mut self, t: i64) -> bool {
        if t < self.nxt_intr {
            return false;
        }
        while self.nxt_intr <= t {
            self.nxt_intr += self.interval;
        }
        true
    }

    /// Current window minimum, if any sample has been seen.
    pub fn interval_min(&self) -> Option<MinSample> {
        self.min_list.first().copied()
    }
}

impl Default for MovingMin {
    fn default() -> Self {
        Self::new(INTERVAL, INTERVAL_SPACES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mm() -> MovingMin {
        let mut m = MovingMin::new(100, 5);
        m.set_first_interval(0);
        m
    }

    #[test]
    fn test_first_sample_is_min() {
        let mut m = mm();
        m.add_sample(5.0, 10);
        assert_eq!(m.interval_min(), Some(MinSample { v: 5.0, t: 10 }));
    }

    #[test]
    fn test_lower_value_resets() {
        let mut m = mm();
        m.add_sample(5.0, 10);
        m.add_sample(4.0, 20);
        assert_eq!(m.interval_min(), Some(MinSample { v: 4.0, t: 20 }));
    }

    #[test]
    fn test_gap_beyond_interval_resets() {
        let mut m = mm();
        m.add_sample(4.0, 20);
        m.add_sample(6.0, 200);
        assert_eq!(m.interval_min(), Some(MinSample { v: 6.0, t: 200 }));
    }

    #[test]
    fn test_subinterval_spacing() {
        let mut m = mm();
        m.add_sample(1.0, 0);
        // too close to the back to be worth keeping
        m.add_sample(2.0, 10);
        assert_eq!(m.min_list.len(), 1);
        m.add_sample(2.0, 25);
        assert_eq!(m.min_list.len(), 2);
    }

    #[test]
    fn test_interior_truncation() {
        let mut m = mm();
        m.add_sample(1.0, 0);
        m.add_sample(2.0, 25);
        m.add_sample(3.0, 50);
        m.add_sample(2.5, 60);
        assert_eq!(m.min_list.len(), 3);
        assert_eq!(m.min_list[2], MinSample { v: 2.5, t: 60 });
        assert_eq!(m.interval_min(), Some(MinSample { v: 1.0, t: 0 }));
    }

    #[test]
    fn test_expired_front_dropped() {
        let mut m = mm();
        m.add_sample(1.0, 0);
        m.add_sample(2.0, 25);
        m.add_sample(3.0, 110);
        // (1.0, 0) is outside the window ending at 110
        assert_eq!(m.interval_min(), Some(MinSample { v: 2.0, t: 25 }));
    }

    #[test]
    fn test_new_interval_ticks_once() {
        let mut m = mm();
        assert!(!m.new_interval(50));
        assert!(m.new_interval(100));
        assert!(!m.new_interval(150));
        // several boundaries crossed at once still tick a single time
        assert!(m.new_interval(350));
        assert!(!m.new_interval(399));
        assert!(m.new_interval(400));
    }
}
