//! Delay policies for request pacing and scheduling.
//!
//! [`PaceDelay`] is either a fixed duration or a uniform-random range,
//! resolved to a concrete value on each use. [`HourlyPolicy`] maps
//! hour-of-day ranges to delays so long-running loops can poll less
//! aggressively during night or maintenance windows.

use std::ops::RangeInclusive;
use std::time::Duration;

/// A delay that is either fixed or drawn uniformly from `[lo, hi]`.
///
/// Immutable once constructed; `resolve` picks a fresh value per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceDelay {
    Fixed(Duration),
    Range(Duration, Duration),
}

impl PaceDelay {
    pub const ZERO: PaceDelay = PaceDelay::Fixed(Duration::ZERO);

    pub fn fixed(delay: Duration) -> Self {
        PaceDelay::Fixed(delay)
    }

    /// Uniform-random delay in `[lo, hi]`. Swapped bounds are normalised.
    pub fn range(lo: Duration, hi: Duration) -> Self {
        if hi < lo {
            PaceDelay::Range(hi, lo)
        } else {
            PaceDelay::Range(lo, hi)
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            PaceDelay::Fixed(d) => d.is_zero(),
            PaceDelay::Range(_, hi) => hi.is_zero(),
        }
    }

    /// Resolve to a concrete duration for a single use.
    pub fn resolve(&self) -> Duration {
        match *self {
            PaceDelay::Fixed(d) => d,
            PaceDelay::Range(lo, hi) => {
                let span_ms = hi.saturating_sub(lo).as_millis() as u64;
                lo + Duration::from_millis(rand_millis(span_ms))
            }
        }
    }
}

impl Default for PaceDelay {
    fn default() -> Self {
        PaceDelay::ZERO
    }
}

/// Ordered hour-of-day range bindings with a mandatory default.
///
/// Ranges may overlap; the first matching binding wins, so callers list
/// them in priority order. Hours are wall-clock `0..=23`.
#[derive(Debug, Clone)]
pub struct HourlyPolicy {
    bindings: Vec<(RangeInclusive<u32>, PaceDelay)>,
    default: PaceDelay,
}

impl HourlyPolicy {
    pub fn new(default: PaceDelay) -> Self {
        Self {
            bindings: Vec::new(),
            default,
        }
    }

    pub fn with_range(mut self, start: u32, end: u32, delay: PaceDelay) -> Self {
        self.bindings.push((start..=end, delay));
        self
    }

    /// Resolve the delay for the given hour. Always resolvable: falls back
    /// to the default when no range matches.
    pub fn delay_for_hour(&self, hour: u32) -> Duration {
        for (range, delay) in &self.bindings {
            if range.contains(&hour) {
                return delay.resolve();
            }
        }
        self.default.resolve()
    }
}

// ---------------------------------------------------------------------------
// Deterministic jitter based on std — avoids pulling in the `rand` crate.
// Uses a simple xorshift seeded from the current time.
// ---------------------------------------------------------------------------

fn rand_millis(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    // xorshift64
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % (max_ms + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_resolves_to_itself() {
        let delay = PaceDelay::fixed(Duration::from_millis(250));
        assert_eq!(delay.resolve(), Duration::from_millis(250));
    }

    #[test]
    fn range_delay_is_bounded() {
        let delay = PaceDelay::range(Duration::from_millis(100), Duration::from_millis(200));
        for _ in 0..100 {
            let d = delay.resolve();
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(200));
        }
    }

    #[test]
    fn swapped_range_bounds_are_normalised() {
        let delay = PaceDelay::range(Duration::from_millis(200), Duration::from_millis(100));
        let d = delay.resolve();
        assert!(d >= Duration::from_millis(100));
        assert!(d <= Duration::from_millis(200));
    }

    #[test]
    fn zero_delay() {
        assert!(PaceDelay::ZERO.is_zero());
        assert_eq!(PaceDelay::default().resolve(), Duration::ZERO);
    }

    #[test]
    fn hourly_policy_first_match_wins() {
        let policy = HourlyPolicy::new(PaceDelay::fixed(Duration::from_secs(1)))
            .with_range(0, 6, PaceDelay::fixed(Duration::from_secs(10)))
            .with_range(0, 12, PaceDelay::fixed(Duration::from_secs(20)));

        assert_eq!(policy.delay_for_hour(3), Duration::from_secs(10));
        assert_eq!(policy.delay_for_hour(9), Duration::from_secs(20));
    }

    #[test]
    fn hourly_policy_falls_back_to_default() {
        let policy = HourlyPolicy::new(PaceDelay::fixed(Duration::from_secs(1)))
            .with_range(22, 24, PaceDelay::fixed(Duration::from_secs(30)));

        assert_eq!(policy.delay_for_hour(23), Duration::from_secs(30));
        assert_eq!(policy.delay_for_hour(12), Duration::from_secs(1));
    }

    #[test]
    fn hourly_policy_range_bounds_are_inclusive() {
        let policy = HourlyPolicy::new(PaceDelay::ZERO).with_range(
            7,
            9,
            PaceDelay::fixed(Duration::from_secs(5)),
        );

        assert_eq!(policy.delay_for_hour(7), Duration::from_secs(5));
        assert_eq!(policy.delay_for_hour(9), Duration::from_secs(5));
        assert_eq!(policy.delay_for_hour(10), Duration::ZERO);
    }
}
