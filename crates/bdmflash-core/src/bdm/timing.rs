//! Timing parameters derived from the speed setting
//!
//! All delays derive from one base delay. The wait-loop bound scales
//! inversely with the per-poll delay so that a bounded wait gives up after
//! roughly the same wall-clock time at every speed.

/// Nanoseconds per speed unit
pub const SPEED_UNIT_NS: u32 = 250;

/// Speed setting the reference wait bound is defined at
pub const REFERENCE_SPEED: u32 = 4;

/// Poll count of a bounded wait at the reference speed
pub const REFERENCE_WAIT_COUNT: u32 = 0xFFFF;

/// Assumed cost of one status poll when no delay is inserted
const FAST_POLL_NS: u64 = 125;

/// Upper bound on any derived wait count
const MAX_WAIT_COUNT: u64 = 0x00FF_FFFF;

/// Default time the reset line is held asserted
pub const DEFAULT_RESET_NS: u32 = 20_000_000;

/// Runtime-tunable timing for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Speed setting these values were derived from (0 = fastest)
    pub speed: u32,
    /// Delay after each clock low phase
    pub norm_ns: u32,
    /// Clock high hold before sampling
    pub half_ns: u32,
    /// Short settle delay between line changes
    pub short_ns: u32,
    /// Long delay for pulses on slow lines
    pub long_ns: u32,
    /// Minimum delay per poll iteration
    pub min_ns: u32,
    /// Extra time reset is held beyond the long delay
    pub reset_extra_ns: u32,
    /// No per-bit delay; the engine polls DSO before a frame instead
    pub fast: bool,
    /// Iteration bound of every bounded wait
    pub wait_count: u32,
}

impl Timing {
    /// Derive all timing values from a speed setting
    pub fn from_speed(speed: u32) -> Self {
        let norm_ns = speed.saturating_mul(SPEED_UNIT_NS);
        let min_ns = norm_ns / 2;

        let reference_min = (REFERENCE_SPEED * SPEED_UNIT_NS / 2) as u64;
        let per_poll = (min_ns as u64).max(FAST_POLL_NS);
        let wait_count = (REFERENCE_WAIT_COUNT as u64 * reference_min / per_poll)
            .clamp(1, MAX_WAIT_COUNT) as u32;

        Self {
            speed,
            norm_ns,
            half_ns: norm_ns / 2,
            short_ns: norm_ns / 4,
            long_ns: norm_ns.saturating_mul(4),
            min_ns,
            reset_extra_ns: DEFAULT_RESET_NS,
            fast: speed == 0,
            wait_count,
        }
    }

    /// Override the reset hold time
    pub fn with_reset_extra_ns(mut self, ns: u32) -> Self {
        self.reset_extra_ns = ns;
        self
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::from_speed(REFERENCE_SPEED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_speed() {
        let timing = Timing::default();
        assert_eq!(timing.wait_count, REFERENCE_WAIT_COUNT);
        assert_eq!(timing.norm_ns, 1000);
        assert_eq!(timing.half_ns, 500);
        assert!(!timing.fast);
    }

    #[test]
    fn test_faster_means_more_polls() {
        let slow = Timing::from_speed(8);
        let fast = Timing::from_speed(1);
        assert!(fast.min_ns < slow.min_ns);
        assert!(fast.wait_count > slow.wait_count);

        // Same worst-case wall clock within rounding
        let slow_total = slow.wait_count as u64 * slow.min_ns as u64;
        let fast_total = fast.wait_count as u64 * fast.min_ns as u64;
        assert!(slow_total.abs_diff(fast_total) < slow.min_ns as u64 * 2);
    }

    #[test]
    fn test_fast_mode() {
        let timing = Timing::from_speed(0);
        assert!(timing.fast);
        assert_eq!(timing.norm_ns, 0);
        assert!(timing.wait_count > REFERENCE_WAIT_COUNT);
    }
}
