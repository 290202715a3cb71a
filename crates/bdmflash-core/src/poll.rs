//! Bounded busy-wait helper
//!
//! Every wait in this crate (freeze, resynchronization, flash completion)
//! is a poll loop with an explicit iteration bound. The step closure does
//! its own sampling and delaying and reports whether the condition holds.

use crate::error::Result;

/// Result of a bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Condition observed after this many polls
    Done(u32),
    /// The bound was exhausted
    Timeout,
}

impl WaitOutcome {
    /// Whether the condition was observed
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}

/// Run `step` up to `bound` times until it returns `true`
///
/// Faults from `step` abort the wait immediately.
pub fn poll_bounded<F>(bound: u32, mut step: F) -> Result<WaitOutcome>
where
    F: FnMut() -> Result<bool>,
{
    for polls in 1..=bound {
        if step()? {
            return Ok(WaitOutcome::Done(polls));
        }
    }
    Ok(WaitOutcome::Timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_done_after_polls() {
        let mut count = 0;
        let outcome = poll_bounded(100, || {
            count += 1;
            Ok(count == 10)
        })
        .unwrap();
        assert_eq!(outcome, WaitOutcome::Done(10));
    }

    #[test]
    fn test_timeout() {
        let mut count = 0;
        let outcome = poll_bounded(5, || {
            count += 1;
            Ok(false)
        })
        .unwrap();
        assert_eq!(outcome, WaitOutcome::Timeout);
        assert_eq!(count, 5);
    }

    #[test]
    fn test_fault_aborts() {
        assert_eq!(poll_bounded(5, || Err(Error::Port)), Err(Error::Port));
    }
}
