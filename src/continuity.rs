//! Per-PID continuity-counter tracking (C5).

use log::warn;
use std::collections::HashMap;

/// Outcome of feeding one continuity counter value to a [`ContinuityTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuityOutcome {
    /// First packet observed for this PID; no prior counter to compare against.
    Initial,
    /// Counter advanced by exactly 1 modulo 16, as expected.
    Advanced,
    /// Counter repeated the previous value exactly once; a tolerated duplicate.
    Duplicate,
    /// Counter neither repeated nor advanced by 1; a discontinuity. The tracker resets its
    /// baseline to the new value so that subsequent packets are judged against it rather than
    /// producing a discontinuity on every following packet.
    Discontinuity,
}

#[derive(Debug, Clone, Copy)]
struct ContinuityState {
    last_cc: u8,
    dup_count: u8,
}

/// Tracks per-PID continuity-counter expectations: a counter either repeats the previous value
/// exactly once (a tolerated duplicate) or advances by 1 modulo 16; anything else is a
/// discontinuity.
///
/// Null-PID (0x1FFF) packets must never be fed here; they carry no continuity semantics.
#[derive(Debug, Default)]
pub struct ContinuityTracker {
    state: HashMap<u16, ContinuityState>,
}

impl ContinuityTracker {
    /// Construct an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one packet's `(pid, continuity_counter)` and classify the transition.
    ///
    /// Panics in debug builds if `pid == 0x1fff`, since null packets must be filtered out by the
    /// caller before reaching the continuity tracker: a null-PID packet must never create or
    /// advance any per-PID state here.
    pub fn feed(&mut self, pid: u16, cc: u8) -> ContinuityOutcome {
        debug_assert_ne!(pid, 0x1fff, "null-PID packets must not reach the continuity tracker");
        let cc = cc & 0x0f;
        match self.state.get_mut(&pid) {
            None => {
                self.state.insert(pid, ContinuityState { last_cc: cc, dup_count: 0 });
                ContinuityOutcome::Initial
            }
            Some(state) => {
                if cc == state.last_cc && state.dup_count == 0 {
                    state.dup_count = 1;
                    ContinuityOutcome::Duplicate
                } else if cc == (state.last_cc + 1) & 0x0f {
                    state.last_cc = cc;
                    state.dup_count = 0;
                    ContinuityOutcome::Advanced
                } else {
                    warn!(
                        "continuity discontinuity on PID {:#06x}: {:#x} -> {:#x}",
                        pid, state.last_cc, cc
                    );
                    state.last_cc = cc;
                    state.dup_count = 0;
                    ContinuityOutcome::Discontinuity
                }
            }
        }
    }

    /// Forget all tracked PIDs.
    pub fn reset(&mut self) {
        self.state.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_packet_is_initial() {
        let mut t = ContinuityTracker::new();
        assert_eq!(t.feed(0x100, 0), ContinuityOutcome::Initial);
    }

    #[test]
    fn sequential_increments_are_advances() {
        let mut t = ContinuityTracker::new();
        t.feed(0x100, 0);
        for cc in 1..=15u8 {
            assert_eq!(t.feed(0x100, cc), ContinuityOutcome::Advanced);
        }
        assert_eq!(t.feed(0x100, 0), ContinuityOutcome::Advanced);
    }

    #[test]
    fn one_duplicate_is_tolerated_but_not_two() {
        let mut t = ContinuityTracker::new();
        t.feed(0x100, 5);
        assert_eq!(t.feed(0x100, 5), ContinuityOutcome::Duplicate);
        assert_eq!(t.feed(0x100, 5), ContinuityOutcome::Discontinuity);
    }

    #[test]
    fn skip_is_a_discontinuity() {
        let mut t = ContinuityTracker::new();
        t.feed(0x100, 0);
        assert_eq!(t.feed(0x100, 5), ContinuityOutcome::Discontinuity);
        // Subsequent packets are judged against the new baseline.
        assert_eq!(t.feed(0x100, 6), ContinuityOutcome::Advanced);
    }

    #[test]
    fn pids_are_tracked_independently() {
        let mut t = ContinuityTracker::new();
        t.feed(0x100, 0);
        t.feed(0x200, 0);
        assert_eq!(t.feed(0x100, 1), ContinuityOutcome::Advanced);
        assert_eq!(t.feed(0x200, 1), ContinuityOutcome::Advanced);
    }
}
