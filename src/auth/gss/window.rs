//! The GSS sequence window (part of C9): per-context replay protection
//! using a 32-element bitmap, per spec §4.6.

/// The widest gap between `highest` and an accepted future sequence number
/// before it is rejected outright (spec §4.6: `MAXSEQ_GAP = 2^31`).
const MAXSEQ_GAP: u32 = 1 << 31;

/// Width of the replay bitmap.
const WINDOW_BITS: u32 = 32;

/// Why a sequence number was rejected by [`ReplayWindow::check_and_set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayRejection {
    /// `seq == 0`.
    Zero,
    /// `seq` is implausibly far ahead of `highest`.
    TooFarAhead,
    /// `seq` is further behind `highest` than the window covers.
    TooOld,
    /// `seq` was already accepted.
    Replay,
}

/// A 32-bit bitmap `{window, highest}` tracking which of the last 32
/// sequence numbers up to `highest` have been consumed (spec §3 "GSS
/// server session", §4.6).
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayWindow {
    window: u32,
    highest: u32,
}

impl ReplayWindow {
    /// A fresh window with no sequence numbers seen yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current high-water mark.
    pub fn highest(&self) -> u32 {
        self.highest
    }

    /// Validate and, if valid, record `seq` per spec §4.6:
    ///
    /// - `seq == 0` is always rejected.
    /// - `seq > highest + MAXSEQ_GAP` is rejected (implausible jump).
    /// - `seq > highest` shifts the bitmap left by `seq - highest`, sets
    ///   bit 0, and advances `highest` to `seq`.
    /// - Otherwise, `d = highest - seq`; `d >= 32` is too old, bit `d`
    ///   already set is a replay, else bit `d` is set.
    pub fn check_and_set(&mut self, seq: u32) -> Result<(), ReplayRejection> {
        if seq == 0 {
            return Err(ReplayRejection::Zero);
        }
        if seq > self.highest {
            if seq - self.highest > MAXSEQ_GAP {
                return Err(ReplayRejection::TooFarAhead);
            }
            let shift = seq - self.highest;
            self.window = if shift >= WINDOW_BITS { 0 } else { self.window << shift };
            self.window |= 1;
            self.highest = seq;
            return Ok(());
        }

        let d = self.highest - seq;
        if d >= WINDOW_BITS {
            return Err(ReplayRejection::TooOld);
        }
        if self.window & (1 << d) != 0 {
            return Err(ReplayRejection::Replay);
        }
        self.window |= 1 << d;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn monotonic_sequence_is_always_valid() {
        let mut w = ReplayWindow::new();
        for seq in 1..=1000u32 {
            assert!(w.check_and_set(seq).is_ok(), "seq {seq}");
        }
    }

    #[test]
    fn replay_is_rejected() {
        let mut w = ReplayWindow::new();
        w.check_and_set(100).unwrap();
        assert_eq!(w.check_and_set(100), Err(ReplayRejection::Replay));
    }

    #[test]
    fn out_of_order_within_window_is_accepted_once() {
        let mut w = ReplayWindow::new();
        w.check_and_set(100).unwrap();
        assert!(w.check_and_set(99).is_ok());
        assert_eq!(w.check_and_set(99), Err(ReplayRejection::Replay));
    }

    #[test]
    fn too_old_is_rejected() {
        let mut w = ReplayWindow::new();
        w.check_and_set(100).unwrap();
        assert_eq!(w.check_and_set(67), Err(ReplayRejection::TooOld));
    }

    #[test]
    fn zero_is_always_rejected() {
        let mut w = ReplayWindow::new();
        assert_eq!(w.check_and_set(0), Err(ReplayRejection::Zero));
    }

    #[test]
    fn spec_scenario_5_sequence_window_replay() {
        // spec §8 scenario 5.
        let mut w = ReplayWindow::new();
        w.check_and_set(100).unwrap();
        assert_eq!(w.check_and_set(100), Err(ReplayRejection::Replay));
        assert!(w.check_and_set(99).is_ok());
        assert_eq!(w.check_and_set(67), Err(ReplayRejection::TooOld));
    }

    proptest! {
        #[test]
        fn prop_strictly_increasing_sequence_is_always_accepted(
            steps in prop::collection::vec(1u32..1000, 1..200),
        ) {
            let mut w = ReplayWindow::new();
            let mut seq = 0u32;
            for step in steps {
                seq += step;
                prop_assert!(w.check_and_set(seq).is_ok());
                prop_assert_eq!(w.highest(), seq);
            }
        }

        #[test]
        fn prop_replaying_the_highest_seen_seq_is_always_rejected(
            steps in prop::collection::vec(1u32..1000, 1..200),
        ) {
            let mut w = ReplayWindow::new();
            let mut seq = 0u32;
            for step in steps {
                seq += step;
                w.check_and_set(seq).unwrap();
            }
            prop_assert_eq!(w.check_and_set(seq), Err(ReplayRejection::Replay));
        }
    }
}
