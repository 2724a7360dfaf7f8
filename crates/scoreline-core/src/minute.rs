//! Match minute derivation from phase kickoff timestamps.

use crate::types::{EventStatus, PhaseKickoffs, MAX_MINUTE};

const PHASE_2_OFFSET: i32 = 45;
const EXTRA_OFFSET: i32 = 90;

/// Derive the displayed minute for a live record.
///
/// Phase 1 counts from 1 at its kickoff, phase 2 from 46 and extra time
/// from 91. Intermission reports 45. Returns `None` when the status is not
/// a running phase or the relevant kickoff is unknown.
pub fn derive_minute(status: EventStatus, kickoffs: &PhaseKickoffs, now: i64) -> Option<i32> {
    let (kickoff, offset) = match status {
        EventStatus::Phase1 => (kickoffs.phase1?, 0),
        EventStatus::Phase2 => (kickoffs.phase2?, PHASE_2_OFFSET),
        EventStatus::ExtraTime => (kickoffs.extra?, EXTRA_OFFSET),
        EventStatus::Intermission => return Some(PHASE_2_OFFSET),
        _ => return None,
    };
    if now < kickoff {
        return None;
    }
    let elapsed = ((now - kickoff) / 60).min(i64::from(MAX_MINUTE)) as i32;
    Some((offset + elapsed + 1).min(MAX_MINUTE))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kickoffs() -> PhaseKickoffs {
        PhaseKickoffs {
            phase1: Some(1_000),
            phase2: Some(5_000),
            extra: Some(9_000),
        }
    }

    #[test]
    fn test_phase_offsets() {
        let k = kickoffs();
        assert_eq!(derive_minute(EventStatus::Phase1, &k, 1_000), Some(1));
        assert_eq!(derive_minute(EventStatus::Phase1, &k, 1_000 + 30 * 60), Some(31));
        assert_eq!(derive_minute(EventStatus::Phase2, &k, 5_000 + 59), Some(46));
        assert_eq!(derive_minute(EventStatus::ExtraTime, &k, 9_000 + 600), Some(101));
        assert_eq!(derive_minute(EventStatus::Intermission, &k, 4_000), Some(45));
    }

    #[test]
    fn test_unknown_kickoff_or_non_running() {
        let k = PhaseKickoffs::default();
        assert_eq!(derive_minute(EventStatus::Phase1, &k, 10_000), None);
        assert_eq!(derive_minute(EventStatus::Ended, &kickoffs(), 10_000), None);
        assert_eq!(derive_minute(EventStatus::Phase1, &kickoffs(), 500), None);
    }
}
