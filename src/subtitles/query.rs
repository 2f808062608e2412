//! Active-cue lookup, run once per playback-time tick

use super::types::Cue;
use crate::interval::{first_containing, Interval};

/// First cue with `start <= t < end`
pub fn active_cue(cues: &[Cue], t: f64) -> Option<&Cue> {
    first_containing(cues, t)
}

/// Monotonic scan hint for sorted, non-overlapping cue lists.
///
/// During normal playback `t` only grows, so the cursor remembers how many
/// cues have already ended and starts from there. A backward seek restarts
/// the scan from the top. Overlapping lists always take the plain scan so
/// the earliest-start rule of [`active_cue`] still holds.
#[derive(Debug, Clone)]
pub struct CueCursor {
    /// Number of leading cues with `end <= last_t`
    ended: usize,
    last_t: f64,
    overlapping: bool,
}

impl CueCursor {
    pub fn new(cues: &[Cue]) -> Self {
        Self {
            ended: 0,
            last_t: f64::NEG_INFINITY,
            overlapping: cues.windows(2).any(|w| w[1].start < w[0].end),
        }
    }

    pub fn reset(&mut self) {
        self.ended = 0;
        self.last_t = f64::NEG_INFINITY;
    }

    /// Same answer as [`active_cue`] for the list this cursor was built for
    pub fn active<'a>(&mut self, cues: &'a [Cue], t: f64) -> Option<&'a Cue> {
        if t.is_nan() {
            return None;
        }
        if self.overlapping {
            return active_cue(cues, t);
        }

        if t < self.last_t || self.ended > cues.len() {
            self.reset();
        }
        while self.ended < cues.len() && cues[self.ended].end <= t {
            self.ended += 1;
        }
        self.last_t = t;

        cues.get(self.ended).filter(|cue| cue.contains(t))
    }
}
