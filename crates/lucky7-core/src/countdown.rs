// Locally-ticking display countdown.
//
// The display value is reset to the authoritative `timer_seconds` whenever
// the merger reports a sync, and decremented once per local tick while the
// round is open for betting. It is a smoothing layer only; betting
// eligibility is always read from the snapshot's game state.

use crate::round::{GameState, RoundSnapshot};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Countdown {
    display: u32,
    /// Last authoritative value; the display never exceeds it.
    authoritative: u32,
}

impl Countdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the display to an authoritative value. Authoritative always
    /// wins immediately, whatever the local ticks have done.
    pub fn resync(&mut self, timer_seconds: u32) {
        self.authoritative = timer_seconds;
        self.display = timer_seconds;
    }

    pub fn resync_from(&mut self, snapshot: &RoundSnapshot) {
        self.resync(snapshot.timer_seconds);
    }

    /// Advance one local interval. Only decrements while betting; freezes at
    /// zero and while disconnected. Returns whether the display changed.
    pub fn tick(&mut self, state: GameState) -> bool {
        if state != GameState::Betting || self.display == 0 {
            return false;
        }
        self.display -= 1;
        true
    }

    pub fn display_seconds(&self) -> u32 {
        self.display
    }

    pub fn authoritative_seconds(&self) -> u32 {
        self.authoritative
    }

    /// The countdown is hidden before the first event and while disconnected.
    pub fn is_hidden(state: GameState) -> bool {
        matches!(state, GameState::Idle | GameState::Disconnected)
    }
}
