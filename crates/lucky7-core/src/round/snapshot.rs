// The single reconciled view of the current round.

use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::protocol::RoundPhase;

/// Game state as seen by consumers of the snapshot.
///
/// `Idle` and `Disconnected` are local-only; the server only ever sends the
/// four [`RoundPhase`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    /// No authoritative event received yet.
    Idle,
    Betting,
    Locked,
    Resolving,
    Settled,
    /// Overlay applied while the connection is down.
    Disconnected,
}

impl From<RoundPhase> for GameState {
    fn from(phase: RoundPhase) -> Self {
        match phase {
            RoundPhase::Betting => GameState::Betting,
            RoundPhase::Locked => GameState::Locked,
            RoundPhase::Resolving => GameState::Resolving,
            RoundPhase::Settled => GameState::Settled,
        }
    }
}

impl std::fmt::Display for GameState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GameState::Idle => "idle",
            GameState::Betting => "betting",
            GameState::Locked => "locked",
            GameState::Resolving => "resolving",
            GameState::Settled => "settled",
            GameState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Reconciled round state.
///
/// The last-known server phase is kept separately from the disconnected
/// overlay, so losing the connection never discards merged fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSnapshot {
    /// Current round identifier; `None` until the first authoritative event.
    pub round_id: Option<String>,
    /// Last phase the server reported.
    pub phase: Option<RoundPhase>,
    /// Authoritative remaining seconds as of `last_synced_at`.
    pub timer_seconds: u32,
    /// When `timer_seconds` was last set from an authoritative event.
    pub last_synced_at: Option<Instant>,
    pub disconnected: bool,
    /// Opaque round metadata, preserved but not interpreted.
    pub metadata: Map<String, Value>,
}

impl RoundSnapshot {
    /// Placeholder used before the first authoritative event. Its game state
    /// is [`GameState::Idle`], which never allows staking.
    pub fn idle() -> Self {
        RoundSnapshot {
            round_id: None,
            phase: None,
            timer_seconds: 0,
            last_synced_at: None,
            disconnected: false,
            metadata: Map::new(),
        }
    }

    pub fn game_state(&self) -> GameState {
        if self.disconnected {
            return GameState::Disconnected;
        }
        self.phase.map_or(GameState::Idle, GameState::from)
    }

    pub fn is_betting_open(&self) -> bool {
        self.game_state() == GameState::Betting
    }

    /// Whether the underlying phase is an open betting window with time left.
    /// Ignores the disconnected overlay.
    pub(crate) fn has_open_window(&self) -> bool {
        self.phase == Some(RoundPhase::Betting) && self.timer_seconds > 0
    }
}

impl Default for RoundSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_snapshot_is_not_open_for_betting() {
        let snap = RoundSnapshot::idle();
        assert_eq!(snap.game_state(), GameState::Idle);
        assert!(!snap.is_betting_open());
    }

    #[test]
    fn disconnected_overlay_hides_phase_without_clearing_it() {
        let snap = RoundSnapshot {
            round_id: Some("R1".into()),
            phase: Some(RoundPhase::Betting),
            timer_seconds: 12,
            disconnected: true,
            ..RoundSnapshot::idle()
        };
        assert_eq!(snap.game_state(), GameState::Disconnected);
        assert!(!snap.is_betting_open());
        assert_eq!(snap.phase, Some(RoundPhase::Betting));
        assert!(snap.has_open_window());
    }

    #[test]
    fn betting_with_no_time_left_is_not_an_open_window() {
        let snap = RoundSnapshot {
            phase: Some(RoundPhase::Betting),
            timer_seconds: 0,
            ..RoundSnapshot::idle()
        };
        assert!(snap.is_betting_open());
        assert!(!snap.has_open_window());
    }
}
