// Round state merger: reduces the event stream into one RoundSnapshot.
//
// Merge rules:
// - `init` and `round:start` replace the snapshot. Round metadata is taken
//   wholesale from the payload; a core field the payload omits carries over.
// - `round:update` and `timer` are shallow field-level merges: only fields
//   present in the payload are overwritten.
// - `connection:lost` sets the disconnected overlay and keeps every field.
// - `connection:restored` clears the overlay and arms a resync check on the
//   next authoritative event. Naming the same round, it merges, even for
//   `init` and `round:start`. Naming a different round, it replaces.
//
// `reduce` is pure and transport-free; `RoundMerger` owns the current state.

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::protocol::{FullRound, RoundFields, ServerEvent};

use super::snapshot::RoundSnapshot;

/// Everything the merger consumes: server events plus the local connection
/// pair synthesized by the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundEvent {
    Init(FullRound),
    RoundStart(FullRound),
    RoundUpdate(RoundFields),
    Timer(RoundFields),
    PhaseBonus(Value),
    ConnectionLost,
    ConnectionRestored,
}

impl From<ServerEvent> for RoundEvent {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::Init(full) => RoundEvent::Init(full),
            ServerEvent::RoundStart(full) => RoundEvent::RoundStart(full),
            ServerEvent::RoundUpdate(fields) => RoundEvent::RoundUpdate(fields),
            ServerEvent::Timer(fields) => RoundEvent::Timer(fields),
            ServerEvent::PhaseBonus(payload) => RoundEvent::PhaseBonus(payload),
        }
    }
}

impl RoundEvent {
    fn name(&self) -> &'static str {
        match self {
            RoundEvent::Init(_) => "init",
            RoundEvent::RoundStart(_) => "round:start",
            RoundEvent::RoundUpdate(_) => "round:update",
            RoundEvent::Timer(_) => "timer",
            RoundEvent::PhaseBonus(_) => "phase:bonus",
            RoundEvent::ConnectionLost => "connection:lost",
            RoundEvent::ConnectionRestored => "connection:restored",
        }
    }
}

/// Side effects of applying one event, for downstream consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeEffects {
    /// `timer_seconds` was set from an authoritative value; the countdown
    /// must resync.
    pub synced: bool,
    /// A betting window just opened (betting phase with time left, newly
    /// entered or entered in a new round).
    pub betting_opened: bool,
    /// The round identifier changed.
    pub round_changed: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergerState {
    pub snapshot: RoundSnapshot,
    /// Set by `connection:restored`, consumed by the next authoritative event.
    awaiting_resync: bool,
}

impl MergerState {
    pub fn awaiting_resync(&self) -> bool {
        self.awaiting_resync
    }
}

/// Apply one event to `state`, returning the successor state and its effects.
///
/// The input state is never modified; the successor snapshot is built fresh.
pub fn reduce(state: &MergerState, event: RoundEvent, now: Instant) -> (MergerState, MergeEffects) {
    let prev = &state.snapshot;
    let mut effects = MergeEffects::default();

    let (snapshot, awaiting_resync) = match event {
        RoundEvent::Init(full) | RoundEvent::RoundStart(full) => {
            let same_round =
                state.awaiting_resync && prev.round_id.as_deref() == Some(full.round_id.as_str());
            let fields = full.into_fields();
            let next = if same_round {
                merge(prev, fields, now, &mut effects)
            } else {
                replace(prev, fields, now, &mut effects)
            };
            (next, false)
        }
        RoundEvent::RoundUpdate(fields) | RoundEvent::Timer(fields) => {
            let new_round = state.awaiting_resync
                && fields.round_id.is_some()
                && fields.round_id != prev.round_id;
            let next = if new_round {
                replace(prev, fields, now, &mut effects)
            } else {
                merge(prev, fields, now, &mut effects)
            };
            (next, false)
        }
        RoundEvent::PhaseBonus(_) => return (state.clone(), effects),
        RoundEvent::ConnectionLost => (
            RoundSnapshot {
                disconnected: true,
                ..prev.clone()
            },
            state.awaiting_resync,
        ),
        RoundEvent::ConnectionRestored => (
            RoundSnapshot {
                disconnected: false,
                ..prev.clone()
            },
            true,
        ),
    };

    effects.round_changed = snapshot.round_id != prev.round_id;
    effects.betting_opened =
        snapshot.has_open_window() && (effects.round_changed || !prev.has_open_window());

    (
        MergerState {
            snapshot,
            awaiting_resync,
        },
        effects,
    )
}

fn replace(
    prev: &RoundSnapshot,
    fields: RoundFields,
    now: Instant,
    effects: &mut MergeEffects,
) -> RoundSnapshot {
    let (timer_seconds, last_synced_at) = match fields.timer_seconds {
        Some(secs) => {
            effects.synced = true;
            (secs, Some(now))
        }
        None => (prev.timer_seconds, prev.last_synced_at),
    };

    RoundSnapshot {
        round_id: fields.round_id.or_else(|| prev.round_id.clone()),
        phase: fields.game_state.or(prev.phase),
        timer_seconds,
        last_synced_at,
        disconnected: prev.disconnected,
        metadata: fields.metadata,
    }
}

fn merge(
    prev: &RoundSnapshot,
    fields: RoundFields,
    now: Instant,
    effects: &mut MergeEffects,
) -> RoundSnapshot {
    let mut next = prev.clone();
    if let Some(round_id) = fields.round_id {
        next.round_id = Some(round_id);
    }
    if let Some(phase) = fields.game_state {
        next.phase = Some(phase);
    }
    if let Some(secs) = fields.timer_seconds {
        next.timer_seconds = secs;
        next.last_synced_at = Some(now);
        effects.synced = true;
    }
    next.metadata.extend(fields.metadata);
    next
}

/// Owner of the single current round state.
#[derive(Debug, Default)]
pub struct RoundMerger {
    state: MergerState,
}

impl RoundMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live snapshot. Always present; idle until the first event.
    pub fn snapshot(&self) -> &RoundSnapshot {
        &self.state.snapshot
    }

    pub fn state(&self) -> &MergerState {
        &self.state
    }

    pub fn apply(&mut self, event: RoundEvent, now: Instant) -> MergeEffects {
        let name = event.name();
        if let RoundEvent::PhaseBonus(payload) = &event {
            debug!("phase:bonus received, no state change: {}", payload);
        }

        let (next, effects) = reduce(&self.state, event, now);
        self.state = next;

        let snap = &self.state.snapshot;
        if effects.round_changed {
            info!(
                "Round changed to {} ({}, {}s)",
                snap.round_id.as_deref().unwrap_or("-"),
                snap.game_state(),
                snap.timer_seconds
            );
        }
        debug!(
            event = name,
            round_id = snap.round_id.as_deref().unwrap_or("-"),
            game_state = %snap.game_state(),
            timer_seconds = snap.timer_seconds,
            "Applied round event"
        );

        effects
    }
}
