// Wire protocol for the round feed: inbound event frames and outbound
// subscription frames.
//
// Every frame is a JSON text message. Inbound frames use the envelope
// `{"event": "<kind>", "data": {...}}`; outbound frames are subscription
// requests. Decoding turns an envelope into an exhaustively-typed
// [`ServerEvent`] or a [`ProtocolError`] describing why the frame was dropped.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Event kinds
// ---------------------------------------------------------------------------

/// Server event kinds the client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    Init,
    RoundStart,
    RoundUpdate,
    Timer,
    PhaseBonus,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Init,
        EventKind::RoundStart,
        EventKind::RoundUpdate,
        EventKind::Timer,
        EventKind::PhaseBonus,
    ];

    /// The event name used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Init => "init",
            EventKind::RoundStart => "round:start",
            EventKind::RoundUpdate => "round:update",
            EventKind::Timer => "timer",
            EventKind::PhaseBonus => "phase:bonus",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Payload types
// ---------------------------------------------------------------------------

/// Round phase as sent by the server. Local-only states (idle, disconnected)
/// are not representable here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundPhase {
    Betting,
    Locked,
    Resolving,
    Settled,
}

/// Round fields carried by a payload. `None` means the field was absent from
/// the frame, which matters for partial merges.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoundFields {
    pub round_id: Option<String>,
    pub game_state: Option<RoundPhase>,
    pub timer_seconds: Option<u32>,
    /// Keys this client does not interpret, kept verbatim.
    pub metadata: Map<String, Value>,
}

/// Payload of a full-replace event (`init`, `round:start`), where the round
/// identifier is mandatory.
#[derive(Debug, Clone, PartialEq)]
pub struct FullRound {
    pub round_id: String,
    pub game_state: Option<RoundPhase>,
    pub timer_seconds: Option<u32>,
    pub metadata: Map<String, Value>,
}

impl FullRound {
    pub fn into_fields(self) -> RoundFields {
        RoundFields {
            round_id: Some(self.round_id),
            game_state: self.game_state,
            timer_seconds: self.timer_seconds,
            metadata: self.metadata,
        }
    }
}

/// A decoded, authoritative event from the server feed.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Init(FullRound),
    RoundStart(FullRound),
    RoundUpdate(RoundFields),
    Timer(RoundFields),
    /// Reserved extension point; carries the raw payload.
    PhaseBonus(Value),
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::Init(_) => EventKind::Init,
            ServerEvent::RoundStart(_) => EventKind::RoundStart,
            ServerEvent::RoundUpdate(_) => EventKind::RoundUpdate,
            ServerEvent::Timer(_) => EventKind::Timer,
            ServerEvent::PhaseBonus(_) => EventKind::PhaseBonus,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not a valid event envelope: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),

    #[error("malformed `{kind}` event: missing required field `{field}`")]
    MissingField { kind: EventKind, field: &'static str },

    #[error("malformed `{kind}` event: {source}")]
    InvalidPayload {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePayload {
    round_id: Option<String>,
    game_state: Option<RoundPhase>,
    timer_seconds: Option<u32>,
    #[serde(flatten)]
    metadata: Map<String, Value>,
}

/// Decode one inbound text frame.
///
/// Returns `Ok(None)` for event kinds this client does not know about; they
/// are not errors, just ignored.
pub fn decode_frame(text: &str) -> Result<Option<ServerEvent>, ProtocolError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(ProtocolError::InvalidEnvelope)?;

    let Some(kind) = EventKind::from_wire(&envelope.event) else {
        return Ok(None);
    };

    let event = match kind {
        EventKind::Init => ServerEvent::Init(decode_full(kind, envelope.data)?),
        EventKind::RoundStart => ServerEvent::RoundStart(decode_full(kind, envelope.data)?),
        EventKind::RoundUpdate => ServerEvent::RoundUpdate(decode_partial(kind, envelope.data)?),
        EventKind::Timer => ServerEvent::Timer(decode_partial(kind, envelope.data)?),
        EventKind::PhaseBonus => ServerEvent::PhaseBonus(envelope.data),
    };

    Ok(Some(event))
}

fn decode_partial(kind: EventKind, data: Value) -> Result<RoundFields, ProtocolError> {
    // Partial events may omit the payload entirely.
    let data = match data {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    let payload: WirePayload = serde_json::from_value(data)
        .map_err(|source| ProtocolError::InvalidPayload { kind, source })?;

    Ok(RoundFields {
        round_id: payload.round_id,
        game_state: payload.game_state,
        timer_seconds: payload.timer_seconds,
        metadata: payload.metadata,
    })
}

fn decode_full(kind: EventKind, data: Value) -> Result<FullRound, ProtocolError> {
    let payload: WirePayload = serde_json::from_value(data)
        .map_err(|source| ProtocolError::InvalidPayload { kind, source })?;

    Ok(FullRound {
        round_id: payload.round_id.ok_or(ProtocolError::MissingField {
            kind,
            field: "roundId",
        })?,
        game_state: payload.game_state,
        timer_seconds: payload.timer_seconds,
        metadata: payload.metadata,
    })
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
}

impl SubscriptionAction {
    fn as_str(self) -> &'static str {
        match self {
            SubscriptionAction::Subscribe => "subscribe",
            SubscriptionAction::Unsubscribe => "unsubscribe",
        }
    }
}

/// Build the outbound frame asking the server to start or stop sending `kind`.
pub fn encode_subscription(action: SubscriptionAction, kind: EventKind) -> String {
    serde_json::json!({
        "action": action.as_str(),
        "event": kind.as_str(),
    })
    .to_string()
}
