//! Hopline Session Core
//!
//! This crate owns the game-session state that eventually lands on chain:
//! - Session identity and counters (`session`)
//! - One-shot revive bookkeeping (`revive`)
//! - The event state machine (`aggregator`)
//!
//! # Architecture Constraints
//!
//! The core MUST NOT:
//! - Perform I/O operations (file, network, etc.)
//! - Read wall-clock time
//! - Generate session ids from ambient randomness
//!
//! Timestamps and session ids are supplied by the host edge (`hopline-client`),
//! which keeps every decision here replayable from a recorded event stream.

#![deny(unsafe_code)]

pub mod aggregator;
pub mod revive;
pub mod session;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use aggregator::{Aggregator, AggregatorConfig, AggregatorState, Decision, DropReason, Outcome};
pub use revive::{ReviveDenied, ReviveGuard};
pub use session::{Session, SessionStatus, SessionStore, StartRefused};

// ============================================================================
// Type Aliases
// ============================================================================

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Default window during which the last ended session still absorbs late events.
pub const LATE_EVENT_GRACE_MS: u64 = 5_000;

// ============================================================================
// Session Identity
// ============================================================================

/// Opaque host-assigned session identifier.
///
/// Distinct from the engine's `gameId`, which is untrusted and only used for
/// correlation hints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Source of fresh session ids.
///
/// The core never mints ids itself; production code plugs in random ids,
/// tests and journal replay plug in deterministic ones.
pub trait SessionIdSource: Send {
    fn next_id(&mut self) -> SessionId;
}

/// Deterministic ids of the form `{prefix}{n}`, starting at 1.
#[derive(Debug, Clone)]
pub struct SequentialIds {
    prefix: String,
    next: u64,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 1,
        }
    }
}

impl SessionIdSource for SequentialIds {
    fn next_id(&mut self) -> SessionId {
        let id = SessionId(format!("{}{}", self.prefix, self.next));
        self.next += 1;
        id
    }
}

// ============================================================================
// Inbound Events
// ============================================================================

/// Discriminant of an [`InboundEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    Jump,
    Score,
    ReviveRequested,
    ReviveUsed,
    GameOver,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Jump => "jump",
            Self::Score => "score",
            Self::ReviveRequested => "revive_requested",
            Self::ReviveUsed => "revive_used",
            Self::GameOver => "game_over",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "start" => Some(Self::Start),
            "jump" => Some(Self::Jump),
            "score" => Some(Self::Score),
            "revive_requested" => Some(Self::ReviveRequested),
            "revive_used" => Some(Self::ReviveUsed),
            "game_over" => Some(Self::GameOver),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized event reported by the embedded game engine.
///
/// `game_id` is the engine-local correlation id. It is untrusted: it may be
/// stale, reused, or missing entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Start { game_id: Option<String> },
    Jump { game_id: Option<String>, delta: u64 },
    Score { game_id: Option<String>, score: u64 },
    ReviveRequested { game_id: Option<String> },
    ReviveUsed { game_id: Option<String> },
    GameOver { game_id: Option<String> },
}

impl InboundEvent {
    /// Rebuild an event from its kind, id and payload value.
    ///
    /// `value` is the jump delta or score and is ignored for other kinds.
    pub fn from_parts(kind: EventKind, game_id: Option<String>, value: u64) -> Self {
        match kind {
            EventKind::Start => Self::Start { game_id },
            EventKind::Jump => Self::Jump {
                game_id,
                delta: value,
            },
            EventKind::Score => Self::Score {
                game_id,
                score: value,
            },
            EventKind::ReviveRequested => Self::ReviveRequested { game_id },
            EventKind::ReviveUsed => Self::ReviveUsed { game_id },
            EventKind::GameOver => Self::GameOver { game_id },
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Start { .. } => EventKind::Start,
            Self::Jump { .. } => EventKind::Jump,
            Self::Score { .. } => EventKind::Score,
            Self::ReviveRequested { .. } => EventKind::ReviveRequested,
            Self::ReviveUsed { .. } => EventKind::ReviveUsed,
            Self::GameOver { .. } => EventKind::GameOver,
        }
    }

    pub fn game_id(&self) -> Option<&str> {
        match self {
            Self::Start { game_id }
            | Self::Jump { game_id, .. }
            | Self::Score { game_id, .. }
            | Self::ReviveRequested { game_id }
            | Self::ReviveUsed { game_id }
            | Self::GameOver { game_id } => game_id.as_deref(),
        }
    }

    /// Kind-specific payload (jump delta or score), 0 for the other kinds.
    pub fn value(&self) -> u64 {
        match self {
            Self::Jump { delta, .. } => *delta,
            Self::Score { score, .. } => *score,
            _ => 0,
        }
    }
}

// ============================================================================
// Pending Transaction
// ============================================================================

/// The on-chain bundle for one finished session.
///
/// Immutable once built: fields are private and only readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    session_id: SessionId,
    jumps: u64,
    score: u64,
    revive_used: bool,
}

impl PendingTransaction {
    pub fn new(session_id: SessionId, jumps: u64, score: u64, revive_used: bool) -> Self {
        Self {
            session_id,
            jumps,
            score,
            revive_used,
        }
    }

    /// Capture the final counters of a session snapshot.
    pub fn from_session(session: &Session) -> Self {
        Self::new(
            session.id.clone(),
            session.jumps,
            session.score,
            session.revive_used,
        )
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn jumps(&self) -> u64 {
        self.jumps
    }

    pub fn score(&self) -> u64 {
        self.score
    }

    pub fn revive_used(&self) -> bool {
        self.revive_used
    }
}

// ============================================================================
// Tests
// ============================================================================
