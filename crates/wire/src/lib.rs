//! Hopline Wire Types
//!
//! Shared message shapes crossing a process or trust boundary:
//!
//! - **Inbound messages** (engine iframe → host page): JSON objects posted
//!   across frames. This crate names their tags and fields; normalization
//!   lives in `hopline-client`.
//! - **Bundle payload** (host → chain client): Protobuf encoding of a
//!   `PendingTransaction`, for collaborators that submit raw calldata.
//! - **Session journal** (host → disk): Protobuf audit artifact of one session.

#![deny(unsafe_code)]

use hopline_core::{EventKind, PendingTransaction, SessionId};
use prost::Message;

// ============================================================================
// Inbound Message Vocabulary
// ============================================================================

/// Field carrying the message tag.
pub const TYPE_FIELD: &str = "type";

/// Accepted spellings of the engine correlation id, in lookup order.
pub const GAME_ID_FIELDS: [&str; 3] = ["gameId", "game_id", "gameID"];

/// Accepted spellings of the jump delta, in lookup order.
pub const JUMPS_FIELDS: [&str; 2] = ["jumps", "delta"];

/// Accepted spellings of the score, in lookup order.
pub const SCORE_FIELDS: [&str; 1] = ["score"];

/// Tag of an inbound engine message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Start,
    Jump,
    Score,
    PurchaseRevive,
    ReviveUsed,
    GameOver,
}

impl MessageType {
    /// Canonical tag as posted by the engine.
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Jump => "JUMP",
            Self::Score => "SCORE",
            Self::PurchaseRevive => "PURCHASE_REVIVE",
            Self::ReviveUsed => "REVIVE_USED",
            Self::GameOver => "GAME_OVER",
        }
    }

    /// Parse a tag, ignoring surrounding whitespace and ASCII case.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim();
        let known = [
            ("START", Self::Start),
            ("JUMP", Self::Jump),
            ("SCORE", Self::Score),
            ("PURCHASE_REVIVE", Self::PurchaseRevive),
            ("REVIVE_REQUESTED", Self::PurchaseRevive),
            ("REVIVE_USED", Self::ReviveUsed),
            ("GAME_OVER", Self::GameOver),
        ];
        known
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(tag))
            .map(|(_, kind)| kind)
    }

    pub fn event_kind(&self) -> EventKind {
        match self {
            Self::Start => EventKind::Start,
            Self::Jump => EventKind::Jump,
            Self::Score => EventKind::Score,
            Self::PurchaseRevive => EventKind::ReviveRequested,
            Self::ReviveUsed => EventKind::ReviveUsed,
            Self::GameOver => EventKind::GameOver,
        }
    }

    /// Field names holding this message's numeric payload, if it has one.
    pub fn numeric_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Jump => &JUMPS_FIELDS,
            Self::Score => &SCORE_FIELDS,
            _ => &[],
        }
    }
}

// ============================================================================
// Bundle Payload
// ============================================================================

/// Version of the bundle payload layout.
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// Encoded on-chain bundle.
#[derive(Clone, PartialEq, Message)]
pub struct BundleProto {
    #[prost(uint32, tag = "1")]
    pub format_version: u32,

    #[prost(string, tag = "2")]
    pub session_id: String,

    #[prost(uint64, tag = "3")]
    pub jumps: u64,

    #[prost(uint64, tag = "4")]
    pub score: u64,

    #[prost(bool, tag = "5")]
    pub revive_used: bool,
}

impl From<&PendingTransaction> for BundleProto {
    fn from(bundle: &PendingTransaction) -> Self {
        Self {
            format_version: BUNDLE_FORMAT_VERSION,
            session_id: bundle.session_id().to_string(),
            jumps: bundle.jumps(),
            score: bundle.score(),
            revive_used: bundle.revive_used(),
        }
    }
}

impl TryFrom<BundleProto> for PendingTransaction {
    type Error = &'static str;

    fn try_from(proto: BundleProto) -> Result<Self, Self::Error> {
        if proto.format_version != BUNDLE_FORMAT_VERSION {
            return Err("unsupported bundle format version");
        }
        if proto.session_id.is_empty() {
            return Err("bundle has no session id");
        }
        Ok(PendingTransaction::new(
            SessionId::new(proto.session_id),
            proto.jumps,
            proto.score,
            proto.revive_used,
        ))
    }
}

/// Encode a bundle into its submission payload.
pub fn encode_bundle(bundle: &PendingTransaction) -> Vec<u8> {
    BundleProto::from(bundle).encode_to_vec()
}

// ============================================================================
// Session Journal
// ============================================================================

/// One event handled while a session was live.
#[derive(Clone, PartialEq, Message)]
pub struct JournalEventProto {
    /// Milliseconds since the session started.
    #[prost(uint64, tag = "1")]
    pub offset_ms: u64,

    /// Event kind name (`EventKind::as_str`).
    #[prost(string, tag = "2")]
    pub kind: String,

    /// Engine-reported id; empty when absent.
    #[prost(string, tag = "3")]
    pub game_id: String,

    /// Jump delta or score; 0 for other kinds.
    #[prost(uint64, tag = "4")]
    pub value: u64,

    /// Rule that decided the event.
    #[prost(string, tag = "5")]
    pub rule: String,
}

/// Audit journal of one session.
#[derive(Clone, PartialEq, Message)]
pub struct JournalArtifact {
    /// Schema version (starts at 1).
    #[prost(uint32, tag = "1")]
    pub journal_format_version: u32,

    #[prost(string, tag = "2")]
    pub session_id: String,

    /// Session start, milliseconds since the Unix epoch.
    #[prost(uint64, tag = "3")]
    pub started_at: u64,

    /// Grace window the session was handled with.
    #[prost(uint64, tag = "4")]
    pub late_event_grace_ms: u64,

    #[prost(message, repeated, tag = "5")]
    pub events: Vec<JournalEventProto>,

    #[prost(message, optional, tag = "6")]
    pub bundle: Option<BundleProto>,

    /// Hex SHA-256 of the encoded bundle.
    #[prost(string, tag = "7")]
    pub bundle_sha256: String,

    /// `game_over`, `superseded` or `forced`.
    #[prost(string, tag = "8")]
    pub end_reason: String,

    /// Milliseconds since the session started at which it ended.
    #[prost(uint64, tag = "9")]
    pub ended_offset_ms: u64,
}

// ============================================================================
// Tests
// ============================================================================
