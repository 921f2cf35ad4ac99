//! Hopline Session Journal
//!
//! Audit trail for finished sessions.
//!
//! # Architecture
//!
//! - `JournalRecorder`: collects the events attributed to one live session,
//!   with the rule that decided each of them
//! - `verify_journal`: replays a journal through a fresh aggregator and checks
//!   that every decision, the rebuilt bundle and its digest are identical
//! - `write_journal` / `read_journal`: Protobuf artifacts on disk
//!
//! A journal only holds events that concern its own session. Drops that name
//! the previously ended session (late events, duplicate game over) are left
//! out, since a fresh aggregator has no such session to compare against.

#![deny(unsafe_code)]

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use hopline_core::{
    Aggregator, AggregatorConfig, Decision, DropReason, EventKind, InboundEvent,
    PendingTransaction, Session, SessionId, SessionIdSource, Timestamp,
};
use hopline_wire::{BundleProto, JournalArtifact, JournalEventProto, encode_bundle};
use prost::Message;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

/// Current journal schema version.
pub const JOURNAL_FORMAT_VERSION: u32 = 1;

// ============================================================================
// End Reason
// ============================================================================

/// Why a journaled session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The engine reported game over.
    GameOver,
    /// A new game started while a revive was pending.
    Superseded,
    /// The host flushed the session.
    Forced,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GameOver => "game_over",
            Self::Superseded => "superseded",
            Self::Forced => "forced",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "game_over" => Some(Self::GameOver),
            "superseded" => Some(Self::Superseded),
            "forced" => Some(Self::Forced),
            _ => None,
        }
    }
}

// ============================================================================
// Journal Recorder
// ============================================================================

/// Records the events of one session.
pub struct JournalRecorder {
    session_id: SessionId,
    started_at: Timestamp,
    late_event_grace_ms: u64,
    events: Vec<JournalEventProto>,
}

impl JournalRecorder {
    /// Begin a journal for a freshly started session.
    pub fn new(session: &Session, late_event_grace_ms: u64) -> Self {
        Self {
            session_id: session.id.clone(),
            started_at: session.started_at,
            late_event_grace_ms,
            events: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Record an event and the decision taken for it.
    ///
    /// Returns `false` when the decision concerns another session and was
    /// therefore not recorded.
    pub fn record(&mut self, event: &InboundEvent, now: Timestamp, decision: &Decision) -> bool {
        if !concerns_own_session(decision) {
            return false;
        }
        self.events.push(JournalEventProto {
            offset_ms: now.saturating_sub(self.started_at),
            kind: event.kind().as_str().to_string(),
            game_id: event.game_id().unwrap_or_default().to_string(),
            value: event.value(),
            rule: decision.rule().to_string(),
        });
        true
    }

    /// Finalize the journal with the session's bundle.
    pub fn finalize(
        self,
        bundle: &PendingTransaction,
        end_reason: EndReason,
        ended_at: Timestamp,
    ) -> JournalArtifact {
        debug!(
            session = %self.session_id,
            events = self.events.len(),
            end_reason = end_reason.as_str(),
            "journal finalized"
        );
        JournalArtifact {
            journal_format_version: JOURNAL_FORMAT_VERSION,
            session_id: self.session_id.to_string(),
            started_at: self.started_at,
            late_event_grace_ms: self.late_event_grace_ms,
            events: self.events,
            bundle: Some(BundleProto::from(bundle)),
            bundle_sha256: bundle_digest(bundle),
            end_reason: end_reason.as_str().to_string(),
            ended_offset_ms: ended_at.saturating_sub(self.started_at),
        }
    }
}

fn concerns_own_session(decision: &Decision) -> bool {
    !matches!(
        decision,
        Decision::Dropped(
            DropReason::LateForEndedSession { .. } | DropReason::DuplicateGameOver { .. }
        )
    )
}

/// Hex SHA-256 of a bundle's submission payload.
pub fn bundle_digest(bundle: &PendingTransaction) -> String {
    let mut hasher = Sha256::new();
    hasher.update(encode_bundle(bundle));
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// Journal Verification
// ============================================================================

/// Journal verification error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("invalid journal format: {reason}")]
    InvalidFormat { reason: String },

    #[error("journal has no bundle")]
    MissingBundle,

    #[error("bundle digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("decision mismatch at event {index}: recorded {expected}, replayed {actual}")]
    DecisionMismatch {
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("replay never ended the session")]
    MissingFlush,

    #[error("bundle mismatch: recorded {expected:?}, replayed {actual:?}")]
    BundleMismatch {
        expected: PendingTransaction,
        actual: PendingTransaction,
    },
}

impl VerifyError {
    fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            reason: reason.into(),
        }
    }
}

/// Hands the recorded session id to the replaying aggregator.
struct RecordedId(SessionId);

impl SessionIdSource for RecordedId {
    fn next_id(&mut self) -> SessionId {
        self.0.clone()
    }
}

/// Verify a journal replays to the recorded outcome.
///
/// # Verification Steps
/// 1. Check format version and that a bundle is present
/// 2. Recompute the bundle digest
/// 3. Replay every event at its recorded offset; each rule must match
/// 4. End the session the way it was ended and rebuild the bundle
/// 5. Assert the rebuilt bundle equals the recorded one
pub fn verify_journal(artifact: &JournalArtifact) -> Result<(), VerifyError> {
    // Step 1: Format
    if artifact.journal_format_version != JOURNAL_FORMAT_VERSION {
        return Err(VerifyError::invalid(format!(
            "unsupported journal version {}",
            artifact.journal_format_version
        )));
    }
    let bundle_proto = artifact
        .bundle
        .clone()
        .ok_or(VerifyError::MissingBundle)?;
    let recorded: PendingTransaction =
        bundle_proto.try_into().map_err(|e: &str| VerifyError::invalid(e))?;
    let end_reason = EndReason::from_name(&artifact.end_reason).ok_or_else(|| {
        VerifyError::invalid(format!("unknown end reason '{}'", artifact.end_reason))
    })?;

    // Step 2: Digest
    let actual_digest = bundle_digest(&recorded);
    if actual_digest != artifact.bundle_sha256 {
        return Err(VerifyError::DigestMismatch {
            expected: artifact.bundle_sha256.clone(),
            actual: actual_digest,
        });
    }

    // Step 3: Replay
    let first = artifact
        .events
        .first()
        .ok_or_else(|| VerifyError::invalid("journal has no events"))?;
    if first.kind != EventKind::Start.as_str() {
        return Err(VerifyError::invalid("journal does not begin with a start event"));
    }

    let mut aggregator = Aggregator::new(
        AggregatorConfig {
            late_event_grace_ms: artifact.late_event_grace_ms,
        },
        Box::new(RecordedId(SessionId::new(artifact.session_id.clone()))),
    );
    let mut ended = None;

    for (index, proto) in artifact.events.iter().enumerate() {
        let kind = EventKind::from_name(&proto.kind).ok_or_else(|| {
            VerifyError::invalid(format!("unknown event kind '{}' at {index}", proto.kind))
        })?;
        let game_id = (!proto.game_id.is_empty()).then(|| proto.game_id.clone());
        let event = InboundEvent::from_parts(kind, game_id, proto.value);

        let outcome = aggregator.handle(event, artifact.started_at + proto.offset_ms);
        let actual = outcome.decision.rule();

        // The opening start may have superseded a session outside this journal.
        let opening_match = index == 0
            && proto.rule == "session_superseded"
            && actual == "session_started";
        if proto.rule != actual && !opening_match {
            return Err(VerifyError::DecisionMismatch {
                index,
                expected: proto.rule.clone(),
                actual: actual.to_string(),
            });
        }
        if outcome.flush.is_some() {
            ended = outcome.flush;
        }
    }

    // Step 4: End
    let snapshot = match end_reason {
        EndReason::GameOver => ended,
        EndReason::Superseded | EndReason::Forced => ended.or_else(|| {
            aggregator.force_flush(artifact.started_at + artifact.ended_offset_ms)
        }),
    }
    .ok_or(VerifyError::MissingFlush)?;

    // Step 5: Bundle
    let rebuilt = PendingTransaction::from_session(&snapshot);
    if rebuilt != recorded {
        return Err(VerifyError::BundleMismatch {
            expected: recorded,
            actual: rebuilt,
        });
    }

    Ok(())
}

// ============================================================================
// Journal I/O
// ============================================================================

/// Write a journal to a file. Refuses to overwrite an existing file.
pub fn write_journal(artifact: &JournalArtifact, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    if path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("Journal already exists at {}", path.display()),
        ));
    }

    let encoded = artifact.encode_to_vec();
    let mut file = fs::File::create(path)?;
    file.write_all(&encoded)?;

    Ok(())
}

/// Read a journal from a file.
pub fn read_journal(path: &Path) -> io::Result<JournalArtifact> {
    let data = fs::read(path)?;
    JournalArtifact::decode(data.as_slice()).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to decode journal: {e}"),
        )
    })
}

// ============================================================================
// Tests
// ============================================================================
