//! Session store.
//!
//! Holds the single live session plus the most recently ended one, which stays
//! reachable for a grace window so late engine messages can be recognized as
//! late instead of being misapplied to whatever session is live next.

use serde::Serialize;
use tracing::{debug, info};

use crate::{SessionId, Timestamp};

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Active,
    /// A revive purchase is outstanding; play may still report events.
    Reviving,
    Ended,
}

impl SessionStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Active | Self::Reviving)
    }
}

/// Identity and accumulated counters of one game session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub started_at: Timestamp,
    /// Engine correlation id reported on `Start`, if any.
    pub engine_game_id: Option<String>,
    pub jumps: u64,
    pub score: u64,
    pub revive_used: bool,
    /// Session the consumed revive was purchased for.
    pub revive_consumed_for: Option<SessionId>,
    pub status: SessionStatus,
    /// Set once the bundle for this session has been handed out.
    pub flushed: bool,
}

impl Session {
    /// Create a fresh, active session with zeroed counters.
    pub fn new(id: SessionId, engine_game_id: Option<String>, started_at: Timestamp) -> Self {
        Self {
            id,
            started_at,
            engine_game_id,
            jumps: 0,
            score: 0,
            revive_used: false,
            revive_consumed_for: None,
            status: SessionStatus::Active,
            flushed: false,
        }
    }

    /// Whether an engine-reported id can refer to this session.
    ///
    /// A session started without an engine id accepts any id.
    pub fn matches_game_id(&self, game_id: Option<&str>) -> bool {
        match (self.engine_game_id.as_deref(), game_id) {
            (Some(own), Some(reported)) => own == reported,
            _ => true,
        }
    }
}

/// Refusal returned by [`SessionStore::start_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRefused {
    pub live_session: SessionId,
}

#[derive(Debug, Clone)]
struct EndedSession {
    session: Session,
    ended_at: Timestamp,
}

/// Store for the current session and the last ended one.
#[derive(Debug)]
pub struct SessionStore {
    current: Option<Session>,
    last_ended: Option<EndedSession>,
    grace_ms: u64,
}

impl SessionStore {
    pub fn new(grace_ms: u64) -> Self {
        Self {
            current: None,
            last_ended: None,
            grace_ms,
        }
    }

    pub fn grace_ms(&self) -> u64 {
        self.grace_ms
    }

    /// Create a fresh session and make it current.
    ///
    /// Refused while another session is live; the caller has to end it first.
    pub fn start_session(
        &mut self,
        id: SessionId,
        engine_game_id: Option<String>,
        now: Timestamp,
    ) -> Result<&Session, StartRefused> {
        if let Some(live) = self.current.as_ref() {
            info!(
                rule = "start_while_active",
                live_session = %live.id,
                "refusing to start a session while another is live"
            );
            return Err(StartRefused {
                live_session: live.id.clone(),
            });
        }

        debug!(session = %id, game_id = ?engine_game_id, "session started");
        Ok(self.current.insert(Session::new(id, engine_game_id, now)))
    }

    /// The live session, if any.
    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    pub(crate) fn current_mut(&mut self) -> Option<&mut Session> {
        self.current.as_mut()
    }

    /// End the live session and return a snapshot of it.
    ///
    /// The ended session replaces any previous one as `last_ended`.
    pub fn end_session(&mut self, now: Timestamp) -> Option<Session> {
        let mut session = self.current.take()?;
        session.status = SessionStatus::Ended;
        debug!(session = %session.id, jumps = session.jumps, score = session.score, "session ended");
        self.last_ended = Some(EndedSession {
            session: session.clone(),
            ended_at: now,
        });
        Some(session)
    }

    /// The most recently ended session.
    ///
    /// The grace window is enforced by [`SessionStore::expire`]; until it is
    /// called with a later time the session stays reachable.
    pub fn last_ended(&self) -> Option<&Session> {
        self.last_ended.as_ref().map(|ended| &ended.session)
    }

    /// Forget the last ended session once its grace window has passed.
    pub fn expire(&mut self, now: Timestamp) {
        let expired = self
            .last_ended
            .as_ref()
            .is_some_and(|ended| now.saturating_sub(ended.ended_at) > self.grace_ms);
        if expired && let Some(ended) = self.last_ended.take() {
            debug!(session = %ended.session.id, "ended session left its grace window");
        }
    }
}
