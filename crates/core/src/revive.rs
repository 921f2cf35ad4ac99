//! Revive idempotency guard.
//!
//! A revive purchase is anchored to the session that was live when the
//! purchase was requested. The `gameId` echoed back by the engine on
//! `REVIVE_USED` can be stale or reused, so it never selects the target; it is
//! only logged.
//!
//! Only one purchase can be outstanding. The pending slot is read and cleared
//! in one step, so a duplicated `REVIVE_USED` finds it empty.

use tracing::{debug, warn};

use crate::session::{SessionStatus, SessionStore};
use crate::SessionId;

/// Reason a `REVIVE_USED` message was absorbed without effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviveDenied {
    /// No purchase is outstanding (duplicate or unsolicited message).
    NoPendingRequest,
    /// The requesting session already consumed its revive.
    AlreadyRevived { session_id: SessionId },
    /// The requesting session ended before the revive arrived.
    TargetEnded { session_id: SessionId },
    /// The requesting session is no longer reachable.
    TargetGone { session_id: SessionId },
}

impl ReviveDenied {
    pub fn rule(&self) -> &'static str {
        match self {
            Self::NoPendingRequest => "revive_no_pending",
            Self::AlreadyRevived { .. } => "revive_already_used",
            Self::TargetEnded { .. } => "revive_target_ended",
            Self::TargetGone { .. } => "revive_target_gone",
        }
    }
}

/// Single-slot register of the outstanding revive purchase.
#[derive(Debug, Default)]
pub struct ReviveGuard {
    pending: Option<SessionId>,
}

impl ReviveGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember which session a revive was purchased for.
    ///
    /// Overwrites any earlier outstanding purchase.
    pub fn record_revive_request(&mut self, session_id: SessionId) {
        if let Some(previous) = self.pending.replace(session_id.clone())
            && previous != session_id
        {
            warn!(
                rule = "revive_request_overwritten",
                previous = %previous,
                session = %session_id,
                "outstanding revive request replaced"
            );
        }
    }

    pub fn pending(&self) -> Option<&SessionId> {
        self.pending.as_ref()
    }

    /// Discard the outstanding purchase, if any.
    pub fn cancel(&mut self) -> Option<SessionId> {
        let cancelled = self.pending.take();
        if let Some(session_id) = &cancelled {
            warn!(
                rule = "pending_revive_discarded",
                session = %session_id,
                "pending revive discarded"
            );
        }
        cancelled
    }

    /// Consume the outstanding purchase.
    ///
    /// On success the requesting session is marked revived and its id is
    /// returned. `event_game_id` is diagnostic only.
    pub fn consume_revive(
        &mut self,
        event_game_id: Option<&str>,
        store: &mut SessionStore,
    ) -> Result<SessionId, ReviveDenied> {
        let Some(target) = self.pending.take() else {
            return Err(deny(ReviveDenied::NoPendingRequest, event_game_id));
        };

        let Some(session) = store.current_mut().filter(|s| s.id == target) else {
            let denied = if store.last_ended().is_some_and(|s| s.id == target) {
                ReviveDenied::TargetEnded { session_id: target }
            } else {
                ReviveDenied::TargetGone { session_id: target }
            };
            return Err(deny(denied, event_game_id));
        };

        if session.revive_used {
            // The live game keeps playing; it is not waiting on a revive.
            if session.status == SessionStatus::Reviving {
                session.status = SessionStatus::Active;
            }
            return Err(deny(
                ReviveDenied::AlreadyRevived { session_id: target },
                event_game_id,
            ));
        }

        if !session.matches_game_id(event_game_id) {
            debug!(
                session = %target,
                engine_game_id = ?session.engine_game_id,
                reported_game_id = ?event_game_id,
                "revive reported under a different game id; applying to requesting session"
            );
        }

        session.revive_used = true;
        session.revive_consumed_for = Some(target.clone());
        if session.status == SessionStatus::Reviving {
            session.status = SessionStatus::Active;
        }
        debug!(session = %target, reported_game_id = ?event_game_id, "revive consumed");
        Ok(target)
    }
}

fn deny(denied: ReviveDenied, event_game_id: Option<&str>) -> ReviveDenied {
    warn!(
        rule = denied.rule(),
        reported_game_id = ?event_game_id,
        "revive denied"
    );
    denied
}
