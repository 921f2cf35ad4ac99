//! Event aggregator.
//!
//! State machine over normalized engine events:
//!
//! ```text
//! Idle --Start--> Active --ReviveRequested--> Reviving --ReviveUsed--> Active
//!                   |                            |
//!                   +---------GameOver-----------+--> Ended --Start--> Active
//! ```
//!
//! Rules:
//! - Jumps accumulate, each delta counts at least 1
//! - Score is monotonic within a session
//! - Revives resolve through the [`ReviveGuard`], never through `gameId`
//! - A session is flushed exactly once, when it ends
//! - Events that cannot be attributed to the live session are dropped, never
//!   applied elsewhere
//!
//! Every call returns the deciding rule so the host can audit it.

use tracing::{debug, info, warn};

use crate::revive::{ReviveDenied, ReviveGuard};
use crate::session::{Session, SessionStatus, SessionStore};
use crate::{EventKind, InboundEvent, LATE_EVENT_GRACE_MS, SessionId, SessionIdSource, Timestamp};

/// Aggregator configuration.
#[derive(Debug, Clone, Copy)]
pub struct AggregatorConfig {
    pub late_event_grace_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            late_event_grace_ms: LATE_EVENT_GRACE_MS,
        }
    }
}

/// Observable state of the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    Idle,
    Active,
    Reviving,
    Ended,
}

/// Why an event was absorbed without changing any session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// `Start` while a session is active.
    StartWhileActive { session_id: SessionId },
    /// No live or recently ended session to attribute the event to.
    NoActiveSession { kind: EventKind },
    /// `gameId` matches neither the live nor the recently ended session.
    ForeignGameId { kind: EventKind, game_id: String },
    /// Event for a session that has already ended.
    LateForEndedSession {
        kind: EventKind,
        session_id: SessionId,
    },
    /// Repeated `GameOver` for a session that was already flushed.
    DuplicateGameOver { session_id: SessionId },
}

impl DropReason {
    pub fn rule(&self) -> &'static str {
        match self {
            Self::StartWhileActive { .. } => "start_while_active",
            Self::NoActiveSession { .. } => "no_active_session",
            Self::ForeignGameId { .. } => "foreign_game_id",
            Self::LateForEndedSession { .. } => "late_event_ended_session",
            Self::DuplicateGameOver { .. } => "duplicate_game_over",
        }
    }

    /// Duplicates and stale deliveries, as opposed to invalid transitions.
    pub fn is_out_of_order(&self) -> bool {
        matches!(
            self,
            Self::ForeignGameId { .. }
                | Self::LateForEndedSession { .. }
                | Self::DuplicateGameOver { .. }
        )
    }
}

/// Decision taken for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    SessionStarted {
        session_id: SessionId,
        /// Reviving session that was force-ended to make room.
        superseded: Option<SessionId>,
    },
    JumpRecorded { session_id: SessionId, jumps: u64 },
    ScoreRecorded { session_id: SessionId, score: u64 },
    /// Lower score than the stored one; stored value kept.
    ScoreIgnored {
        session_id: SessionId,
        stored: u64,
        reported: u64,
    },
    ReviveRequested { session_id: SessionId },
    ReviveApplied { session_id: SessionId },
    ReviveDenied(ReviveDenied),
    SessionEnded { session_id: SessionId },
    Dropped(DropReason),
}

impl Decision {
    /// Name of the rule that decided the event.
    pub fn rule(&self) -> &'static str {
        match self {
            Self::SessionStarted {
                superseded: None, ..
            } => "session_started",
            Self::SessionStarted {
                superseded: Some(_),
                ..
            } => "session_superseded",
            Self::JumpRecorded { .. } => "jump_recorded",
            Self::ScoreRecorded { .. } => "score_recorded",
            Self::ScoreIgnored { .. } => "score_not_monotonic",
            Self::ReviveRequested { .. } => "revive_requested",
            Self::ReviveApplied { .. } => "revive_applied",
            Self::ReviveDenied(denied) => denied.rule(),
            Self::SessionEnded { .. } => "session_ended",
            Self::Dropped(reason) => reason.rule(),
        }
    }

    /// Whether the event changed session state.
    pub fn is_applied(&self) -> bool {
        !matches!(
            self,
            Self::ScoreIgnored { .. } | Self::ReviveDenied(_) | Self::Dropped(_)
        )
    }
}

/// Result of handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub decision: Decision,
    /// Snapshot of a session that ended while handling the event, to be
    /// handed to the transaction bundler exactly once.
    pub flush: Option<Session>,
}

impl Outcome {
    fn decided(decision: Decision) -> Self {
        Self {
            decision,
            flush: None,
        }
    }
}

/// Where a session-scoped event belongs.
enum Route {
    Live,
    Ended(SessionId),
    Drop(DropReason),
}

/// The game session state machine.
pub struct Aggregator {
    store: SessionStore,
    guard: ReviveGuard,
    ids: Box<dyn SessionIdSource>,
    jump_counter: u64,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig, ids: Box<dyn SessionIdSource>) -> Self {
        Self {
            store: SessionStore::new(config.late_event_grace_ms),
            guard: ReviveGuard::new(),
            ids,
            jump_counter: 0,
        }
    }

    /// State as of the last handled event or flush.
    pub fn state(&self) -> AggregatorState {
        match self.store.current().map(|s| s.status) {
            Some(SessionStatus::Active) => AggregatorState::Active,
            Some(SessionStatus::Reviving) => AggregatorState::Reviving,
            Some(SessionStatus::Ended) => AggregatorState::Ended,
            None if self.store.last_ended().is_some() => AggregatorState::Ended,
            None => AggregatorState::Idle,
        }
    }

    pub fn current(&self) -> Option<&Session> {
        self.store.current()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn pending_revive(&self) -> Option<&SessionId> {
        self.guard.pending()
    }

    /// Lifetime jump total for UI display.
    ///
    /// Monotonic across sessions and never forces a transaction.
    pub fn jump_counter(&self) -> u64 {
        self.jump_counter
    }

    /// Handle one normalized event observed at `now`.
    pub fn handle(&mut self, event: InboundEvent, now: Timestamp) -> Outcome {
        self.store.expire(now);

        match event {
            InboundEvent::Start { game_id } => self.on_start(game_id, now),
            InboundEvent::ReviveUsed { game_id } => self.on_revive_used(game_id.as_deref()),
            InboundEvent::Jump { game_id, delta } => {
                match self.route(EventKind::Jump, game_id.as_deref()) {
                    Route::Live => self.on_jump(delta),
                    other => self.absorb(other, EventKind::Jump),
                }
            }
            InboundEvent::Score { game_id, score } => {
                match self.route(EventKind::Score, game_id.as_deref()) {
                    Route::Live => self.on_score(score),
                    other => self.absorb(other, EventKind::Score),
                }
            }
            // A purchase is anchored to the live session; the reported id
            // is diagnostic only.
            InboundEvent::ReviveRequested { game_id } => {
                if self.store.current().is_some() {
                    self.on_revive_requested(game_id.as_deref())
                } else {
                    let route = self.route(EventKind::ReviveRequested, game_id.as_deref());
                    self.absorb(route, EventKind::ReviveRequested)
                }
            }
            InboundEvent::GameOver { game_id } => {
                match self.route(EventKind::GameOver, game_id.as_deref()) {
                    Route::Live => self.end_live(now, "game_over"),
                    Route::Ended(session_id) => {
                        warn!(rule = "duplicate_game_over", session = %session_id, "game over already flushed");
                        Outcome::decided(Decision::Dropped(DropReason::DuplicateGameOver {
                            session_id,
                        }))
                    }
                    other => self.absorb(other, EventKind::GameOver),
                }
            }
        }
    }

    /// End and flush the live session on host demand.
    ///
    /// Returns the snapshot to bundle, or `None` when nothing is live.
    pub fn force_flush(&mut self, now: Timestamp) -> Option<Session> {
        self.store.expire(now);
        self.store.current()?;
        self.end_live(now, "forced").flush
    }

    fn route(&self, kind: EventKind, game_id: Option<&str>) -> Route {
        // An id that names the ended session, and not the live one, belongs to
        // the ended session even when the live session accepts any id.
        if let Some(reported) = game_id
            && let Some(ended) = self.store.last_ended()
            && ended.engine_game_id.as_deref() == Some(reported)
            && self
                .store
                .current()
                .is_none_or(|live| live.engine_game_id.as_deref() != Some(reported))
        {
            return Route::Ended(ended.id.clone());
        }

        if let Some(live) = self.store.current() {
            if live.matches_game_id(game_id) {
                return Route::Live;
            }
        } else if let Some(ended) = self.store.last_ended()
            && ended.matches_game_id(game_id)
        {
            return Route::Ended(ended.id.clone());
        }

        match game_id {
            Some(game_id) if self.store.current().is_some() || self.store.last_ended().is_some() => {
                Route::Drop(DropReason::ForeignGameId {
                    kind,
                    game_id: game_id.to_string(),
                })
            }
            _ => Route::Drop(DropReason::NoActiveSession { kind }),
        }
    }

    fn absorb(&self, route: Route, kind: EventKind) -> Outcome {
        let reason = match route {
            Route::Ended(session_id) => DropReason::LateForEndedSession { kind, session_id },
            Route::Drop(reason) => reason,
            Route::Live => DropReason::NoActiveSession { kind },
        };
        if reason.is_out_of_order() {
            warn!(rule = reason.rule(), event = %kind, "event dropped");
        } else {
            info!(rule = reason.rule(), event = %kind, "event dropped");
        }
        Outcome::decided(Decision::Dropped(reason))
    }

    fn on_start(&mut self, game_id: Option<String>, now: Timestamp) -> Outcome {
        let mut flush = None;
        let mut superseded = None;

        match self.store.current().map(|s| (s.id.clone(), s.status)) {
            Some((session_id, SessionStatus::Reviving)) => {
                info!(
                    rule = "session_superseded",
                    session = %session_id,
                    "new game started while a revive was pending; ending previous session"
                );
                flush = self.end_live(now, "superseded").flush;
                superseded = Some(session_id);
            }
            Some((session_id, _)) => {
                info!(
                    rule = "start_while_active",
                    session = %session_id,
                    reported_game_id = ?game_id,
                    "start ignored while a session is active"
                );
                return Outcome::decided(Decision::Dropped(DropReason::StartWhileActive {
                    session_id,
                }));
            }
            None => {}
        }

        self.guard.cancel();

        let id = self.ids.next_id();
        match self.store.start_session(id, game_id, now) {
            Ok(session) => Outcome {
                decision: Decision::SessionStarted {
                    session_id: session.id.clone(),
                    superseded,
                },
                flush,
            },
            Err(refused) => Outcome {
                decision: Decision::Dropped(DropReason::StartWhileActive {
                    session_id: refused.live_session,
                }),
                flush,
            },
        }
    }

    fn on_jump(&mut self, delta: u64) -> Outcome {
        let delta = delta.max(1);
        let Some(session) = self.store.current_mut() else {
            return Outcome::decided(Decision::Dropped(DropReason::NoActiveSession {
                kind: EventKind::Jump,
            }));
        };
        session.jumps = session.jumps.saturating_add(delta);
        self.jump_counter = self.jump_counter.saturating_add(delta);
        Outcome::decided(Decision::JumpRecorded {
            session_id: session.id.clone(),
            jumps: session.jumps,
        })
    }

    fn on_score(&mut self, score: u64) -> Outcome {
        let Some(session) = self.store.current_mut() else {
            return Outcome::decided(Decision::Dropped(DropReason::NoActiveSession {
                kind: EventKind::Score,
            }));
        };
        if score < session.score {
            warn!(
                rule = "score_not_monotonic",
                session = %session.id,
                stored = session.score,
                reported = score,
                "lower score ignored"
            );
            return Outcome::decided(Decision::ScoreIgnored {
                session_id: session.id.clone(),
                stored: session.score,
                reported: score,
            });
        }
        session.score = score;
        Outcome::decided(Decision::ScoreRecorded {
            session_id: session.id.clone(),
            score,
        })
    }

    fn on_revive_requested(&mut self, game_id: Option<&str>) -> Outcome {
        let Some(session) = self.store.current_mut() else {
            return Outcome::decided(Decision::Dropped(DropReason::NoActiveSession {
                kind: EventKind::ReviveRequested,
            }));
        };
        if !session.matches_game_id(game_id) {
            debug!(
                session = %session.id,
                engine_game_id = ?session.engine_game_id,
                reported_game_id = ?game_id,
                "revive requested under a different game id; anchoring to live session"
            );
        }
        session.status = SessionStatus::Reviving;
        let session_id = session.id.clone();
        self.guard.record_revive_request(session_id.clone());
        debug!(session = %session_id, "revive requested");
        Outcome::decided(Decision::ReviveRequested { session_id })
    }

    fn on_revive_used(&mut self, game_id: Option<&str>) -> Outcome {
        match self.guard.consume_revive(game_id, &mut self.store) {
            Ok(session_id) => Outcome::decided(Decision::ReviveApplied { session_id }),
            Err(denied) => Outcome::decided(Decision::ReviveDenied(denied)),
        }
    }

    fn end_live(&mut self, now: Timestamp, cause: &'static str) -> Outcome {
        if let Some(session) = self.store.current_mut() {
            session.flushed = true;
        }
        match self.store.end_session(now) {
            Some(snapshot) => {
                info!(
                    rule = "session_ended",
                    cause,
                    session = %snapshot.id,
                    jumps = snapshot.jumps,
                    score = snapshot.score,
                    revive_used = snapshot.revive_used,
                    "session ended"
                );
                Outcome {
                    decision: Decision::SessionEnded {
                        session_id: snapshot.id.clone(),
                    },
                    flush: Some(snapshot),
                }
            }
            None => Outcome::decided(Decision::Dropped(DropReason::NoActiveSession {
                kind: EventKind::GameOver,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PendingTransaction, SequentialIds};

    fn aggregator() -> Aggregator {
        Aggregator::new(AggregatorConfig::default(), Box::new(SequentialIds::new("S")))
    }

    fn start(game_id: Option<&str>) -> InboundEvent {
        InboundEvent::Start {
            game_id: game_id.map(str::to_string),
        }
    }

    fn jump(delta: u64) -> InboundEvent {
        InboundEvent::Jump {
            game_id: None,
            delta,
        }
    }

    fn score(score: u64) -> InboundEvent {
        InboundEvent::Score {
            game_id: None,
            score,
        }
    }

    fn game_over() -> InboundEvent {
        InboundEvent::GameOver { game_id: None }
    }

    fn revive_requested() -> InboundEvent {
        InboundEvent::ReviveRequested { game_id: None }
    }

    fn revive_used(game_id: Option<&str>) -> InboundEvent {
        InboundEvent::ReviveUsed {
            game_id: game_id.map(str::to_string),
        }
    }

    #[test]
    fn test_idle_until_start() {
        let mut agg = aggregator();
        assert_eq!(agg.state(), AggregatorState::Idle);

        let outcome = agg.handle(jump(1), 0);
        assert_eq!(outcome.decision.rule(), "no_active_session");
        assert_eq!(agg.jump_counter(), 0);

        let outcome = agg.handle(start(None), 1);
        assert_eq!(
            outcome.decision,
            Decision::SessionStarted {
                session_id: SessionId::from("S1"),
                superseded: None
            }
        );
        assert_eq!(agg.state(), AggregatorState::Active);
    }

    #[test]
    fn test_jumps_sum_deltas_with_minimum_one() {
        let mut agg = aggregator();
        agg.handle(start(None), 0);

        let deltas = [1, 3, 0, 2, 0];
        for (i, delta) in deltas.iter().enumerate() {
            agg.handle(jump(*delta), i as u64);
        }

        // zero deltas count as one jump each
        assert_eq!(agg.current().unwrap().jumps, 1 + 3 + 1 + 2 + 1);
        assert_eq!(agg.jump_counter(), 8);
    }

    #[test]
    fn test_jump_counter_is_monotonic_across_sessions() {
        let mut agg = aggregator();
        agg.handle(start(None), 0);
        agg.handle(jump(2), 1);
        agg.handle(game_over(), 2);
        agg.handle(start(None), 3);
        agg.handle(jump(1), 4);

        assert_eq!(agg.current().unwrap().jumps, 1);
        assert_eq!(agg.jump_counter(), 3);
    }

    #[test]
    fn test_score_is_monotonic_in_any_order() {
        for (s1, s2) in [(10, 30), (30, 10), (20, 20)] {
            let mut agg = aggregator();
            agg.handle(start(None), 0);
            agg.handle(score(15), 1);
            agg.handle(score(s1), 2);
            agg.handle(score(s2), 3);
            assert_eq!(agg.current().unwrap().score, 15.max(s1).max(s2));
        }
    }

    #[test]
    fn test_lower_score_is_ignored_with_rule() {
        let mut agg = aggregator();
        agg.handle(start(None), 0);
        agg.handle(score(40), 1);

        let outcome = agg.handle(score(25), 2);
        assert_eq!(
            outcome.decision,
            Decision::ScoreIgnored {
                session_id: SessionId::from("S1"),
                stored: 40,
                reported: 25
            }
        );
        assert_eq!(outcome.decision.rule(), "score_not_monotonic");
        assert!(!outcome.decision.is_applied());
    }

    #[test]
    fn test_basic_session_bundle() {
        let mut agg = aggregator();
        agg.handle(start(None), 0);
        agg.handle(jump(1), 1);
        agg.handle(jump(1), 2);
        agg.handle(score(40), 3);
        agg.handle(score(25), 4);
        let outcome = agg.handle(game_over(), 5);

        let snapshot = outcome.flush.expect("game over flushes");
        assert_eq!(
            PendingTransaction::from_session(&snapshot),
            PendingTransaction::new(SessionId::from("S1"), 2, 40, false)
        );
        assert_eq!(agg.state(), AggregatorState::Ended);
    }

    #[test]
    fn test_duplicate_game_over_flushes_once() {
        let mut agg = aggregator();
        agg.handle(start(None), 0);

        let first = agg.handle(game_over(), 1);
        let second = agg.handle(game_over(), 2);

        assert!(first.flush.is_some());
        assert!(first.flush.unwrap().flushed);
        assert!(second.flush.is_none());
        assert_eq!(
            second.decision,
            Decision::Dropped(DropReason::DuplicateGameOver {
                session_id: SessionId::from("S1")
            })
        );
    }

    #[test]
    fn test_game_over_after_grace_is_no_session() {
        let mut agg = aggregator();
        agg.handle(start(None), 0);
        agg.handle(game_over(), 10);

        let late = agg.handle(game_over(), 10 + LATE_EVENT_GRACE_MS + 1);
        assert_eq!(late.decision.rule(), "no_active_session");
        assert!(late.flush.is_none());
        assert_eq!(agg.state(), AggregatorState::Idle);
    }

    #[test]
    fn test_revive_applies_once() {
        let mut agg = aggregator();
        agg.handle(start(Some("A")), 0);
        let requested = agg.handle(revive_requested(), 1);
        assert_eq!(requested.decision.rule(), "revive_requested");
        assert_eq!(agg.state(), AggregatorState::Reviving);

        let first = agg.handle(revive_used(Some("A")), 2);
        let second = agg.handle(revive_used(Some("stale")), 3);

        assert_eq!(
            first.decision,
            Decision::ReviveApplied {
                session_id: SessionId::from("S1")
            }
        );
        assert_eq!(
            second.decision,
            Decision::ReviveDenied(ReviveDenied::NoPendingRequest)
        );
        assert_eq!(agg.state(), AggregatorState::Active);
        assert!(agg.current().unwrap().revive_used);
    }

    #[test]
    fn test_stale_revive_id_applies_to_requesting_session() {
        let mut agg = aggregator();
        agg.handle(start(None), 0);
        agg.handle(revive_requested(), 1);
        agg.handle(revive_used(Some("stale123")), 2);
        let outcome = agg.handle(game_over(), 3);

        let snapshot = outcome.flush.unwrap();
        assert_eq!(snapshot.id.as_str(), "S1");
        assert!(snapshot.revive_used);
        assert_eq!(snapshot.revive_consumed_for, Some(SessionId::from("S1")));
    }

    #[test]
    fn test_start_while_reviving_discards_pending_revive() {
        let mut agg = aggregator();
        agg.handle(start(None), 0);
        agg.handle(jump(1), 1);
        agg.handle(revive_requested(), 2);

        let restarted = agg.handle(start(None), 3);
        assert_eq!(
            restarted.decision,
            Decision::SessionStarted {
                session_id: SessionId::from("S2"),
                superseded: Some(SessionId::from("S1"))
            }
        );
        let superseded = restarted.flush.expect("superseded session is flushed");
        assert_eq!(superseded.id.as_str(), "S1");
        assert_eq!(superseded.jumps, 1);
        assert!(agg.pending_revive().is_none());

        let used = agg.handle(revive_used(None), 4);
        assert_eq!(
            used.decision,
            Decision::ReviveDenied(ReviveDenied::NoPendingRequest)
        );
        assert!(!agg.current().unwrap().revive_used);
    }

    #[test]
    fn test_start_after_game_over_discards_pending_revive() {
        let mut agg = aggregator();
        agg.handle(start(None), 0);
        agg.handle(revive_requested(), 1);
        agg.handle(game_over(), 2);
        agg.handle(start(None), 3);

        let used = agg.handle(revive_used(None), 4);
        assert!(matches!(used.decision, Decision::ReviveDenied(_)));
        assert!(!agg.current().unwrap().revive_used);
    }

    #[test]
    fn test_revive_used_after_game_over_is_denied() {
        let mut agg = aggregator();
        agg.handle(start(None), 0);
        agg.handle(revive_requested(), 1);
        agg.handle(game_over(), 2);

        let used = agg.handle(revive_used(None), 3);
        assert_eq!(used.decision.rule(), "revive_target_ended");
    }

    #[test]
    fn test_start_while_active_is_absorbed() {
        let mut agg = aggregator();
        agg.handle(start(Some("g1")), 0);
        agg.handle(jump(1), 1);

        let outcome = agg.handle(start(Some("g1")), 2);
        assert_eq!(outcome.decision.rule(), "start_while_active");
        assert!(outcome.flush.is_none());
        assert_eq!(agg.current().unwrap().id.as_str(), "S1");
        assert_eq!(agg.current().unwrap().jumps, 1);
    }

    #[test]
    fn test_foreign_game_id_is_dropped() {
        let mut agg = aggregator();
        agg.handle(start(Some("g1")), 0);

        let outcome = agg.handle(
            InboundEvent::Score {
                game_id: Some("other".into()),
                score: 500,
            },
            1,
        );
        assert_eq!(
            outcome.decision,
            Decision::Dropped(DropReason::ForeignGameId {
                kind: EventKind::Score,
                game_id: "other".into()
            })
        );
        assert_eq!(agg.current().unwrap().score, 0);
    }

    #[test]
    fn test_late_event_for_ended_session_is_not_misapplied() {
        let mut agg = aggregator();
        agg.handle(start(Some("g1")), 0);
        agg.handle(game_over(), 1);
        agg.handle(start(Some("g2")), 2);

        let late = agg.handle(
            InboundEvent::Jump {
                game_id: Some("g1".into()),
                delta: 1,
            },
            3,
        );
        assert_eq!(
            late.decision,
            Decision::Dropped(DropReason::LateForEndedSession {
                kind: EventKind::Jump,
                session_id: SessionId::from("S1")
            })
        );
        assert_eq!(agg.current().unwrap().jumps, 0);
    }

    #[test]
    fn test_late_event_while_idle_after_end() {
        let mut agg = aggregator();
        agg.handle(start(None), 0);
        agg.handle(game_over(), 1);

        let late = agg.handle(score(99), 2);
        assert_eq!(late.decision.rule(), "late_event_ended_session");
        assert_eq!(agg.store().last_ended().unwrap().score, 0);
    }

    #[test]
    fn test_force_flush() {
        let mut agg = aggregator();
        assert!(agg.force_flush(0).is_none());

        agg.handle(start(None), 0);
        agg.handle(score(7), 1);
        let snapshot = agg.force_flush(2).unwrap();
        assert_eq!(snapshot.score, 7);
        assert_eq!(snapshot.status, SessionStatus::Ended);

        // A following game over must not flush again
        let outcome = agg.handle(game_over(), 3);
        assert!(outcome.flush.is_none());
    }

    #[test]
    fn test_jump_while_reviving_counts() {
        let mut agg = aggregator();
        agg.handle(start(None), 0);
        agg.handle(revive_requested(), 1);
        agg.handle(jump(2), 2);
        agg.handle(score(5), 3);

        let session = agg.current().unwrap();
        assert_eq!(session.status, SessionStatus::Reviving);
        assert_eq!(session.jumps, 2);
        assert_eq!(session.score, 5);
    }

    #[test]
    fn test_late_event_not_applied_to_untagged_session() {
        let mut agg = aggregator();
        agg.handle(start(Some("g1")), 0);
        agg.handle(InboundEvent::GameOver { game_id: Some("g1".into()) }, 1);
        agg.handle(start(None), 2);

        let late = agg.handle(
            InboundEvent::Score {
                game_id: Some("g1".into()),
                score: 999,
            },
            3,
        );
        assert_eq!(
            late.decision,
            Decision::Dropped(DropReason::LateForEndedSession {
                kind: EventKind::Score,
                session_id: SessionId::from("S1")
            })
        );
        assert_eq!(agg.current().unwrap().id.as_str(), "S2");
        assert_eq!(agg.current().unwrap().score, 0);

        // Untagged events still reach the live session
        let live = agg.handle(score(5), 4);
        assert_eq!(live.decision.rule(), "score_recorded");
    }

    #[test]
    fn test_revive_request_with_stale_game_id_is_anchored() {
        let mut agg = aggregator();
        agg.handle(start(Some("g2")), 0);

        let requested = agg.handle(
            InboundEvent::ReviveRequested {
                game_id: Some("stale123".into()),
            },
            1,
        );
        assert_eq!(
            requested.decision,
            Decision::ReviveRequested {
                session_id: SessionId::from("S1")
            }
        );
        assert_eq!(agg.pending_revive(), Some(&SessionId::from("S1")));

        let used = agg.handle(revive_used(Some("stale123")), 2);
        assert_eq!(used.decision.rule(), "revive_applied");

        let ended = agg.handle(game_over(), 3);
        assert!(ended.flush.unwrap().revive_used);
    }

    #[test]
    fn test_denied_second_revive_returns_to_active() {
        let mut agg = aggregator();
        agg.handle(start(None), 0);
        agg.handle(revive_requested(), 1);
        agg.handle(revive_used(None), 2);
        agg.handle(revive_requested(), 3);

        let second = agg.handle(revive_used(None), 4);
        assert_eq!(second.decision.rule(), "revive_already_used");
        assert_eq!(agg.state(), AggregatorState::Active);

        // A duplicate start no longer ends the running game
        let restart = agg.handle(start(None), 5);
        assert_eq!(restart.decision.rule(), "start_while_active");
        assert!(restart.flush.is_none());
        assert_eq!(agg.current().unwrap().id.as_str(), "S1");
    }

    #[test]
    fn test_revive_request_without_live_session() {
        let mut agg = aggregator();
        let idle = agg.handle(revive_requested(), 0);
        assert_eq!(idle.decision.rule(), "no_active_session");
        assert_eq!(agg.pending_revive(), None);
        assert_eq!(agg.handle(revive_used(None), 1).decision.rule(), "revive_no_pending");

        agg.handle(start(None), 2);
        agg.handle(game_over(), 3);
        let after_grace = 3 + LATE_EVENT_GRACE_MS + 1;
        let ended = agg.handle(revive_requested(), after_grace);
        assert_eq!(ended.decision.rule(), "no_active_session");
        assert_eq!(agg.pending_revive(), None);
        assert_eq!(
            agg.handle(revive_used(None), after_grace + 1).decision.rule(),
            "revive_no_pending"
        );
    }

    #[test]
    fn test_force_flush_expires_ended_session() {
        let mut agg = aggregator();
        agg.handle(start(None), 0);
        agg.handle(game_over(), 1);
        assert!(agg.store().last_ended().is_some());

        assert!(agg.force_flush(1 + LATE_EVENT_GRACE_MS + 1).is_none());
        assert!(agg.store().last_ended().is_none());
        assert_eq!(agg.state(), AggregatorState::Idle);
    }
}
