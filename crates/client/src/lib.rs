//! Hopline Game Client
//!
//! Host-side glue between the embedded game engine and the chain.
//!
//! # Architecture
//!
//! - `normalize`: untrusted engine messages to typed events
//! - `Aggregator` (hopline-core): per-session state machine
//! - `TransactionBundler`: one bundle per ended session, submitted through a
//!   `ChainClient` or simulated offline
//! - `JournalRecorder` (hopline-journal): optional replayable audit trail
//!
//! Event handling is synchronous. Only submission is async, and `run` keeps
//! consuming events while submissions are in flight.

#![deny(unsafe_code)]

pub mod bundler;
pub mod chain;
pub mod config;
pub mod error;
pub mod normalize;
pub mod retry;

use std::future::Future;
use std::mem;

use futures_util::stream::{FuturesUnordered, Stream, StreamExt};
use hopline_core::{
    Aggregator, AggregatorState, Decision, InboundEvent, PendingTransaction, Session, SessionId,
    SessionIdSource, Timestamp,
};
use hopline_journal::{EndReason, JournalRecorder};
use hopline_wire::JournalArtifact;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

pub use bundler::{SubmitReceipt, TransactionBundler};
pub use chain::{ChainBinding, ChainClient, ChainConfig, ChainError, TxReceipt, Unbound};
pub use config::ClientConfig;
pub use error::{ConfigError, FlushError};
pub use normalize::{Rejection, normalize, normalize_str};
pub use retry::{BASE_RETRY_DELAY_MS, MAX_RETRIES, RetryPolicy, RetryingChainClient};

/// Random v4 UUID session ids.
#[derive(Debug, Default)]
pub struct UuidSessionIds;

impl SessionIdSource for UuidSessionIds {
    fn next_id(&mut self) -> SessionId {
        SessionId::new(Uuid::new_v4().to_string())
    }
}

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> Timestamp {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    Timestamp::try_from(millis).unwrap_or_default()
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// The message never reached the aggregator.
    Rejected(Rejection),
    Handled {
        decision: Decision,
        /// Bundle of a session that ended while handling the message.
        bundle: Option<PendingTransaction>,
    },
}

impl Received {
    pub fn bundle(&self) -> Option<&PendingTransaction> {
        match self {
            Self::Handled { bundle, .. } => bundle.as_ref(),
            Self::Rejected(_) => None,
        }
    }

    pub fn rule(&self) -> &'static str {
        match self {
            Self::Rejected(rejection) => rejection.rule(),
            Self::Handled { decision, .. } => decision.rule(),
        }
    }
}

/// Result of one submission made by [`GameClient::run`].
#[derive(Debug)]
pub struct SubmissionReport {
    pub bundle: PendingTransaction,
    pub result: Result<SubmitReceipt, FlushError>,
}

/// One embedded game: aggregator, bundler and journals.
pub struct GameClient<C: ChainClient = Unbound> {
    aggregator: Aggregator,
    bundler: TransactionBundler<C>,
    grace_ms: u64,
    record_journals: bool,
    recorder: Option<JournalRecorder>,
    journals: Vec<JournalArtifact>,
}

impl GameClient<Unbound> {
    /// A client that never talks to a chain.
    pub fn offline(config: &ClientConfig) -> Self {
        Self::with_bundler(config, TransactionBundler::offline())
    }
}

impl<C: ChainClient> GameClient<RetryingChainClient<C>> {
    /// Build a client from chain settings, wrapping the connected chain
    /// client in the configured retry policy.
    ///
    /// Falls back to offline mode when the settings are incomplete or the
    /// connector fails.
    pub fn new<F>(config: &ClientConfig, connector: F) -> Self
    where
        F: FnOnce(ChainBinding) -> Result<C, ChainError>,
    {
        let retry = config.retry;
        let bundler = TransactionBundler::connect(&config.chain, |binding| {
            connector(binding).map(|client| RetryingChainClient::new(client, retry))
        });
        Self::with_bundler(config, bundler)
    }
}

impl<C: ChainClient> GameClient<C> {
    /// Build a client around an already connected chain client, as is.
    pub fn with_client(config: &ClientConfig, client: C) -> Self {
        Self::with_bundler(config, TransactionBundler::with_client(client))
    }

    /// Build a client with a custom session id source.
    pub fn with_ids(
        config: &ClientConfig,
        bundler: TransactionBundler<C>,
        ids: Box<dyn SessionIdSource>,
    ) -> Self {
        Self {
            aggregator: Aggregator::new(config.aggregator(), ids),
            bundler,
            grace_ms: config.late_event_grace_ms,
            record_journals: config.record_journals,
            recorder: None,
            journals: Vec::new(),
        }
    }

    fn with_bundler(config: &ClientConfig, bundler: TransactionBundler<C>) -> Self {
        Self::with_ids(config, bundler, Box::new(UuidSessionIds))
    }

    pub fn is_offline(&self) -> bool {
        self.bundler.is_offline()
    }

    pub fn state(&self) -> AggregatorState {
        self.aggregator.state()
    }

    pub fn current(&self) -> Option<&Session> {
        self.aggregator.current()
    }

    pub fn pending_revive(&self) -> Option<&SessionId> {
        self.aggregator.pending_revive()
    }

    /// Lifetime jump total for UI display.
    pub fn jump_counter(&self) -> u64 {
        self.aggregator.jump_counter()
    }

    /// Handle one raw engine message now.
    pub fn receive(&mut self, raw: &Value) -> Received {
        self.receive_at(raw, now_ms())
    }

    /// Handle one raw engine message observed at `now`.
    pub fn receive_at(&mut self, raw: &Value, now: Timestamp) -> Received {
        match normalize(raw) {
            Ok(event) => self.handle_at(event, now),
            Err(rejection) => Received::Rejected(rejection),
        }
    }

    /// Handle one already normalized event observed at `now`.
    pub fn handle_at(&mut self, event: InboundEvent, now: Timestamp) -> Received {
        let outcome = self.aggregator.handle(event.clone(), now);
        let end_reason = match outcome.decision {
            Decision::SessionEnded { .. } => EndReason::GameOver,
            _ => EndReason::Superseded,
        };

        // A superseded session is closed before the new one's journal opens.
        let mut bundle = None;
        if end_reason == EndReason::Superseded
            && let Some(snapshot) = &outcome.flush
        {
            bundle = self.flush_snapshot(snapshot, end_reason, now);
        }

        if self.record_journals
            && let Decision::SessionStarted { .. } = outcome.decision
            && let Some(session) = self.aggregator.current()
        {
            self.recorder = Some(JournalRecorder::new(session, self.grace_ms));
        }
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record(&event, now, &outcome.decision);
        }

        if end_reason == EndReason::GameOver
            && let Some(snapshot) = &outcome.flush
        {
            bundle = self.flush_snapshot(snapshot, end_reason, now);
        }

        Received::Handled {
            decision: outcome.decision,
            bundle,
        }
    }

    /// End the live session on host demand and bundle it.
    pub fn force_flush(&mut self) -> Option<PendingTransaction> {
        self.force_flush_at(now_ms())
    }

    pub fn force_flush_at(&mut self, now: Timestamp) -> Option<PendingTransaction> {
        let snapshot = self.aggregator.force_flush(now)?;
        self.flush_snapshot(&snapshot, EndReason::Forced, now)
    }

    /// Submit a bundle through the bundler.
    pub fn submit(
        &self,
        bundle: PendingTransaction,
    ) -> impl Future<Output = Result<SubmitReceipt, FlushError>> + Send + 'static {
        self.bundler.submit(bundle)
    }

    /// Journals finished since the last call.
    pub fn take_journals(&mut self) -> Vec<JournalArtifact> {
        mem::take(&mut self.journals)
    }

    /// Consume engine messages until the stream ends, submitting every
    /// bundle as soon as it is produced.
    ///
    /// Returns one report per submission, in completion order.
    pub async fn run<S>(&mut self, mut messages: S) -> Vec<SubmissionReport>
    where
        S: Stream<Item = Value> + Unpin,
    {
        let mut in_flight = FuturesUnordered::new();
        let mut reports = Vec::new();
        let mut open = true;

        loop {
            tokio::select! {
                next = messages.next(), if open => match next {
                    Some(raw) => {
                        if let Some(bundle) = self.receive(&raw).bundle().cloned() {
                            let submission = self.bundler.submit(bundle.clone());
                            in_flight.push(async move {
                                SubmissionReport {
                                    bundle,
                                    result: submission.await,
                                }
                            });
                        }
                    }
                    None => {
                        debug!(in_flight = in_flight.len(), "message stream closed");
                        open = false;
                    }
                },
                Some(report) = in_flight.next(), if !in_flight.is_empty() => {
                    reports.push(report);
                }
                else => break,
            }
        }

        reports
    }

    fn flush_snapshot(
        &mut self,
        snapshot: &Session,
        end_reason: EndReason,
        now: Timestamp,
    ) -> Option<PendingTransaction> {
        let bundle = match self.bundler.flush(snapshot) {
            Ok(bundle) => bundle,
            Err(err) => {
                warn!(error = %err, "flush refused");
                return None;
            }
        };
        if let Some(recorder) = self
            .recorder
            .take_if(|recorder| recorder.session_id() == &snapshot.id)
        {
            self.journals
                .push(recorder.finalize(&bundle, end_reason, now));
        }
        Some(bundle)
    }
}

// ============================================================================
// Tests
// ============================================================================
