//! Transaction bundler.
//!
//! Turns an ended session into one pending transaction and hands it to the
//! chain client. Without a complete chain binding the bundler runs offline:
//! bundles are still produced, but submission is simulated.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;

use hopline_core::{PendingTransaction, Session, SessionId};
use tracing::{info, warn};

use crate::chain::{ChainBinding, ChainClient, ChainConfig, ChainError, TxReceipt, Unbound};
use crate::error::FlushError;

/// Outcome of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitReceipt {
    /// Sent through the chain client.
    Submitted(TxReceipt),
    /// Offline mode: nothing left the process.
    Simulated,
}

/// Number of recently flushed session ids remembered for duplicate refusal.
///
/// Older sessions are already guarded by the aggregator's `flushed` flag.
pub const FLUSH_HISTORY: usize = 256;

/// Bounded set of recently flushed session ids.
#[derive(Debug, Default)]
struct Emitted {
    ids: HashSet<SessionId>,
    order: VecDeque<SessionId>,
}

impl Emitted {
    fn contains(&self, session_id: &SessionId) -> bool {
        self.ids.contains(session_id)
    }

    /// Returns `false` when the id was already present.
    fn insert(&mut self, session_id: SessionId) -> bool {
        if !self.ids.insert(session_id.clone()) {
            return false;
        }
        self.order.push_back(session_id);
        if self.order.len() > FLUSH_HISTORY
            && let Some(oldest) = self.order.pop_front()
        {
            self.ids.remove(&oldest);
        }
        true
    }
}

enum Mode<C> {
    Connected(Arc<C>),
    Offline,
}

pub struct TransactionBundler<C: ChainClient = Unbound> {
    mode: Mode<C>,
    emitted: Emitted,
}

impl TransactionBundler<Unbound> {
    /// A bundler that never talks to a chain.
    pub fn offline() -> Self {
        info!(rule = "offline_mode", "bundler running offline");
        Self {
            mode: Mode::Offline,
            emitted: Emitted::default(),
        }
    }
}

impl<C: ChainClient> TransactionBundler<C> {
    /// Build a bundler from chain settings.
    ///
    /// Falls back to offline mode when the settings are incomplete or the
    /// connector fails; no error is surfaced.
    pub fn connect<F>(config: &ChainConfig, connector: F) -> Self
    where
        F: FnOnce(ChainBinding) -> Result<C, ChainError>,
    {
        let mode = match config.binding() {
            None => {
                info!(
                    rule = "offline_mode",
                    "chain settings incomplete; bundler running offline"
                );
                Mode::Offline
            }
            Some(binding) => {
                let provider = binding.provider.clone();
                match connector(binding) {
                    Ok(client) => {
                        info!(provider = %provider, "bundler connected");
                        Mode::Connected(Arc::new(client))
                    }
                    Err(err) => {
                        warn!(
                            rule = "offline_mode",
                            provider = %provider,
                            error = %err,
                            "chain client setup failed; bundler running offline"
                        );
                        Mode::Offline
                    }
                }
            }
        };
        Self {
            mode,
            emitted: Emitted::default(),
        }
    }

    /// Wrap an already connected chain client.
    pub fn with_client(client: C) -> Self {
        Self {
            mode: Mode::Connected(Arc::new(client)),
            emitted: Emitted::default(),
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self.mode, Mode::Offline)
    }

    /// Whether a bundle was produced for the session among the last
    /// [`FLUSH_HISTORY`] flushes.
    pub fn was_flushed(&self, session_id: &SessionId) -> bool {
        self.emitted.contains(session_id)
    }

    /// Produce the bundle for an ended session.
    ///
    /// A session id flushed within the last [`FLUSH_HISTORY`] flushes is
    /// refused.
    pub fn flush(&mut self, session: &Session) -> Result<PendingTransaction, FlushError> {
        if session.status.is_live() {
            return Err(FlushError::NotEnded {
                session_id: session.id.clone(),
            });
        }
        if !self.emitted.insert(session.id.clone()) {
            warn!(
                rule = "duplicate_flush",
                session = %session.id,
                "session already flushed; no second bundle"
            );
            return Err(FlushError::AlreadyFlushed {
                session_id: session.id.clone(),
            });
        }

        let bundle = PendingTransaction::from_session(session);
        info!(
            session = %bundle.session_id(),
            jumps = bundle.jumps(),
            score = bundle.score(),
            revive_used = bundle.revive_used(),
            "bundle ready"
        );
        Ok(bundle)
    }

    /// Submit a bundle.
    ///
    /// The returned future owns everything it needs, so the caller can keep
    /// handling events while it runs. A failed submission hands the bundle
    /// back unchanged inside the error.
    pub fn submit(
        &self,
        bundle: PendingTransaction,
    ) -> impl Future<Output = Result<SubmitReceipt, FlushError>> + Send + 'static {
        let client = match &self.mode {
            Mode::Connected(client) => Some(Arc::clone(client)),
            Mode::Offline => None,
        };
        async move {
            let Some(client) = client else {
                info!(
                    rule = "offline_mode",
                    session = %bundle.session_id(),
                    jumps = bundle.jumps(),
                    score = bundle.score(),
                    revive_used = bundle.revive_used(),
                    "offline; submission simulated"
                );
                return Ok(SubmitReceipt::Simulated);
            };
            match client.submit(&bundle).await {
                Ok(receipt) => {
                    info!(
                        session = %bundle.session_id(),
                        reference = %receipt.reference,
                        "bundle submitted"
                    );
                    Ok(SubmitReceipt::Submitted(receipt))
                }
                Err(source) => {
                    tracing::error!(
                        session = %bundle.session_id(),
                        error = %source,
                        "bundle submission failed"
                    );
                    Err(FlushError::Submission { bundle, source })
                }
            }
        }
    }
}
