//! Retry policy for chain submissions.
//!
//! Transient transport failures are retried with exponential backoff; every
//! attempt resends the same bundle.

use std::time::Duration;

use hopline_core::PendingTransaction;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::chain::{ChainClient, ChainError, TxReceipt};

/// Maximum retry attempts after an initial submission attempt.
pub const MAX_RETRIES: u32 = 3;
/// Base delay before the first retry.
pub const BASE_RETRY_DELAY_MS: u64 = 500;

/// Exponential backoff policy for chain submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay_ms: BASE_RETRY_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(30);
        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(2u64.saturating_pow(exponent)),
        )
    }
}

/// Chain client wrapper that retries transient failures.
///
/// Every attempt resends the same bundle; nothing is recomputed between
/// attempts.
#[derive(Debug, Clone)]
pub struct RetryingChainClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: ChainClient> RetryingChainClient<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: ChainClient> ChainClient for RetryingChainClient<C> {
    async fn submit(&self, bundle: &PendingTransaction) -> Result<TxReceipt, ChainError> {
        let mut attempt = 0;
        loop {
            match self.inner.submit(bundle).await {
                Ok(receipt) => return Ok(receipt),
                Err(err) if err.is_retryable() && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay(attempt);
                    warn!(
                        session = %bundle.session_id(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "chain submission failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => {
                    return Err(ChainError::RetryExhausted {
                        attempts: attempt + 1,
                        last_error: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }
}
