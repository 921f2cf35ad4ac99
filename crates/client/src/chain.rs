//! Chain client seam.
//!
//! The chain client is an external collaborator: it owns the wallet, the
//! provider connection and its own retry behavior. This module defines the
//! interface the bundler submits through and the binding it is built from.

use std::future::Future;

use hopline_core::PendingTransaction;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provider, contract and account a connected chain client is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBinding {
    pub provider: String,
    pub contract: String,
    pub address: String,
}

/// Optional chain settings; all three must be present to connect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChainConfig {
    pub provider: Option<String>,
    pub contract: Option<String>,
    pub address: Option<String>,
}

impl ChainConfig {
    pub fn new(
        provider: impl Into<String>,
        contract: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            provider: Some(provider.into()),
            contract: Some(contract.into()),
            address: Some(address.into()),
        }
    }

    /// The complete binding, or `None` when any part is missing or blank.
    pub fn binding(&self) -> Option<ChainBinding> {
        Some(ChainBinding {
            provider: non_blank(self.provider.as_deref())?,
            contract: non_blank(self.contract.as_deref())?,
            address: non_blank(self.address.as_deref())?,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Receipt returned by a chain client for an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    /// Transaction hash or other collaborator-specific reference.
    pub reference: String,
}

/// Failure reported by a chain client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// Could not reach the provider; worth retrying.
    #[error("transport error: {0}")]
    Transport(String),

    /// The chain or contract rejected the transaction.
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// The wallet/provider could not be set up.
    #[error("chain client unavailable: {0}")]
    Unavailable(String),

    #[error("gave up after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },
}

impl ChainError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Submits finished bundles on chain.
///
/// Implementations must treat the bundle as read-only; retries resend the
/// same bundle.
pub trait ChainClient: Send + Sync + 'static {
    fn submit(
        &self,
        bundle: &PendingTransaction,
    ) -> impl Future<Output = Result<TxReceipt, ChainError>> + Send;
}

/// Chain client type for bundlers that only run offline.
///
/// Never bound to a provider; submitting through it reports the client as
/// unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbound;

impl ChainClient for Unbound {
    async fn submit(&self, _bundle: &PendingTransaction) -> Result<TxReceipt, ChainError> {
        Err(ChainError::Unavailable("no chain binding".to_string()))
    }
}
