//! Error types for bundling and configuration.

use std::path::PathBuf;

use hopline_core::{PendingTransaction, SessionId};
use thiserror::Error;

use crate::chain::ChainError;

#[derive(Debug, Error)]
pub enum FlushError {
    #[error("session {session_id} was already flushed")]
    AlreadyFlushed { session_id: SessionId },

    #[error("session {session_id} has not ended")]
    NotEnded { session_id: SessionId },

    /// The bundle is handed back untouched so it can be resubmitted as is.
    #[error("submitting bundle for session {} failed: {source}", .bundle.session_id())]
    Submission {
        bundle: PendingTransaction,
        #[source]
        source: ChainError,
    },
}

impl FlushError {
    /// The preserved bundle of a failed submission.
    pub fn bundle(&self) -> Option<&PendingTransaction> {
        match self {
            Self::Submission { bundle, .. } => Some(bundle),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error while reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
