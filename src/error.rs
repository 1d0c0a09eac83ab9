//! Errors returned by transaction contexts

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::diff::StagingError;
use crate::transport::TransportError;
use crate::types::{Flag, TxReceipt};

/// Errors returned by sessions and transaction contexts
#[derive(Error, Debug)]
pub enum BcdbError {
    /// The context was already committed or aborted
    #[error("transaction context already spent")]
    TxSpent,

    /// A staged change conflicts with the snapshot or with other staged changes
    #[error(transparent)]
    Staging(#[from] StagingError),

    /// The signer could not sign the request
    #[error("signing failed: {0}")]
    Signing(#[from] CryptoError),

    /// The request did not complete
    #[error("failed to {operation} at {path}: {source}")]
    Transport {
        /// What was attempted
        operation: &'static str,
        /// REST path of the request
        path: String,
        /// Error reported by the dispatcher
        #[source]
        source: TransportError,
    },

    /// The transaction was ordered but failed validation
    #[error("transaction txID = {tx_id} is not valid, flag: {flag}, reason: {reason}")]
    InvalidTx {
        /// Id of the rejected transaction
        tx_id: String,
        /// Validation flag from the receipt
        flag: Flag,
        /// Reason given by the server
        reason: String,
        /// The full receipt
        receipt: Box<TxReceipt>,
    },

    /// A payload could not be serialized
    #[error("failed to encode payload: {0}")]
    Encoding(String),
}

impl BcdbError {
    /// Whether the request ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, BcdbError::Transport { source, .. } if source.is_timeout())
    }

    /// Whether the server rejected the request's credentials
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            BcdbError::Transport {
                source: TransportError::Unauthorized(_),
                ..
            }
        )
    }

    /// The receipt carried by a validation rejection
    pub fn receipt(&self) -> Option<&TxReceipt> {
        match self {
            BcdbError::InvalidTx { receipt, .. } => Some(receipt),
            _ => None,
        }
    }
}

/// Result type for context operations
pub type BcdbResult<T> = Result<T, BcdbError>;
