//! Request dispatch to the replica set
//!
//! This module provides a pluggable dispatcher layer supporting:
//! - REST over HTTP (for a real cluster)
//! - An in-memory ledger (for testing)
//!
//! # Design
//!
//! A dispatcher only moves signed bytes to one replica and brings the
//! response bytes back. Signing, payload encoding and timeouts are handled
//! by the transaction contexts above it.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::SignatureBytes;

pub mod memory;
pub mod rest;

pub use memory::MemoryLedger;
pub use rest::RestDispatcher;

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No replica could be reached
    #[error("{0}")]
    ConnectionFailed(String),

    /// The deadline elapsed before a response arrived
    #[error("{kind}Timeout error: no response within {after:?}")]
    Timeout {
        /// Whether a query or a transaction submission timed out
        kind: RequestKind,
        /// The deadline that elapsed
        after: Duration,
    },

    /// The server rejected the request's identity or signature
    #[error("error handling request, server returned: status: 401 Unauthorized, message: {0}")]
    Unauthorized(String),

    /// Any other non-success response
    #[error("error handling request, server returned: status: {status}, message: {message}")]
    Server {
        /// HTTP status line
        status: String,
        /// Error message from the response body
        message: String,
    },

    /// The response could not be decoded
    #[error("invalid response data: {0}")]
    InvalidData(String),
}

impl TransportError {
    /// Whether the deadline elapsed
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

/// The two kinds of request a dispatcher sends
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    /// A signed read
    Query,
    /// A transaction envelope
    Submit,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Query => f.write_str("query"),
            RequestKind::Submit => f.write_str("tx"),
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// One server endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    /// Node id of the replica
    pub id: String,
    /// Base URL, e.g. `http://127.0.0.1:6001`
    pub endpoint: String,
}

/// The endpoints a session may contact, in preference order
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaSet(Vec<Replica>);

impl ReplicaSet {
    /// Create a replica set
    pub fn new(replicas: Vec<Replica>) -> Self {
        ReplicaSet(replicas)
    }

    /// Iterate over replicas in preference order
    pub fn iter(&self) -> impl Iterator<Item = &Replica> {
        self.0.iter()
    }

    /// Number of replicas
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Replica> for ReplicaSet {
    fn from_iter<I: IntoIterator<Item = Replica>>(iter: I) -> Self {
        ReplicaSet(iter.into_iter().collect())
    }
}

/// A signed read request
#[derive(Clone, Debug)]
pub struct QueryRequest {
    /// REST path, e.g. `/db/bdb`
    pub path: String,
    /// User the request is sent on behalf of
    pub user_id: String,
    /// Serialized query
    pub payload: Vec<u8>,
    /// Signature over `payload`
    pub signature: SignatureBytes,
    /// Deadline for the response
    pub timeout: Duration,
}

/// A signed transaction envelope ready for submission
#[derive(Clone, Debug)]
pub struct SubmitRequest {
    /// REST path, e.g. `/db/tx`
    pub path: String,
    /// Serialized envelope
    pub envelope: Vec<u8>,
    /// Wait until the transaction is validated and a receipt is available
    pub wait_for_receipt: bool,
    /// Deadline the server is asked to honor when waiting for the receipt
    pub timeout: Duration,
}

/// Sends requests to one endpoint of a replica set
///
/// Implementations must not retry a submission on a different replica once
/// it may have been delivered.
#[async_trait]
pub trait RequestDispatcher: Send + Sync {
    /// Send a query and return the response body
    async fn query(&self, replicas: &ReplicaSet, request: QueryRequest) -> TransportResult<Vec<u8>>;

    /// Submit a transaction envelope and return the response body
    async fn submit(&self, replicas: &ReplicaSet, request: SubmitRequest)
        -> TransportResult<Vec<u8>>;
}
