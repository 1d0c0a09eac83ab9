//! Transaction contexts
//!
//! A context is a single-use builder for one administrative transaction. It
//! is opened from a [`crate::session::DbSession`], collects staged changes,
//! and is then either committed or aborted exactly once. After that it is
//! spent and every call fails with [`BcdbError::TxSpent`](crate::BcdbError::TxSpent).
//!
//! Each kind embeds a [`CommonTxContext`], which owns the spent state, the
//! identity binding and the commit/abort protocol.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BcdbResult;
use crate::types::TxReceipt;

mod common;
pub mod config;
pub mod dbs;

pub use common::CommonTxContext;
pub use config::ConfigTxContext;
pub use dbs::DbsTxContext;

/// Lifecycle of a context
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxState {
    /// Accepting staging calls and queries
    Open,
    /// A commit was attempted
    Committed,
    /// Staged changes were discarded
    Aborted,
}

impl TxState {
    /// Whether the context can no longer be used
    pub fn is_spent(&self) -> bool {
        !matches!(self, TxState::Open)
    }
}

/// Deadlines applied to requests made by a context
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Deadline for submitting a transaction and, when syncing, for its receipt
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub tx: Duration,
    /// Deadline for queries
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub query: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            tx: default_timeout(),
            query: default_timeout(),
        }
    }
}

/// What a successful commit returns
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Id assigned to the submitted transaction
    pub tx_id: String,
    /// Receipt, present when the commit waited for validation
    pub receipt: Option<TxReceipt>,
}

/// Commit/abort protocol shared by all transaction kinds
#[async_trait]
pub trait TxContext: Send {
    /// Sign and submit the staged transaction.
    ///
    /// With `sync` the call waits until the server has validated the
    /// transaction. A non-valid verdict is returned as
    /// [`BcdbError::InvalidTx`](crate::BcdbError::InvalidTx). The context is
    /// spent once the transaction has been handed to the dispatcher, whatever
    /// the outcome.
    async fn commit(&mut self, sync: bool) -> BcdbResult<CommitOutcome>;

    /// Discard staged changes without contacting the server
    fn abort(&mut self) -> BcdbResult<()>;

    /// Current lifecycle state
    fn state(&self) -> TxState;

    /// Whether the context can no longer be used
    fn is_spent(&self) -> bool {
        self.state().is_spent()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use crate::crypto::Identity;
    use crate::session::{Bcdb, DbSession};
    use crate::transport::{MemoryLedger, Replica, ReplicaSet};

    use super::Timeouts;

    pub(crate) fn replicas() -> ReplicaSet {
        vec![Replica {
            id: "testNode1".to_string(),
            endpoint: "http://127.0.0.1:6001".to_string(),
        }]
        .into_iter()
        .collect()
    }

    /// A ledger bootstrapped with one admin, and a session for that admin
    pub(crate) fn admin_session() -> (Arc<MemoryLedger>, Identity, DbSession) {
        let admin = Identity::from_seed(&[1u8; 32]);
        let ledger = Arc::new(MemoryLedger::bootstrap("admin", &admin));
        let session = session_for(&ledger, "admin", admin.clone(), Timeouts::default());
        (ledger, admin, session)
    }

    pub(crate) fn session_for(
        ledger: &Arc<MemoryLedger>,
        user_id: &str,
        identity: Identity,
        timeouts: Timeouts,
    ) -> DbSession {
        Bcdb::new(replicas(), ledger.clone()).session(user_id, Arc::new(identity), timeouts)
    }
}
