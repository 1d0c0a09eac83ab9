//! Sessions
//!
//! A [`Bcdb`] handle knows how to reach the cluster. A [`DbSession`] binds a
//! user id, its signer and timeouts to that handle and opens transaction
//! contexts. Contexts are owned by their caller; the session keeps no record
//! of them.

use std::sync::Arc;

use tracing::debug;

use crate::context::{CommonTxContext, ConfigTxContext, DbsTxContext, Timeouts};
use crate::crypto::Signer;
use crate::error::BcdbResult;
use crate::transport::{ReplicaSet, RequestDispatcher};

/// Connection to a cluster
#[derive(Clone)]
pub struct Bcdb {
    replicas: Arc<ReplicaSet>,
    dispatcher: Arc<dyn RequestDispatcher>,
}

impl Bcdb {
    /// Create a handle that sends requests to `replicas` through `dispatcher`
    pub fn new(replicas: ReplicaSet, dispatcher: Arc<dyn RequestDispatcher>) -> Self {
        Bcdb {
            replicas: Arc::new(replicas),
            dispatcher,
        }
    }

    /// Replicas requests are sent to
    pub fn replicas(&self) -> &ReplicaSet {
        &self.replicas
    }

    /// Open a session acting as `user_id`
    pub fn session(
        &self,
        user_id: impl Into<String>,
        signer: Arc<dyn Signer>,
        timeouts: Timeouts,
    ) -> DbSession {
        let user_id = user_id.into();
        debug!(user = %user_id, replicas = self.replicas.len(), "session opened");

        DbSession {
            user_id,
            signer,
            replicas: self.replicas.clone(),
            dispatcher: self.dispatcher.clone(),
            timeouts,
        }
    }
}

/// A user's session with the cluster
#[derive(Clone)]
pub struct DbSession {
    user_id: String,
    signer: Arc<dyn Signer>,
    replicas: Arc<ReplicaSet>,
    dispatcher: Arc<dyn RequestDispatcher>,
    timeouts: Timeouts,
}

impl DbSession {
    /// User the session acts for
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Deadlines given to every context opened from this session
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    fn common(&self) -> CommonTxContext {
        CommonTxContext::new(
            self.user_id.clone(),
            self.signer.clone(),
            self.replicas.clone(),
            self.dispatcher.clone(),
            self.timeouts,
        )
    }

    /// Open a context for creating and deleting databases
    pub fn dbs_tx(&self) -> DbsTxContext {
        DbsTxContext::new(self.common())
    }

    /// Open a context for changing the cluster configuration.
    ///
    /// Reads the committed configuration, so this fails if the cluster
    /// cannot be queried within the query timeout.
    pub async fn config_tx(&self) -> BcdbResult<ConfigTxContext> {
        ConfigTxContext::open(self.common()).await
    }
}
