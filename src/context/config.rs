//! Cluster configuration changes
//!
//! The context reads the committed cluster configuration once, when it is
//! opened, and validates every staged change against that snapshot. The
//! staged changes are submitted as one transaction together with the version
//! the snapshot was read at; the server applies all of them or none.

use async_trait::async_trait;
use tracing::debug;

use super::{CommitOutcome, CommonTxContext, TxContext, TxState};
use crate::diff::ClusterConfigDiff;
use crate::error::BcdbResult;
use crate::types::{
    paths, Admin, ClusterConfig, GetConfigQuery, GetConfigResponse, NodeConfig, PeerConfig,
    Version,
};

/// Stages admin and node changes against a snapshot of the cluster configuration
pub struct ConfigTxContext {
    pub(super) common: CommonTxContext,
    snapshot: ClusterConfig,
    version: Option<Version>,
    diff: ClusterConfigDiff,
}

impl ConfigTxContext {
    /// Fetch the committed configuration and open a context over it
    pub(crate) async fn open(common: CommonTxContext) -> BcdbResult<Self> {
        let query = GetConfigQuery {
            user_id: common.user_id().to_string(),
        };
        let response: GetConfigResponse = common.query(paths::GET_CONFIG.to_string(), &query).await?;
        debug!(
            user = common.user_id(),
            nodes = response.config.nodes.len(),
            admins = response.config.admins.len(),
            "fetched cluster configuration"
        );

        Ok(ConfigTxContext {
            common,
            snapshot: response.config,
            version: response.version,
            diff: ClusterConfigDiff::new(),
        })
    }

    /// A copy of the configuration this context was opened with
    pub fn cluster_config(&self) -> BcdbResult<ClusterConfig> {
        self.common.ensure_open()?;
        Ok(self.snapshot.clone())
    }

    /// Version the snapshot was read at
    pub fn config_version(&self) -> Option<Version> {
        self.version
    }

    /// The snapshot with every staged change applied
    pub fn pending_config(&self) -> BcdbResult<ClusterConfig> {
        self.common.ensure_open()?;
        Ok(self.diff.apply(&self.snapshot)?)
    }

    /// Stage a new cluster admin
    pub fn add_admin(&mut self, admin: Admin) -> BcdbResult<()> {
        self.common.ensure_open()?;
        self.diff.add_admin(&self.snapshot, admin)?;
        Ok(())
    }

    /// Stage removal of a cluster admin
    pub fn delete_admin(&mut self, admin_id: &str) -> BcdbResult<()> {
        self.common.ensure_open()?;
        self.diff.delete_admin(&self.snapshot, admin_id)?;
        Ok(())
    }

    /// Stage replacement of a cluster admin, typically to rotate its certificate
    pub fn update_admin(&mut self, admin: Admin) -> BcdbResult<()> {
        self.common.ensure_open()?;
        self.diff.update_admin(&self.snapshot, admin)?;
        Ok(())
    }

    /// Stage a new node together with its consensus peer
    pub fn add_cluster_node(&mut self, node: NodeConfig, peer: PeerConfig) -> BcdbResult<()> {
        self.common.ensure_open()?;
        self.diff.add_node(&self.snapshot, node, peer)?;
        Ok(())
    }

    /// Stage removal of a node and its consensus peer
    pub fn delete_cluster_node(&mut self, node_id: &str) -> BcdbResult<()> {
        self.common.ensure_open()?;
        self.diff.delete_node(&self.snapshot, node_id)?;
        Ok(())
    }

    /// Stage replacement of a node and its consensus peer
    pub fn update_cluster_node(&mut self, node: NodeConfig, peer: PeerConfig) -> BcdbResult<()> {
        self.common.ensure_open()?;
        self.diff.update_node(&self.snapshot, node, peer)?;
        Ok(())
    }
}

#[async_trait]
impl TxContext for ConfigTxContext {
    async fn commit(&mut self, sync: bool) -> BcdbResult<CommitOutcome> {
        let diff = &self.diff;
        let version = self.version;

        let result = self
            .common
            .commit(paths::POST_CONFIG_TX, sync, |user_id, tx_id| {
                diff.to_tx(user_id, tx_id, version)
            })
            .await;

        if self.common.state().is_spent() {
            self.diff.clear();
        }
        result
    }

    fn abort(&mut self) -> BcdbResult<()> {
        self.common.abort()?;
        self.diff.clear();
        Ok(())
    }

    fn state(&self) -> TxState {
        self.common.state()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::context::testing::{admin_session, session_for};
    use crate::context::Timeouts;
    use crate::crypto::Identity;
    use crate::error::BcdbError;
    use crate::types::Flag;

    fn node(id: &str, port: u32) -> NodeConfig {
        NodeConfig {
            id: id.to_string(),
            address: "127.0.0.1".to_string(),
            port,
            certificate: Identity::generate().certificate(),
        }
    }

    fn peer(node_id: &str, port: u32, raft_id: u64) -> PeerConfig {
        PeerConfig {
            node_id: node_id.to_string(),
            peer_host: "127.0.0.1".to_string(),
            peer_port: port,
            raft_id,
        }
    }

    #[tokio::test]
    async fn test_cluster_config_is_an_independent_copy() {
        let (ledger, _, session) = admin_session();
        let tx = session.config_tx().await.unwrap();

        let mut first = tx.cluster_config().unwrap();
        assert_eq!(first, ledger.cluster_config());
        assert_eq!(first.nodes[0].id, "testNode1");
        assert_eq!(first.consensus_config.members[0].raft_id, 1);
        assert!(!first.cert_auth_config.roots.is_empty());

        first.nodes[0].id = "bogus".to_string();
        first.admins.clear();
        first.consensus_config.members[0].peer_host = "bogus".to_string();

        let second = tx.cluster_config().unwrap();
        assert_eq!(second, ledger.cluster_config());
        assert_ne!(first, second);

        let refetched = session.config_tx().await.unwrap().cluster_config().unwrap();
        assert_eq!(refetched, ledger.cluster_config());
        assert_eq!(refetched.nodes[0].id, "testNode1");
        assert!(refetched.admin("admin").is_some());
        assert!(!refetched.cert_auth_config.roots.is_empty());
        assert_eq!(refetched.consensus_config.members[0].peer_host, "127.0.0.1");
    }

    #[tokio::test]
    async fn test_snapshot_is_fetched_once() {
        let (ledger, _, session) = admin_session();
        let tx = session.config_tx().await.unwrap();
        let requests = ledger.request_count();

        tx.cluster_config().unwrap();
        tx.cluster_config().unwrap();
        tx.pending_config().unwrap();
        assert_eq!(ledger.request_count(), requests);
    }

    #[tokio::test]
    async fn test_admin_staging_conflicts() {
        let (_ledger, _, session) = admin_session();
        let mut tx = session.config_tx().await.unwrap();

        let err = tx.add_admin(Admin::new("admin", b"cert".to_vec())).unwrap_err();
        assert_eq!(err.to_string(), "admin already exists in current config: admin");

        tx.add_admin(Admin::new("admin2", b"cert".to_vec())).unwrap();
        let err = tx.add_admin(Admin::new("admin2", b"cert".to_vec())).unwrap_err();
        assert_eq!(err.to_string(), "admin already exists in pending config: admin2");

        let err = tx.delete_admin("nobody").unwrap_err();
        assert_eq!(err.to_string(), "admin does not exist in current config: nobody");

        tx.delete_admin("admin").unwrap();
        let err = tx.delete_admin("admin").unwrap_err();
        assert_eq!(err.to_string(), "admin does not exist in pending config: admin");

        let err = tx.update_admin(Admin::new("admin", b"new".to_vec())).unwrap_err();
        assert_eq!(err.to_string(), "admin does not exist in pending config: admin");
        assert!(matches!(err, BcdbError::Staging(_)));
    }

    #[tokio::test]
    async fn test_add_then_delete_of_pending_admin_fails() {
        let (ledger, _, session) = admin_session();
        let mut tx = session.config_tx().await.unwrap();

        tx.add_admin(Admin::new("admin3", b"cert".to_vec())).unwrap();
        for _ in 0..3 {
            let err = tx.delete_admin("admin3").unwrap_err();
            assert_eq!(err.to_string(), "admin does not exist in current config: admin3");
        }

        tx.commit(true).await.unwrap();
        assert!(ledger.cluster_config().admin("admin3").is_some());
    }

    #[tokio::test]
    async fn test_node_staging_conflicts() {
        let (_ledger, _, session) = admin_session();
        let mut tx = session.config_tx().await.unwrap();

        let err = tx
            .add_cluster_node(node("testNode1", 6001), peer("testNode1", 7050, 1))
            .unwrap_err();
        assert_eq!(err.to_string(), "node already exists in current config: testNode1");

        let err = tx
            .add_cluster_node(node("node2", 6002), peer("node3", 7051, 2))
            .unwrap_err();
        assert_eq!(err.to_string(), "node and peer ids differ: node2 != node3");

        let err = tx
            .add_cluster_node(node("node2", 6002), peer("node2", 7051, 1))
            .unwrap_err();
        assert_eq!(err.to_string(), "raft id already in use: 1");

        tx.add_cluster_node(node("node2", 6002), peer("node2", 7051, 2))
            .unwrap();
        let err = tx
            .add_cluster_node(node("node2", 6002), peer("node2", 7051, 2))
            .unwrap_err();
        assert_eq!(err.to_string(), "node already exists in pending config: node2");

        let err = tx.delete_cluster_node("node2").unwrap_err();
        assert_eq!(err.to_string(), "node does not exist in current config: node2");
    }

    #[tokio::test]
    async fn test_node_changes_commit_with_their_peers() {
        let (ledger, _, session) = admin_session();

        let mut tx = session.config_tx().await.unwrap();
        tx.add_cluster_node(node("node2", 6002), peer("node2", 7051, 2))
            .unwrap();
        let preview = tx.pending_config().unwrap();
        assert!(preview.node("node2").is_some());
        assert_eq!(preview.peer("node2").map(|p| p.raft_id), Some(2));
        tx.commit(true).await.unwrap();

        let committed = ledger.cluster_config();
        assert_eq!(committed.nodes.len(), 2);
        assert_eq!(committed.consensus_config.members.len(), 2);

        let mut tx = session.config_tx().await.unwrap();
        tx.update_cluster_node(node("node2", 6003), peer("node2", 7052, 2))
            .unwrap();
        tx.commit(true).await.unwrap();
        let committed = ledger.cluster_config();
        assert_eq!(committed.node("node2").map(|n| n.port), Some(6003));
        assert_eq!(committed.peer("node2").map(|p| p.peer_port), Some(7052));

        let mut tx = session.config_tx().await.unwrap();
        tx.delete_cluster_node("node2").unwrap();
        tx.commit(true).await.unwrap();
        let committed = ledger.cluster_config();
        assert!(committed.node("node2").is_none());
        assert!(committed.peer("node2").is_none());
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_rejected_on_commit() {
        let (ledger, _, session) = admin_session();

        let mut first = session.config_tx().await.unwrap();
        let mut second = session.config_tx().await.unwrap();

        first.add_admin(Admin::new("alice", Identity::generate().certificate())).unwrap();
        first.commit(true).await.unwrap();

        second.add_admin(Admin::new("bob", Identity::generate().certificate())).unwrap();
        let err = second.commit(true).await.unwrap_err();
        assert_eq!(
            err.receipt().and_then(|r| r.flag()),
            Some(Flag::InvalidMvccConflictWithCommittedState)
        );
        assert!(second.is_spent());

        let committed = ledger.cluster_config();
        assert!(committed.admin("alice").is_some());
        assert!(committed.admin("bob").is_none());
    }

    #[tokio::test]
    async fn test_rotated_admin_certificate_locks_out_old_key() {
        let (ledger, old_identity, session) = admin_session();
        let new_identity = Identity::from_seed(&[7u8; 32]);

        let mut tx = session.config_tx().await.unwrap();
        tx.update_admin(Admin::new("admin", new_identity.certificate()))
            .unwrap();
        tx.commit(true).await.unwrap();

        let stale = session_for(&ledger, "admin", old_identity, Timeouts::default());
        let err = stale.dbs_tx().exists("bdb").await.unwrap_err();
        assert!(err.is_unauthorized());
        assert!(err.to_string().contains("signature verification failed"));

        let fresh = session_for(&ledger, "admin", new_identity, Timeouts::default());
        assert!(fresh.dbs_tx().exists("bdb").await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_query_timeout_fails_at_open() {
        let (ledger, admin, _) = admin_session();
        let session = session_for(
            &ledger,
            "admin",
            admin,
            Timeouts {
                tx: Duration::from_secs(10),
                query: Duration::from_nanos(1),
            },
        );

        let err = session.config_tx().await.err().unwrap();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("queryTimeout error"));
    }

    #[tokio::test]
    async fn test_spent_config_context_rejects_everything() {
        let (ledger, _, session) = admin_session();
        let mut tx = session.config_tx().await.unwrap();
        tx.add_admin(Admin::new("admin2", b"cert".to_vec())).unwrap();
        tx.abort().unwrap();
        let requests = ledger.request_count();

        assert!(matches!(tx.cluster_config(), Err(BcdbError::TxSpent)));
        assert!(matches!(tx.pending_config(), Err(BcdbError::TxSpent)));
        assert!(matches!(
            tx.add_admin(Admin::new("admin4", b"cert".to_vec())),
            Err(BcdbError::TxSpent)
        ));
        assert!(matches!(tx.delete_admin("admin"), Err(BcdbError::TxSpent)));
        assert!(matches!(
            tx.update_admin(Admin::new("admin", b"cert".to_vec())),
            Err(BcdbError::TxSpent)
        ));
        assert!(matches!(
            tx.add_cluster_node(node("node2", 6002), peer("node2", 7051, 2)),
            Err(BcdbError::TxSpent)
        ));
        assert!(matches!(tx.delete_cluster_node("testNode1"), Err(BcdbError::TxSpent)));
        assert!(matches!(
            tx.update_cluster_node(node("testNode1", 6001), peer("testNode1", 7050, 1)),
            Err(BcdbError::TxSpent)
        ));
        assert!(matches!(tx.commit(true).await, Err(BcdbError::TxSpent)));
        assert!(matches!(tx.abort(), Err(BcdbError::TxSpent)));

        assert_eq!(ledger.request_count(), requests);
        assert!(ledger.cluster_config().admin("admin2").is_none());
    }

    #[tokio::test]
    async fn test_committed_config_context_rejects_everything() {
        let (ledger, _, session) = admin_session();
        let mut tx = session.config_tx().await.unwrap();
        tx.add_admin(Admin::new("admin2", Identity::generate().certificate()))
            .unwrap();
        tx.commit(true).await.unwrap();
        assert_eq!(tx.state(), TxState::Committed);
        let requests = ledger.request_count();
        let version = ledger.config_version();

        assert!(matches!(tx.cluster_config(), Err(BcdbError::TxSpent)));
        assert!(matches!(tx.pending_config(), Err(BcdbError::TxSpent)));
        assert!(matches!(
            tx.add_admin(Admin::new("admin3", b"cert".to_vec())),
            Err(BcdbError::TxSpent)
        ));
        assert!(matches!(tx.delete_admin("admin2"), Err(BcdbError::TxSpent)));
        assert!(matches!(
            tx.update_admin(Admin::new("admin", b"cert".to_vec())),
            Err(BcdbError::TxSpent)
        ));
        assert!(matches!(
            tx.add_cluster_node(node("node2", 6002), peer("node2", 7051, 2)),
            Err(BcdbError::TxSpent)
        ));
        assert!(matches!(tx.delete_cluster_node("testNode1"), Err(BcdbError::TxSpent)));
        assert!(matches!(
            tx.update_cluster_node(node("testNode1", 6005), peer("testNode1", 7055, 1)),
            Err(BcdbError::TxSpent)
        ));
        assert!(matches!(tx.commit(true).await, Err(BcdbError::TxSpent)));
        assert!(matches!(tx.abort(), Err(BcdbError::TxSpent)));

        assert_eq!(ledger.request_count(), requests);
        assert_eq!(ledger.config_version(), version);
        assert!(ledger.cluster_config().admin("admin2").is_some());
        assert!(ledger.cluster_config().admin("admin3").is_none());
    }
}
