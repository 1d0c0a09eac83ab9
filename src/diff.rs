//! Cluster configuration diff engine
//!
//! Staged admin and node changes are kept apart from the snapshot they were
//! validated against. Every identifier lives in at most one of the add,
//! delete and update collections, so the diff can always be replayed onto the
//! snapshot in a single deterministic pass.
//!
//! A node and its consensus peer are staged together as a [`NodeMembership`];
//! a node without a peer (or the reverse) is never produced.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;

use crate::types::{Admin, ClusterConfig, ConfigTx, NodeConfig, NodeMembership, PeerConfig, Version};

/// What a staging error is about
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    /// A cluster admin
    Admin,
    /// A cluster node with its consensus peer
    Node,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Admin => f.write_str("admin"),
            EntityKind::Node => f.write_str("node"),
        }
    }
}

/// A staged change conflicts with the snapshot or with other staged changes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StagingError {
    /// Adding an entity the snapshot already has
    #[error("{kind} already exists in current config: {id}")]
    ExistsInCurrent { kind: EntityKind, id: String },

    /// Adding an entity that is already staged for addition
    #[error("{kind} already exists in pending config: {id}")]
    ExistsInPending { kind: EntityKind, id: String },

    /// Deleting or updating an entity the snapshot does not have
    #[error("{kind} does not exist in current config: {id}")]
    MissingInCurrent { kind: EntityKind, id: String },

    /// Deleting or updating an entity that is already staged for deletion
    #[error("{kind} does not exist in pending config: {id}")]
    MissingInPending { kind: EntityKind, id: String },

    /// The node and the peer of a membership name different nodes
    #[error("node and peer ids differ: {node_id} != {peer_node_id}")]
    NodePeerMismatch { node_id: String, peer_node_id: String },

    /// Two consensus members would share a raft id
    #[error("raft id already in use: {0}")]
    RaftIdInUse(u64),
}

/// Result type for staging operations
pub type StagingResult<T> = Result<T, StagingError>;

/// Pending add/delete/update collections for one kind of entity
#[derive(Clone, Debug, PartialEq, Eq)]
struct StagedSet<T> {
    kind: EntityKind,
    to_add: BTreeMap<String, T>,
    to_delete: BTreeSet<String>,
    to_update: BTreeMap<String, T>,
}

impl<T: Clone> StagedSet<T> {
    fn new(kind: EntityKind) -> Self {
        StagedSet {
            kind,
            to_add: BTreeMap::new(),
            to_delete: BTreeSet::new(),
            to_update: BTreeMap::new(),
        }
    }

    fn stage_add(&mut self, id: &str, item: T, in_current: bool) -> StagingResult<()> {
        if in_current {
            return Err(StagingError::ExistsInCurrent {
                kind: self.kind,
                id: id.to_string(),
            });
        }
        if self.to_add.contains_key(id) {
            return Err(StagingError::ExistsInPending {
                kind: self.kind,
                id: id.to_string(),
            });
        }
        self.to_add.insert(id.to_string(), item);
        Ok(())
    }

    fn stage_delete(&mut self, id: &str, in_current: bool) -> StagingResult<()> {
        if !in_current {
            return Err(StagingError::MissingInCurrent {
                kind: self.kind,
                id: id.to_string(),
            });
        }
        if self.to_delete.contains(id) {
            return Err(StagingError::MissingInPending {
                kind: self.kind,
                id: id.to_string(),
            });
        }
        // A deletion supersedes an earlier update of the same entity
        self.to_update.remove(id);
        self.to_delete.insert(id.to_string());
        Ok(())
    }

    fn stage_update(&mut self, id: &str, item: T, in_current: bool) -> StagingResult<()> {
        if !in_current {
            return Err(StagingError::MissingInCurrent {
                kind: self.kind,
                id: id.to_string(),
            });
        }
        if self.to_delete.contains(id) {
            return Err(StagingError::MissingInPending {
                kind: self.kind,
                id: id.to_string(),
            });
        }
        self.to_update.insert(id.to_string(), item);
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_delete.is_empty() && self.to_update.is_empty()
    }

    fn clear(&mut self) {
        self.to_add.clear();
        self.to_delete.clear();
        self.to_update.clear();
    }

    /// Staged entities that are still live after the diff, i.e. additions and updates
    fn live(&self) -> impl Iterator<Item = &T> {
        self.to_add.values().chain(self.to_update.values())
    }
}

/// Staged changes to a cluster configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterConfigDiff {
    admins: StagedSet<Admin>,
    nodes: StagedSet<NodeMembership>,
}

impl Default for ClusterConfigDiff {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterConfigDiff {
    /// Create an empty diff
    pub fn new() -> Self {
        ClusterConfigDiff {
            admins: StagedSet::new(EntityKind::Admin),
            nodes: StagedSet::new(EntityKind::Node),
        }
    }

    /// Rebuild a diff from a submitted transaction, without validation.
    ///
    /// Use [`ClusterConfigDiff::apply`] to validate it against a configuration.
    pub fn from_tx(tx: &ConfigTx) -> Self {
        let mut diff = Self::new();
        for admin in &tx.admins_to_add {
            diff.admins.to_add.insert(admin.id.clone(), admin.clone());
        }
        diff.admins.to_delete.extend(tx.admins_to_delete.iter().cloned());
        for admin in &tx.admins_to_update {
            diff.admins.to_update.insert(admin.id.clone(), admin.clone());
        }
        for membership in &tx.nodes_to_add {
            diff.nodes
                .to_add
                .insert(membership.node.id.clone(), membership.clone());
        }
        diff.nodes.to_delete.extend(tx.nodes_to_delete.iter().cloned());
        for membership in &tx.nodes_to_update {
            diff.nodes
                .to_update
                .insert(membership.node.id.clone(), membership.clone());
        }
        diff
    }

    /// Whether nothing is staged
    pub fn is_empty(&self) -> bool {
        self.admins.is_empty() && self.nodes.is_empty()
    }

    /// Drop everything staged
    pub fn clear(&mut self) {
        self.admins.clear();
        self.nodes.clear();
    }

    // ========== Admins ==========

    /// Stage a new admin
    pub fn add_admin(&mut self, current: &ClusterConfig, admin: Admin) -> StagingResult<()> {
        let in_current = current.admin(&admin.id).is_some();
        let id = admin.id.clone();
        self.admins.stage_add(&id, admin, in_current)
    }

    /// Stage removal of an admin
    pub fn delete_admin(&mut self, current: &ClusterConfig, id: &str) -> StagingResult<()> {
        self.admins.stage_delete(id, current.admin(id).is_some())
    }

    /// Stage replacement of an admin's certificate
    pub fn update_admin(&mut self, current: &ClusterConfig, admin: Admin) -> StagingResult<()> {
        let in_current = current.admin(&admin.id).is_some();
        let id = admin.id.clone();
        self.admins.stage_update(&id, admin, in_current)
    }

    // ========== Nodes ==========

    /// Stage a new node together with its consensus peer
    pub fn add_node(
        &mut self,
        current: &ClusterConfig,
        node: NodeConfig,
        peer: PeerConfig,
    ) -> StagingResult<()> {
        check_membership(&node, &peer)?;
        let in_current = current.node(&node.id).is_some() || current.peer(&node.id).is_some();
        if !in_current && !self.nodes.to_add.contains_key(&node.id) {
            self.check_raft_id(current, &node.id, peer.raft_id)?;
        }
        let id = node.id.clone();
        self.nodes
            .stage_add(&id, NodeMembership { node, peer }, in_current)
    }

    /// Stage removal of a node and its consensus peer
    pub fn delete_node(&mut self, current: &ClusterConfig, id: &str) -> StagingResult<()> {
        self.nodes.stage_delete(id, current.node(id).is_some())
    }

    /// Stage replacement of a node and its consensus peer
    pub fn update_node(
        &mut self,
        current: &ClusterConfig,
        node: NodeConfig,
        peer: PeerConfig,
    ) -> StagingResult<()> {
        check_membership(&node, &peer)?;
        let in_current = current.node(&node.id).is_some();
        if in_current && !self.nodes.to_delete.contains(&node.id) {
            self.check_raft_id(current, &node.id, peer.raft_id)?;
        }
        let id = node.id.clone();
        self.nodes
            .stage_update(&id, NodeMembership { node, peer }, in_current)
    }

    /// A raft id may be reused only by the node that already owns it
    fn check_raft_id(&self, current: &ClusterConfig, node_id: &str, raft_id: u64) -> StagingResult<()> {
        let taken_in_current = current.consensus_config.members.iter().any(|member| {
            member.raft_id == raft_id
                && member.node_id != node_id
                && !self.nodes.to_delete.contains(&member.node_id)
                && !self.nodes.to_update.contains_key(&member.node_id)
        });
        let taken_in_pending = self
            .nodes
            .live()
            .any(|m| m.peer.raft_id == raft_id && m.node.id != node_id);

        if taken_in_current || taken_in_pending {
            return Err(StagingError::RaftIdInUse(raft_id));
        }
        Ok(())
    }

    // ========== Application ==========

    /// Replay the diff onto `base`, producing the resulting configuration.
    ///
    /// Every staged change is validated against `base` again, so a diff staged
    /// against an older snapshot fails here instead of producing a mixed state.
    pub fn apply(&self, base: &ClusterConfig) -> StagingResult<ClusterConfig> {
        let mut next = base.clone();

        for id in &self.admins.to_delete {
            let before = next.admins.len();
            next.admins.retain(|a| &a.id != id);
            if next.admins.len() == before {
                return Err(missing(EntityKind::Admin, id));
            }
        }
        for (id, admin) in &self.admins.to_update {
            let slot = next
                .admins
                .iter_mut()
                .find(|a| &a.id == id)
                .ok_or_else(|| missing(EntityKind::Admin, id))?;
            *slot = admin.clone();
        }
        for (id, admin) in &self.admins.to_add {
            if next.admin(id).is_some() {
                return Err(StagingError::ExistsInCurrent {
                    kind: EntityKind::Admin,
                    id: id.clone(),
                });
            }
            next.admins.push(admin.clone());
        }

        for id in &self.nodes.to_delete {
            let before = next.nodes.len();
            next.nodes.retain(|n| &n.id != id);
            if next.nodes.len() == before {
                return Err(missing(EntityKind::Node, id));
            }
            next.consensus_config.members.retain(|p| &p.node_id != id);
        }
        for (id, membership) in &self.nodes.to_update {
            let node = next
                .nodes
                .iter_mut()
                .find(|n| &n.id == id)
                .ok_or_else(|| missing(EntityKind::Node, id))?;
            *node = membership.node.clone();

            match next
                .consensus_config
                .members
                .iter_mut()
                .find(|p| &p.node_id == id)
            {
                Some(peer) => *peer = membership.peer.clone(),
                None => next.consensus_config.members.push(membership.peer.clone()),
            }
        }
        for (id, membership) in &self.nodes.to_add {
            if next.node(id).is_some() || next.peer(id).is_some() {
                return Err(StagingError::ExistsInCurrent {
                    kind: EntityKind::Node,
                    id: id.clone(),
                });
            }
            next.nodes.push(membership.node.clone());
            next.consensus_config.members.push(membership.peer.clone());
        }

        let mut raft_ids = BTreeSet::new();
        for member in &next.consensus_config.members {
            if !raft_ids.insert(member.raft_id) {
                return Err(StagingError::RaftIdInUse(member.raft_id));
            }
        }

        Ok(next)
    }

    /// Build the transaction payload carrying this diff
    pub fn to_tx(&self, user_id: &str, tx_id: &str, read_version: Option<Version>) -> ConfigTx {
        ConfigTx {
            user_id: user_id.to_string(),
            tx_id: tx_id.to_string(),
            read_old_config_version: read_version,
            admins_to_add: self.admins.to_add.values().cloned().collect(),
            admins_to_delete: self.admins.to_delete.iter().cloned().collect(),
            admins_to_update: self.admins.to_update.values().cloned().collect(),
            nodes_to_add: self.nodes.to_add.values().cloned().collect(),
            nodes_to_delete: self.nodes.to_delete.iter().cloned().collect(),
            nodes_to_update: self.nodes.to_update.values().cloned().collect(),
        }
    }
}

fn missing(kind: EntityKind, id: &str) -> StagingError {
    StagingError::MissingInCurrent {
        kind,
        id: id.to_string(),
    }
}

fn check_membership(node: &NodeConfig, peer: &PeerConfig) -> StagingResult<()> {
    if node.id != peer.node_id {
        return Err(StagingError::NodePeerMismatch {
            node_id: node.id.clone(),
            peer_node_id: peer.node_id.clone(),
        });
    }
    Ok(())
}
