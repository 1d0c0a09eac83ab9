//! Wire and domain types
//!
//! Everything here crosses the network as JSON. Byte fields are carried as
//! base64 strings; collections that end up in signed payloads are kept in a
//! stable order so the same logical transaction always serializes the same way.

use serde::{Deserialize, Serialize};

use crate::crypto::SignatureBytes;

/// Name of the database the server creates for itself. It can never be deleted.
pub const SYSTEM_DATABASE: &str = "bdb";

/// REST paths understood by the server
pub mod paths {
    /// Submit a database administration transaction
    pub const POST_DB_TX: &str = "/db/tx";
    /// Submit a cluster configuration transaction
    pub const POST_CONFIG_TX: &str = "/config/tx";
    /// Read the current cluster configuration
    pub const GET_CONFIG: &str = "/config/tx";

    /// Read the status of one database. The name is percent-encoded as a
    /// single path segment.
    pub fn db_status(db_name: &str) -> String {
        format!("/db/{}", urlencoding::encode(db_name))
    }
}

/// serde adapter for `Vec<u8>` fields carried as base64
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        BASE64.decode(s).map_err(serde::de::Error::custom)
    }
}

/// serde adapter for lists of base64 byte strings
pub(crate) mod base64_byte_list {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(list: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(list.iter().map(|bytes| BASE64.encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|s| BASE64.decode(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

// ========== Cluster configuration ==========

/// A server node of the cluster
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    pub address: String,
    pub port: u32,
    #[serde(with = "base64_bytes")]
    pub certificate: Vec<u8>,
}

/// A cluster administrator
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admin {
    pub id: String,
    #[serde(with = "base64_bytes")]
    pub certificate: Vec<u8>,
}

impl Admin {
    pub fn new(id: impl Into<String>, certificate: impl Into<Vec<u8>>) -> Self {
        Admin {
            id: id.into(),
            certificate: certificate.into(),
        }
    }
}

/// Trusted certificate authorities
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaConfig {
    #[serde(with = "base64_byte_list")]
    pub roots: Vec<Vec<u8>>,
}

/// Consensus membership of one node
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub node_id: String,
    pub peer_host: String,
    pub peer_port: u32,
    pub raft_id: u64,
}

/// Consensus algorithm and its members
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    pub algorithm: String,
    pub members: Vec<PeerConfig>,
}

/// The full cluster configuration as held by the server
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub nodes: Vec<NodeConfig>,
    pub admins: Vec<Admin>,
    pub cert_auth_config: CaConfig,
    pub consensus_config: ConsensusConfig,
}

impl ClusterConfig {
    pub fn admin(&self, id: &str) -> Option<&Admin> {
        self.admins.iter().find(|a| a.id == id)
    }

    pub fn node(&self, id: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn peer(&self, node_id: &str) -> Option<&PeerConfig> {
        self.consensus_config
            .members
            .iter()
            .find(|p| p.node_id == node_id)
    }
}

/// Position of a committed write in the ledger
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub block_num: u64,
    pub tx_num: u64,
}

// ========== Transaction payloads ==========

/// Database lifecycle transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbAdministrationTx {
    pub user_id: String,
    pub tx_id: String,
    pub create_dbs: Vec<String>,
    pub delete_dbs: Vec<String>,
}

/// A node and its consensus membership, staged as one unit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMembership {
    pub node: NodeConfig,
    pub peer: PeerConfig,
}

/// Cluster configuration transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigTx {
    pub user_id: String,
    pub tx_id: String,
    pub read_old_config_version: Option<Version>,
    pub admins_to_add: Vec<Admin>,
    pub admins_to_delete: Vec<String>,
    pub admins_to_update: Vec<Admin>,
    pub nodes_to_add: Vec<NodeMembership>,
    pub nodes_to_delete: Vec<String>,
    pub nodes_to_update: Vec<NodeMembership>,
}

// ========== Queries and responses ==========

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDbStatusQuery {
    pub user_id: String,
    pub db_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDbStatusResponse {
    pub exist: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetConfigQuery {
    pub user_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetConfigResponse {
    pub config: ClusterConfig,
    pub version: Option<Version>,
}

/// Body returned for a submitted transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResponse {
    pub receipt: Option<TxReceipt>,
}

/// Body returned with a non-success HTTP status
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpErrorResponse {
    pub error: String,
}

// ========== Receipts ==========

/// Validation verdict for one transaction in a block
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Flag {
    Valid,
    InvalidMvccConflictWithCommittedState,
    InvalidDatabaseDoesNotExist,
    InvalidNoPermission,
    InvalidIncorrectEntries,
    InvalidUnauthorised,
    InvalidMissingSignature,
}

impl Flag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::Valid => "VALID",
            Flag::InvalidMvccConflictWithCommittedState => {
                "INVALID_MVCC_CONFLICT_WITH_COMMITTED_STATE"
            }
            Flag::InvalidDatabaseDoesNotExist => "INVALID_DATABASE_DOES_NOT_EXIST",
            Flag::InvalidNoPermission => "INVALID_NO_PERMISSION",
            Flag::InvalidIncorrectEntries => "INVALID_INCORRECT_ENTRIES",
            Flag::InvalidUnauthorised => "INVALID_UNAUTHORISED",
            Flag::InvalidMissingSignature => "INVALID_MISSING_SIGNATURE",
        }
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationInfo {
    pub flag: Flag,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason_if_invalid: String,
}

impl ValidationInfo {
    pub fn valid() -> Self {
        ValidationInfo {
            flag: Flag::Valid,
            reason_if_invalid: String::new(),
        }
    }

    pub fn invalid(flag: Flag, reason: impl Into<String>) -> Self {
        ValidationInfo {
            flag,
            reason_if_invalid: reason.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    pub validation_info: Vec<ValidationInfo>,
}

/// The server's verdict on a submitted transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub header: BlockHeader,
    pub tx_index: u64,
}

impl TxReceipt {
    /// Validation info of the transaction this receipt was issued for
    pub fn validation_info(&self) -> Option<&ValidationInfo> {
        usize::try_from(self.tx_index)
            .ok()
            .and_then(|index| self.header.validation_info.get(index))
    }

    pub fn flag(&self) -> Option<Flag> {
        self.validation_info().map(|info| info.flag)
    }

    pub fn is_valid(&self) -> bool {
        self.flag() == Some(Flag::Valid)
    }
}

// ========== Envelopes ==========

/// A payload together with its signature over the payload's serialized bytes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub payload: P,
    pub signature: SignatureBytes,
}
