//! In-process ledger for tests and demos
//!
//! `MemoryLedger` answers the same requests a server would: it verifies
//! signatures against the admin certificates of its cluster configuration,
//! validates database and configuration transactions, and issues receipts.
//! Latency and failures can be injected.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{QueryRequest, ReplicaSet, RequestDispatcher, SubmitRequest, TransportError, TransportResult};
use crate::crypto::{Identity, PublicKey};
use crate::diff::ClusterConfigDiff;
use crate::envelope;
use crate::types::{
    paths, Admin, BlockHeader, CaConfig, ClusterConfig, ConfigTx, ConsensusConfig,
    DbAdministrationTx, Envelope, Flag, GetConfigResponse, GetDbStatusResponse, NodeConfig,
    PeerConfig, TxReceipt, TxResponse, ValidationInfo, Version, SYSTEM_DATABASE,
};

const DEFAULT_LATENCY: Duration = Duration::from_millis(5);
const UNAUTHORIZED: &str = "signature verification failed";

/// Transaction payloads the ledger accepts
trait SignedPayload: Serialize + DeserializeOwned {
    fn signer_id(&self) -> &str;
}

impl SignedPayload for DbAdministrationTx {
    fn signer_id(&self) -> &str {
        &self.user_id
    }
}

impl SignedPayload for ConfigTx {
    fn signer_id(&self) -> &str {
        &self.user_id
    }
}

struct LedgerState {
    databases: BTreeSet<String>,
    config: ClusterConfig,
    version: Version,
    height: u64,
    requests: usize,
    latency: Duration,
    failure: Option<TransportError>,
}

/// In-memory stand-in for a cluster
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    /// Create a ledger holding `config` and the system database
    pub fn new(config: ClusterConfig) -> Self {
        let mut databases = BTreeSet::new();
        databases.insert(SYSTEM_DATABASE.to_string());

        MemoryLedger {
            state: Mutex::new(LedgerState {
                databases,
                config,
                version: Version {
                    block_num: 1,
                    tx_num: 0,
                },
                height: 1,
                requests: 0,
                latency: DEFAULT_LATENCY,
                failure: None,
            }),
        }
    }

    /// Create a single-node cluster administered by `admin_id`
    pub fn bootstrap(admin_id: &str, admin: &Identity) -> Self {
        let node_identity = Identity::from_seed(&[0x4e; 32]);

        Self::new(ClusterConfig {
            nodes: vec![NodeConfig {
                id: "testNode1".to_string(),
                address: "127.0.0.1".to_string(),
                port: 6001,
                certificate: node_identity.certificate(),
            }],
            admins: vec![Admin::new(admin_id, admin.certificate())],
            cert_auth_config: CaConfig {
                roots: vec![node_identity.certificate()],
            },
            consensus_config: ConsensusConfig {
                algorithm: "raft".to_string(),
                members: vec![PeerConfig {
                    node_id: "testNode1".to_string(),
                    peer_host: "127.0.0.1".to_string(),
                    peer_port: 7050,
                    raft_id: 1,
                }],
            },
        })
    }

    /// Set the delay applied before every request is handled
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state().latency = latency;
        self
    }

    /// Fail every following request with `error`
    pub fn fail_requests_with(&self, error: TransportError) {
        self.state().failure = Some(error);
    }

    /// Stop injecting failures
    pub fn clear_failure(&self) {
        self.state().failure = None;
    }

    /// Number of requests received so far, failed ones included
    pub fn request_count(&self) -> usize {
        self.state().requests
    }

    pub fn database_exists(&self, name: &str) -> bool {
        self.state().databases.contains(name)
    }

    /// Committed cluster configuration
    pub fn cluster_config(&self) -> ClusterConfig {
        self.state().config.clone()
    }

    /// Version of the committed cluster configuration
    pub fn config_version(&self) -> Version {
        self.state().version
    }

    /// Number of the last block
    pub fn height(&self) -> u64 {
        self.state().height
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        // A panicking test thread must not wedge the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count the request, wait out the latency and surface an injected failure
    async fn admit(&self) -> TransportResult<()> {
        let latency = {
            let mut state = self.state();
            state.requests += 1;
            state.latency
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match &self.state().failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl LedgerState {
    fn authenticate(&self, user_id: &str) -> TransportResult<PublicKey> {
        let admin = self
            .config
            .admin(user_id)
            .ok_or_else(|| TransportError::Unauthorized(UNAUTHORIZED.to_string()))?;
        PublicKey::from_bytes(&admin.certificate)
            .map_err(|_| TransportError::Unauthorized(UNAUTHORIZED.to_string()))
    }

    fn open_envelope<P: SignedPayload>(&self, bytes: &[u8]) -> TransportResult<P> {
        let envelope: Envelope<P> = envelope::decode(bytes).map_err(|e| bad_request(e.to_string()))?;
        let key = self.authenticate(envelope.payload.signer_id())?;
        envelope::verify(&envelope, &key)
            .map_err(|_| TransportError::Unauthorized(UNAUTHORIZED.to_string()))?;
        Ok(envelope.payload)
    }

    fn seal(&mut self, info: ValidationInfo) -> TxReceipt {
        self.height += 1;
        TxReceipt {
            header: BlockHeader {
                number: self.height,
                validation_info: vec![info],
            },
            tx_index: 0,
        }
    }

    fn apply_db_tx(&mut self, tx: &DbAdministrationTx) -> ValidationInfo {
        for name in &tx.create_dbs {
            if self.databases.contains(name) {
                return ValidationInfo::invalid(
                    Flag::InvalidIncorrectEntries,
                    format!(
                        "the database [{}] already exists in the cluster and hence, it cannot be created",
                        name
                    ),
                );
            }
        }
        for name in &tx.delete_dbs {
            if name == SYSTEM_DATABASE {
                return ValidationInfo::invalid(
                    Flag::InvalidIncorrectEntries,
                    format!(
                        "the database [{}] is the system created default database to store states and it cannot be deleted",
                        name
                    ),
                );
            }
            if !self.databases.contains(name) {
                return ValidationInfo::invalid(
                    Flag::InvalidIncorrectEntries,
                    format!(
                        "the database [{}] does not exist in the cluster and hence, it cannot be deleted",
                        name
                    ),
                );
            }
        }

        for name in &tx.create_dbs {
            self.databases.insert(name.clone());
        }
        for name in &tx.delete_dbs {
            self.databases.remove(name);
        }
        ValidationInfo::valid()
    }

    fn apply_config_tx(&mut self, tx: &ConfigTx) -> ValidationInfo {
        if tx.read_old_config_version != Some(self.version) {
            return ValidationInfo::invalid(
                Flag::InvalidMvccConflictWithCommittedState,
                "mvcc conflict has occurred as the read old configuration does not match the committed version",
            );
        }

        match ClusterConfigDiff::from_tx(tx).apply(&self.config) {
            Ok(next) => {
                self.config = next;
                self.version = Version {
                    block_num: self.height + 1,
                    tx_num: 0,
                };
                ValidationInfo::valid()
            }
            Err(e) => ValidationInfo::invalid(Flag::InvalidIncorrectEntries, e.to_string()),
        }
    }
}

fn bad_request(message: String) -> TransportError {
    TransportError::Server {
        status: "400 Bad Request".to_string(),
        message,
    }
}

fn not_found(path: &str) -> TransportError {
    TransportError::Server {
        status: "404 Not Found".to_string(),
        message: format!("no handler for {}", path),
    }
}

fn to_body<T: Serialize>(value: &T) -> TransportResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| TransportError::InvalidData(e.to_string()))
}

#[async_trait]
impl RequestDispatcher for MemoryLedger {
    async fn query(&self, _replicas: &ReplicaSet, request: QueryRequest) -> TransportResult<Vec<u8>> {
        self.admit().await?;

        let state = self.state();
        let key = state.authenticate(&request.user_id)?;
        key.verify(&request.payload, &request.signature)
            .map_err(|_| TransportError::Unauthorized(UNAUTHORIZED.to_string()))?;

        debug!(path = %request.path, user = %request.user_id, "ledger query");
        if request.path == paths::GET_CONFIG {
            return to_body(&GetConfigResponse {
                config: state.config.clone(),
                version: Some(state.version),
            });
        }
        match request.path.strip_prefix("/db/") {
            Some(segment) if !segment.is_empty() => {
                let name = urlencoding::decode(segment)
                    .map_err(|e| bad_request(format!("invalid database name {}: {}", segment, e)))?;
                to_body(&GetDbStatusResponse {
                    exist: state.databases.contains(name.as_ref()),
                })
            }
            _ => Err(not_found(&request.path)),
        }
    }

    async fn submit(
        &self,
        _replicas: &ReplicaSet,
        request: SubmitRequest,
    ) -> TransportResult<Vec<u8>> {
        self.admit().await?;

        let mut state = self.state();
        let info = match request.path.as_str() {
            paths::POST_DB_TX => {
                let tx: DbAdministrationTx = state.open_envelope(&request.envelope)?;
                state.apply_db_tx(&tx)
            }
            paths::POST_CONFIG_TX => {
                let tx: ConfigTx = state.open_envelope(&request.envelope)?;
                state.apply_config_tx(&tx)
            }
            other => return Err(not_found(other)),
        };

        debug!(path = %request.path, flag = %info.flag, "ledger validated transaction");
        let receipt = state.seal(info);
        to_body(&TxResponse {
            receipt: request.wait_for_receipt.then_some(receipt),
        })
    }
}
