//! # bcdb
//!
//! Administrative transaction client for a permissioned replicated database.
//!
//! ## Features
//!
//! - **Database administration**: create and delete databases
//! - **Cluster configuration**: add, remove and rotate admins and nodes,
//!   validated against a snapshot before anything is sent
//! - **Signed requests**: every query and transaction is signed by the
//!   session's identity
//! - **Pluggable dispatch**: REST over HTTP, or an in-memory ledger for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bcdb::{Bcdb, Identity, Replica, ReplicaSet, RestDispatcher, Timeouts, TxContext};
//!
//! # async fn run() -> bcdb::BcdbResult<()> {
//! let replicas: ReplicaSet = vec![Replica {
//!     id: "node1".to_string(),
//!     endpoint: "http://127.0.0.1:6001".to_string(),
//! }]
//! .into_iter()
//! .collect();
//!
//! let db = Bcdb::new(replicas, Arc::new(RestDispatcher::new()));
//! let session = db.session("admin", Arc::new(Identity::generate()), Timeouts::default());
//!
//! let mut tx = session.dbs_tx();
//! tx.create_db("testDB")?;
//! let outcome = tx.commit(true).await?;
//! println!("committed {}", outcome.tx_id);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                  SESSION                    │
//! │      identity | signer | replicas | timeouts│
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │              CONTEXT LAYER                  │
//! │  DbsTxContext | ConfigTxContext (+ diff)    │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │              ENVELOPE LAYER                 │
//! │     canonical JSON | Ed25519 signature      │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │             TRANSPORT LAYER                 │
//! │        REST (reqwest) | MemoryLedger        │
//! └─────────────────────────────────────────────┘
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod crypto;
pub mod diff;
pub mod envelope;
pub mod error;
pub mod session;
pub mod transport;
pub mod types;

// Re-export main types at crate root
pub use context::{
    CommitOutcome, ConfigTxContext, DbsTxContext, Timeouts, TxContext, TxState,
};
pub use crypto::{CryptoError, CryptoResult, Identity, PublicKey, SignatureBytes, Signer};
pub use diff::{ClusterConfigDiff, StagingError};
pub use error::{BcdbError, BcdbResult};
pub use session::{Bcdb, DbSession};
pub use transport::{
    MemoryLedger, Replica, ReplicaSet, RequestDispatcher, RestDispatcher, TransportError,
};
pub use types::{Admin, ClusterConfig, Flag, NodeConfig, PeerConfig, TxReceipt};
