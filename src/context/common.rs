use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::{CommitOutcome, Timeouts, TxState};
use crate::crypto::{new_tx_id, Signer};
use crate::envelope;
use crate::error::{BcdbError, BcdbResult};
use crate::transport::{
    QueryRequest, ReplicaSet, RequestDispatcher, RequestKind, SubmitRequest, TransportError,
    TransportResult,
};
use crate::types::{Flag, TxResponse};

/// State machine and identity binding shared by every transaction kind
pub struct CommonTxContext {
    user_id: String,
    signer: Arc<dyn Signer>,
    replicas: Arc<ReplicaSet>,
    dispatcher: Arc<dyn RequestDispatcher>,
    timeouts: Timeouts,
    state: TxState,
}

impl CommonTxContext {
    pub(crate) fn new(
        user_id: String,
        signer: Arc<dyn Signer>,
        replicas: Arc<ReplicaSet>,
        dispatcher: Arc<dyn RequestDispatcher>,
        timeouts: Timeouts,
    ) -> Self {
        CommonTxContext {
            user_id,
            signer,
            replicas,
            dispatcher,
            timeouts,
            state: TxState::Open,
        }
    }

    /// User the context acts for
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> TxState {
        self.state
    }

    pub(crate) fn ensure_open(&self) -> BcdbResult<()> {
        if self.state.is_spent() {
            return Err(BcdbError::TxSpent);
        }
        Ok(())
    }

    /// Run a dispatcher call under `timeout`, annotating failures with what was attempted
    async fn dispatch<F>(
        &self,
        operation: &'static str,
        kind: RequestKind,
        path: &str,
        timeout: Duration,
        call: F,
    ) -> BcdbResult<Vec<u8>>
    where
        F: Future<Output = TransportResult<Vec<u8>>>,
    {
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                kind,
                after: timeout,
            }),
        };

        result.map_err(|source| {
            error!(user = %self.user_id, operation, path, error = %source, "request failed");
            BcdbError::Transport {
                operation,
                path: path.to_string(),
                source,
            }
        })
    }

    /// Send a signed query and decode the response
    pub(crate) async fn query<Q, R>(&self, path: String, query: &Q) -> BcdbResult<R>
    where
        Q: Serialize + Sync,
        R: DeserializeOwned,
    {
        self.ensure_open()?;

        let payload = envelope::canonical_bytes(query)?;
        let signature = self.signer.sign(&payload)?;
        let request = QueryRequest {
            path: path.clone(),
            user_id: self.user_id.clone(),
            payload,
            signature,
            timeout: self.timeouts.query,
        };

        debug!(user = %self.user_id, %path, "sending query");
        let body = self
            .dispatch(
                "query",
                RequestKind::Query,
                &path,
                self.timeouts.query,
                self.dispatcher.query(&self.replicas, request),
            )
            .await?;

        serde_json::from_slice(&body).map_err(|e| BcdbError::Transport {
            operation: "query",
            path,
            source: TransportError::InvalidData(e.to_string()),
        })
    }

    /// Compose, sign and submit a transaction built by `build` from the user
    /// id and a fresh transaction id.
    ///
    /// The context stays open if the envelope cannot be composed; once the
    /// envelope is handed to the dispatcher the context is spent.
    pub(crate) async fn commit<P, F>(
        &mut self,
        path: &str,
        sync: bool,
        build: F,
    ) -> BcdbResult<CommitOutcome>
    where
        P: Serialize + Send,
        F: FnOnce(&str, &str) -> P + Send,
    {
        self.ensure_open()?;

        let tx_id = new_tx_id();
        let payload = build(&self.user_id, &tx_id);
        let envelope = envelope::compose(payload, self.signer.as_ref())?;
        let bytes = envelope::encode(&envelope)?;

        self.state = TxState::Committed;

        let request = SubmitRequest {
            path: path.to_string(),
            envelope: bytes,
            wait_for_receipt: sync,
            timeout: self.timeouts.tx,
        };

        info!(user = %self.user_id, %tx_id, path, sync, "submitting transaction");
        let body = self
            .dispatch(
                "submit transaction",
                RequestKind::Submit,
                path,
                self.timeouts.tx,
                self.dispatcher.submit(&self.replicas, request),
            )
            .await?;

        let response: TxResponse =
            serde_json::from_slice(&body).map_err(|e| BcdbError::Transport {
                operation: "submit transaction",
                path: path.to_string(),
                source: TransportError::InvalidData(e.to_string()),
            })?;

        let receipt = match response.receipt {
            Some(receipt) => receipt,
            None if sync => {
                return Err(BcdbError::Transport {
                    operation: "submit transaction",
                    path: path.to_string(),
                    source: TransportError::InvalidData("response carries no receipt".to_string()),
                })
            }
            None => return Ok(CommitOutcome { tx_id, receipt: None }),
        };

        let info = receipt.validation_info().cloned().ok_or_else(|| BcdbError::Transport {
            operation: "submit transaction",
            path: path.to_string(),
            source: TransportError::InvalidData(format!(
                "receipt has no validation info at index {}",
                receipt.tx_index
            )),
        })?;

        if info.flag != Flag::Valid {
            warn!(%tx_id, flag = %info.flag, reason = %info.reason_if_invalid, "transaction rejected");
            return Err(BcdbError::InvalidTx {
                tx_id,
                flag: info.flag,
                reason: info.reason_if_invalid,
                receipt: Box::new(receipt),
            });
        }

        info!(%tx_id, block = receipt.header.number, "transaction committed");
        Ok(CommitOutcome {
            tx_id,
            receipt: Some(receipt),
        })
    }

    pub(crate) fn abort(&mut self) -> BcdbResult<()> {
        self.ensure_open()?;
        self.state = TxState::Aborted;
        debug!(user = %self.user_id, "transaction aborted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::context::testing::{admin_session, session_for};
    use crate::context::TxContext;
    use crate::crypto::{CryptoError, CryptoResult, Identity, SignatureBytes};
    use crate::transport::TransportError;

    struct BrokenSigner;

    impl Signer for BrokenSigner {
        fn sign(&self, _payload: &[u8]) -> CryptoResult<SignatureBytes> {
            Err(CryptoError::SignerUnavailable("token removed".to_string()))
        }
    }

    #[tokio::test]
    async fn test_signing_failure_keeps_context_open() {
        let (ledger, _, session) = admin_session();
        let mut tx = session.dbs_tx();
        tx.create_db("testDB").unwrap();

        // Swap in a signer that always fails
        tx.common.signer = Arc::new(BrokenSigner) as Arc<dyn Signer>;

        let err = tx.commit(true).await.unwrap_err();
        assert!(matches!(err, BcdbError::Signing(_)));
        assert_eq!(tx.state(), TxState::Open);
        assert_eq!(ledger.request_count(), 0);

        // Staged changes survive and can still be committed
        tx.common.signer = Arc::new(Identity::from_seed(&[1u8; 32])) as Arc<dyn Signer>;
        tx.commit(true).await.unwrap();
        assert!(ledger.database_exists("testDB"));
    }

    #[tokio::test]
    async fn test_transport_failure_spends_context() {
        let (ledger, _, session) = admin_session();
        let mut tx = session.dbs_tx();
        tx.create_db("testDB").unwrap();

        ledger.fail_requests_with(TransportError::ConnectionFailed(
            "cannot connect to replica".to_string(),
        ));

        let err = tx.commit(true).await.unwrap_err();
        assert!(err.to_string().contains("cannot connect to replica"));
        assert!(!err.is_timeout());
        assert!(tx.is_spent());
        assert!(matches!(tx.commit(true).await, Err(BcdbError::TxSpent)));
    }

    #[tokio::test]
    async fn test_timeout_is_distinct_from_connection_failure() {
        let (ledger, admin, _) = admin_session();
        let session = session_for(
            &ledger,
            "admin",
            admin,
            Timeouts {
                tx: Duration::from_nanos(1),
                query: Duration::from_nanos(1),
            },
        );

        let tx = session.dbs_tx();
        let err = tx.exists("bdb").await.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("queryTimeout error"));

        let mut tx = session.dbs_tx();
        tx.create_db("testDB").unwrap();
        let err = tx.commit(true).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("txTimeout error"));
        assert!(!err.to_string().contains("queryTimeout"));
        assert!(tx.is_spent());
    }

    #[tokio::test]
    async fn test_async_commit_returns_without_receipt() {
        let (ledger, _, session) = admin_session();
        let mut tx = session.dbs_tx();
        tx.create_db("asyncDB").unwrap();

        let outcome = tx.commit(false).await.unwrap();
        assert!(!outcome.tx_id.is_empty());
        assert!(outcome.receipt.is_none());
        assert!(tx.is_spent());
        assert!(ledger.database_exists("asyncDB"));
    }

    #[tokio::test]
    async fn test_malformed_response_is_transport_error() {
        let (ledger, _, session) = admin_session();
        ledger.fail_requests_with(TransportError::Server {
            status: "malformed response".to_string(),
            message: String::new(),
        });

        let tx = session.dbs_tx();
        let err = tx.exists("bdb").await.unwrap_err();
        assert!(err.to_string().contains(
            "error handling request, server returned: status: malformed response, message: "
        ));
        assert!(matches!(
            err,
            BcdbError::Transport {
                operation: "query",
                ..
            }
        ));
    }
}
