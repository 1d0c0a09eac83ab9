//! REST dispatcher for a running cluster
//!
//! Queries are `GET` requests carrying the user id and the base64 signature of
//! the serialized query in headers. Transactions are `POST`ed as JSON
//! envelopes; a `TxTimeout` header asks the server to hold the response until
//! the receipt is available.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use super::{
    QueryRequest, ReplicaSet, RequestDispatcher, RequestKind, SubmitRequest, TransportError,
    TransportResult,
};
use crate::types::HttpErrorResponse;

/// Header carrying the requesting user id
pub const USER_HEADER: &str = "UserID";
/// Header carrying the query signature
pub const SIGNATURE_HEADER: &str = "Signature";
/// Header asking the server to wait for the receipt
pub const TX_TIMEOUT_HEADER: &str = "TxTimeout";

/// HTTP/JSON dispatcher backed by reqwest
#[derive(Clone, Debug, Default)]
pub struct RestDispatcher {
    client: Client,
}

impl RestDispatcher {
    /// Create a dispatcher with a default client
    pub fn new() -> Self {
        RestDispatcher {
            client: Client::new(),
        }
    }

    /// Create a dispatcher reusing an existing client
    pub fn with_client(client: Client) -> Self {
        RestDispatcher { client }
    }

    /// Send to replicas in order until one answers.
    ///
    /// Only failures to connect move on to the next replica; anything that
    /// reached a server is returned as is.
    async fn send<F>(
        &self,
        replicas: &ReplicaSet,
        kind: RequestKind,
        path: &str,
        timeout: Duration,
        build: F,
    ) -> TransportResult<Vec<u8>>
    where
        F: Fn(&Client, String) -> RequestBuilder,
    {
        let mut last_error = None;

        for replica in replicas.iter() {
            let url = format!("{}{}", replica.endpoint.trim_end_matches('/'), path);
            debug!(replica = %replica.id, %url, "sending request");

            match build(&self.client, url).timeout(timeout).send().await {
                Ok(response) => return read_response(response, kind, timeout).await,
                Err(e) if e.is_timeout() => {
                    return Err(TransportError::Timeout {
                        kind,
                        after: timeout,
                    })
                }
                Err(e) if e.is_connect() => {
                    warn!(replica = %replica.id, error = %e, "cannot connect to replica");
                    last_error = Some(e.to_string());
                }
                Err(e) => return Err(TransportError::ConnectionFailed(e.to_string())),
            }
        }

        Err(TransportError::ConnectionFailed(match last_error {
            Some(e) => format!("cannot connect to replica: {}", e),
            None => "replica set is empty".to_string(),
        }))
    }
}

/// Read the body under the same deadline as the request
async fn read_response(
    response: Response,
    kind: RequestKind,
    timeout: Duration,
) -> TransportResult<Vec<u8>> {
    let status = response.status();
    let body = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            TransportError::Timeout {
                kind,
                after: timeout,
            }
        } else {
            TransportError::InvalidData(e.to_string())
        }
    })?;

    if status.is_success() {
        return Ok(body.to_vec());
    }

    let message = serde_json::from_slice::<HttpErrorResponse>(&body)
        .map(|r| r.error)
        .unwrap_or_default();

    if status == StatusCode::UNAUTHORIZED {
        return Err(TransportError::Unauthorized(message));
    }

    Err(TransportError::Server {
        status: status.to_string(),
        message,
    })
}

#[async_trait]
impl RequestDispatcher for RestDispatcher {
    async fn query(&self, replicas: &ReplicaSet, request: QueryRequest) -> TransportResult<Vec<u8>> {
        let signature = request.signature.to_base64();
        self.send(replicas, RequestKind::Query, &request.path, request.timeout, |client, url| {
            client
                .get(url)
                .header(USER_HEADER, &request.user_id)
                .header(SIGNATURE_HEADER, &signature)
        })
        .await
    }

    async fn submit(
        &self,
        replicas: &ReplicaSet,
        request: SubmitRequest,
    ) -> TransportResult<Vec<u8>> {
        let tx_timeout = format!("{}ms", request.timeout.as_millis());
        self.send(replicas, RequestKind::Submit, &request.path, request.timeout, |client, url| {
            let builder = client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(request.envelope.clone());
            if request.wait_for_receipt {
                builder.header(TX_TIMEOUT_HEADER, &tx_timeout)
            } else {
                builder
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Identity, Signer};
    use crate::transport::Replica;

    fn unreachable_replicas() -> ReplicaSet {
        // Port 9 (discard) on localhost is closed in test environments
        vec![Replica {
            id: "node1".to_string(),
            endpoint: "http://127.0.0.1:9".to_string(),
        }]
        .into_iter()
        .collect()
    }

    #[tokio::test]
    async fn test_unreachable_replica_is_connection_failure() {
        let dispatcher = RestDispatcher::new();
        let identity = Identity::generate();
        let payload = b"{}".to_vec();

        let request = QueryRequest {
            path: "/db/bdb".to_string(),
            user_id: "admin".to_string(),
            signature: identity.sign(&payload).unwrap(),
            payload,
            timeout: Duration::from_secs(5),
        };

        let err = dispatcher
            .query(&unreachable_replicas(), request)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed(_)));
        assert!(err.to_string().contains("cannot connect to replica"));
    }

    #[tokio::test]
    async fn test_empty_replica_set() {
        let dispatcher = RestDispatcher::new();
        let request = SubmitRequest {
            path: "/db/tx".to_string(),
            envelope: b"{}".to_vec(),
            wait_for_receipt: true,
            timeout: Duration::from_secs(1),
        };

        let err = dispatcher
            .submit(&ReplicaSet::default(), request)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransportError::ConnectionFailed("replica set is empty".to_string())
        );
    }

    /// Serve one response whose headers arrive but whose body never finishes
    async fn stalled_body_replica() -> ReplicaSet {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 64\r\n\r\n{\"respon")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        vec![Replica {
            id: "node1".to_string(),
            endpoint: format!("http://{}", addr),
        }]
        .into_iter()
        .collect()
    }

    #[tokio::test]
    async fn test_stalled_body_is_a_timeout() {
        let replicas = stalled_body_replica().await;
        let identity = Identity::generate();
        let request = QueryRequest {
            path: "/config/tx".to_string(),
            user_id: "admin".to_string(),
            signature: identity.sign(b"admin").unwrap(),
            payload: b"admin".to_vec(),
            timeout: Duration::from_millis(200),
        };

        let err = RestDispatcher::new()
            .query(&replicas, request)
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "unexpected error: {}", err);
        assert_eq!(
            err,
            TransportError::Timeout {
                kind: RequestKind::Query,
                after: Duration::from_millis(200),
            }
        );
    }
}
