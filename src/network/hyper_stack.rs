// src/network/hyper_stack.rs
//! HTTP network stack on the `hyper-util` legacy client
//!
//! Plain HTTP only; TLS, cookies and caching belong to the browser's own
//! network stack and are out of scope here.

use crate::network::{NetworkStack, SendFuture};
use crate::record::{HeaderList, HttpResponse, OutboundRequest, RecordId};
use crate::utils::errors::EngineError;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

/// hyper-backed network stack
#[derive(Clone)]
pub struct HyperNetwork {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HyperNetwork {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self { client }
    }
}

impl Default for HyperNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkStack for HyperNetwork {
    fn send(&self, id: RecordId, request: OutboundRequest) -> SendFuture {
        let client = self.client.clone();

        Box::pin(async move {
            debug!("Sending {}: {} {}", id, request.method, request.url);

            let mut builder = Request::builder()
                .method(request.method.as_str())
                .uri(request.url.as_str());
            for (name, value) in request.headers.iter() {
                builder = builder.header(name, value);
            }

            let outbound = builder
                .body(Full::new(request.body.unwrap_or_default()))
                .map_err(|e| EngineError::NetworkFailure(format!("Request build error: {}", e)))?;

            let response = client
                .request(outbound)
                .await
                .map_err(|e| EngineError::NetworkFailure(format!("Request failed: {}", e)))?;

            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| EngineError::NetworkFailure(format!("Response body error: {}", e)))?
                .to_bytes();

            debug!("Response for {}: {}", id, parts.status);

            Ok(HttpResponse {
                status: parts.status.as_u16(),
                headers: HeaderList::from(&parts.headers),
                body,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_send_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(
                    b"HTTP/1.1 201 Created\r\nX-Reply: yes\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
                )
                .await
                .unwrap();
        });

        let network = HyperNetwork::new();
        let request = OutboundRequest::get(format!("http://{}/thing", addr)).with_header("X-Test", "1");
        let response = network.send(RecordId::new(), request).await.unwrap();

        assert_eq!(response.status, 201);
        assert_eq!(response.headers.get("x-reply"), Some("yes"));
        assert_eq!(&response.body[..], b"ok");
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let network = HyperNetwork::new();
        let result = network
            .send(RecordId::new(), OutboundRequest::get(format!("http://{}/", addr)))
            .await;
        assert!(matches!(result, Err(EngineError::NetworkFailure(_))));
    }
}
