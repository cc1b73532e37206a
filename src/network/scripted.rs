// src/network/scripted.rs
//! Scripted network stack
//!
//! Answers requests from a table of URL-prefix scripts instead of the
//! network. Used for offline sessions and throughout the test suite.

use crate::network::{NetworkStack, SendFuture};
use crate::record::{HttpResponse, OutboundRequest, RecordId};
use crate::utils::errors::EngineError;
use parking_lot::Mutex;
use std::time::Duration;

/// How to answer a matching request
#[derive(Debug, Clone)]
pub enum Script {
    Respond(HttpResponse),
    /// Respond after a delay
    Delay(Duration, HttpResponse),
    /// Fail with a transport error
    Fail(String),
    /// Never answer
    Hang,
}

/// Network stack driven by scripts
pub struct ScriptedNetwork {
    routes: Mutex<Vec<(String, Script)>>,
    fallback: Script,
    sent: Mutex<Vec<(RecordId, OutboundRequest)>>,
    cancelled: Mutex<Vec<RecordId>>,
}

impl ScriptedNetwork {
    /// Stack answering everything with `200` and an empty body
    pub fn new() -> Self {
        Self::with_fallback(Script::Respond(HttpResponse::new(200)))
    }

    pub fn with_fallback(fallback: Script) -> Self {
        Self {
            routes: Mutex::new(Vec::new()),
            fallback,
            sent: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    /// Answer URLs starting with `prefix` using `script`; first match wins
    pub fn route(self, prefix: impl Into<String>, script: Script) -> Self {
        self.routes.lock().push((prefix.into(), script));
        self
    }

    /// Requests handed to this stack, in send order
    pub fn sent(&self) -> Vec<OutboundRequest> {
        self.sent.lock().iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn sent_ids(&self) -> Vec<RecordId> {
        self.sent.lock().iter().map(|(id, _)| *id).collect()
    }

    /// Records whose exchange was aborted through [`NetworkStack::cancel`]
    pub fn cancelled(&self) -> Vec<RecordId> {
        self.cancelled.lock().clone()
    }

    fn script_for(&self, url: &str) -> Script {
        self.routes
            .lock()
            .iter()
            .find(|(prefix, _)| url.starts_with(prefix.as_str()))
            .map(|(_, script)| script.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Default for ScriptedNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkStack for ScriptedNetwork {
    fn send(&self, id: RecordId, request: OutboundRequest) -> SendFuture {
        let script = self.script_for(&request.url);
        self.sent.lock().push((id, request));

        Box::pin(async move {
            match script {
                Script::Respond(response) => Ok(response),
                Script::Delay(delay, response) => {
                    tokio::time::sleep(delay).await;
                    Ok(response)
                }
                Script::Fail(message) => Err(EngineError::NetworkFailure(message)),
                Script::Hang => futures::future::pending().await,
            }
        })
    }

    fn cancel(&self, id: RecordId) {
        self.cancelled.lock().push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_routes_and_fallback() {
        let network = ScriptedNetwork::new()
            .route("http://fail.test/", Script::Fail("refused".to_string()))
            .route(
                "http://ok.test/",
                Script::Respond(HttpResponse::new(204)),
            );

        let ok = network
            .send(RecordId::new(), OutboundRequest::get("http://ok.test/a"))
            .await
            .unwrap();
        assert_eq!(ok.status, 204);

        let fail = network
            .send(RecordId::new(), OutboundRequest::get("http://fail.test/a"))
            .await;
        assert!(matches!(fail, Err(EngineError::NetworkFailure(_))));

        let other = network
            .send(RecordId::new(), OutboundRequest::get("http://other.test/"))
            .await
            .unwrap();
        assert_eq!(other.status, 200);

        assert_eq!(network.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_hang_never_resolves() {
        let network = ScriptedNetwork::with_fallback(Script::Hang);
        let result = tokio::time::timeout(
            Duration::from_millis(20),
            network.send(RecordId::new(), OutboundRequest::get("http://slow.test/")),
        )
        .await;
        assert!(result.is_err());
    }
}
