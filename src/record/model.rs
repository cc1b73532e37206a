// src/record/model.rs
//! Request record model
//!
//! A `RequestRecord` is one observed request/response exchange. Identity
//! (`id`, `sequence`, `origin`, `original`) is fixed at creation; the rest
//! moves forward through the lifecycle:
//!
//! ```text
//! Pending ──┬─► Held ──┬─► Forwarded ──┬─► Completed
//!           │          │               └─► Failed
//!           ├──────────┼─► Dropped
//!           └─► Forwarded
//! ```

use crate::record::headers::HeaderList;
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Opaque record identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Ulid);

impl RecordId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req_{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.strip_prefix("req_").unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self)
            .map_err(|e| EngineError::ConfigError(format!("invalid record id {}: {}", s, e)))
    }
}

/// Which tab and resource produced a request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Origin {
    /// Browser tab identifier
    pub tab: u64,

    /// Resource tag (document, script, xhr, ...)
    pub resource: Option<String>,
}

impl Origin {
    pub fn tab(tab: u64) -> Self {
        Self {
            tab,
            resource: None,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

/// Outbound request shape: what was observed, staged, or sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    pub headers: HeaderList,
    pub body: Option<Bytes>,
}

impl OutboundRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: HeaderList::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Host part of the URL, if it parses as an absolute URI
    pub fn host(&self) -> Option<String> {
        self.url
            .parse::<hyper::Uri>()
            .ok()
            .and_then(|uri| uri.host().map(|h| h.to_ascii_lowercase()))
    }

    /// Check that the request could be handed to a network stack
    pub fn validate(&self) -> Result<()> {
        if self.method.is_empty() {
            return Err(EngineError::InvalidEdit("method is empty".to_string()));
        }
        hyper::Method::from_bytes(self.method.as_bytes()).map_err(|_| {
            EngineError::InvalidEdit(format!("invalid method token: {:?}", self.method))
        })?;

        if self.url.trim().is_empty() {
            return Err(EngineError::InvalidEdit("url is empty".to_string()));
        }
        let uri: hyper::Uri = self
            .url
            .parse()
            .map_err(|e| EngineError::InvalidEdit(format!("invalid url {:?}: {}", self.url, e)))?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(EngineError::InvalidEdit(format!(
                "url must be absolute: {:?}",
                self.url
            )));
        }

        for (name, value) in self.headers.iter() {
            hyper::header::HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                EngineError::InvalidEdit(format!("invalid header name: {:?}", name))
            })?;
            hyper::header::HeaderValue::from_str(value).map_err(|_| {
                EngineError::InvalidEdit(format!("invalid value for header {}", name))
            })?;
        }

        Ok(())
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Pending,
    Held,
    Forwarded,
    Dropped,
    Completed,
    Failed,
}

impl RequestState {
    /// Whether `next` is a legal forward step from `self`
    pub fn can_advance_to(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Pending, Held)
                | (Pending, Forwarded)
                | (Pending, Dropped)
                | (Held, Forwarded)
                | (Held, Dropped)
                | (Forwarded, Completed)
                | (Forwarded, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Dropped | RequestState::Completed | RequestState::Failed
        )
    }

    /// True once the outbound shape has been handed to the network
    pub fn was_forwarded(self) -> bool {
        matches!(
            self,
            RequestState::Forwarded | RequestState::Completed | RequestState::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestState::Pending => "pending",
            RequestState::Held => "held",
            RequestState::Forwarded => "forwarded",
            RequestState::Dropped => "dropped",
            RequestState::Completed => "completed",
            RequestState::Failed => "failed",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a record ended up `Dropped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Domain filter matched at admission
    BlockedByFilter,
    /// User dropped the held request
    User,
    /// Nobody decided before the hold deadline
    HoldExpired,
    /// Owning tab closed while the request was held
    TabClosed,
}

/// Why a forwarded record ended up `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum FailureReason {
    Cancelled,
    Timeout,
    NetworkFailure(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::NetworkFailure(detail) => write!(f, "network failure: {}", detail),
        }
    }
}

/// Response as received from the network stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderList,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderList::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// Start and end of the network exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Timing {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Result half of a record, present once the exchange is over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOutcome {
    Received(HttpResponse),
    Failed(FailureReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub timing: Timing,
    pub outcome: ResponseOutcome,
}

/// One observed exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: RecordId,

    /// Total observation order, assigned by the store
    pub sequence: u64,

    pub origin: Origin,

    /// Source record when this one was produced by replay
    pub replay_of: Option<RecordId>,

    pub observed_at: DateTime<Utc>,

    /// Request exactly as first observed
    pub original: OutboundRequest,

    /// About-to-send view: staging copy while held, frozen once forwarded
    pub outbound: OutboundRequest,

    pub state: RequestState,

    pub drop_reason: Option<DropReason>,

    pub forwarded_at: Option<DateTime<Utc>>,

    pub response: Option<ResponseRecord>,
}

impl RequestRecord {
    pub fn method(&self) -> &str {
        &self.outbound.method
    }

    pub fn url(&self) -> &str {
        &self.outbound.url
    }

    pub fn headers(&self) -> &HeaderList {
        &self.outbound.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.outbound.body.as_ref()
    }

    /// Status code, only for completed records
    pub fn status(&self) -> Option<u16> {
        match self.response.as_ref().map(|r| &r.outcome) {
            Some(ResponseOutcome::Received(response)) => Some(response.status),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self.response.as_ref().map(|r| &r.outcome) {
            Some(ResponseOutcome::Failed(reason)) => Some(reason),
            _ => None,
        }
    }

    /// Whether the outbound shape differs from what the page sent
    pub fn was_edited(&self) -> bool {
        self.original != self.outbound
    }
}
