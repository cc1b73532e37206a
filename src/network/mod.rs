// src/network/mod.rs
//! Network-stack collaborator
//!
//! The engine never talks to a transport directly. It hands a fully-formed
//! [`OutboundRequest`] to a [`NetworkStack`] and races the returned future
//! against cancellation and the request deadline.
//!
//! - **HyperNetwork**: plain-HTTP client built on `hyper-util`
//! - **ScriptedNetwork**: scripted responses for offline runs and tests

pub mod hyper_stack;
pub mod scripted;

use crate::record::{HttpResponse, OutboundRequest, RecordId};
use crate::utils::errors::Result;
use futures::future::BoxFuture;

pub use hyper_stack::HyperNetwork;
pub use scripted::{Script, ScriptedNetwork};

/// Future resolving to the response (or transport failure) of one send
pub type SendFuture = BoxFuture<'static, Result<HttpResponse>>;

/// Capability to send requests and abort them
pub trait NetworkStack: Send + Sync + 'static {
    /// Start sending `request`; the returned future owns the exchange.
    ///
    /// Dropping the future abandons the exchange.
    fn send(&self, id: RecordId, request: OutboundRequest) -> SendFuture;

    /// Abort hook for stacks that track exchanges outside the future
    fn cancel(&self, _id: RecordId) {}
}
