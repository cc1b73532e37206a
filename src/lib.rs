// src/lib.rs
//! Netpanel Engine Library
//!
//! Interception, tamper and replay engine behind the browser's Network
//! Panel. Every request a page makes is recorded, optionally held for a
//! manual edit/forward/drop decision, sent through a pluggable network
//! stack, and can later be replayed as a fresh request.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **record**: Request record model and lifecycle states
//! - **store**: Ordered, capacity-bounded record history
//! - **events**: Broadcast of record changes to subscribers
//! - **interception**: Admission gate, modes, blocklist, dispatch, proxy
//! - **tamper**: Held-request edits and decisions
//! - **replay**: Resending stored requests as new observations
//! - **network**: Network stack abstraction and implementations
//! - **recording**: Durable archive and export
//! - **observability**: Metrics, tracing, and logging
//! - **utils**: Configuration and errors

pub mod engine;
pub mod events;
pub mod interception;
pub mod network;
pub mod observability;
pub mod record;
pub mod recording;
pub mod replay;
pub mod store;
pub mod tamper;
pub mod utils;

// Re-export commonly used types
pub use engine::{Engine, EngineStats, LoadOutcome, TabClosure};
pub use events::{Delivery, EventKind, RecordEvent};
pub use interception::{Admission, Decision, InterceptMode};
pub use record::{OutboundRequest, RecordId, RequestRecord, RequestState};
pub use tamper::RequestEdit;
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
