// src/interception/mod.rs
//! Request interception layer
//!
//! - **Gate**: single admission point; records every request and routes it
//! - **Mode**: off, hold everything, or hold URLs matching a glob
//! - **Blocklist**: domain filter consulted before the mode
//! - **Dispatch**: hands frozen requests to the network stack
//! - **Proxy**: local HTTP proxy that feeds real traffic through the gate
//!
//! # Architecture
//!
//! ```text
//! Page resource
//!     │
//!     ▼
//! ProxyServer ──► InterceptionGate ──┬─► Dropped (blocked)
//!                                    ├─► TamperController (held)
//!                                    └─► Dispatcher ──► NetworkStack
//! ```

pub mod blocklist;
pub mod dispatch;
pub mod gate;
pub mod mode;
pub mod proxy;

pub use blocklist::{Blocklist, DomainFilter};
pub use dispatch::Dispatcher;
pub use gate::{Admission, Decision, GatePolicy, InterceptionGate};
pub use mode::{InterceptMode, UrlPattern};
pub use proxy::ProxyServer;
