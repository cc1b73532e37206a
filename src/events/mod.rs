// src/events/mod.rs
//! Record lifecycle notifications
//!
//! Producers (store, gate, controller, dispatcher) publish through the
//! store's write path; consumers subscribe and read at their own pace.
//!
//! ```text
//! RequestStore ──publish──► EventBus ──┬─► Network Panel
//!                                      ├─► Archive recorder
//!                                      └─► await_outcome()
//! ```

pub mod bus;

pub use bus::{BusStats, Delivery, EventBus, EventKind, EventStream, RecordEvent};
