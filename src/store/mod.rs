// src/store/mod.rs
//! Request history storage
//!
//! In-memory, ordered by sequence, capped by a store-level eviction policy.
//! Durable archiving lives in [`crate::recording`].

pub mod request_store;

pub use request_store::{
    RecordDraft, RecordPatch, RecordQuery, RequestStore, Settlement, StoreStats,
};
