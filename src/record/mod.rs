// src/record/mod.rs
//! Request record model
//!
//! - **Model**: identity, lifecycle state and response of one exchange
//! - **Headers**: ordered, case-insensitive header multimap

pub mod headers;
pub mod model;

pub use headers::HeaderList;
pub use model::{
    DropReason, FailureReason, HttpResponse, Origin, OutboundRequest, RecordId, RequestRecord,
    RequestState, ResponseOutcome, ResponseRecord, Timing,
};
