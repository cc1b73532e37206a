// src/tamper/mod.rs
//! Manual decisions on held requests
//!
//! `edit` only touches the staging copy; `forward` and `drop` are the two
//! decisions, and exactly one of them wins per record.

pub mod controller;
pub mod edit;

pub use controller::TamperController;
pub use edit::RequestEdit;
