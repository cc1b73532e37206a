// src/recording/mod.rs
//! Durable history and export
//!
//! - **Archive**: SQLite table with one row per finished record
//! - **Recorder**: background task feeding the archive from the event bus
//! - **Compressor**: zstd for archived payloads
//! - **Exporter**: JSON and HAR output
//!
//! # Architecture
//!
//! ```text
//! EventBus ──► ArchiveRecorder ──► batch (size / interval)
//!                                      │
//!                                      ▼
//!                          serde_json + zstd per record
//!                                      │
//!                                      ▼
//!                              RecordArchive (SQLite)
//! ```

pub mod archive;
pub mod compressor;
pub mod exporter;
pub mod recorder;

pub use archive::{ArchiveStats, ArchivedSummary, RecordArchive};
pub use compressor::{CompressionLevel, Compressor};
pub use exporter::{ExportFormat, Exporter};
pub use recorder::{ArchiveRecorder, RecorderStats};
