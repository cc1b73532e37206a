// src/recording/recorder.rs
//! Background archiver
//!
//! Follows the event bus and writes records to the archive once they reach
//! a terminal state, batched by size and by flush interval.

use crate::events::{Delivery, EventKind, EventStream};
use crate::observability::metric_names;
use crate::record::RequestRecord;
use crate::recording::archive::RecordArchive;
use crate::utils::config::ArchiveConfig;
use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Recorder statistics
#[derive(Debug, Clone, Default)]
pub struct RecorderStats {
    pub records_archived: u64,
    pub batches_flushed: u64,
    pub failed_batches: u64,
    /// Events lost to bus lag; their records are not archived
    pub events_missed: u64,
    pub total_flush_time_ms: u64,
}

impl RecorderStats {
    pub fn avg_flush_time_ms(&self) -> u64 {
        if self.batches_flushed == 0 {
            0
        } else {
            self.total_flush_time_ms / self.batches_flushed
        }
    }
}

pub struct ArchiveRecorder {
    archive: Arc<RecordArchive>,
    batch_size: usize,
    flush_interval: Duration,
    shutdown: CancellationToken,
    writer_handle: Option<JoinHandle<()>>,
    stats: Arc<Mutex<RecorderStats>>,
}

impl ArchiveRecorder {
    pub fn new(archive: Arc<RecordArchive>, config: &ArchiveConfig) -> Self {
        Self {
            archive,
            batch_size: config.batch_size.max(1),
            flush_interval: Duration::from_millis(config.flush_interval_ms.max(1)),
            shutdown: CancellationToken::new(),
            writer_handle: None,
            stats: Arc::new(Mutex::new(RecorderStats::default())),
        }
    }

    /// Start the background writer on `events`
    pub fn start(&mut self, mut events: EventStream) -> Result<()> {
        if self.writer_handle.is_some() {
            return Err(EngineError::StorageFailed(
                "archive recorder already started".to_string(),
            ));
        }
        info!("Starting archive recorder");

        let archive = Arc::clone(&self.archive);
        let stats = Arc::clone(&self.stats);
        let shutdown = self.shutdown.clone();
        let batch_size = self.batch_size;
        let flush_interval = self.flush_interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(flush_interval);
            let mut batch: Vec<Arc<RequestRecord>> = Vec::with_capacity(batch_size);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        // Take whatever was already published before stopping.
                        while let Some(delivery) = events.try_next() {
                            Self::accept(&mut batch, delivery, &stats);
                        }
                        Self::flush_batch(&mut batch, &archive, &stats).await;
                        break;
                    }

                    _ = interval.tick() => {
                        Self::flush_batch(&mut batch, &archive, &stats).await;
                    }

                    delivery = events.next() => match delivery {
                        Some(delivery) => {
                            Self::accept(&mut batch, delivery, &stats);
                            if batch.len() >= batch_size {
                                Self::flush_batch(&mut batch, &archive, &stats).await;
                            }
                        }
                        None => {
                            Self::flush_batch(&mut batch, &archive, &stats).await;
                            break;
                        }
                    }
                }
            }

            debug!("Archive recorder stopped");
        });

        self.writer_handle = Some(handle);
        Ok(())
    }

    fn accept(
        batch: &mut Vec<Arc<RequestRecord>>,
        delivery: Delivery,
        stats: &Mutex<RecorderStats>,
    ) {
        match delivery {
            Delivery::Event(event) => {
                if event.kind == EventKind::Updated && event.state().is_terminal() {
                    batch.push(event.record);
                }
            }
            Delivery::Gap { missed } => {
                warn!("Archive recorder lagged, {} events missed", missed);
                stats.lock().events_missed += missed;
            }
        }
    }

    async fn flush_batch(
        batch: &mut Vec<Arc<RequestRecord>>,
        archive: &RecordArchive,
        stats: &Mutex<RecorderStats>,
    ) {
        if batch.is_empty() {
            return;
        }

        let start = Instant::now();
        let result = archive.write_batch(batch).await;
        let elapsed = start.elapsed();

        let mut s = stats.lock();
        match result {
            Ok(written) => {
                s.records_archived += written as u64;
                s.batches_flushed += 1;
                s.total_flush_time_ms += elapsed.as_millis() as u64;
                metrics::counter!(metric_names::ARCHIVED_RECORDS).increment(written as u64);
                debug!("Archived batch of {} in {:?}", written, elapsed);
            }
            Err(e) => {
                s.failed_batches += 1;
                error!("Failed to archive batch of {}: {}", batch.len(), e);
            }
        }
        batch.clear();
    }

    pub fn stats(&self) -> RecorderStats {
        self.stats.lock().clone()
    }

    /// Flush what is buffered and stop the writer
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down archive recorder");
        self.shutdown.cancel();

        if let Some(handle) = self.writer_handle.take() {
            handle.await.map_err(|e| {
                EngineError::StorageFailed(format!("Archive writer panicked: {}", e))
            })?;
        }

        Ok(())
    }
}
