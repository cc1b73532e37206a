// src/interception/dispatch.rs
//! Forwarding to the network stack
//!
//! Every forward runs on its own task, so a slow or hanging exchange never
//! holds up another. Each task races the send against its cancellation
//! token and the request deadline, then writes exactly one terminal patch.

use crate::network::NetworkStack;
use crate::observability::metric_names;
use crate::record::{FailureReason, OutboundRequest, RecordId, RequestRecord, Timing};
use crate::store::{RecordPatch, RequestStore};
use crate::utils::config::DispatchConfig;
use crate::utils::errors::{EngineError, Result};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

struct InFlight {
    tab: u64,
    token: CancellationToken,
}

/// Hands frozen requests to the network and records their outcome
pub struct Dispatcher {
    network: Arc<dyn NetworkStack>,
    store: Arc<RequestStore>,
    config: DispatchConfig,
    in_flight: Arc<DashMap<RecordId, InFlight>>,
}

impl Dispatcher {
    pub fn new(
        network: Arc<dyn NetworkStack>,
        store: Arc<RequestStore>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            network,
            store,
            config,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Move the record to `Forwarded` with `request` as its final shape and
    /// start the exchange.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn dispatch(&self, id: RecordId, request: OutboundRequest) -> Result<Arc<RequestRecord>> {
        let tab = self
            .store
            .get(id)
            .map(|record| record.origin.tab)
            .ok_or(EngineError::RecordNotFound(id))?;
        let token = CancellationToken::new();
        let started_at = Utc::now();

        // Registered before the state change so a cancel racing with the
        // Forwarded event always finds the exchange.
        self.in_flight.insert(
            id,
            InFlight {
                tab,
                token: token.clone(),
            },
        );

        let record = match self.store.update(
            id,
            RecordPatch::Forward {
                request: request.clone(),
                at: started_at,
            },
        ) {
            Ok(record) => record,
            Err(e) => {
                self.in_flight.remove(&id);
                return Err(e);
            }
        };

        metrics::gauge!(metric_names::IN_FLIGHT).set(self.in_flight.len() as f64);
        debug!("Forwarded {}: {} {}", id, request.method, request.url);

        let network = Arc::clone(&self.network);
        let store = Arc::clone(&self.store);
        let in_flight = Arc::clone(&self.in_flight);
        let deadline = self.config.request_timeout();

        tokio::spawn(async move {
            let result = tokio::select! {
                result = network.send(id, request) => result.map_err(|e| match e {
                    EngineError::NetworkFailure(message) => FailureReason::NetworkFailure(message),
                    other => FailureReason::NetworkFailure(other.to_string()),
                }),
                _ = token.cancelled() => {
                    network.cancel(id);
                    Err(FailureReason::Cancelled)
                }
                _ = tokio::time::sleep(deadline) => {
                    network.cancel(id);
                    Err(FailureReason::Timeout)
                }
            };

            let timing = Timing {
                started_at,
                finished_at: Utc::now(),
            };
            metrics::histogram!(metric_names::REQUEST_DURATION_MS)
                .record(timing.duration_ms() as f64);

            let patch = match result {
                Ok(response) => {
                    debug!("Completed {} with status {}", id, response.status);
                    metrics::counter!(metric_names::REQUESTS_FINISHED, "outcome" => "completed")
                        .increment(1);
                    RecordPatch::Complete { timing, response }
                }
                Err(reason) => {
                    warn!("Request {} failed: {}", id, reason);
                    metrics::counter!(metric_names::REQUESTS_FINISHED, "outcome" => "failed")
                        .increment(1);
                    RecordPatch::Fail { timing, reason }
                }
            };

            if let Err(e) = store.update(id, patch) {
                warn!("Outcome for {} not recorded: {}", id, e);
            }

            // Leaves the in-flight set only once the record is terminal.
            in_flight.remove(&id);
            metrics::gauge!(metric_names::IN_FLIGHT).set(in_flight.len() as f64);
        });

        Ok(record)
    }

    /// Cancel the in-flight exchange; the record ends `Failed(Cancelled)`
    pub fn cancel(&self, id: RecordId) -> Result<()> {
        match self.in_flight.get(&id) {
            Some(entry) => {
                entry.token.cancel();
                debug!("Cancellation requested for {}", id);
                Ok(())
            }
            None => match self.store.get(id) {
                Some(_) => Err(EngineError::NotInFlight(id)),
                None => Err(EngineError::RecordNotFound(id)),
            },
        }
    }

    /// Cancel every in-flight exchange started by `tab`
    pub fn cancel_tab(&self, tab: u64) -> usize {
        let mut cancelled = 0;
        for entry in self.in_flight.iter() {
            if entry.tab == tab {
                entry.token.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, id: RecordId) -> bool {
        self.in_flight.contains_key(&id)
    }
}
