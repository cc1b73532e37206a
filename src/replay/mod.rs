// src/replay/mod.rs
//! Replay of stored requests
//!
//! A replay is a brand-new observation: it goes back through the gate, gets
//! its own id and sequence, and points at its source through `replay_of`.
//! The source record is never touched.

use crate::interception::{Admission, InterceptionGate};
use crate::observability::metric_names;
use crate::record::{OutboundRequest, RecordId};
use crate::store::{RecordDraft, RequestStore};
use crate::tamper::RequestEdit;
use crate::utils::config::ReplayConfig;
use crate::utils::errors::{EngineError, Result};
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/117.0.0.0 Safari/537.36";

pub const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

pub struct ReplayEngine {
    store: Arc<RequestStore>,
    gate: Arc<InterceptionGate>,
    config: ReplayConfig,
}

impl ReplayEngine {
    pub fn new(store: Arc<RequestStore>, gate: Arc<InterceptionGate>, config: ReplayConfig) -> Self {
        Self {
            store,
            gate,
            config,
        }
    }

    /// Resend the forwarded shape of `id`, optionally overlaid with edits
    pub fn replay(&self, id: RecordId, overrides: Option<&RequestEdit>) -> Result<Admission> {
        let request = self.prepare(id, overrides)?;
        let source = self.store.get(id).ok_or(EngineError::RecordNotFound(id))?;

        metrics::counter!(metric_names::REPLAYS).increment(1);
        info!("Replaying {} as {} {}", id, request.method, request.url);

        self.gate
            .admit(RecordDraft::new(source.origin.clone(), request).replay_of(id))
    }

    /// Build the request a replay of `id` would send, without sending it
    pub fn prepare(&self, id: RecordId, overrides: Option<&RequestEdit>) -> Result<OutboundRequest> {
        let source = self.store.get(id).ok_or(EngineError::RecordNotFound(id))?;
        if !source.state.was_forwarded() {
            return Err(EngineError::NotReplayable {
                id,
                state: source.state,
            });
        }

        let mut request = match overrides {
            Some(edit) => edit.apply_to(&source.outbound),
            None => source.outbound.clone(),
        };

        if self.config.fill_default_headers && request.headers.is_empty() {
            request.headers.set("User-Agent", DEFAULT_USER_AGENT);
            request.headers.set("Accept", DEFAULT_ACCEPT);
        }

        request.validate()?;
        Ok(request)
    }
}
