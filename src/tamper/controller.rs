// src/tamper/controller.rs
//! Held-request state machine
//!
//! A held request owns a staging copy that the user may edit. Exactly one
//! decision (forward or drop) can take it out of the held table; removal
//! from the table is the arbitration point, so a duplicate or racing
//! decision finds nothing and fails with `AlreadyDecided`.
//!
//! ```text
//!            edit (staging only)
//!              ┌──────┐
//!              ▼      │
//! park ──► [ Held ] ──┘
//!              │
//!              ├── forward ──► Dispatcher ──► Forwarded
//!              ├── drop ─────► Dropped(User)
//!              ├── deadline ─► Dropped(HoldExpired)
//!              └── tab close ► Dropped(TabClosed)
//! ```

use crate::interception::dispatch::Dispatcher;
use crate::observability::metric_names;
use crate::record::{DropReason, OutboundRequest, RecordId, RequestRecord, RequestState};
use crate::store::{RecordPatch, RequestStore};
use crate::tamper::edit::RequestEdit;
use crate::utils::config::TamperConfig;
use crate::utils::errors::{EngineError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct HeldEntry {
    tab: u64,
    staging: OutboundRequest,
    expiry: CancellationToken,
}

/// Manages requests waiting for a manual decision
pub struct TamperController {
    store: Arc<RequestStore>,
    dispatcher: Arc<Dispatcher>,
    config: TamperConfig,
    held: DashMap<RecordId, HeldEntry>,
}

impl TamperController {
    pub fn new(store: Arc<RequestStore>, dispatcher: Arc<Dispatcher>, config: TamperConfig) -> Self {
        Self {
            store,
            dispatcher,
            config,
            held: DashMap::new(),
        }
    }

    /// Move a pending record to `Held` and start its hold deadline
    pub fn park(self: &Arc<Self>, id: RecordId, tab: u64, request: OutboundRequest) -> Result<()> {
        let expiry = CancellationToken::new();

        match self.held.entry(id) {
            Entry::Vacant(slot) => {
                // The slot stays locked until inserted, so a decision cannot
                // observe `Held` in the store without finding the entry.
                self.store.update(id, RecordPatch::Hold)?;
                slot.insert(HeldEntry {
                    tab,
                    staging: request,
                    expiry: expiry.clone(),
                });
            }
            Entry::Occupied(_) => {
                return Err(EngineError::InterceptionFailed(format!(
                    "record {} is already held",
                    id
                )));
            }
        }

        metrics::gauge!(metric_names::HELD_ACTIVE).set(self.held.len() as f64);
        info!("Holding {} for a decision", id);

        let controller = Arc::downgrade(self);
        let deadline = self.config.hold_timeout();
        tokio::spawn(async move {
            tokio::select! {
                _ = expiry.cancelled() => {}
                _ = tokio::time::sleep(deadline) => {
                    if let Some(controller) = controller.upgrade() {
                        match controller.finish_drop(id, DropReason::HoldExpired) {
                            Ok(_) => warn!("Hold on {} expired, request dropped", id),
                            Err(e) => debug!("Hold expiry for {} ignored: {}", id, e),
                        }
                    }
                }
            }
        });

        Ok(())
    }

    /// Replace fields on the staging copy; the record stays `Held`
    pub fn edit(&self, id: RecordId, edit: &RequestEdit) -> Result<Arc<RequestRecord>> {
        let mut entry = self
            .held
            .get_mut(&id)
            .ok_or_else(|| self.not_held(id))?;

        let candidate = edit.apply_to(&entry.staging);
        candidate.validate()?;

        let record = self
            .store
            .update(id, RecordPatch::Restage(candidate.clone()))?;
        entry.staging = candidate;

        debug!("Edited held request {}", id);
        Ok(record)
    }

    /// Send the staging copy; its shape is frozen from here on
    pub fn forward(&self, id: RecordId) -> Result<Arc<RequestRecord>> {
        let entry = self.take(id)?;
        metrics::counter!(metric_names::HELD_DECISIONS, "decision" => "forward").increment(1);
        info!("Forwarding held request {}", id);
        self.dispatcher.dispatch(id, entry.staging)
    }

    /// Drop the held request; the page load is told it failed
    pub fn drop_request(&self, id: RecordId) -> Result<Arc<RequestRecord>> {
        self.finish_drop(id, DropReason::User)
    }

    /// Drop every request held for `tab`
    pub fn drop_tab(&self, tab: u64) -> usize {
        let ids: Vec<RecordId> = self
            .held
            .iter()
            .filter(|entry| entry.tab == tab)
            .map(|entry| *entry.key())
            .collect();

        ids.into_iter()
            .filter(|id| self.finish_drop(*id, DropReason::TabClosed).is_ok())
            .count()
    }

    /// Current staging copy of a held request
    pub fn staged(&self, id: RecordId) -> Option<OutboundRequest> {
        self.held.get(&id).map(|entry| entry.staging.clone())
    }

    pub fn held_ids(&self) -> Vec<RecordId> {
        self.held.iter().map(|entry| *entry.key()).collect()
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    fn finish_drop(&self, id: RecordId, reason: DropReason) -> Result<Arc<RequestRecord>> {
        let _entry = self.take(id)?;
        metrics::counter!(metric_names::HELD_DECISIONS, "decision" => "drop").increment(1);
        info!("Dropping held request {} ({:?})", id, reason);
        self.store.update(id, RecordPatch::Drop(reason))
    }

    /// Claim the decision for `id`; only one caller ever succeeds
    fn take(&self, id: RecordId) -> Result<HeldEntry> {
        let (_, entry) = self.held.remove(&id).ok_or_else(|| self.not_held(id))?;
        entry.expiry.cancel();
        metrics::gauge!(metric_names::HELD_ACTIVE).set(self.held.len() as f64);
        Ok(entry)
    }

    fn not_held(&self, id: RecordId) -> EngineError {
        match self.store.get(id) {
            None => EngineError::RecordNotFound(id),
            Some(record) if record.state == RequestState::Pending => EngineError::NotHeld(id),
            Some(_) => EngineError::AlreadyDecided(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::network::{Script, ScriptedNetwork};
    use crate::record::{HttpResponse, Origin};
    use crate::store::RecordDraft;
    use crate::utils::config::{DispatchConfig, StoreConfig};
    use std::time::Duration;

    struct Fixture {
        store: Arc<RequestStore>,
        network: Arc<ScriptedNetwork>,
        controller: Arc<TamperController>,
    }

    fn fixture(hold_timeout_ms: u64) -> Fixture {
        let store = Arc::new(RequestStore::new(
            StoreConfig::default(),
            Arc::new(EventBus::new(64)),
        ));
        let network = Arc::new(
            ScriptedNetwork::new().route("http://example.test/", Script::Respond(HttpResponse::new(200))),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&network) as Arc<dyn crate::network::NetworkStack>,
            Arc::clone(&store),
            DispatchConfig::default(),
        ));
        let controller = Arc::new(TamperController::new(
            Arc::clone(&store),
            dispatcher,
            TamperConfig { hold_timeout_ms },
        ));
        Fixture {
            store,
            network,
            controller,
        }
    }

    fn held(fx: &Fixture, tab: u64) -> RecordId {
        let request = OutboundRequest::get("http://example.test/a");
        let record = fx
            .store
            .append(RecordDraft::new(Origin::tab(tab), request.clone()));
        fx.controller.park(record.id, tab, request).unwrap();
        record.id
    }

    #[tokio::test]
    async fn test_edit_then_forward_sends_staging() {
        let fx = fixture(60_000);
        let id = held(&fx, 1);

        let record = fx
            .controller
            .edit(id, &RequestEdit::new().set_header("X-Test", "1"))
            .unwrap();
        assert_eq!(record.state, RequestState::Held);
        assert_eq!(record.headers().get("x-test"), Some("1"));

        let forwarded = fx.controller.forward(id).unwrap();
        assert_eq!(forwarded.state, RequestState::Forwarded);
        assert!(forwarded.original.headers.is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let sent = fx.network.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].headers.get("X-Test"), Some("1"));
    }

    #[tokio::test]
    async fn test_invalid_edit_keeps_record_held() {
        let fx = fixture(60_000);
        let id = held(&fx, 1);

        let err = fx
            .controller
            .edit(id, &RequestEdit::new().url(""))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidEdit(_)));

        let record = fx.store.get(id).unwrap();
        assert_eq!(record.state, RequestState::Held);
        assert_eq!(record.url(), "http://example.test/a");
        assert_eq!(fx.controller.held_count(), 1);
    }

    #[tokio::test]
    async fn test_second_decision_already_decided() {
        let fx = fixture(60_000);
        let id = held(&fx, 1);

        fx.controller.drop_request(id).unwrap();

        assert!(matches!(
            fx.controller.forward(id),
            Err(EngineError::AlreadyDecided(_))
        ));
        assert!(matches!(
            fx.controller.drop_request(id),
            Err(EngineError::AlreadyDecided(_))
        ));
        assert!(matches!(
            fx.controller.edit(id, &RequestEdit::new().method("POST")),
            Err(EngineError::AlreadyDecided(_))
        ));

        let record = fx.store.get(id).unwrap();
        assert_eq!(record.state, RequestState::Dropped);
        assert_eq!(record.drop_reason, Some(DropReason::User));
        assert!(fx.network.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_record() {
        let fx = fixture(60_000);
        assert!(matches!(
            fx.controller.forward(RecordId::new()),
            Err(EngineError::RecordNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_hold_expires() {
        let fx = fixture(20);
        let id = held(&fx, 1);

        tokio::time::sleep(Duration::from_millis(100)).await;

        let record = fx.store.get(id).unwrap();
        assert_eq!(record.state, RequestState::Dropped);
        assert_eq!(record.drop_reason, Some(DropReason::HoldExpired));
        assert_eq!(fx.controller.held_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_tab() {
        let fx = fixture(60_000);
        let a = held(&fx, 1);
        let b = held(&fx, 1);
        let c = held(&fx, 2);

        assert_eq!(fx.controller.drop_tab(1), 2);

        for id in [a, b] {
            assert_eq!(
                fx.store.get(id).unwrap().drop_reason,
                Some(DropReason::TabClosed)
            );
        }
        assert_eq!(fx.controller.held_ids(), vec![c]);
    }
}
