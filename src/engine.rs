// src/engine.rs
//! Engine facade
//!
//! Wires the components together and exposes the operations the network
//! panel and the proxy front-end use.
//!
//! ```text
//!            ┌──────────────── Engine ────────────────┐
//! observe ──►│ Gate ──► TamperController ──┐          │
//!            │   │                         ▼          │
//! replay ───►│ ReplayEngine            Dispatcher ────┼──► NetworkStack
//!            │                             │          │
//!            │            RequestStore ◄───┘          │
//!            │                 │                      │
//!            │              EventBus ─────────────────┼──► subscribers
//!            └────────────────────────────────────────┘
//! ```

use crate::events::{BusStats, EventBus, EventStream};
use crate::interception::{
    Admission, Dispatcher, DomainFilter, GatePolicy, InterceptMode, InterceptionGate,
};
use crate::network::NetworkStack;
use crate::record::{
    DropReason, FailureReason, HttpResponse, Origin, OutboundRequest, RecordId, RequestRecord,
    RequestState, ResponseOutcome,
};
use crate::replay::ReplayEngine;
use crate::store::{RecordDraft, RecordQuery, RequestStore, Settlement, StoreStats};
use crate::tamper::{RequestEdit, TamperController};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// How a page load ended, from the page's point of view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded(HttpResponse),
    /// Stopped by the domain filter
    Blocked,
    Dropped(DropReason),
    Failed(FailureReason),
}

impl LoadOutcome {
    /// Outcome for a terminal record; `None` while still in progress
    pub fn from_record(record: &RequestRecord) -> Option<Self> {
        match record.state {
            RequestState::Dropped => Some(match record.drop_reason {
                Some(DropReason::BlockedByFilter) => LoadOutcome::Blocked,
                Some(reason) => LoadOutcome::Dropped(reason),
                None => LoadOutcome::Dropped(DropReason::User),
            }),
            RequestState::Completed | RequestState::Failed => {
                match record.response.as_ref().map(|r| &r.outcome) {
                    Some(ResponseOutcome::Received(response)) => {
                        Some(LoadOutcome::Loaded(response.clone()))
                    }
                    Some(ResponseOutcome::Failed(reason)) => {
                        Some(LoadOutcome::Failed(reason.clone()))
                    }
                    None => None,
                }
            }
            _ => None,
        }
    }
}

/// What closing a tab cleaned up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TabClosure {
    pub dropped: usize,
    pub cancelled: usize,
}

#[derive(Debug, Clone)]
pub struct EngineStats {
    pub store: StoreStats,
    pub bus: BusStats,
    pub held: usize,
    pub in_flight: usize,
}

pub struct Engine {
    store: Arc<RequestStore>,
    bus: Arc<EventBus>,
    dispatcher: Arc<Dispatcher>,
    controller: Arc<TamperController>,
    gate: Arc<InterceptionGate>,
    replay: ReplayEngine,
}

impl Engine {
    pub fn new(config: EngineConfig, network: Arc<dyn NetworkStack>) -> Result<Self> {
        config.validate()?;
        let policy = GatePolicy::from_config(&config.interception)?;

        let bus = Arc::new(EventBus::new(config.events.buffer));
        let store = Arc::new(RequestStore::new(config.store.clone(), Arc::clone(&bus)));
        let dispatcher = Arc::new(Dispatcher::new(
            network,
            Arc::clone(&store),
            config.dispatch.clone(),
        ));
        let controller = Arc::new(TamperController::new(
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            config.tamper.clone(),
        ));
        let gate = Arc::new(InterceptionGate::new(
            policy,
            Arc::clone(&store),
            Arc::clone(&controller),
            Arc::clone(&dispatcher),
        ));
        let replay = ReplayEngine::new(Arc::clone(&store), Arc::clone(&gate), config.replay.clone());

        info!(
            "Engine ready (capacity: {}, request timeout: {:?})",
            config.store.capacity,
            config.dispatch.request_timeout()
        );

        Ok(Self {
            store,
            bus,
            dispatcher,
            controller,
            gate,
            replay,
        })
    }

    /// Admit a request observed from `origin`
    pub fn observe(&self, origin: Origin, request: OutboundRequest) -> Result<Admission> {
        self.gate.admit(RecordDraft::new(origin, request))
    }

    /// Admit a request and wait until the page would see its outcome
    pub async fn load(&self, origin: Origin, request: OutboundRequest) -> Result<LoadOutcome> {
        let admission = self.observe(origin, request)?;
        self.await_outcome(admission.id).await
    }

    /// Wait for `id` to reach a terminal state
    pub async fn await_outcome(&self, id: RecordId) -> Result<LoadOutcome> {
        let record = match self.store.settlement(id)? {
            Settlement::Settled(record) => record,
            Settlement::Pending(rx) => rx.await.map_err(|_| {
                debug!("{} left the store before settling", id);
                EngineError::RecordNotFound(id)
            })?,
        };

        LoadOutcome::from_record(&record).ok_or_else(|| {
            EngineError::InterceptionFailed(format!("{} settled without an outcome", id))
        })
    }

    pub fn edit(&self, id: RecordId, edit: &RequestEdit) -> Result<Arc<RequestRecord>> {
        self.controller.edit(id, edit)
    }

    pub fn forward(&self, id: RecordId) -> Result<Arc<RequestRecord>> {
        self.controller.forward(id)
    }

    pub fn drop_request(&self, id: RecordId) -> Result<Arc<RequestRecord>> {
        self.controller.drop_request(id)
    }

    /// Abort a forwarded request that has not finished yet
    pub fn cancel(&self, id: RecordId) -> Result<()> {
        self.dispatcher.cancel(id)
    }

    pub fn replay(&self, id: RecordId, overrides: Option<&RequestEdit>) -> Result<Admission> {
        self.replay.replay(id, overrides)
    }

    /// Drop held requests and cancel in-flight ones belonging to `tab`
    pub fn close_tab(&self, tab: u64) -> TabClosure {
        let closure = TabClosure {
            dropped: self.controller.drop_tab(tab),
            cancelled: self.dispatcher.cancel_tab(tab),
        };
        info!(
            "Tab {} closed: {} held dropped, {} in flight cancelled",
            tab, closure.dropped, closure.cancelled
        );
        closure
    }

    pub fn snapshot(&self) -> Vec<Arc<RequestRecord>> {
        self.store.snapshot()
    }

    pub fn get(&self, id: RecordId) -> Option<Arc<RequestRecord>> {
        self.store.get(id)
    }

    pub fn query(&self, query: &RecordQuery) -> Vec<Arc<RequestRecord>> {
        self.store.query(query)
    }

    pub fn subscribe(&self) -> EventStream {
        self.bus.subscribe()
    }

    /// Staging copy of a held request
    pub fn staged(&self, id: RecordId) -> Option<OutboundRequest> {
        self.controller.staged(id)
    }

    pub fn set_mode(&self, mode: InterceptMode) {
        self.gate.set_mode(mode);
    }

    pub fn set_blocking(&self, enabled: bool) {
        self.gate.set_blocking(enabled);
    }

    pub fn set_filter(&self, filter: Option<Arc<dyn DomainFilter>>) {
        self.gate.set_filter(filter);
    }

    pub fn policy(&self) -> Arc<GatePolicy> {
        self.gate.policy()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            store: self.store.stats(),
            bus: self.bus.stats(),
            held: self.controller.held_count(),
            in_flight: self.dispatcher.in_flight_count(),
        }
    }

    pub fn store(&self) -> &Arc<RequestStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Script, ScriptedNetwork};
    use crate::utils::config::ModeSetting;

    fn engine(network: ScriptedNetwork, mode: ModeSetting) -> Engine {
        let mut config = EngineConfig::default();
        config.interception.mode = mode;
        Engine::new(config, Arc::new(network)).unwrap()
    }

    #[tokio::test]
    async fn test_load_completes() {
        let network = ScriptedNetwork::with_fallback(Script::Respond(
            HttpResponse::new(200).with_body("ok"),
        ));
        let engine = engine(network, ModeSetting::Off);

        let outcome = engine
            .load(Origin::tab(1), OutboundRequest::get("http://example.test/"))
            .await
            .unwrap();

        match outcome {
            LoadOutcome::Loaded(response) => assert_eq!(&response.body[..], b"ok"),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_blocked_load_fails_fast() {
        let engine = engine(ScriptedNetwork::new(), ModeSetting::All);
        let filter: Arc<dyn DomainFilter> = Arc::new(|d: &str| d == "ads.test");
        engine.set_filter(Some(filter));
        engine.set_blocking(true);

        let outcome = engine
            .load(Origin::tab(1), OutboundRequest::get("http://ads.test/x.js"))
            .await
            .unwrap();
        assert_eq!(outcome, LoadOutcome::Blocked);
    }

    #[tokio::test]
    async fn test_held_drop_reports_failed_load() {
        let engine = Arc::new(engine(ScriptedNetwork::new(), ModeSetting::All));

        let admission = engine
            .observe(Origin::tab(1), OutboundRequest::get("http://example.test/"))
            .unwrap();
        let waiter = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.await_outcome(admission.id).await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        engine.drop_request(admission.id).unwrap();

        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(outcome, LoadOutcome::Dropped(DropReason::User));
    }

    #[tokio::test]
    async fn test_close_tab() {
        let network = ScriptedNetwork::with_fallback(Script::Hang);
        let engine = engine(network, ModeSetting::Off);
        engine.set_mode(InterceptMode::matching("*/held").unwrap());

        let held = engine
            .observe(Origin::tab(7), OutboundRequest::get("http://example.test/held"))
            .unwrap();
        let sent = engine
            .observe(Origin::tab(7), OutboundRequest::get("http://example.test/sent"))
            .unwrap();

        let closure = engine.close_tab(7);
        assert_eq!(
            closure,
            TabClosure {
                dropped: 1,
                cancelled: 1
            }
        );

        assert_eq!(
            engine.await_outcome(held.id).await.unwrap(),
            LoadOutcome::Dropped(DropReason::TabClosed)
        );
        assert_eq!(
            engine.await_outcome(sent.id).await.unwrap(),
            LoadOutcome::Failed(FailureReason::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_unknown_record_outcome() {
        let engine = engine(ScriptedNetwork::new(), ModeSetting::Off);
        let err = engine.await_outcome(RecordId::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::RecordNotFound(_)));
    }

    #[tokio::test]
    async fn test_load_survives_full_store() {
        let network = ScriptedNetwork::new()
            .route(
                "http://slow.test/",
                Script::Delay(
                    std::time::Duration::from_millis(100),
                    HttpResponse::new(200).with_body("slow"),
                ),
            )
            .route("http://fast.test/", Script::Respond(HttpResponse::new(204)));
        let mut config = EngineConfig::default();
        config.interception.mode = ModeSetting::Off;
        config.store.capacity = 1;
        config.store.evict_batch = 1;
        let engine = Arc::new(Engine::new(config, Arc::new(network)).unwrap());

        let slow = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .load(Origin::tab(1), OutboundRequest::get("http://slow.test/a"))
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let fast = engine
            .load(Origin::tab(1), OutboundRequest::get("http://fast.test/b"))
            .await
            .unwrap();
        assert!(matches!(fast, LoadOutcome::Loaded(ref r) if r.status == 204));

        match slow.await.unwrap().unwrap() {
            LoadOutcome::Loaded(response) => assert_eq!(response.status, 200),
            other => panic!("slow load ended as {:?}", other),
        }
    }
}
