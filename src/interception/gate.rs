// src/interception/gate.rs
//! Single admission point for observed requests
//!
//! ```text
//! observe ──► append(Pending) ──► policy snapshot
//!                                     │
//!              blocked domain? ───────┼──► Dropped(BlockedByFilter)
//!              mode holds it? ────────┼──► TamperController::park
//!              otherwise ─────────────┴──► Dispatcher::dispatch
//! ```
//!
//! The policy is swapped whole behind an `Arc`, and each admission reads it
//! once, so a mode or blocklist change never half-applies to a request.

use crate::interception::blocklist::{Blocklist, DomainFilter};
use crate::interception::dispatch::Dispatcher;
use crate::interception::mode::InterceptMode;
use crate::observability::metric_names;
use crate::record::{DropReason, OutboundRequest, RecordId};
use crate::store::{RecordDraft, RecordPatch, RequestStore};
use crate::tamper::TamperController;
use crate::utils::config::InterceptionConfig;
use crate::utils::errors::Result;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Interception settings read atomically at admission
#[derive(Clone, Default)]
pub struct GatePolicy {
    pub mode: InterceptMode,
    pub blocking_enabled: bool,
    pub filter: Option<Arc<dyn DomainFilter>>,
}

impl GatePolicy {
    pub fn from_config(config: &InterceptionConfig) -> Result<Self> {
        let filter = match &config.blocklist_path {
            Some(path) => Some(Arc::new(Blocklist::load(path)?) as Arc<dyn DomainFilter>),
            None => None,
        };

        Ok(Self {
            mode: InterceptMode::from_config(config)?,
            blocking_enabled: config.blocking_enabled,
            filter,
        })
    }

    fn is_blocked(&self, request: &OutboundRequest) -> bool {
        if !self.blocking_enabled {
            return false;
        }
        match (&self.filter, request.host()) {
            (Some(filter), Some(host)) => filter.is_blocked(&host),
            _ => false,
        }
    }
}

impl fmt::Debug for GatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatePolicy")
            .field("mode", &self.mode)
            .field("blocking_enabled", &self.blocking_enabled)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

/// What the gate did with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Forwarded immediately
    Pass,
    /// Parked for a manual decision
    Hold,
    /// Short-circuited by the domain filter; the load fails
    Block,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Pass => "pass",
            Decision::Hold => "hold",
            Decision::Block => "block",
        }
    }
}

/// Result of [`InterceptionGate::admit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub id: RecordId,
    pub sequence: u64,
    pub decision: Decision,
}

pub struct InterceptionGate {
    policy: RwLock<Arc<GatePolicy>>,
    store: Arc<RequestStore>,
    controller: Arc<TamperController>,
    dispatcher: Arc<Dispatcher>,
}

impl InterceptionGate {
    pub fn new(
        policy: GatePolicy,
        store: Arc<RequestStore>,
        controller: Arc<TamperController>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        info!(
            "Interception gate ready (mode: {}, blocking: {})",
            policy.mode.name(),
            policy.blocking_enabled
        );
        Self {
            policy: RwLock::new(Arc::new(policy)),
            store,
            controller,
            dispatcher,
        }
    }

    /// Record the request and route it; always creates exactly one record
    pub fn admit(&self, draft: RecordDraft) -> Result<Admission> {
        let policy = self.policy();
        let tab = draft.origin.tab;
        let request = draft.request.clone();

        let record = self.store.append(draft);
        let id = record.id;

        let decision = if policy.is_blocked(&request) {
            self.store
                .update(id, RecordPatch::Drop(DropReason::BlockedByFilter))?;
            info!("Blocked {} {}", request.method, request.url);
            Decision::Block
        } else if policy.mode.should_hold(&request) {
            self.controller.park(id, tab, request)?;
            Decision::Hold
        } else {
            self.dispatcher.dispatch(id, request)?;
            Decision::Pass
        };

        metrics::counter!(metric_names::REQUESTS_OBSERVED, "decision" => decision.as_str())
            .increment(1);
        debug!("Admitted {} (seq {}): {:?}", id, record.sequence, decision);

        Ok(Admission {
            id,
            sequence: record.sequence,
            decision,
        })
    }

    /// Current policy snapshot
    pub fn policy(&self) -> Arc<GatePolicy> {
        Arc::clone(&self.policy.read())
    }

    pub fn set_policy(&self, policy: GatePolicy) {
        info!(
            "Interception policy replaced (mode: {}, blocking: {})",
            policy.mode.name(),
            policy.blocking_enabled
        );
        *self.policy.write() = Arc::new(policy);
    }

    pub fn set_mode(&self, mode: InterceptMode) {
        self.modify(|policy| policy.mode = mode);
    }

    pub fn set_blocking(&self, enabled: bool) {
        self.modify(|policy| policy.blocking_enabled = enabled);
    }

    pub fn set_filter(&self, filter: Option<Arc<dyn DomainFilter>>) {
        self.modify(|policy| policy.filter = filter);
    }

    fn modify(&self, change: impl FnOnce(&mut GatePolicy)) {
        let mut current = self.policy.write();
        let mut next = GatePolicy::clone(&current);
        change(&mut next);
        debug!("Interception policy updated: {:?}", next);
        *current = Arc::new(next);
    }
}
