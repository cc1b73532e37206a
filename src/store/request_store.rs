// src/store/request_store.rs
//! Ordered, concurrently readable request history
//!
//! Records live behind `Arc` and are replaced whole on every change, so a
//! reader holding a snapshot never sees a half-applied update. All writes go
//! through one short critical section that also assigns sequences, checks
//! lifecycle transitions and publishes the matching event; this keeps event
//! order identical to store order for every subscriber.

use crate::events::{EventBus, EventKind, RecordEvent};
use crate::observability::metric_names;
use crate::record::{
    DropReason, FailureReason, HttpResponse, Origin, OutboundRequest, RecordId, RequestRecord,
    RequestState, ResponseOutcome, ResponseRecord, Timing,
};
use crate::utils::config::StoreConfig;
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Everything needed to create a record; identity is assigned by the store
#[derive(Debug, Clone)]
pub struct RecordDraft {
    pub origin: Origin,
    pub request: OutboundRequest,
    pub replay_of: Option<RecordId>,
}

impl RecordDraft {
    pub fn new(origin: Origin, request: OutboundRequest) -> Self {
        Self {
            origin,
            request,
            replay_of: None,
        }
    }

    pub fn replay_of(mut self, source: RecordId) -> Self {
        self.replay_of = Some(source);
        self
    }
}

/// A single lifecycle change applied through [`RequestStore::update`]
#[derive(Debug, Clone)]
pub enum RecordPatch {
    /// Park for a manual decision
    Hold,
    /// Replace the staging copy of a held record
    Restage(OutboundRequest),
    /// Freeze the outbound shape and hand it to the network
    Forward {
        request: OutboundRequest,
        at: DateTime<Utc>,
    },
    Drop(DropReason),
    Complete {
        timing: Timing,
        response: HttpResponse,
    },
    Fail {
        timing: Timing,
        reason: FailureReason,
    },
}

impl RecordPatch {
    fn target_state(&self, current: RequestState) -> RequestState {
        match self {
            RecordPatch::Hold => RequestState::Held,
            RecordPatch::Restage(_) => current,
            RecordPatch::Forward { .. } => RequestState::Forwarded,
            RecordPatch::Drop(_) => RequestState::Dropped,
            RecordPatch::Complete { .. } => RequestState::Completed,
            RecordPatch::Fail { .. } => RequestState::Failed,
        }
    }

    /// Apply to `record`, refusing anything that is not a forward step
    fn apply(self, record: &mut RequestRecord) -> Result<()> {
        let from = record.state;
        let to = self.target_state(from);

        if let RecordPatch::Restage(_) = &self {
            if from != RequestState::Held {
                return Err(EngineError::NotHeld(record.id));
            }
        } else if !from.can_advance_to(to) {
            return Err(EngineError::InvalidTransition {
                id: record.id,
                from,
                to,
            });
        }

        match self {
            RecordPatch::Hold => {}
            RecordPatch::Restage(request) => record.outbound = request,
            RecordPatch::Forward { request, at } => {
                record.outbound = request;
                record.forwarded_at = Some(at);
            }
            RecordPatch::Drop(reason) => record.drop_reason = Some(reason),
            RecordPatch::Complete { timing, response } => {
                record.response = Some(ResponseRecord {
                    timing,
                    outcome: ResponseOutcome::Received(response),
                });
            }
            RecordPatch::Fail { timing, reason } => {
                record.response = Some(ResponseRecord {
                    timing,
                    outcome: ResponseOutcome::Failed(reason),
                });
            }
        }
        record.state = to;
        Ok(())
    }
}

/// Filter for [`RequestStore::query`]
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub state: Option<RequestState>,
    pub tab: Option<u64>,
    pub url_contains: Option<String>,
    /// Only records with a sequence strictly greater than this
    pub after_sequence: Option<u64>,
    pub limit: Option<usize>,
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(mut self, state: RequestState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn tab(mut self, tab: u64) -> Self {
        self.tab = Some(tab);
        self
    }

    pub fn url_contains(mut self, needle: impl Into<String>) -> Self {
        self.url_contains = Some(needle.into());
        self
    }

    pub fn after_sequence(mut self, sequence: u64) -> Self {
        self.after_sequence = Some(sequence);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, record: &RequestRecord) -> bool {
        self.state.map_or(true, |s| record.state == s)
            && self.tab.map_or(true, |t| record.origin.tab == t)
            && self
                .url_contains
                .as_deref()
                .map_or(true, |needle| record.url().contains(needle))
    }
}

/// Where a record stands for someone waiting on its outcome
#[derive(Debug)]
pub enum Settlement {
    /// Already terminal
    Settled(Arc<RequestRecord>),
    /// Resolves with the terminal record; closed if the record is evicted
    Pending(oneshot::Receiver<Arc<RequestRecord>>),
}

#[derive(Default)]
struct StoreInner {
    last_sequence: u64,
    by_sequence: BTreeMap<u64, Arc<RequestRecord>>,
    index: HashMap<RecordId, u64>,
    waiters: HashMap<RecordId, Vec<oneshot::Sender<Arc<RequestRecord>>>>,
    evicted: u64,
}

/// Request history
pub struct RequestStore {
    config: StoreConfig,
    inner: RwLock<StoreInner>,
    bus: Arc<EventBus>,
}

impl RequestStore {
    pub fn new(config: StoreConfig, bus: Arc<EventBus>) -> Self {
        Self {
            config,
            inner: RwLock::new(StoreInner::default()),
            bus,
        }
    }

    /// Create a `Pending` record with a fresh id and the next sequence
    pub fn append(&self, draft: RecordDraft) -> Arc<RequestRecord> {
        let mut inner = self.inner.write();

        inner.last_sequence += 1;
        let sequence = inner.last_sequence;
        let record = Arc::new(RequestRecord {
            id: RecordId::new(),
            sequence,
            origin: draft.origin,
            replay_of: draft.replay_of,
            observed_at: Utc::now(),
            original: draft.request.clone(),
            outbound: draft.request,
            state: RequestState::Pending,
            drop_reason: None,
            forwarded_at: None,
            response: None,
        });

        inner.index.insert(record.id, sequence);
        inner.by_sequence.insert(sequence, Arc::clone(&record));
        self.bus
            .publish(RecordEvent::new(EventKind::Created, Arc::clone(&record)));

        if inner.by_sequence.len() > self.config.capacity {
            self.evict_locked(&mut inner);
        }

        metrics::gauge!(metric_names::STORE_RECORDS).set(inner.by_sequence.len() as f64);
        debug!("Appended {} (seq {})", record.id, sequence);

        record
    }

    /// Apply one lifecycle change, replacing the record atomically
    pub fn update(&self, id: RecordId, patch: RecordPatch) -> Result<Arc<RequestRecord>> {
        let mut inner = self.inner.write();

        let sequence = *inner
            .index
            .get(&id)
            .ok_or(EngineError::RecordNotFound(id))?;
        let current = inner
            .by_sequence
            .get(&sequence)
            .ok_or(EngineError::RecordNotFound(id))?;

        let mut next = RequestRecord::clone(current);
        patch.apply(&mut next)?;
        let next = Arc::new(next);

        inner.by_sequence.insert(sequence, Arc::clone(&next));
        self.bus
            .publish(RecordEvent::new(EventKind::Updated, Arc::clone(&next)));

        if next.state.is_terminal() {
            for waiter in inner.waiters.remove(&id).unwrap_or_default() {
                let _ = waiter.send(Arc::clone(&next));
            }
        }

        Ok(next)
    }

    /// The terminal record for `id`, or a receiver for it.
    ///
    /// Checked and registered under the write lock, so a transition can't
    /// land between the two.
    pub fn settlement(&self, id: RecordId) -> Result<Settlement> {
        let mut inner = self.inner.write();

        let record = inner
            .index
            .get(&id)
            .and_then(|sequence| inner.by_sequence.get(sequence))
            .cloned()
            .ok_or(EngineError::RecordNotFound(id))?;

        if record.state.is_terminal() {
            return Ok(Settlement::Settled(record));
        }

        let (tx, rx) = oneshot::channel();
        inner.waiters.entry(id).or_default().push(tx);
        Ok(Settlement::Pending(rx))
    }

    pub fn get(&self, id: RecordId) -> Option<Arc<RequestRecord>> {
        let inner = self.inner.read();
        inner
            .index
            .get(&id)
            .and_then(|sequence| inner.by_sequence.get(sequence))
            .cloned()
    }

    /// Point-in-time view of the whole history, ordered by sequence
    pub fn snapshot(&self) -> Vec<Arc<RequestRecord>> {
        self.inner.read().by_sequence.values().cloned().collect()
    }

    /// Filtered point-in-time view, ordered by sequence
    pub fn query(&self, query: &RecordQuery) -> Vec<Arc<RequestRecord>> {
        let inner = self.inner.read();
        let start = query.after_sequence.map_or(0, |s| s.saturating_add(1));
        inner
            .by_sequence
            .range(start..)
            .map(|(_, record)| record)
            .filter(|record| query.matches(record))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.read();
        let mut stats = StoreStats {
            records: inner.by_sequence.len(),
            capacity: self.config.capacity,
            last_sequence: inner.last_sequence,
            evicted: inner.evicted,
            ..Default::default()
        };
        for record in inner.by_sequence.values() {
            match record.state {
                RequestState::Pending => stats.pending += 1,
                RequestState::Held => stats.held += 1,
                RequestState::Forwarded => stats.forwarded += 1,
                RequestState::Dropped => stats.dropped += 1,
                RequestState::Completed => stats.completed += 1,
                RequestState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Evict a batch of the oldest records that may be evicted.
    ///
    /// Only terminal records go. Pending, held and forwarded records still
    /// have an outcome coming, so the store stays over capacity until they
    /// settle.
    fn evict_locked(&self, inner: &mut StoreInner) {
        let overflow = inner.by_sequence.len() - self.config.capacity;
        let wanted = overflow.max(self.config.evict_batch.min(self.config.capacity));

        let victims: Vec<u64> = inner
            .by_sequence
            .iter()
            .filter(|(_, record)| is_evictable(record.state))
            .map(|(sequence, _)| *sequence)
            .take(wanted)
            .collect();

        if victims.len() < overflow {
            warn!(
                "Store over capacity by {}, only {} records evictable",
                overflow,
                victims.len()
            );
        }

        let evicted = victims.len();
        for sequence in victims {
            if let Some(record) = inner.by_sequence.remove(&sequence) {
                inner.index.remove(&record.id);
                inner.waiters.remove(&record.id);
                inner.evicted += 1;
                self.bus
                    .publish(RecordEvent::new(EventKind::Evicted, record));
            }
        }

        metrics::counter!(metric_names::STORE_EVICTIONS).increment(evicted as u64);
        debug!("Evicted records, {} remain", inner.by_sequence.len());
    }
}

fn is_evictable(state: RequestState) -> bool {
    state.is_terminal()
}

/// Store statistics
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub records: usize,
    pub capacity: usize,
    pub last_sequence: u64,
    pub evicted: u64,
    pub pending: usize,
    pub held: usize,
    pub forwarded: usize,
    pub dropped: usize,
    pub completed: usize,
    pub failed: usize,
}
