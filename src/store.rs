//! Event store contract and in-memory reference implementation
//!
//! The store is a durable FIFO queue of pending events keyed by a
//! monotonically increasing id. The [`Emitter`](crate::Emitter) is the
//! queue's single consumer: it reads pages of the oldest events, sends
//! them, and removes the ids whose delivery resolved. Ids that fail
//! retriably stay queued for a later attempt.
//!
//! [`InMemoryEventStore`] is the reference implementation. Embedders that
//! need persistence across process restarts implement [`EventStore`] over
//! their own storage (SQLite, files, etc.) - the pipeline only relies on
//! the contract below.

use crate::payload::Payload;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// A stored event handed to the emitter: the store-assigned id plus the
/// payload to deliver
#[derive(Debug, Clone)]
pub struct EmittableEvent {
    /// Store-assigned id, monotonically increasing in insertion order
    pub id: u64,
    /// The event payload
    pub payload: Payload,
}

/// Durable queue of pending event payloads awaiting delivery
///
/// Implementations only need to support one concurrent consumer (the
/// emission loop) plus producers appending; the pipeline funnels all other
/// mutation through that single consumer.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append one event, assigning it the next id
    async fn add(&self, payload: Payload) -> u64;

    /// Read up to `limit` of the oldest not-yet-removed events, in
    /// insertion order
    async fn emittable_events(&self, limit: usize) -> Vec<EmittableEvent>;

    /// Remove the given ids; returns how many were actually removed
    async fn remove_events(&self, ids: &[u64]) -> usize;

    /// Number of events currently queued
    async fn size(&self) -> usize;
}

struct QueueState {
    events: VecDeque<EmittableEvent>,
    next_id: u64,
}

/// In-memory FIFO event store
///
/// When constructed with a capacity, the oldest events are evicted to make
/// room for new ones; evictions are counted and logged.
pub struct InMemoryEventStore {
    state: Mutex<QueueState>,
    capacity: Option<usize>,
    added: AtomicU64,
    evicted: AtomicU64,
    removed: AtomicU64,
}

impl InMemoryEventStore {
    /// Create an unbounded in-memory store
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::new(),
                next_id: 1,
            }),
            capacity: None,
            added: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            removed: AtomicU64::new(0),
        }
    }

    /// Create a store that holds at most `capacity` events, evicting the
    /// oldest when full
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::with_capacity(capacity.min(1024)),
                next_id: 1,
            }),
            capacity: Some(capacity),
            added: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            removed: AtomicU64::new(0),
        }
    }

    /// Total events ever appended
    pub fn total_added(&self) -> u64 {
        self.added.load(Ordering::Relaxed)
    }

    /// Total events evicted due to the capacity bound
    pub fn total_evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Total events removed after their delivery resolved
    pub fn total_removed(&self) -> u64 {
        self.removed.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn add(&self, payload: Payload) -> u64 {
        let mut state = self.state.lock();
        if let Some(capacity) = self.capacity {
            if state.events.len() >= capacity {
                state.events.pop_front();
                self.evicted.fetch_add(1, Ordering::Relaxed);
                warn!(capacity, "event store full, evicted oldest event");
            }
        }
        let id = state.next_id;
        state.next_id += 1;
        state.events.push_back(EmittableEvent { id, payload });
        self.added.fetch_add(1, Ordering::Relaxed);
        id
    }

    async fn emittable_events(&self, limit: usize) -> Vec<EmittableEvent> {
        let state = self.state.lock();
        state.events.iter().take(limit).cloned().collect()
    }

    async fn remove_events(&self, ids: &[u64]) -> usize {
        let to_remove: HashSet<u64> = ids.iter().copied().collect();
        let mut state = self.state.lock();
        let before = state.events.len();
        state.events.retain(|event| !to_remove.contains(&event.id));
        let removed = before - state.events.len();
        self.removed.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    async fn size(&self) -> usize {
        self.state.lock().events.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn make_payload(event_type: &str) -> Payload {
        let mut payload = Payload::new();
        payload.add("e", event_type);
        payload
    }

    #[tokio::test]
    async fn test_add_assigns_increasing_ids() {
        let store = InMemoryEventStore::new();

        let first = store.add(make_payload("pv")).await;
        let second = store.add(make_payload("se")).await;

        assert!(second > first);
        assert_eq!(store.size().await, 2);
    }

    #[tokio::test]
    async fn test_emittable_events_fifo_order() {
        let store = InMemoryEventStore::new();
        for i in 0..5 {
            store.add(make_payload(&format!("evt-{i}"))).await;
        }

        let events = store.emittable_events(3).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].payload.get("e").unwrap(), "evt-0");
        assert_eq!(events[2].payload.get("e").unwrap(), "evt-2");

        // Reading does not remove
        assert_eq!(store.size().await, 5);
    }

    #[tokio::test]
    async fn test_remove_events_by_id() {
        let store = InMemoryEventStore::new();
        let a = store.add(make_payload("a")).await;
        let b = store.add(make_payload("b")).await;
        let c = store.add(make_payload("c")).await;

        let removed = store.remove_events(&[a, c]).await;
        assert_eq!(removed, 2);
        assert_eq!(store.size().await, 1);

        let remaining = store.emittable_events(10).await;
        assert_eq!(remaining[0].id, b);
    }

    #[tokio::test]
    async fn test_remove_unknown_ids_is_noop() {
        let store = InMemoryEventStore::new();
        store.add(make_payload("a")).await;

        let removed = store.remove_events(&[999]).await;
        assert_eq!(removed, 0);
        assert_eq!(store.size().await, 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let store = InMemoryEventStore::with_capacity(3);
        for i in 0..5 {
            store.add(make_payload(&format!("evt-{i}"))).await;
        }

        assert_eq!(store.size().await, 3);
        assert_eq!(store.total_evicted(), 2);

        let events = store.emittable_events(10).await;
        assert_eq!(events[0].payload.get("e").unwrap(), "evt-2");
        assert_eq!(events[2].payload.get("e").unwrap(), "evt-4");
    }

    #[tokio::test]
    async fn test_counters() {
        let store = InMemoryEventStore::new();
        let a = store.add(make_payload("a")).await;
        store.add(make_payload("b")).await;
        store.remove_events(&[a]).await;

        assert_eq!(store.total_added(), 2);
        assert_eq!(store.total_removed(), 1);
        assert_eq!(store.total_evicted(), 0);
    }
}
