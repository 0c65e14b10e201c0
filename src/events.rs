//! Bounded, insertion-ordered cache of recent poll events.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

/// A recorded poll outcome.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Opaque unique token
    pub token: String,
    /// Arbitrary event payload
    pub payload: serde_json::Value,
    /// Unix millis of insertion
    pub inserted_at: i64,
}

/// FIFO cache of the most recent `cache_max` events.
///
/// A queue of tokens carries the insertion order; the map carries the
/// events. Both are popped together on eviction, so `len() <= cache_max`
/// always holds.
pub struct EventCache {
    cache_max: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    order: VecDeque<String>,
    events: HashMap<String, Event>,
}

/// Shared handle to the event cache.
pub type SharedEvents = Arc<EventCache>;

impl EventCache {
    pub fn new(cache_max: usize) -> Self {
        assert!(cache_max > 0, "cache_max must be positive");
        Self {
            cache_max,
            inner: Mutex::new(Inner {
                order: VecDeque::with_capacity(cache_max),
                events: HashMap::with_capacity(cache_max),
            }),
        }
    }

    /// Insert an event, evicting the oldest one first when at capacity.
    /// Returns the new event's token.
    pub fn push(&self, payload: serde_json::Value, timestamp: i64) -> String {
        let token = Uuid::new_v4().to_string();
        let event = Event {
            token: token.clone(),
            payload,
            inserted_at: timestamp,
        };

        let mut inner = self.inner.lock();
        if inner.order.len() == self.cache_max {
            if let Some(oldest) = inner.order.pop_front() {
                inner.events.remove(&oldest);
            }
        }
        inner.order.push_back(token.clone());
        inner.events.insert(token.clone(), event);
        token
    }

    /// Snapshot of all cached events, oldest first.
    pub fn list(&self) -> Vec<Event> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|token| inner.events.get(token).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
