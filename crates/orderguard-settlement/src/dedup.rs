//! Consumer-side event de-duplication.
//!
//! Settlement events are delivered at-least-once. A consumer that must apply
//! each transition exactly once keeps an [`EventDeduplicator`] and drops any
//! event whose [`EventId`] it has already seen.
//!
//! The set is bounded: once `max_size` ids are tracked the oldest is evicted,
//! so memory stays predictable in long-running consumers.

use std::collections::{HashSet, VecDeque};

use orderguard_types::{EventId, OrderguardError, Result};

pub struct EventDeduplicator {
    seen: HashSet<EventId>,
    /// Insertion order for eviction (front = oldest).
    order: VecDeque<EventId>,
    max_size: usize,
}

impl EventDeduplicator {
    /// Create a deduplicator tracking at most `max_size` ids.
    pub fn new(max_size: usize) -> Result<Self> {
        if max_size == 0 {
            return Err(OrderguardError::Configuration(
                "dedup cache size must be > 0".to_string(),
            ));
        }
        Ok(Self {
            seen: HashSet::with_capacity(max_size.min(4096)),
            order: VecDeque::with_capacity(max_size.min(4096)),
            max_size,
        })
    }

    /// Record `event_id`. Returns `true` the first time an id is observed
    /// and `false` for a redelivery.
    pub fn observe(&mut self, event_id: EventId) -> bool {
        if self.seen.contains(&event_id) {
            return false;
        }

        if self.seen.len() >= self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }

        self.seen.insert(event_id);
        self.order.push_back(event_id);
        true
    }

    #[must_use]
    pub fn is_duplicate(&self, event_id: &EventId) -> bool {
        self.seen.contains(event_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
