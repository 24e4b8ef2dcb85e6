//! Mutation signal source.
//!
//! The host application publishes content mutations here; the orchestrator
//! drains them in batches and purges the affected tags. Hosts with their own
//! dispatch mechanism (bus subscription, callbacks) can bypass the queue and
//! call [`crate::orchestrator::Invalidator::handle_mutation`] directly.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::lock::mutex_lock;
use crate::mapper::ElementMutation;

const SOURCE: &str = "scopa::events";

/// Monotonic epoch for ordering events within this process.
pub type Epoch = u64;

/// A queued content mutation with idempotency and ordering support.
#[derive(Debug, Clone)]
pub struct MutationEvent {
    /// Unique identifier for idempotency (UUIDv4).
    pub id: Uuid,
    /// Monotonic epoch; later epochs describe later mutations.
    pub epoch: Epoch,
    /// The mutation itself.
    pub mutation: ElementMutation,
    /// When the event was published.
    pub timestamp: OffsetDateTime,
}

impl MutationEvent {
    pub fn new(mutation: ElementMutation, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            mutation,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// In-memory FIFO queue of pending mutations.
///
/// A mutex is enough here: publishes come from write paths, drains from the
/// purge path, and contention is expected to be low.
pub struct EventQueue {
    queue: Mutex<VecDeque<MutationEvent>>,
    epoch_counter: AtomicU64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Publish a mutation to the queue.
    pub fn publish(&self, mutation: ElementMutation) {
        let event = MutationEvent::new(mutation, self.next_epoch());

        info!(
            event_id = %event.id,
            event_epoch = event.epoch,
            operation = ?event.mutation.operation,
            element_id = %event.mutation.element_id,
            "Mutation event enqueued"
        );

        mutex_lock(&self.queue, SOURCE, "publish").push_back(event);
    }

    /// Drain up to `limit` events in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<MutationEvent> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        queue.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        mutex_lock(&self.queue, SOURCE, "clear").clear();
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
