//! # stash_event - Change Feed
//!
//! Decouples a mutator from the observers that mirror its state:
//! - [`ChangeQueue`]: records pushed while mutating, drained later by a sync step
//! - [`ChangeFeed`]: priority-ordered callback subscribers plus channel receivers
//!
//! Records are delivered in the order they were pushed. A subscriber never sees a record for
//! an element before an earlier record for the same element.

use std::mem;

use crossbeam_channel::{Receiver, Sender};

/// Subscriber priority
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Subscriber ID
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub u64);

/// Callback receiving one published batch
pub type ChangeHandler<E> = Box<dyn Fn(&[E]) + Send + Sync>;

/// Records waiting for the next sync
#[derive(Debug, Clone)]
pub struct ChangeQueue<E> {
    pending: Vec<E>,
}

impl<E> ChangeQueue<E> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self { pending: Vec::new() }
    }

    /// Queue one record
    pub fn push(&mut self, record: E) {
        self.pending.push(record);
    }

    /// Take every pending record, oldest first
    pub fn drain(&mut self) -> Vec<E> {
        mem::take(&mut self.pending)
    }

    /// Pending records without draining
    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.pending.iter()
    }

    /// Drop every pending record
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Get pending count
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<E> Default for ChangeQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Extend<E> for ChangeQueue<E> {
    fn extend<I: IntoIterator<Item = E>>(&mut self, iter: I) {
        self.pending.extend(iter);
    }
}

/// Fan-out point for change records
pub struct ChangeFeed<E> {
    /// Callback subscribers, highest priority first
    handlers: Vec<(SubscriberId, Priority, ChangeHandler<E>)>,
    /// Channel receivers, fed after the callbacks
    channels: Vec<Sender<E>>,
    next_subscriber_id: u64,
    batches_published: u64,
}

impl<E: Clone + Send + 'static> ChangeFeed<E> {
    /// Create a feed with no observers
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            channels: Vec::new(),
            next_subscriber_id: 1,
            batches_published: 0,
        }
    }

    /// Subscribe a callback
    pub fn subscribe<F>(&mut self, handler: F) -> SubscriberId
    where
        F: Fn(&[E]) + Send + Sync + 'static,
    {
        self.subscribe_with_priority(handler, Priority::Normal)
    }

    /// Subscribe with priority. Equal priorities keep subscription order.
    pub fn subscribe_with_priority<F>(&mut self, handler: F, priority: Priority) -> SubscriberId
    where
        F: Fn(&[E]) + Send + Sync + 'static,
    {
        let id = SubscriberId(self.next_subscriber_id);
        self.next_subscriber_id += 1;

        self.handlers.push((id, priority, Box::new(handler)));
        self.handlers.sort_by(|a, b| b.1.cmp(&a.1));

        id
    }

    /// Unsubscribe. Returns false if the id was unknown.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(sub_id, _, _)| *sub_id != id);
        self.handlers.len() != before
    }

    /// Open an unbounded receiver. Dropping it detaches it from the feed.
    pub fn channel(&mut self) -> Receiver<E> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.channels.push(sender);
        receiver
    }

    /// Deliver one batch to every observer
    pub fn publish(&mut self, batch: &[E]) {
        if batch.is_empty() {
            return;
        }

        for (_, _, handler) in &self.handlers {
            handler(batch);
        }

        self.channels.retain(|sender| {
            for record in batch {
                if sender.send(record.clone()).is_err() {
                    log::debug!("Change receiver disconnected, detaching");
                    return false;
                }
            }
            true
        });

        self.batches_published += 1;
    }

    /// Drain `queue` and publish its records as one batch. Returns how many were delivered.
    pub fn process(&mut self, queue: &mut ChangeQueue<E>) -> usize {
        let batch = queue.drain();
        self.publish(&batch);
        batch.len()
    }

    /// Number of callback subscribers
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }

    /// Number of live channel receivers as of the last publish
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Check if anything is listening
    pub fn has_observers(&self) -> bool {
        !self.handlers.is_empty() || !self.channels.is_empty()
    }

    /// Non-empty batches delivered so far
    pub fn batches_published(&self) -> u64 {
        self.batches_published
    }
}

impl<E: Clone + Send + 'static> Default for ChangeFeed<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Prelude
pub mod prelude {
    pub use crate::{ChangeFeed, ChangeHandler, ChangeQueue, Priority, SubscriberId};
}
