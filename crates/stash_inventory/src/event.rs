//! Event records handed to extensions after a mutation

use stash_core::{tags, Address, EntryKey, InventoryTag, ItemRef};

/// What one mutation did to one entry
#[derive(Debug, Clone)]
pub struct EventData {
    /// Item of the touched entry
    pub item: ItemRef,
    /// Copies added, removed or moved
    pub amount: i32,
    /// Entry the event happened to
    pub entry_touched: EntryKey,
    /// Stacks the event changed
    pub addresses_touched: Vec<Address>,
}

impl EventData {
    pub fn new(item: ItemRef, amount: i32, entry_touched: EntryKey, addresses_touched: Vec<Address>) -> Self {
        Self {
            item,
            amount,
            entry_touched,
            addresses_touched,
        }
    }
}

/// A tagged, timestamped event
#[derive(Debug, Clone)]
pub struct EventLog {
    pub tag: InventoryTag,
    pub data: EventData,
    /// Monotonic per-storage counter
    pub timestamp: u64,
}

impl EventLog {
    pub fn new(tag: InventoryTag, data: EventData, timestamp: u64) -> Self {
        Self { tag, data, timestamp }
    }

    pub fn is_addition(&self) -> bool {
        self.tag == tags::ADDITION
    }

    pub fn is_removal(&self) -> bool {
        self.tag.matches_tag(&tags::REMOVAL_BASE)
    }
}

/// Several events sharing one tag, delivered together
#[derive(Debug, Clone)]
pub struct EventLogBatch {
    pub tag: InventoryTag,
    pub events: Vec<EventData>,
    pub timestamp: u64,
}

impl EventLogBatch {
    pub fn new(tag: InventoryTag, events: Vec<EventData>, timestamp: u64) -> Self {
        Self { tag, events, timestamp }
    }

    /// Wrap a single event
    pub fn single(log: EventLog) -> Self {
        Self {
            tag: log.tag,
            events: vec![log.data],
            timestamp: log.timestamp,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Each event as its own log, stamped with the batch time
    pub fn logs(&self) -> impl Iterator<Item = EventLog> + '_ {
        self.events
            .iter()
            .map(|data| EventLog::new(self.tag.clone(), data.clone(), self.timestamp))
    }
}
