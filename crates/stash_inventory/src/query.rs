//! Lazy iteration and filtered queries over entries
//!
//! Iterators walk the entry slice directly and never allocate. [`StorageFilter`] builds
//! on [`PredicateTuple`], so every builder call returns a new filter and
//! [`invert`](PredicateTuple::invert) negates the whole filter.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use stash_core::{Address, EntryKey, ItemRef};
use stash_structures::PredicateTuple;

use crate::entry::Entry;

/// Filter over entries
pub type StorageFilter = PredicateTuple<Entry>;

/// Entry filters as builder methods
pub trait FilterBuilder: Sized {
    /// Only the entry with this key
    fn by_key(&self, key: EntryKey) -> Self;

    /// Only entries whose key is in `keys`
    fn by_key_set(&self, keys: impl IntoIterator<Item = EntryKey>) -> Self;

    /// Only entries holding a mutable item
    fn mutable_only(&self) -> Self;

    /// Only entries holding an immutable item
    fn immutable_only(&self) -> Self;

    /// Only entries whose item has this id
    fn by_item_id(&self, id: impl Into<String>) -> Self;

    /// Only entries holding at least `amount` copies
    fn by_min_amount(&self, amount: i32) -> Self;

    /// Any custom test
    fn by_predicate<F>(&self, predicate: F) -> Self
    where
        F: Fn(&Entry) -> bool + Send + Sync + 'static;
}

impl FilterBuilder for StorageFilter {
    fn by_key(&self, key: EntryKey) -> Self {
        self.by(move |entry: &Entry| entry.key() == key)
    }

    fn by_key_set(&self, keys: impl IntoIterator<Item = EntryKey>) -> Self {
        let keys: BTreeSet<EntryKey> = keys.into_iter().collect();
        self.by(move |entry: &Entry| keys.contains(&entry.key()))
    }

    fn mutable_only(&self) -> Self {
        self.by(|entry: &Entry| entry.item().can_mutate())
    }

    fn immutable_only(&self) -> Self {
        self.by(|entry: &Entry| !entry.item().can_mutate())
    }

    fn by_item_id(&self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.by(move |entry: &Entry| entry.item().id == id)
    }

    fn by_min_amount(&self, amount: i32) -> Self {
        self.by(move |entry: &Entry| entry.stack_sum() >= amount)
    }

    fn by_predicate<F>(&self, predicate: F) -> Self
    where
        F: Fn(&Entry) -> bool + Send + Sync + 'static,
    {
        self.by(predicate)
    }
}

/// Number of entries passing `filter`
pub fn count(entries: &[Entry], filter: &StorageFilter) -> usize {
    entries.iter().filter(|entry| filter.test_all(entry)).count()
}

/// Keys of entries passing `filter`, in key order
pub fn emit(entries: &[Entry], filter: &StorageFilter) -> Vec<EntryKey> {
    entries
        .iter()
        .filter(|entry| filter.test_all(entry))
        .map(Entry::key)
        .collect()
}

/// First key passing `filter`
pub fn first(entries: &[Entry], filter: &StorageFilter) -> Option<EntryKey> {
    entries.iter().find(|entry| filter.test_all(entry)).map(Entry::key)
}

/// Custom entry ordering
pub type EntryComparator = Arc<dyn Fn(&Entry, &Entry) -> Ordering + Send + Sync>;

/// How query results are ordered
#[derive(Clone, Default)]
pub enum StorageSort {
    #[default]
    ByKey,
    ByAmount,
    Custom(EntryComparator),
}

impl StorageSort {
    /// Order by a custom comparator
    pub fn custom<F>(compare: F) -> Self
    where
        F: Fn(&Entry, &Entry) -> Ordering + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(compare))
    }

    fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
        match self {
            Self::ByKey => a.key().cmp(&b.key()),
            Self::ByAmount => a.stack_sum().cmp(&b.stack_sum()).then_with(|| a.key().cmp(&b.key())),
            Self::Custom(compare) => compare(a, b),
        }
    }
}

impl std::fmt::Debug for StorageSort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ByKey => write!(f, "ByKey"),
            Self::ByAmount => write!(f, "ByAmount"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// A filter plus an ordering
#[derive(Debug, Clone, Default)]
pub struct StorageQuery {
    pub filter: StorageFilter,
    pub sort: StorageSort,
    pub invert_sort: bool,
}

impl StorageQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: StorageFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_sort(mut self, sort: StorageSort) -> Self {
        self.sort = sort;
        self
    }

    /// Reverse the ordering
    pub fn inverted(mut self) -> Self {
        self.invert_sort = !self.invert_sort;
        self
    }

    /// Keys of matching entries in query order
    pub fn run(&self, entries: &[Entry]) -> Vec<EntryKey> {
        let mut matched: Vec<&Entry> = entries.iter().filter(|entry| self.filter.test_all(entry)).collect();

        matched.sort_by(|a, b| {
            let order = self.sort.compare(a, b);
            if self.invert_sort {
                order.reverse()
            } else {
                order
            }
        });

        matched.into_iter().map(Entry::key).collect()
    }
}

/// Position of an address cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    AtEntry { entry_index: usize, stack_offset: usize },
    Ended,
}

/// Forward-only walk over every address of a run of entries
#[derive(Debug, Clone)]
pub struct AddressIter<'a> {
    entries: &'a [Entry],
    state: CursorState,
}

impl<'a> AddressIter<'a> {
    pub fn new(entries: &'a [Entry]) -> Self {
        let state = Self::settle(entries, 0);
        Self { entries, state }
    }

    /// Current position
    pub fn state(&self) -> CursorState {
        self.state
    }

    /// First position at or after `entry_index` that has a stack
    fn settle(entries: &[Entry], entry_index: usize) -> CursorState {
        entries[entry_index.min(entries.len())..]
            .iter()
            .position(|entry| !entry.is_empty())
            .map_or(CursorState::Ended, |skip| CursorState::AtEntry {
                entry_index: entry_index + skip,
                stack_offset: 0,
            })
    }
}

impl<'a> Iterator for AddressIter<'a> {
    type Item = Address;

    fn next(&mut self) -> Option<Address> {
        let CursorState::AtEntry { entry_index, stack_offset } = self.state else {
            return None;
        };

        let entry = &self.entries[entry_index];
        let address = entry.address_of(entry.stacks()[stack_offset].key);

        self.state = if stack_offset + 1 < entry.stack_count() {
            CursorState::AtEntry {
                entry_index,
                stack_offset: stack_offset + 1,
            }
        } else {
            Self::settle(self.entries, entry_index + 1)
        };

        Some(address)
    }
}

/// Items of a run of entries. With `mutable_only`, entries holding immutable items are skipped.
#[derive(Debug, Clone)]
pub struct ItemIter<'a> {
    entries: std::slice::Iter<'a, Entry>,
    mutable_only: bool,
}

impl<'a> ItemIter<'a> {
    pub fn new(entries: &'a [Entry], mutable_only: bool) -> Self {
        Self {
            entries: entries.iter(),
            mutable_only,
        }
    }
}

impl<'a> Iterator for ItemIter<'a> {
    type Item = &'a ItemRef;

    fn next(&mut self) -> Option<&'a ItemRef> {
        let mutable_only = self.mutable_only;
        self.entries
            .by_ref()
            .find(|entry| !mutable_only || entry.item().can_mutate())
            .map(Entry::item)
    }
}
