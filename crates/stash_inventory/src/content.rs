//! Authoritative entry index and the mutation guard
//!
//! [`InventoryContent`] owns the sorted entry index, the entry key generator, and the queue
//! of pending change records. Entries are only reshaped through a [`MutationGuard`]; when it
//! is released it compares the entry against the state it was opened on and queues one
//! record per added, updated or removed stack.

use serde::{Deserialize, Serialize};

use stash_core::{Address, EntryKey, ItemRef, ItemStack, KeyGenerator, Result, StackKey, StorageError};
use stash_event::ChangeQueue;
use stash_structures::{IndexGuard, SortedIndex};

use crate::entry::{Entry, Stack};

/// What happened to an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
}

/// One record on the change feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageChange {
    pub kind: ChangeKind,
    pub address: Address,
}

impl StorageChange {
    pub const fn new(kind: ChangeKind, address: Address) -> Self {
        Self { kind, address }
    }
}

/// Sorted entries plus their key generator and pending changes
#[derive(Debug)]
pub struct InventoryContent {
    entries: SortedIndex<Entry>,
    keys: KeyGenerator<EntryKey>,
    changes: ChangeQueue<StorageChange>,
    track_write_lock: bool,
}

impl InventoryContent {
    /// Create empty content issuing keys after `key_baseline`
    pub fn new(key_baseline: i32, track_write_lock: bool) -> Self {
        Self {
            entries: SortedIndex::new(),
            keys: KeyGenerator::with_baseline(key_baseline),
            changes: ChangeQueue::new(),
            track_write_lock,
        }
    }

    pub fn entries(&self) -> &SortedIndex<Entry> {
        &self.entries
    }

    pub fn find(&self, key: EntryKey) -> Option<&Entry> {
        self.entries.find(key)
    }

    pub fn contains(&self, key: EntryKey) -> bool {
        self.entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest entry key issued so far
    pub fn key_position(&self) -> EntryKey {
        self.keys.position()
    }

    /// Create an entry for `item` and let `fill` place its first stacks. Returns the new key
    /// and whatever `fill` returned. If `fill` fails the entry is discarded.
    pub fn create_entry<R>(&mut self, item: ItemRef, fill: impl FnOnce(&mut Entry) -> Result<R>) -> Result<(EntryKey, R)> {
        let key = self.keys.next_key()?;
        let mut entry = Entry::new(key, item);
        let result = fill(&mut entry)?;

        for address in entry.copy_addresses() {
            self.changes.push(StorageChange::new(ChangeKind::Added, address));
        }

        self.entries.append(entry);
        log::debug!("Created entry {}", key);
        Ok((key, result))
    }

    /// Check that a new entry for `stack` could be keyed, along with its stacks
    pub fn check_entry_room(&self, stack: &ItemStack) -> Result<()> {
        if self.keys.remaining() < 1 {
            return Err(StorageError::KeysExhausted(self.keys.position().value()));
        }
        Entry::new(EntryKey::INVALID, stack.item.clone()).check_room(stack.copies, false)
    }

    /// Open a mutation guard on `key`
    pub fn guard(&mut self, key: EntryKey) -> Option<MutationGuard<'_>> {
        let track = self.track_write_lock;
        let changes = &mut self.changes;
        let entry = self.entries.guard(key)?;
        Some(MutationGuard::new(entry, changes, track))
    }

    /// Remove an entry, queueing a removal record for each of its addresses
    pub fn remove_entry(&mut self, key: EntryKey) -> Option<Entry> {
        let changes = &mut self.changes;
        let removed = self.entries.remove(key, |entry| {
            for address in entry.copy_addresses() {
                changes.push(StorageChange::new(ChangeKind::Removed, address));
            }
        });

        if removed.is_some() {
            log::debug!("Removed entry {}", key);
        }
        removed
    }

    /// Remove the entry if its last stack is gone
    pub fn prune_if_empty(&mut self, key: EntryKey) -> bool {
        if self.find(key).is_some_and(Entry::is_empty) {
            self.remove_entry(key);
            return true;
        }
        false
    }

    /// Remove every entry. Keys keep counting from where they were unless `reset_keys`.
    pub fn clear(&mut self, reset_keys: bool) {
        for entry in self.entries.iter() {
            for address in entry.copy_addresses() {
                self.changes.push(StorageChange::new(ChangeKind::Removed, address));
            }
        }
        self.entries.clear();

        if reset_keys {
            self.keys.reset();
        }
    }

    /// Replace everything with `entries`, dropping invalid ones and every repeat of a key
    /// (the first occurrence is kept). Returns how many were dropped.
    pub fn load(&mut self, entries: Vec<Entry>) -> usize {
        self.clear(true);

        let mut dropped = 0;
        let mut valid = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.is_valid() {
                valid.push(entry);
            } else {
                log::warn!("Dropping invalid entry {} during load", entry.key());
                dropped += 1;
            }
        }

        // Stable, so the first of several equal keys stays in front
        valid.sort_by_key(Entry::key);

        for mut entry in valid {
            if self.entries.last_key().is_some_and(|last| last == entry.key()) {
                log::warn!("Dropping duplicate entry {} during load", entry.key());
                dropped += 1;
                continue;
            }

            entry.restore_stack_keys();
            self.entries.append(entry);
        }

        if let Some(last) = self.entries.last_key() {
            if last > self.keys.position() {
                // Cannot regress, the position was just compared
                let _ = self.keys.set_position(last);
            }
        }

        for entry in self.entries.iter() {
            for address in entry.copy_addresses() {
                self.changes.push(StorageChange::new(ChangeKind::Added, address));
            }
        }

        dropped
    }

    /// Queue an update record for every address of `key`
    pub fn mark_entry_updated(&mut self, key: EntryKey) {
        if let Some(mut guard) = self.guard(key) {
            guard.touch_all();
        }
    }

    /// Take every pending change record
    pub fn drain_changes(&mut self) -> Vec<StorageChange> {
        self.changes.drain()
    }

    pub fn pending_changes(&self) -> usize {
        self.changes.len()
    }

    pub(crate) fn changes_mut(&mut self) -> &mut ChangeQueue<StorageChange> {
        &mut self.changes
    }
}

/// Write access to one entry. Holds the index write lock until dropped.
pub struct MutationGuard<'a> {
    entry: IndexGuard<'a, Entry>,
    before: Vec<Stack>,
    touch_all: bool,
    changes: &'a mut ChangeQueue<StorageChange>,
    track_write_lock: bool,
}

impl<'a> MutationGuard<'a> {
    fn new(entry: IndexGuard<'a, Entry>, changes: &'a mut ChangeQueue<StorageChange>, track_write_lock: bool) -> Self {
        if track_write_lock {
            log::trace!("Write lock acquired on entry {} (depth {})", entry.key(), entry.write_lock());
        }

        let before = entry.stacks().to_vec();
        Self {
            entry,
            before,
            touch_all: false,
            changes,
            track_write_lock,
        }
    }

    /// Report every surviving stack as updated, even if its count did not change
    pub fn touch_all(&mut self) {
        self.touch_all = true;
    }

    fn record_changes(&mut self) {
        let key = self.entry.key();
        let after = self.entry.stacks();
        let address = |stack: StackKey| Address::encode(key, stack);

        for old in &self.before {
            match after.iter().find(|stack| stack.key == old.key) {
                None => self.changes.push(StorageChange::new(ChangeKind::Removed, address(old.key))),
                Some(new) if new.count != old.count || self.touch_all => {
                    self.changes.push(StorageChange::new(ChangeKind::Updated, address(old.key)))
                }
                Some(_) => {}
            }
        }

        for new in after {
            if !self.before.iter().any(|stack| stack.key == new.key) {
                self.changes.push(StorageChange::new(ChangeKind::Added, address(new.key)));
            }
        }
    }
}

impl<'a> core::ops::Deref for MutationGuard<'a> {
    type Target = Entry;

    fn deref(&self) -> &Entry {
        &self.entry
    }
}

impl<'a> core::ops::DerefMut for MutationGuard<'a> {
    fn deref_mut(&mut self) -> &mut Entry {
        &mut self.entry
    }
}

impl<'a> Drop for MutationGuard<'a> {
    fn drop(&mut self) {
        self.record_changes();
        self.entry.mark_dirty();

        if self.track_write_lock {
            log::trace!(
                "Write lock released on entry {} (depth {})",
                self.entry.key(),
                self.entry.write_lock() - 1
            );
        }
    }
}
