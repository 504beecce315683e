//! Caps the number of entries and total copies held

use std::any::Any;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use stash_core::{ContainerId, EntryKey, ExtensionId, ItemStack, Result, StorageError, UNLIMITED_STACK};

use crate::container::ItemContainer;
use crate::event::EventLogBatch;
use crate::extension::{AddStackTestType, AdditionArgs, Extension, ExtensionResponse};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct Limits {
    max_entries: i32,
    max_total_item_copies: i32,
}

/// Denies additions past a maximum entry count or total copy count (0 = unlimited)
///
/// Entry amounts are cached per container and refreshed from each event batch. When the
/// extension lives in a parent group, the limits apply to all containers together.
#[derive(Debug, Default)]
pub struct ItemLimitExtension {
    limits: Limits,
    cache: HashMap<(ContainerId, EntryKey), i32>,
    total_copies: i32,
    pending_entries: i32,
    pending_copies: i32,
}

impl ItemLimitExtension {
    pub fn extension_id() -> ExtensionId {
        ExtensionId::from_name("stash.item_limit")
    }

    /// Create with both limits
    pub fn new(max_entries: i32, max_total_item_copies: i32) -> Self {
        Self {
            limits: Limits {
                max_entries,
                max_total_item_copies,
            },
            ..Default::default()
        }
    }

    pub fn with_max_entries(mut self, max_entries: i32) -> Self {
        self.limits.max_entries = max_entries;
        self
    }

    pub fn with_max_total_item_copies(mut self, max: i32) -> Self {
        self.limits.max_total_item_copies = max;
        self
    }

    pub fn max_entries(&self) -> i32 {
        self.limits.max_entries
    }

    pub fn max_total_item_copies(&self) -> i32 {
        self.limits.max_total_item_copies
    }

    /// Copies across every tracked entry
    pub fn total_item_count(&self) -> i32 {
        self.total_copies
    }

    /// Entries that may still be created, or [`UNLIMITED_STACK`]
    pub fn remaining_entry_count(&self) -> i32 {
        if self.limits.max_entries <= 0 {
            return UNLIMITED_STACK;
        }
        self.limits.max_entries - self.cache.len() as i32
    }

    /// Copies that may still be added, or [`UNLIMITED_STACK`]
    pub fn remaining_total_item_count(&self) -> i32 {
        if self.limits.max_total_item_copies <= 0 {
            return UNLIMITED_STACK;
        }
        self.limits.max_total_item_copies - self.total_copies
    }

    fn can_contain(&self, count: i32, needs_new_entry: bool) -> bool {
        if self.limits.max_entries > 0 && needs_new_entry {
            let entries = self.cache.len() as i32 + self.pending_entries;
            if entries >= self.limits.max_entries {
                return false;
            }
        }

        if self.limits.max_total_item_copies > 0 {
            let copies = self.total_copies + self.pending_copies;
            if copies + count > self.limits.max_total_item_copies {
                return false;
            }
        }

        true
    }

    fn update_cache_for_entry(&mut self, container: &dyn ItemContainer, key: EntryKey) {
        let slot = (container.container_id(), key);
        let previous = self.cache.get(&slot).copied().unwrap_or(0);

        if !container.contains_key(key) {
            self.total_copies -= previous;
            self.cache.remove(&slot);
            return;
        }

        let amount = container.entry_amount(key);
        self.cache.insert(slot, amount);
        self.total_copies += amount - previous;
    }
}

impl Extension for ItemLimitExtension {
    fn identifier(&self) -> ExtensionId {
        Self::extension_id()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn initialize_extension(&mut self, container: &dyn ItemContainer) {
        let mut keys = Vec::new();
        container.for_each_key(&mut |key| keys.push(key));

        for key in keys {
            self.update_cache_for_entry(container, key);
        }
    }

    fn deinitialize_extension(&mut self, container: &dyn ItemContainer) {
        let id = container.container_id();
        let mut removed = 0;
        self.cache.retain(|(owner, _), amount| {
            if *owner == id {
                removed += *amount;
                return false;
            }
            true
        });
        self.total_copies -= removed;
    }

    fn allows_addition(&self, container: &dyn ItemContainer, stacks: &[ItemStack], args: AdditionArgs) -> ExtensionResponse {
        let count = match args.test_type {
            AddStackTestType::IndividualTests => stacks.iter().map(|s| s.copies).max().unwrap_or(0),
            AddStackTestType::GroupTest => stacks.iter().map(|s| s.copies).sum(),
        };
        let needs_new_entry = stacks.iter().any(|s| !container.has_entry_for(&s.item));

        if !self.can_contain(count, needs_new_entry) {
            log::trace!("Item limit reached, cannot add {} copies", count);
            return ExtensionResponse::Disallowed;
        }

        ExtensionResponse::NoExplicitResponse
    }

    fn pre_addition(&mut self, container: &dyn ItemContainer, stack: &ItemStack) {
        self.pending_copies += stack.copies;
        if !container.has_entry_for(&stack.item) {
            self.pending_entries += 1;
        }
    }

    fn post_event_batch(&mut self, container: &dyn ItemContainer, batch: &EventLogBatch) {
        for event in &batch.events {
            self.update_cache_for_entry(container, event.entry_touched);
        }
        self.pending_entries = 0;
        self.pending_copies = 0;
    }

    fn save_data(&self) -> Option<Vec<u8>> {
        bincode::serialize(&self.limits).ok()
    }

    fn load_data(&mut self, data: &[u8]) -> Result<()> {
        self.limits = bincode::deserialize(data).map_err(|e| StorageError::serialization(e.to_string()))?;
        Ok(())
    }
}
