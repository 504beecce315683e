//! ItemStorage - the storage facade
//!
//! Every mutating call runs the same sequence: validate, ask extensions for permission, run
//! the pre-hooks, mutate, send the post event batch to extensions, then publish the queued
//! change records (when `auto_sync_changes` is on). Each call either completes fully or
//! changes nothing.
//!
//! Mutating operations come in two forms. `try_*` returns a [`StorageError`] that tells
//! validation failures apart from policy denials; the plain form returns a bool, key or
//! option and logs the reason at `warn`.

use std::mem;
use std::sync::Arc;

use crossbeam_channel::Receiver;

use stash_core::{
    tags, Address, ComparisonFlags, ContainerId, DeniedOperation, EntryKey, Item, ItemEqualsCheck, ItemRef,
    ItemStack, InventoryTag, Result, StackKey, StorageConfig, StorageError, ENTIRE_STACK,
};
use stash_event::{ChangeFeed, Priority, SubscriberId};

use crate::container::ItemContainer;
use crate::content::{InventoryContent, StorageChange};
use crate::entry::{Entry, Stack};
use crate::event::{EventData, EventLog, EventLogBatch};
use crate::extension::{
    AddStackBehavior, AddStackTestType, AdditionArgs, Extension, ExtensionGroup, ExtensionResponse,
    SharedExtensionGroup,
};
use crate::query::{self, AddressIter, ItemIter, StorageFilter, StorageQuery};
use crate::snapshot::StorageSnapshot;

fn check_key(key: EntryKey) -> Result<()> {
    if key.is_valid() {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key))
    }
}

fn check_address(address: Address) -> Result<()> {
    if address.is_valid() && address.entry().is_valid() && address.stack().is_valid() {
        Ok(())
    } else {
        Err(StorageError::InvalidAddress(address))
    }
}

fn check_amount(amount: i32) -> Result<()> {
    if amount == 0 || amount < ENTIRE_STACK {
        Err(StorageError::InvalidAmount(amount))
    } else {
        Ok(())
    }
}

fn check_removal_reason(reason: &InventoryTag) -> Result<()> {
    if reason.is_valid() && reason.matches_tag(&tags::REMOVAL_BASE) {
        Ok(())
    } else {
        Err(StorageError::InvalidTag {
            tag: reason.to_string(),
            expected: "removal",
        })
    }
}

fn check_stack(stack: &ItemStack) -> Result<()> {
    if !stack.item.is_valid() {
        return Err(StorageError::InvalidItem(stack.item.id.clone()));
    }
    if stack.copies < 1 {
        return Err(StorageError::InvalidAmount(stack.copies));
    }
    Ok(())
}

fn report<T>(operation: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            log::warn!("{} rejected: {}", operation, err);
            None
        }
    }
}

/// Keyed storage of item entries
pub struct ItemStorage {
    id: ContainerId,
    config: StorageConfig,
    content: InventoryContent,
    extensions: ExtensionGroup,
    feed: ChangeFeed<StorageChange>,
    clock: u64,
}

impl ItemStorage {
    /// Create with default configuration
    pub fn new() -> Self {
        Self::with_config(StorageConfig::default())
    }

    /// Create with a custom configuration
    pub fn with_config(config: StorageConfig) -> Self {
        let mut storage = Self {
            id: ContainerId::next(),
            content: InventoryContent::new(config.key_baseline, config.track_write_lock),
            config,
            extensions: ExtensionGroup::new(),
            feed: ChangeFeed::new(),
            clock: 0,
        };
        storage.with_extensions(|group, storage| group.initialize_extension(storage));
        storage
    }

    /// Attach an extension, logging if it was already present
    pub fn with_extension<E: Extension>(mut self, extension: E) -> Self {
        if let Err(err) = self.add_extension(Box::new(extension)) {
            log::warn!("{}", err);
        }
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Raw entries in key order
    pub fn entries(&self) -> &[Entry] {
        self.content.entries().as_slice()
    }

    fn next_timestamp(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Borrow the extension group out so hooks may read the storage while being mutated
    fn with_extensions<R>(&mut self, f: impl FnOnce(&mut ExtensionGroup, &Self) -> R) -> R {
        let mut group = mem::replace(&mut self.extensions, ExtensionGroup::placeholder());
        let result = f(&mut group, self);
        self.extensions = group;
        result
    }

    fn broadcast(&mut self, batch: EventLogBatch) {
        if !batch.is_empty() {
            self.with_extensions(|group, storage| group.post_event_batch(storage, &batch));
        }

        if self.config.auto_sync_changes {
            self.sync_changes();
        }
    }

    fn broadcast_single(&mut self, tag: InventoryTag, data: EventData) {
        let timestamp = self.next_timestamp();
        self.broadcast(EventLogBatch::single(EventLog::new(tag, data, timestamp)));
    }

    fn broadcast_batch(&mut self, tag: InventoryTag, events: Vec<EventData>) {
        let timestamp = self.next_timestamp();
        self.broadcast(EventLogBatch::new(tag, events, timestamp));
    }

    // ---------------------------------------------------------------------
    // Extensions
    // ---------------------------------------------------------------------

    pub fn extensions(&self) -> &ExtensionGroup {
        &self.extensions
    }

    /// Add a runtime extension and initialize it for this storage
    pub fn add_extension(&mut self, extension: Box<dyn Extension>) -> Result<()> {
        self.with_extensions(|group, storage| group.add_extension(extension, &[storage]))
    }

    /// Deinitialize and detach a runtime extension
    pub fn remove_extension(&mut self, id: stash_core::ExtensionId) -> Result<Box<dyn Extension>> {
        self.with_extensions(|group, storage| group.remove_extension(id, &[storage]))
    }

    /// Whether an extension of type `T` is reachable, including nested groups and parents
    pub fn has_extension<T: Extension>(&self) -> bool {
        self.extensions.has_extension::<T>(true)
    }

    pub fn extension<T: Extension>(&self) -> Option<&T> {
        self.extensions.get_extension::<T>()
    }

    pub fn extension_mut<T: Extension>(&mut self) -> Option<&mut T> {
        self.extensions.get_extension_mut::<T>()
    }

    /// Link this storage's extensions to a shared parent group
    pub fn set_parent_group(&mut self, parent: Option<SharedExtensionGroup>) {
        self.with_extensions(|group, storage| {
            if let Some(previous) = group.set_parent(parent.clone()) {
                previous.write().deinitialize_extension(storage);
            }
            if let Some(parent) = &parent {
                parent.write().initialize_extension(storage);
            }
        });
    }

    // ---------------------------------------------------------------------
    // Permission checks
    // ---------------------------------------------------------------------

    fn check_can_add(&self, stacks: &[ItemStack], args: AdditionArgs) -> Result<()> {
        let only_new_stacks = args.behavior == AddStackBehavior::OnlyNewStacks;
        for stack in stacks {
            check_stack(stack)?;
            self.check_key_room(stack, only_new_stacks)?;
        }

        if self.extensions.allows_addition(self, stacks, args).resolve(true) {
            Ok(())
        } else {
            Err(StorageError::denied(DeniedOperation::Addition, tags::ADDITION))
        }
    }

    pub fn can_add_stack(&self, stack: &ItemStack, behavior: AddStackBehavior) -> bool {
        let args = AdditionArgs::new(behavior, AddStackTestType::IndividualTests);
        self.check_can_add(std::slice::from_ref(stack), args).is_ok()
    }

    pub fn can_add_stacks(&self, stacks: &[ItemStack], args: AdditionArgs) -> bool {
        self.check_can_add(stacks, args).is_ok()
    }

    fn removal_allowed_for_entry(&self, entry: &Entry, reason: &InventoryTag) -> bool {
        let mut allowed = self.config.removal_allowed(reason);

        for stack in entry.stacks() {
            match self.extensions.allows_removal(self, entry.address_of(stack.key), reason) {
                ExtensionResponse::Disallowed => return false,
                ExtensionResponse::Allowed => allowed = true,
                ExtensionResponse::NoExplicitResponse => {}
            }
        }

        allowed
    }

    pub fn can_remove_entry(&self, key: EntryKey, reason: &InventoryTag) -> bool {
        self.content
            .find(key)
            .is_some_and(|entry| self.removal_allowed_for_entry(entry, reason))
    }

    pub fn can_remove_stack(&self, address: Address, reason: &InventoryTag) -> bool {
        if !self.contains_address(address) {
            return false;
        }

        self.extensions
            .allows_removal(self, address, reason)
            .resolve(self.config.removal_allowed(reason))
    }

    pub fn can_edit_entry(&self, key: EntryKey, tag: &InventoryTag) -> bool {
        if !self.contains_key(key) {
            return false;
        }

        self.extensions
            .allows_edit(self, key, tag)
            .resolve(self.config.edit_allowed(tag))
    }

    pub fn can_edit_stack(&self, address: Address, tag: &InventoryTag) -> bool {
        self.contains_address(address) && self.can_edit_entry(address.entry(), tag)
    }

    // ---------------------------------------------------------------------
    // Adding
    // ---------------------------------------------------------------------

    fn find_entry_for(&self, item: &ItemRef) -> Option<EntryKey> {
        self.content
            .entries()
            .iter()
            .find(|entry| Arc::ptr_eq(entry.item(), item) || item.compare_with(entry.item(), ComparisonFlags::DEFAULT))
            .map(Entry::key)
    }

    /// Whether the keys needed to place `stack` are still free
    fn check_key_room(&self, stack: &ItemStack, only_new_stacks: bool) -> Result<()> {
        match self.find_entry_for(&stack.item).and_then(|key| self.content.find(key)) {
            Some(entry) => entry.check_room(stack.copies, only_new_stacks),
            None => self.content.check_entry_room(stack),
        }
    }

    fn add_stack_impl(&mut self, stack: &ItemStack, only_new_stacks: bool) -> Result<EventData> {
        let amount = stack.copies;
        let fill = |entry: &mut Entry| {
            if only_new_stacks {
                entry.add_to_new_stacks(amount)
            } else {
                entry.add_to_any_stack(amount)
            }
        };

        let (key, touched) = match self.find_entry_for(&stack.item) {
            Some(key) => {
                let mut entry = self.content.guard(key).ok_or(StorageError::EntryNotFound(key))?;
                (key, fill(&mut *entry)?)
            }
            None => self.content.create_entry(stack.item.clone(), fill)?,
        };

        log::debug!("Added {} x{} to entry {}", stack.item.id, amount, key);

        let addresses = touched.into_iter().map(|stack_key| Address::encode(key, stack_key)).collect();
        Ok(EventData::new(stack.item.clone(), amount, key, addresses))
    }

    /// Add a stack. Returns the entry it landed in.
    pub fn try_add_item_stack(&mut self, stack: ItemStack, behavior: AddStackBehavior) -> Result<EntryKey> {
        let args = AdditionArgs::new(behavior, AddStackTestType::IndividualTests);
        self.check_can_add(std::slice::from_ref(&stack), args)?;

        self.with_extensions(|group, storage| group.pre_addition(storage, &stack));
        let data = self.add_stack_impl(&stack, behavior == AddStackBehavior::OnlyNewStacks)?;
        let key = data.entry_touched;

        self.broadcast_single(tags::ADDITION, data);
        Ok(key)
    }

    /// Add a stack. Returns [`EntryKey::INVALID`] if it was rejected.
    pub fn add_item_stack(&mut self, stack: ItemStack, behavior: AddStackBehavior) -> EntryKey {
        report("add_item_stack", self.try_add_item_stack(stack, behavior)).unwrap_or(EntryKey::INVALID)
    }

    /// Add one copy of `item`
    pub fn add_entry_from_item(&mut self, item: ItemRef, behavior: AddStackBehavior) -> bool {
        self.add_item_stack(ItemStack::single(item), behavior).is_valid()
    }

    /// Add several stacks, each checked on its own, and report them in one event batch.
    /// Returns the entry key per input stack, [`EntryKey::INVALID`] where it was skipped.
    pub fn add_item_stacks(&mut self, stacks: &[ItemStack], behavior: AddStackBehavior) -> Vec<EntryKey> {
        let args = AdditionArgs::new(behavior, AddStackTestType::IndividualTests);
        let only_new_stacks = behavior == AddStackBehavior::OnlyNewStacks;

        let mut keys = Vec::with_capacity(stacks.len());
        let mut events = Vec::with_capacity(stacks.len());

        for stack in stacks {
            if let Err(err) = self.check_can_add(std::slice::from_ref(stack), args) {
                log::warn!("Skipping stack of {} in batch addition: {}", stack.item.id, err);
                keys.push(EntryKey::INVALID);
                continue;
            }

            self.with_extensions(|group, storage| group.pre_addition(storage, stack));
            match self.add_stack_impl(stack, only_new_stacks) {
                Ok(data) => {
                    keys.push(data.entry_touched);
                    events.push(data);
                }
                Err(err) => {
                    log::warn!("Skipping stack of {} in batch addition: {}", stack.item.id, err);
                    keys.push(EntryKey::INVALID);
                }
            }
        }

        self.broadcast_batch(tags::ADDITION, events);
        keys
    }

    /// Take ownership of a whole stack. Either every copy is stored or none is.
    pub fn try_possess(&mut self, stack: ItemStack) -> Result<EntryKey> {
        self.try_add_item_stack(stack, AddStackBehavior::AddToAnyStack)
    }

    pub fn possess(&mut self, stack: ItemStack) -> bool {
        report("possess", self.try_possess(stack)).is_some()
    }

    // ---------------------------------------------------------------------
    // Removing
    // ---------------------------------------------------------------------

    /// Remove `amount` copies from an entry, or the whole entry. Over-requests remove what
    /// exists.
    fn remove_from_entry_impl(&mut self, key: EntryKey, amount: i32) -> Option<EventData> {
        let entry = self.content.find(key)?;
        let item = entry.item().clone();
        let sum = entry.stack_sum();

        if amount == ENTIRE_STACK || amount >= sum {
            let removed = self.content.remove_entry(key)?;
            return Some(EventData::new(item, sum, key, removed.copy_addresses()));
        }

        let (_, touched) = self.content.guard(key)?.remove_from_any_stack(amount);
        let addresses = touched.into_iter().map(|stack| Address::encode(key, stack)).collect();
        Some(EventData::new(item, amount, key, addresses))
    }

    /// Remove copies from an entry and hand them back
    pub fn try_take_entry(&mut self, key: EntryKey, reason: &InventoryTag, amount: i32) -> Result<ItemStack> {
        check_key(key)?;
        check_amount(amount)?;
        check_removal_reason(reason)?;

        let entry = self.content.find(key).ok_or(StorageError::EntryNotFound(key))?;
        if !self.removal_allowed_for_entry(entry, reason) {
            return Err(StorageError::denied(DeniedOperation::Removal, reason));
        }

        self.with_extensions(|group, storage| group.pre_removal(storage, key, amount));
        let data = self
            .remove_from_entry_impl(key, amount)
            .ok_or(StorageError::EntryNotFound(key))?;
        let taken = ItemStack::new(data.item.clone(), data.amount);

        self.broadcast_single(reason.clone(), data);
        Ok(taken)
    }

    pub fn take_entry(&mut self, key: EntryKey, reason: &InventoryTag, amount: i32) -> Option<ItemStack> {
        report("take_entry", self.try_take_entry(key, reason, amount))
    }

    pub fn remove_entry(&mut self, key: EntryKey, reason: &InventoryTag, amount: i32) -> bool {
        self.take_entry(key, reason, amount).is_some()
    }

    /// Remove copies from one stack and hand them back
    pub fn try_take_stack(&mut self, address: Address, reason: &InventoryTag, amount: i32) -> Result<ItemStack> {
        check_address(address)?;
        check_amount(amount)?;
        check_removal_reason(reason)?;

        if !self.contains_address(address) {
            return Err(StorageError::StackNotFound(address));
        }
        if !self.can_remove_stack(address, reason) {
            return Err(StorageError::denied(DeniedOperation::Removal, reason));
        }

        let (key, stack_key) = address.decode();
        self.with_extensions(|group, storage| group.pre_removal(storage, key, amount));

        let (item, taken) = {
            let mut entry = self.content.guard(key).ok_or(StorageError::StackNotFound(address))?;
            let item = entry.item().clone();
            (item, entry.take_from_stack(stack_key, amount))
        };
        self.content.prune_if_empty(key);

        self.broadcast_single(reason.clone(), EventData::new(item.clone(), taken, key, vec![address]));
        Ok(ItemStack::new(item, taken))
    }

    pub fn take_stack(&mut self, address: Address, reason: &InventoryTag, amount: i32) -> Option<ItemStack> {
        report("take_stack", self.try_take_stack(address, reason, amount))
    }

    pub fn remove_stack(&mut self, address: Address, reason: &InventoryTag, amount: i32) -> bool {
        self.take_stack(address, reason, amount).is_some()
    }

    /// Hand copies of an entry to a caller that will store them elsewhere
    pub fn release_entry(&mut self, key: EntryKey, copies: i32) -> Option<ItemStack> {
        self.take_entry(key, &tags::REMOVAL_MOVING, copies)
    }

    /// Hand copies of a stack to a caller that will store them elsewhere
    pub fn release_stack(&mut self, address: Address, copies: i32) -> Option<ItemStack> {
        self.take_stack(address, &tags::REMOVAL_MOVING, copies)
    }

    /// Remove every entry whose removal is allowed. Reasons outside the removal hierarchy
    /// become deletions. Returns how many entries were removed.
    pub fn clear(&mut self, reason: &InventoryTag) -> usize {
        let reason = if reason.matches_tag(&tags::REMOVAL_BASE) {
            reason.clone()
        } else {
            tags::REMOVAL_DELETION
        };

        let keys: Vec<EntryKey> = self.content.entries().keys().collect();
        let mut events = Vec::new();

        for key in keys {
            if !self.can_remove_entry(key, &reason) {
                continue;
            }

            self.with_extensions(|group, storage| group.pre_removal(storage, key, ENTIRE_STACK));
            if let Some(data) = self.remove_from_entry_impl(key, ENTIRE_STACK) {
                events.push(data);
            }
        }

        if self.config.reset_keys_on_clear && self.content.is_empty() {
            self.content.clear(true);
        }

        let removed = events.len();
        log::info!("Cleared {} entries from {:?} ({})", removed, self.id, reason);
        self.broadcast_batch(reason, events);
        removed
    }

    // ---------------------------------------------------------------------
    // Transfers
    // ---------------------------------------------------------------------

    /// Move copies of one stack into another storage. Returns the entry they landed in.
    pub fn try_move_stack(
        &mut self,
        to: &mut ItemStorage,
        address: Address,
        amount: i32,
        behavior: AddStackBehavior,
    ) -> Result<EntryKey> {
        check_address(address)?;
        check_amount(amount)?;

        let mut view = self.view_stack(address).ok_or(StorageError::StackNotFound(address))?;
        if !self.can_remove_stack(address, &tags::REMOVAL_MOVING) {
            return Err(StorageError::denied(DeniedOperation::Removal, tags::REMOVAL_MOVING));
        }

        if amount != ENTIRE_STACK {
            view.copies = view.copies.min(amount);
        }
        to.check_can_add(std::slice::from_ref(&view), AdditionArgs::new(behavior, AddStackTestType::IndividualTests))?;

        let stack = self.try_take_stack(address, &tags::REMOVAL_MOVING, amount)?;
        self.hand_over(to, stack, behavior)
    }

    pub fn move_stack(&mut self, to: &mut ItemStorage, address: Address, amount: i32, behavior: AddStackBehavior) -> EntryKey {
        report("move_stack", self.try_move_stack(to, address, amount, behavior)).unwrap_or(EntryKey::INVALID)
    }

    /// Move a whole entry into another storage. Returns the entry it landed in.
    pub fn try_move_entry(&mut self, to: &mut ItemStorage, key: EntryKey, behavior: AddStackBehavior) -> Result<EntryKey> {
        check_key(key)?;

        let view = self.view_entry(key).ok_or(StorageError::EntryNotFound(key))?;
        if !self.can_remove_entry(key, &tags::REMOVAL_MOVING) {
            return Err(StorageError::denied(DeniedOperation::Removal, tags::REMOVAL_MOVING));
        }
        to.check_can_add(std::slice::from_ref(&view), AdditionArgs::new(behavior, AddStackTestType::IndividualTests))?;

        let stack = self.try_take_entry(key, &tags::REMOVAL_MOVING, ENTIRE_STACK)?;
        self.hand_over(to, stack, behavior)
    }

    /// Add released copies to `to`. If `to` refuses after all, they come back here through
    /// [`Self::restore_stack`].
    fn hand_over(&mut self, to: &mut ItemStorage, stack: ItemStack, behavior: AddStackBehavior) -> Result<EntryKey> {
        match to.try_add_item_stack(stack.clone(), behavior) {
            Ok(key) => Ok(key),
            Err(err) => {
                log::warn!("Transfer of {} x{} refused, returning it: {}", stack.item.id, stack.copies, err);
                self.restore_stack(&stack);
                Err(err)
            }
        }
    }

    /// Put back copies that were removed for a transfer the target refused. The addition
    /// policy is not asked again, but extensions see `pre_addition` and an Addition event like
    /// for any other addition, so counters stay in step.
    fn restore_stack(&mut self, stack: &ItemStack) {
        self.with_extensions(|group, storage| group.pre_addition(storage, stack));
        match self.add_stack_impl(stack, false) {
            Ok(data) => self.broadcast_single(tags::ADDITION, data),
            Err(err) => log::error!("Lost {} x{} while returning a refused transfer: {}", stack.item.id, stack.copies, err),
        }
    }

    pub fn move_entry(&mut self, to: &mut ItemStorage, key: EntryKey, behavior: AddStackBehavior) -> EntryKey {
        report("move_entry", self.try_move_entry(to, key, behavior)).unwrap_or(EntryKey::INVALID)
    }

    /// Move every entry that may leave this storage and that `to` accepts. Each side reports
    /// one event batch. Returns how many entries moved.
    pub fn dump(&mut self, to: &mut ItemStorage) -> usize {
        let args = AdditionArgs::new(AddStackBehavior::AddToAnyStack, AddStackTestType::IndividualTests);
        let keys: Vec<EntryKey> = self.content.entries().keys().collect();

        let mut removed = Vec::new();
        let mut added = Vec::new();

        for key in keys {
            let Some(view) = self.view_entry(key) else {
                continue;
            };
            if !self.can_remove_entry(key, &tags::REMOVAL_MOVING) {
                continue;
            }
            if let Err(err) = to.check_can_add(std::slice::from_ref(&view), args) {
                log::debug!("Entry {} stays behind: {}", key, err);
                continue;
            }

            self.with_extensions(|group, storage| group.pre_removal(storage, key, ENTIRE_STACK));
            let Some(data) = self.remove_from_entry_impl(key, ENTIRE_STACK) else {
                continue;
            };

            let stack = ItemStack::new(data.item.clone(), data.amount);
            to.with_extensions(|group, storage| group.pre_addition(storage, &stack));
            match to.add_stack_impl(&stack, false) {
                Ok(event) => added.push(event),
                Err(err) => {
                    log::warn!("Entry {} could not be placed, returning it: {}", key, err);
                    self.broadcast_single(tags::REMOVAL_MOVING, data);
                    self.restore_stack(&stack);
                    continue;
                }
            }
            removed.push(data);
        }

        let moved = removed.len();
        log::info!("Dumped {} entries from {:?} into {:?}", moved, self.id, to.id);

        self.broadcast_batch(tags::REMOVAL_MOVING, removed);
        to.broadcast_batch(tags::ADDITION, added);
        moved
    }

    // ---------------------------------------------------------------------
    // Editing
    // ---------------------------------------------------------------------

    /// Move copies from one stack of an entry into another. Returns how many moved.
    pub fn try_merge_stacks(&mut self, key: EntryKey, from: StackKey, to: StackKey, amount: i32) -> Result<i32> {
        check_key(key)?;
        check_amount(amount)?;

        let from_address = Address::encode(key, from);
        let to_address = Address::encode(key, to);

        let entry = self.content.find(key).ok_or(StorageError::EntryNotFound(key))?;
        if !entry.contains(from) {
            return Err(StorageError::StackNotFound(from_address));
        }
        if !entry.contains(to) {
            return Err(StorageError::StackNotFound(to_address));
        }
        if from == to {
            return Err(StorageError::InvalidAddress(to_address));
        }
        if entry.is_stack_full(to) {
            return Err(StorageError::StackFull(to_address));
        }
        if !self.can_edit_entry(key, &tags::EDIT_MERGE) {
            return Err(StorageError::denied(DeniedOperation::Edit, tags::EDIT_MERGE));
        }

        let (item, moved) = {
            let mut entry = self.content.guard(key).ok_or(StorageError::EntryNotFound(key))?;
            let wanted = if amount == ENTIRE_STACK { entry.stack_amount(from) } else { amount };
            let not_moved = entry.move_stack(from, to, wanted);
            (entry.item().clone(), wanted - not_moved)
        };

        log::debug!("Merged {} copies from {} into {}", moved, from_address, to_address);
        self.broadcast_single(tags::EDIT_MERGE, EventData::new(item, moved, key, vec![from_address, to_address]));
        Ok(moved)
    }

    pub fn merge_stacks(&mut self, key: EntryKey, from: StackKey, to: StackKey, amount: i32) -> bool {
        report("merge_stacks", self.try_merge_stacks(key, from, to, amount)).is_some()
    }

    /// Split `amount` copies off a stack into a new stack. Returns the new stack's address.
    pub fn try_split_stack(&mut self, address: Address, amount: i32) -> Result<Address> {
        check_address(address)?;

        let count = self.stack_amount(address);
        if count == 0 {
            return Err(StorageError::StackNotFound(address));
        }
        if amount <= 0 || amount >= count {
            return Err(StorageError::InvalidAmount(amount));
        }
        if !self.can_edit_stack(address, &tags::EDIT_SPLIT) {
            return Err(StorageError::denied(DeniedOperation::Edit, tags::EDIT_SPLIT));
        }

        let (key, stack_key) = address.decode();
        let (item, new_key) = {
            let mut entry = self.content.guard(key).ok_or(StorageError::StackNotFound(address))?;
            let new_key = entry.split_stack(stack_key, amount)?;
            (entry.item().clone(), new_key)
        };
        let new_address = Address::encode(key, new_key);

        log::debug!("Split {} copies from {} into {}", amount, address, new_address);
        self.broadcast_single(tags::EDIT_SPLIT, EventData::new(item, amount, key, vec![address, new_address]));
        Ok(new_address)
    }

    pub fn split_stack(&mut self, address: Address, amount: i32) -> bool {
        report("split_stack", self.try_split_stack(address, amount)).is_some()
    }

    /// Change a mutable item in place. Every address of its entry is reported as updated.
    pub fn try_mutate_item<F>(&mut self, key: EntryKey, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Item),
    {
        check_key(key)?;

        let entry = self.content.find(key).ok_or(StorageError::EntryNotFound(key))?;
        if !entry.item().can_mutate() {
            return Err(StorageError::ItemNotMutable(entry.item().id.clone()));
        }

        let data = {
            let mut entry = self.content.guard(key).ok_or(StorageError::EntryNotFound(key))?;
            mutate(entry.item_mut());
            entry.touch_all();
            EventData::new(entry.item().clone(), entry.stack_sum(), key, entry.copy_addresses())
        };

        self.broadcast_single(tags::EDIT_ITEM_MUTATED, data);
        Ok(())
    }

    pub fn mutate_item<F>(&mut self, key: EntryKey, mutate: F) -> bool
    where
        F: FnOnce(&mut Item),
    {
        report("mutate_item", self.try_mutate_item(key, mutate)).is_some()
    }

    /// Report that the item held by this storage was changed by its owner. Returns false if
    /// no entry holds exactly this item.
    pub fn on_item_mutated(&mut self, item: &ItemRef) -> bool {
        let Some(key) = self.find_item(item, ItemEqualsCheck::ComparePointers) else {
            return false;
        };

        self.content.mark_entry_updated(key);

        let Some(entry) = self.content.find(key) else {
            return false;
        };
        let data = EventData::new(entry.item().clone(), entry.stack_sum(), key, entry.copy_addresses());

        self.broadcast_single(tags::EDIT_ITEM_MUTATED, data);
        true
    }

    // ---------------------------------------------------------------------
    // Lookups
    // ---------------------------------------------------------------------

    pub fn container_id(&self) -> ContainerId {
        self.id
    }

    pub fn contains_key(&self, key: EntryKey) -> bool {
        key.is_valid() && self.content.contains(key)
    }

    pub fn contains_address(&self, address: Address) -> bool {
        let (key, stack) = address.decode();
        self.content.find(key).is_some_and(|entry| entry.contains(stack))
    }

    pub fn view_entry(&self, key: EntryKey) -> Option<ItemStack> {
        self.content.find(key).map(Entry::to_item_stack)
    }

    pub fn view_stack(&self, address: Address) -> Option<ItemStack> {
        let (key, stack) = address.decode();
        self.content.find(key)?.to_stack_view(stack)
    }

    /// Borrow the item of an entry
    pub fn view_item(&self, key: EntryKey) -> Option<&Item> {
        self.content.find(key).map(|entry| entry.item().as_ref())
    }

    /// Shared handle to the item of an entry
    pub fn get_entry_item(&self, key: EntryKey) -> Option<ItemRef> {
        self.content.find(key).map(|entry| entry.item().clone())
    }

    pub fn stack_amount(&self, address: Address) -> i32 {
        let (key, stack) = address.decode();
        self.content.find(key).map_or(0, |entry| entry.stack_amount(stack))
    }

    pub fn entry_amount(&self, key: EntryKey) -> i32 {
        self.content.find(key).map_or(0, Entry::stack_sum)
    }

    pub fn get_all_addresses(&self) -> Vec<Address> {
        self.iter_addresses().collect()
    }

    pub fn get_addresses_for_entry(&self, key: EntryKey) -> Vec<Address> {
        self.content.find(key).map(Entry::copy_addresses).unwrap_or_default()
    }

    pub fn get_all_keys(&self) -> Vec<EntryKey> {
        self.iter_keys().collect()
    }

    /// Stack keys of an entry
    pub fn break_entry_into_keys(&self, key: EntryKey) -> Vec<StackKey> {
        self.content.find(key).map(Entry::copy_keys).unwrap_or_default()
    }

    pub fn get_stacks_in_entry(&self, key: EntryKey) -> &[Stack] {
        self.content.find(key).map(Entry::stacks).unwrap_or_default()
    }

    pub fn entry_count(&self) -> usize {
        self.content.len()
    }

    /// Stacks across all entries
    pub fn stack_count(&self) -> usize {
        self.content.entries().iter().map(Entry::stack_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn find_item(&self, item: &ItemRef, method: ItemEqualsCheck) -> Option<EntryKey> {
        self.content
            .entries()
            .iter()
            .find(|entry| match method {
                ItemEqualsCheck::ComparePointers => Arc::ptr_eq(entry.item(), item),
                ItemEqualsCheck::UseCompareWith => entry.item().compare_with(item, ComparisonFlags::DEFAULT),
            })
            .map(Entry::key)
    }

    pub fn contains_item(&self, item: &ItemRef, method: ItemEqualsCheck) -> bool {
        self.find_item(item, method).is_some()
    }

    pub fn get_first_address(&self) -> Option<Address> {
        self.iter_addresses().next()
    }

    pub fn break_address(address: Address) -> (EntryKey, StackKey) {
        address.decode()
    }

    /// Split addresses into their distinct entry keys and their stack keys, in input order
    pub fn break_address_into_keys(addresses: &[Address]) -> (Vec<EntryKey>, Vec<StackKey>) {
        let mut entries: Vec<EntryKey> = Vec::new();
        let mut stacks = Vec::with_capacity(addresses.len());

        for address in addresses {
            let (entry, stack) = address.decode();
            if !entries.contains(&entry) {
                entries.push(entry);
            }
            stacks.push(stack);
        }

        (entries, stacks)
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn iter_keys(&self) -> impl Iterator<Item = EntryKey> + '_ {
        self.content.entries().keys()
    }

    pub fn iter_addresses(&self) -> AddressIter<'_> {
        AddressIter::new(self.entries())
    }

    pub fn iter_entry_addresses(&self, key: EntryKey) -> AddressIter<'_> {
        let entries = self.entries();
        match self.content.entries().index_of(key) {
            Some(index) => AddressIter::new(&entries[index..=index]),
            None => AddressIter::new(&[]),
        }
    }

    pub fn iter_items(&self) -> ItemIter<'_> {
        ItemIter::new(self.entries(), false)
    }

    /// Items that may be mutated; entries holding immutable items are skipped
    pub fn iter_mutable_items(&self) -> ItemIter<'_> {
        ItemIter::new(self.entries(), true)
    }

    pub fn query(&self, query: &StorageQuery) -> Vec<EntryKey> {
        query.run(self.entries())
    }

    pub fn count(&self, filter: &StorageFilter) -> usize {
        query::count(self.entries(), filter)
    }

    pub fn emit(&self, filter: &StorageFilter) -> Vec<EntryKey> {
        query::emit(self.entries(), filter)
    }

    pub fn first(&self, filter: &StorageFilter) -> Option<EntryKey> {
        query::first(self.entries(), filter)
    }

    // ---------------------------------------------------------------------
    // Change feed
    // ---------------------------------------------------------------------

    /// Observe change records as they are synced
    pub fn subscribe_changes<F>(&mut self, handler: F) -> SubscriberId
    where
        F: Fn(&[StorageChange]) + Send + Sync + 'static,
    {
        self.feed.subscribe(handler)
    }

    pub fn subscribe_changes_with_priority<F>(&mut self, handler: F, priority: Priority) -> SubscriberId
    where
        F: Fn(&[StorageChange]) + Send + Sync + 'static,
    {
        self.feed.subscribe_with_priority(handler, priority)
    }

    pub fn unsubscribe_changes(&mut self, id: SubscriberId) -> bool {
        self.feed.unsubscribe(id)
    }

    /// Receive change records on another thread
    pub fn change_channel(&mut self) -> Receiver<StorageChange> {
        self.feed.channel()
    }

    /// Publish every pending change record. Returns how many were published.
    pub fn sync_changes(&mut self) -> usize {
        self.feed.process(self.content.changes_mut())
    }

    pub fn pending_changes(&self) -> usize {
        self.content.pending_changes()
    }

    // ---------------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------------

    pub fn make_save_data(&self) -> StorageSnapshot {
        StorageSnapshot {
            entries: self.entries().to_vec(),
            extension_data: self.extensions.collect_save_data(),
        }
    }

    /// Replace the contents with a snapshot. Invalid entries are dropped; returns how many.
    pub fn try_load_save_data(&mut self, snapshot: StorageSnapshot) -> Result<usize> {
        self.with_extensions(|group, storage| group.deinitialize_extension(storage));

        let dropped = self.content.load(snapshot.entries);

        let restored = self.with_extensions(|group, storage| {
            let restored = group.apply_save_data(&snapshot.extension_data);
            group.initialize_extension(storage);
            restored
        });

        log::info!(
            "Loaded {} entries into {:?} ({} dropped)",
            self.content.len(),
            self.id,
            dropped
        );

        if self.config.auto_sync_changes {
            self.sync_changes();
        }

        restored.map(|_| dropped)
    }

    pub fn load_save_data(&mut self, snapshot: StorageSnapshot) -> bool {
        report("load_save_data", self.try_load_save_data(snapshot)).is_some()
    }
}

impl Default for ItemStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ItemStorage {
    fn drop(&mut self) {
        self.with_extensions(|group, storage| group.deinitialize_extension(storage));
    }
}

impl std::fmt::Debug for ItemStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemStorage")
            .field("id", &self.id)
            .field("entries", &self.content.len())
            .field("extensions", &self.extensions)
            .field("pending_changes", &self.content.pending_changes())
            .finish()
    }
}

impl ItemContainer for ItemStorage {
    fn container_id(&self) -> ContainerId {
        self.id
    }

    fn contains_key(&self, key: EntryKey) -> bool {
        ItemStorage::contains_key(self, key)
    }

    fn contains_address(&self, address: Address) -> bool {
        ItemStorage::contains_address(self, address)
    }

    fn view_entry(&self, key: EntryKey) -> Option<ItemStack> {
        ItemStorage::view_entry(self, key)
    }

    fn view_stack(&self, address: Address) -> Option<ItemStack> {
        ItemStorage::view_stack(self, address)
    }

    fn entry_amount(&self, key: EntryKey) -> i32 {
        ItemStorage::entry_amount(self, key)
    }

    fn stack_amount(&self, address: Address) -> i32 {
        ItemStorage::stack_amount(self, address)
    }

    fn entry_count(&self) -> usize {
        ItemStorage::entry_count(self)
    }

    fn has_entry_for(&self, item: &ItemRef) -> bool {
        self.find_entry_for(item).is_some()
    }

    fn for_each_key(&self, f: &mut dyn FnMut(EntryKey)) {
        self.iter_keys().for_each(f);
    }

    fn for_each_address(&self, f: &mut dyn FnMut(Address)) {
        self.iter_addresses().for_each(f);
    }

    fn release(&mut self, address: Address, copies: i32) -> Option<ItemStack> {
        self.release_stack(address, copies)
    }
}
