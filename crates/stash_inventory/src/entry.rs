//! Entries and the stacking math
//!
//! An [`Entry`] owns one item and an ordered list of [`Stack`]s. Each stack holds at most
//! the entry's cached stack limit, unless that limit is [`UNLIMITED_STACK`]. Stacks are
//! pruned as soon as they drain, so every stored count is positive.

use serde::{Deserialize, Serialize};

use stash_core::item::item_stack_limit;
use stash_core::{
    Address, EntryKey, Item, ItemRef, ItemStack, KeyGenerator, Result, StackKey, StorageError, ENTIRE_STACK,
    UNLIMITED_STACK,
};
use stash_structures::Keyed;

/// Copies held under one stack key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    pub key: StackKey,
    pub count: i32,
}

impl Stack {
    /// Create a new stack
    pub const fn new(key: StackKey, count: i32) -> Self {
        Self { key, count }
    }
}

/// One logical item and its stacks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    key: EntryKey,
    item: ItemRef,
    stacks: Vec<Stack>,
    limit: i32,
    #[serde(skip)]
    stack_keys: KeyGenerator<StackKey>,
    #[serde(skip)]
    revision: u64,
}

impl Keyed for Entry {
    type Key = EntryKey;

    fn key(&self) -> EntryKey {
        self.key
    }
}

impl Entry {
    /// Create an empty entry. The stack limit is read from the item once, here.
    pub fn new(key: EntryKey, item: ItemRef) -> Self {
        let limit = item_stack_limit(&item);
        Self {
            key,
            item,
            stacks: Vec::new(),
            limit,
            stack_keys: KeyGenerator::new(),
            revision: 0,
        }
    }

    pub fn key(&self) -> EntryKey {
        self.key
    }

    pub fn item(&self) -> &ItemRef {
        &self.item
    }

    /// Cached per-stack limit
    pub fn limit(&self) -> i32 {
        self.limit
    }

    fn is_unlimited(&self) -> bool {
        self.limit == UNLIMITED_STACK
    }

    /// Stacks in ascending key order
    pub fn stacks(&self) -> &[Stack] {
        &self.stacks
    }

    pub fn stack_count(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    /// Times this entry was released from a mutation guard
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    /// Mutable access to the item. Clones it first if the handle is shared.
    pub(crate) fn item_mut(&mut self) -> &mut Item {
        ItemRef::make_mut(&mut self.item)
    }

    fn stack_index(&self, key: StackKey) -> Option<usize> {
        self.stacks.binary_search_by(|stack| stack.key.cmp(&key)).ok()
    }

    pub fn contains(&self, key: StackKey) -> bool {
        self.stack_index(key).is_some()
    }

    pub fn get_stack(&self, key: StackKey) -> Option<&Stack> {
        self.stack_index(key).map(|i| &self.stacks[i])
    }

    /// Count at `key`, or 0 if there is no such stack
    pub fn stack_amount(&self, key: StackKey) -> i32 {
        self.get_stack(key).map_or(0, |stack| stack.count)
    }

    /// Total copies across all stacks
    pub fn stack_sum(&self) -> i32 {
        self.stacks.iter().map(|stack| stack.count).sum()
    }

    /// Whether `key` is the entry's last remaining stack
    pub fn is_only_stack(&self, key: StackKey) -> bool {
        self.stacks.len() == 1 && self.stacks[0].key == key
    }

    /// Whether the stack at `key` cannot take another copy
    pub fn is_stack_full(&self, key: StackKey) -> bool {
        match self.get_stack(key) {
            Some(stack) => !self.is_unlimited() && stack.count >= self.limit,
            None => false,
        }
    }

    pub fn copy_keys(&self) -> Vec<StackKey> {
        self.stacks.iter().map(|stack| stack.key).collect()
    }

    pub fn copy_addresses(&self) -> Vec<Address> {
        self.stacks.iter().map(|stack| self.address_of(stack.key)).collect()
    }

    pub fn address_of(&self, stack: StackKey) -> Address {
        Address::encode(self.key, stack)
    }

    pub fn first_address(&self) -> Option<Address> {
        self.stacks.first().map(|stack| self.address_of(stack.key))
    }

    /// Keys, item and stacks are all well-formed
    pub fn is_valid(&self) -> bool {
        self.key.is_valid()
            && self.item.is_valid()
            && !self.stacks.is_empty()
            && self.stacks.iter().all(|stack| stack.key.is_valid() && stack.count > 0)
            && self.stacks.windows(2).all(|pair| pair[0].key < pair[1].key)
            && (self.is_unlimited() || self.stacks.iter().all(|stack| stack.count <= self.limit))
    }

    /// View of one stack as an item stack
    pub fn to_stack_view(&self, key: StackKey) -> Option<ItemStack> {
        self.get_stack(key)
            .map(|stack| ItemStack::new(self.item.clone(), stack.count))
    }

    /// View of the whole entry as one item stack
    pub fn to_item_stack(&self) -> ItemStack {
        ItemStack::new(self.item.clone(), self.stack_sum())
    }

    /// How many new stacks placing `amount` copies would open
    fn stacks_needed(&self, amount: i32, only_new_stacks: bool) -> i64 {
        if amount <= 0 {
            return 0;
        }

        if self.is_unlimited() {
            return i64::from(only_new_stacks || self.stacks.is_empty());
        }

        let room: i64 = if only_new_stacks {
            0
        } else {
            self.stacks.iter().map(|stack| i64::from((self.limit - stack.count).max(0))).sum()
        };
        let overflow = (i64::from(amount) - room).max(0);
        let limit = i64::from(self.limit);
        (overflow + limit - 1) / limit
    }

    /// Check that enough stack keys are left to place `amount` copies
    pub fn check_room(&self, amount: i32, only_new_stacks: bool) -> Result<()> {
        if self.stacks_needed(amount, only_new_stacks) > self.stack_keys.remaining() {
            return Err(StorageError::KeysExhausted(self.stack_keys.position().value()));
        }
        Ok(())
    }

    /// Fill existing stacks in order, then spill into new ones. Returns every key touched.
    /// Nothing changes if the new stacks could not be keyed.
    pub fn add_to_any_stack(&mut self, amount: i32) -> Result<Vec<StackKey>> {
        self.check_room(amount, false)?;

        let mut remaining = amount;
        let mut touched = Vec::new();

        for stack in &mut self.stacks {
            if remaining <= 0 {
                break;
            }

            if self.limit == UNLIMITED_STACK {
                stack.count += remaining;
                remaining = 0;
                touched.push(stack.key);
                break;
            }

            let room = self.limit - stack.count;
            if room <= 0 {
                continue;
            }

            let added = room.min(remaining);
            stack.count += added;
            remaining -= added;
            touched.push(stack.key);
        }

        if remaining > 0 {
            touched.extend(self.add_to_new_stacks(remaining)?);
        }

        Ok(touched)
    }

    /// Create stacks of at most the limit until `amount` is placed. Returns the new keys.
    /// Nothing changes if the new stacks could not be keyed.
    pub fn add_to_new_stacks(&mut self, amount: i32) -> Result<Vec<StackKey>> {
        self.check_room(amount, true)?;

        let mut remaining = amount;
        let mut created = Vec::new();

        while remaining > 0 {
            let chunk = if self.is_unlimited() {
                remaining
            } else {
                remaining.min(self.limit)
            };

            let key = self.stack_keys.next_key()?;
            self.stacks.push(Stack::new(key, chunk));
            created.push(key);
            remaining -= chunk;
        }

        Ok(created)
    }

    /// Drain from the newest stack backward. Returns the amount that could not be removed
    /// and the keys touched.
    pub fn remove_from_any_stack(&mut self, amount: i32) -> (i32, Vec<StackKey>) {
        let mut remaining = amount;
        let mut touched = Vec::new();

        while remaining > 0 {
            let Some(last) = self.stacks.last_mut() else {
                break;
            };

            touched.push(last.key);
            if last.count <= remaining {
                remaining -= last.count;
                self.stacks.pop();
            } else {
                last.count -= remaining;
                remaining = 0;
            }
        }

        (remaining, touched)
    }

    /// Take up to `amount` from one stack ([`ENTIRE_STACK`] for all of it). The stack is
    /// removed when drained. Returns how many copies were taken.
    pub fn take_from_stack(&mut self, key: StackKey, amount: i32) -> i32 {
        let Some(index) = self.stack_index(key) else {
            return 0;
        };

        let count = self.stacks[index].count;
        let taken = if amount == ENTIRE_STACK { count } else { amount.clamp(0, count) };

        if taken == count {
            self.stacks.remove(index);
        } else {
            self.stacks[index].count -= taken;
        }

        taken
    }

    /// Move copies from one stack into another, bounded by what `from` holds and what `to`
    /// has room for. `from` is removed when drained. Returns the amount not moved.
    pub fn move_stack(&mut self, from: StackKey, to: StackKey, amount: i32) -> i32 {
        let (Some(from_index), Some(to_index)) = (self.stack_index(from), self.stack_index(to)) else {
            return amount;
        };

        if from_index == to_index {
            return amount;
        }

        let available = self.stacks[from_index].count;
        let wanted = if amount == ENTIRE_STACK { available } else { amount };
        let room = if self.is_unlimited() {
            wanted
        } else {
            (self.limit - self.stacks[to_index].count).max(0)
        };

        let moving = wanted.min(available).min(room);

        self.stacks[to_index].count += moving;
        self.stacks[from_index].count -= moving;

        if self.stacks[from_index].count == 0 {
            self.stacks.remove(from_index);
        }

        wanted - moving
    }

    /// Split `amount` off `key` into a fresh stack. The source must keep at least one copy.
    pub fn split_stack(&mut self, key: StackKey, amount: i32) -> Result<StackKey> {
        let index = self
            .stack_index(key)
            .ok_or(StorageError::StackNotFound(self.address_of(key)))?;
        if amount <= 0 || amount >= self.stacks[index].count {
            return Err(StorageError::InvalidAmount(amount));
        }

        let new_key = self.stack_keys.next_key()?;
        self.stacks[index].count -= amount;
        self.stacks.push(Stack::new(new_key, amount));
        Ok(new_key)
    }

    /// Overwrite a stack's count. A count of zero or below removes the stack.
    pub fn set_stack(&mut self, key: StackKey, count: i32) -> bool {
        let Some(index) = self.stack_index(key) else {
            return false;
        };

        if count <= 0 {
            self.stacks.remove(index);
        } else {
            self.stacks[index].count = count;
        }
        true
    }

    pub fn remove_stack(&mut self, key: StackKey) -> Option<Stack> {
        self.stack_index(key).map(|index| self.stacks.remove(index))
    }

    /// Bring the stack key generator past the highest loaded stack key
    pub(crate) fn restore_stack_keys(&mut self) {
        if let Some(last) = self.stacks.last() {
            if last.key > self.stack_keys.position() {
                // Cannot regress, the position was just compared
                let _ = self.stack_keys.set_position(last.key);
            }
        }
    }
}
