//! Read-mostly capability surface that extensions see

use stash_core::{Address, ContainerId, EntryKey, ItemRef, ItemStack};

/// A container of keyed item entries
pub trait ItemContainer {
    /// Process-unique id of this container
    fn container_id(&self) -> ContainerId;

    fn contains_key(&self, key: EntryKey) -> bool;

    fn contains_address(&self, address: Address) -> bool;

    /// Whole entry as one item stack
    fn view_entry(&self, key: EntryKey) -> Option<ItemStack>;

    /// One stack as an item stack
    fn view_stack(&self, address: Address) -> Option<ItemStack>;

    /// Total copies in an entry, 0 if missing
    fn entry_amount(&self, key: EntryKey) -> i32;

    /// Copies in one stack, 0 if missing
    fn stack_amount(&self, address: Address) -> i32;

    fn entry_count(&self) -> usize;

    /// Whether adding `item` would fold into an existing entry
    fn has_entry_for(&self, item: &ItemRef) -> bool;

    fn for_each_key(&self, f: &mut dyn FnMut(EntryKey));

    fn for_each_address(&self, f: &mut dyn FnMut(Address));

    /// Hand over up to `copies` from a stack, removing them with the moving reason
    fn release(&mut self, address: Address, copies: i32) -> Option<ItemStack>;
}
