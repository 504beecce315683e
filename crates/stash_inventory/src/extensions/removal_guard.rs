//! Static removal and edit policy

use std::any::Any;

use stash_core::{Address, EntryKey, ExtensionId, InventoryTag};

use crate::container::ItemContainer;
use crate::extension::{Extension, ExtensionResponse};

/// Explicitly allows or denies removal reasons and edit tags. Unlisted tags get no answer.
#[derive(Debug, Clone, Default)]
pub struct RemovalGuardExtension {
    denied_removals: Vec<InventoryTag>,
    allowed_removals: Vec<InventoryTag>,
    denied_edits: Vec<InventoryTag>,
    allowed_edits: Vec<InventoryTag>,
}

impl RemovalGuardExtension {
    pub fn extension_id() -> ExtensionId {
        ExtensionId::from_name("stash.removal_guard")
    }

    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_removal(mut self, reason: InventoryTag) -> Self {
        self.denied_removals.push(reason);
        self
    }

    pub fn allow_removal(mut self, reason: InventoryTag) -> Self {
        self.allowed_removals.push(reason);
        self
    }

    pub fn deny_edit(mut self, tag: InventoryTag) -> Self {
        self.denied_edits.push(tag);
        self
    }

    pub fn allow_edit(mut self, tag: InventoryTag) -> Self {
        self.allowed_edits.push(tag);
        self
    }

    fn answer(denied: &[InventoryTag], allowed: &[InventoryTag], tag: &InventoryTag) -> ExtensionResponse {
        if denied.contains(tag) {
            ExtensionResponse::Disallowed
        } else if allowed.contains(tag) {
            ExtensionResponse::Allowed
        } else {
            ExtensionResponse::NoExplicitResponse
        }
    }
}

impl Extension for RemovalGuardExtension {
    fn identifier(&self) -> ExtensionId {
        Self::extension_id()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn allows_removal(&self, _container: &dyn ItemContainer, _address: Address, reason: &InventoryTag) -> ExtensionResponse {
        Self::answer(&self.denied_removals, &self.allowed_removals, reason)
    }

    fn allows_edit(&self, _container: &dyn ItemContainer, _key: EntryKey, tag: &InventoryTag) -> ExtensionResponse {
        Self::answer(&self.denied_edits, &self.allowed_edits, tag)
    }
}
