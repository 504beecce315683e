//! Extensions - policy and observer modules attached to a container
//!
//! Every addition, removal and edit asks the container's extensions for permission, then
//! tells them what happened. Permission answers fold in a fixed order (static extensions,
//! dynamic extensions, then the parent group) and the first [`ExtensionResponse::Disallowed`]
//! ends the fold. Notifications always reach every extension.
//!
//! An [`ExtensionGroup`] is itself an extension, so groups nest. A group may also point to a
//! single shared parent group, which is consulted after the group's own extensions.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use stash_core::{Address, ContainerId, EntryKey, ExtensionId, InventoryTag, ItemStack, Result, StorageError};

use crate::container::ItemContainer;
use crate::event::{EventLog, EventLogBatch};

/// An extension's answer to a permission query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExtensionResponse {
    #[default]
    NoExplicitResponse,
    Allowed,
    Disallowed,
}

impl ExtensionResponse {
    /// Collapse to a decision, using `default` when nobody answered
    pub fn resolve(self, default: bool) -> bool {
        match self {
            Self::NoExplicitResponse => default,
            Self::Allowed => true,
            Self::Disallowed => false,
        }
    }
}

/// Fold responses in order. `Disallowed` short-circuits; otherwise `Allowed` wins over no answer.
pub fn fold_responses<I>(responses: I) -> ExtensionResponse
where
    I: IntoIterator<Item = ExtensionResponse>,
{
    let mut result = ExtensionResponse::NoExplicitResponse;
    for response in responses {
        match response {
            ExtensionResponse::Disallowed => return ExtensionResponse::Disallowed,
            ExtensionResponse::Allowed => result = ExtensionResponse::Allowed,
            ExtensionResponse::NoExplicitResponse => {}
        }
    }
    result
}

/// Where added copies go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddStackBehavior {
    /// Top up existing stacks before creating new ones
    #[default]
    AddToAnyStack,
    /// Always create new stacks
    OnlyNewStacks,
}

/// How several stacks are judged by an addition check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddStackTestType {
    /// Each stack on its own
    #[default]
    IndividualTests,
    /// All stacks together
    GroupTest,
}

/// Arguments to [`Extension::allows_addition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdditionArgs {
    pub behavior: AddStackBehavior,
    pub test_type: AddStackTestType,
}

impl AdditionArgs {
    pub fn new(behavior: AddStackBehavior, test_type: AddStackTestType) -> Self {
        Self { behavior, test_type }
    }
}

/// A policy or observer module
///
/// All hooks have empty defaults. [`post_event_batch`](Extension::post_event_batch) by default
/// splits a batch into single events and routes them by tag.
pub trait Extension: Any + Send + Sync {
    /// Stable identifier, also the key for save data
    fn identifier(&self) -> ExtensionId;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Called once per container this extension becomes attached to
    fn initialize_extension(&mut self, _container: &dyn ItemContainer) {}

    /// Called once per container this extension is detached from
    fn deinitialize_extension(&mut self, _container: &dyn ItemContainer) {}

    fn allows_addition(&self, _container: &dyn ItemContainer, _stacks: &[ItemStack], _args: AdditionArgs) -> ExtensionResponse {
        ExtensionResponse::NoExplicitResponse
    }

    fn pre_addition(&mut self, _container: &dyn ItemContainer, _stack: &ItemStack) {}

    fn post_addition(&mut self, _container: &dyn ItemContainer, _event: &EventLog) {}

    fn allows_removal(&self, _container: &dyn ItemContainer, _address: Address, _reason: &InventoryTag) -> ExtensionResponse {
        ExtensionResponse::NoExplicitResponse
    }

    fn pre_removal(&mut self, _container: &dyn ItemContainer, _key: EntryKey, _amount: i32) {}

    fn post_removal(&mut self, _container: &dyn ItemContainer, _event: &EventLog) {}

    fn allows_edit(&self, _container: &dyn ItemContainer, _key: EntryKey, _tag: &InventoryTag) -> ExtensionResponse {
        ExtensionResponse::NoExplicitResponse
    }

    fn post_entry_changed(&mut self, _container: &dyn ItemContainer, _event: &EventLog) {}

    fn post_event_batch(&mut self, container: &dyn ItemContainer, batch: &EventLogBatch) {
        dispatch_event_batch(self, container, batch);
    }

    /// State to persist with the container
    fn save_data(&self) -> Option<Vec<u8>> {
        None
    }

    /// Restore state written by [`save_data`](Extension::save_data)
    fn load_data(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Route each event of a batch to the single-event hook matching its tag
pub fn dispatch_event_batch<E>(extension: &mut E, container: &dyn ItemContainer, batch: &EventLogBatch)
where
    E: Extension + ?Sized,
{
    for log in batch.logs() {
        if log.is_addition() {
            extension.post_addition(container, &log);
        } else if log.is_removal() {
            extension.post_removal(container, &log);
        } else {
            extension.post_entry_changed(container, &log);
        }
    }
}

/// Parent handle shared between several groups
pub type SharedExtensionGroup = Arc<RwLock<ExtensionGroup>>;

/// An ordered set of extensions, optionally chained to a parent group
pub struct ExtensionGroup {
    id: ExtensionId,
    static_extensions: Vec<Box<dyn Extension>>,
    dynamic_extensions: Vec<Box<dyn Extension>>,
    parent: Option<SharedExtensionGroup>,
    containers: Vec<ContainerId>,
}

impl ExtensionGroup {
    /// Create an empty group
    pub fn new() -> Self {
        Self::with_id(ExtensionId::random())
    }

    /// Create an empty group with a fixed identifier
    pub fn with_id(id: ExtensionId) -> Self {
        Self {
            id,
            static_extensions: Vec::new(),
            dynamic_extensions: Vec::new(),
            parent: None,
            containers: Vec::new(),
        }
    }

    /// Stand-in left behind while the real group is borrowed out of its container
    pub(crate) fn placeholder() -> Self {
        Self::with_id(ExtensionId::NIL)
    }

    /// Add a static extension before the group is attached to any container
    pub fn with_extension<E: Extension>(mut self, extension: E) -> Self {
        self.static_extensions.push(Box::new(extension));
        self
    }

    /// Wrap in a shareable handle for use as a parent
    pub fn into_shared(self) -> SharedExtensionGroup {
        Arc::new(RwLock::new(self))
    }

    pub fn parent(&self) -> Option<&SharedExtensionGroup> {
        self.parent.as_ref()
    }

    /// Link to a parent group, returning the previous one
    pub fn set_parent(&mut self, parent: Option<SharedExtensionGroup>) -> Option<SharedExtensionGroup> {
        std::mem::replace(&mut self.parent, parent)
    }

    /// Containers this group is initialized for
    pub fn containers(&self) -> &[ContainerId] {
        &self.containers
    }

    /// Number of direct extensions
    pub fn len(&self) -> usize {
        self.static_extensions.len() + self.dynamic_extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identifiers of direct extensions, static first
    pub fn identifiers(&self) -> Vec<ExtensionId> {
        self.iter().map(|ext| ext.identifier()).collect()
    }

    fn iter(&self) -> impl Iterator<Item = &Box<dyn Extension>> {
        self.static_extensions.iter().chain(self.dynamic_extensions.iter())
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Extension>> {
        self.static_extensions.iter_mut().chain(self.dynamic_extensions.iter_mut())
    }

    fn contains_id(&self, id: ExtensionId) -> bool {
        self.iter().any(|ext| ext.identifier() == id)
    }

    /// Add an extension at runtime and initialize it for every given container this group
    /// is attached to
    pub fn add_extension(&mut self, mut extension: Box<dyn Extension>, containers: &[&dyn ItemContainer]) -> Result<()> {
        let id = extension.identifier();
        if id == self.id || self.contains_id(id) {
            return Err(StorageError::DuplicateExtension(id.to_string()));
        }

        for container in containers {
            if self.containers.contains(&container.container_id()) {
                extension.initialize_extension(*container);
            }
        }

        log::info!("Extension {} added", id);
        self.dynamic_extensions.push(extension);
        Ok(())
    }

    /// Remove a runtime extension, deinitializing it for the given containers first
    pub fn remove_extension(&mut self, id: ExtensionId, containers: &[&dyn ItemContainer]) -> Result<Box<dyn Extension>> {
        let index = self
            .dynamic_extensions
            .iter()
            .position(|ext| ext.identifier() == id)
            .ok_or_else(|| StorageError::ExtensionNotFound(id.to_string()))?;

        let mut extension = self.dynamic_extensions.remove(index);
        for container in containers {
            if self.containers.contains(&container.container_id()) {
                extension.deinitialize_extension(*container);
            }
        }

        log::info!("Extension {} removed", id);
        Ok(extension)
    }

    /// Whether an extension of type `T` is attached. `recursive` also searches nested groups
    /// and the parent chain.
    pub fn has_extension<T: Extension>(&self, recursive: bool) -> bool {
        for ext in self.iter() {
            if ext.as_any().is::<T>() {
                return true;
            }
            if recursive {
                if let Some(group) = ext.as_any().downcast_ref::<ExtensionGroup>() {
                    if group.has_extension::<T>(true) {
                        return true;
                    }
                }
            }
        }

        recursive && self.parent.as_ref().is_some_and(|parent| parent.read().has_extension::<T>(true))
    }

    /// First extension of type `T`, searching nested groups but not the parent
    pub fn get_extension<T: Extension>(&self) -> Option<&T> {
        for ext in self.iter() {
            if let Some(found) = ext.as_any().downcast_ref::<T>() {
                return Some(found);
            }
            if let Some(group) = ext.as_any().downcast_ref::<ExtensionGroup>() {
                if let Some(found) = group.get_extension::<T>() {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Mutable access to the first extension of type `T`
    pub fn get_extension_mut<T: Extension>(&mut self) -> Option<&mut T> {
        for ext in self.iter_mut() {
            if ext.as_any().is::<T>() {
                return ext.as_any_mut().downcast_mut::<T>();
            }
            if ext.as_any().is::<ExtensionGroup>() {
                let group = ext.as_any_mut().downcast_mut::<ExtensionGroup>()?;
                if let Some(found) = group.get_extension_mut::<T>() {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Save data of every direct and nested extension, keyed by identifier
    pub fn collect_save_data(&self) -> BTreeMap<ExtensionId, Vec<u8>> {
        let mut out = BTreeMap::new();
        self.collect_into(&mut out);
        out
    }

    fn collect_into(&self, out: &mut BTreeMap<ExtensionId, Vec<u8>>) {
        for ext in self.iter() {
            if let Some(group) = ext.as_any().downcast_ref::<ExtensionGroup>() {
                group.collect_into(out);
            } else if let Some(data) = ext.save_data() {
                out.insert(ext.identifier(), data);
            }
        }
    }

    /// Hand saved data back to matching extensions. Unknown identifiers are ignored.
    pub fn apply_save_data(&mut self, data: &BTreeMap<ExtensionId, Vec<u8>>) -> Result<()> {
        for ext in self.iter_mut() {
            if ext.as_any().is::<ExtensionGroup>() {
                if let Some(group) = ext.as_any_mut().downcast_mut::<ExtensionGroup>() {
                    group.apply_save_data(data)?;
                }
            } else if let Some(bytes) = data.get(&ext.identifier()) {
                ext.load_data(bytes)?;
            }
        }
        Ok(())
    }

    fn fold<F>(&self, query: F) -> ExtensionResponse
    where
        F: Fn(&dyn Extension) -> ExtensionResponse,
    {
        let local = fold_responses(self.iter().map(|ext| query(&**ext)));
        if local == ExtensionResponse::Disallowed {
            return local;
        }

        match &self.parent {
            Some(parent) => fold_responses([local, query(&*parent.read())]),
            None => local,
        }
    }

    fn for_each<F>(&mut self, mut notify: F)
    where
        F: FnMut(&mut dyn Extension),
    {
        for ext in self.iter_mut() {
            notify(&mut **ext);
        }

        if let Some(parent) = &self.parent {
            notify(&mut *parent.write());
        }
    }
}

impl Default for ExtensionGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExtensionGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionGroup")
            .field("id", &self.id)
            .field("extensions", &self.identifiers())
            .field("has_parent", &self.parent.is_some())
            .field("containers", &self.containers)
            .finish()
    }
}

impl Extension for ExtensionGroup {
    fn identifier(&self) -> ExtensionId {
        self.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn initialize_extension(&mut self, container: &dyn ItemContainer) {
        let id = container.container_id();
        if self.containers.contains(&id) {
            return;
        }
        self.containers.push(id);
        self.for_each(|ext| ext.initialize_extension(container));
    }

    fn deinitialize_extension(&mut self, container: &dyn ItemContainer) {
        let id = container.container_id();
        let Some(index) = self.containers.iter().position(|c| *c == id) else {
            return;
        };
        self.containers.remove(index);
        self.for_each(|ext| ext.deinitialize_extension(container));
    }

    fn allows_addition(&self, container: &dyn ItemContainer, stacks: &[ItemStack], args: AdditionArgs) -> ExtensionResponse {
        self.fold(|ext| ext.allows_addition(container, stacks, args))
    }

    fn pre_addition(&mut self, container: &dyn ItemContainer, stack: &ItemStack) {
        self.for_each(|ext| ext.pre_addition(container, stack));
    }

    fn post_addition(&mut self, container: &dyn ItemContainer, event: &EventLog) {
        self.for_each(|ext| ext.post_addition(container, event));
    }

    fn allows_removal(&self, container: &dyn ItemContainer, address: Address, reason: &InventoryTag) -> ExtensionResponse {
        self.fold(|ext| ext.allows_removal(container, address, reason))
    }

    fn pre_removal(&mut self, container: &dyn ItemContainer, key: EntryKey, amount: i32) {
        self.for_each(|ext| ext.pre_removal(container, key, amount));
    }

    fn post_removal(&mut self, container: &dyn ItemContainer, event: &EventLog) {
        self.for_each(|ext| ext.post_removal(container, event));
    }

    fn allows_edit(&self, container: &dyn ItemContainer, key: EntryKey, tag: &InventoryTag) -> ExtensionResponse {
        self.fold(|ext| ext.allows_edit(container, key, tag))
    }

    fn post_entry_changed(&mut self, container: &dyn ItemContainer, event: &EventLog) {
        self.for_each(|ext| ext.post_entry_changed(container, event));
    }

    fn post_event_batch(&mut self, container: &dyn ItemContainer, batch: &EventLogBatch) {
        self.for_each(|ext| ext.post_event_batch(container, batch));
    }
}
