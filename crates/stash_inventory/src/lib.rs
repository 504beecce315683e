//! # stash_inventory - Keyed Item Storage
//!
//! A storage holds entries, one per distinct item. Each entry holds one or more stacks
//! bounded by the item's stack limit. Entries and stacks are named by keys that are never
//! reused, and a stack is addressed by the pair packed into an [`Address`](stash_core::Address).
//!
//! # Features
//!
//! - Adding, removing, moving, merging and splitting stacks
//! - Extensions that veto operations and observe every completed event
//! - Filtered queries and lazy address/item iteration
//! - A change feed of added, updated and removed addresses
//! - Snapshots in JSON or bincode
//!
//! # Example
//!
//! ```ignore
//! use stash_inventory::prelude::*;
//!
//! let mut storage = ItemStorage::new().with_extension(ItemLimitExtension::new(20, -1));
//!
//! let arrows = Item::new("arrow", "Arrow").with_max_stack(10).into_ref();
//! let key = storage.add_item_stack(ItemStack::new(arrows, 25), AddStackBehavior::AddToAnyStack);
//!
//! assert_eq!(storage.entry_amount(key), 25);
//! assert_eq!(storage.get_addresses_for_entry(key).len(), 3);
//! ```

pub mod container;
pub mod content;
pub mod entry;
pub mod event;
pub mod extension;
pub mod extensions;
pub mod query;
pub mod snapshot;
pub mod storage;

pub use container::ItemContainer;
pub use content::{ChangeKind, InventoryContent, MutationGuard, StorageChange};
pub use entry::{Entry, Stack};
pub use event::{EventData, EventLog, EventLogBatch};
pub use extension::{
    dispatch_event_batch, fold_responses, AddStackBehavior, AddStackTestType, AdditionArgs, Extension,
    ExtensionGroup, ExtensionResponse, SharedExtensionGroup,
};
pub use query::{AddressIter, CursorState, FilterBuilder, ItemIter, StorageFilter, StorageQuery, StorageSort};
pub use snapshot::StorageSnapshot;
pub use storage::ItemStorage;

pub mod prelude {
    pub use crate::container::ItemContainer;
    pub use crate::content::{ChangeKind, StorageChange};
    pub use crate::entry::{Entry, Stack};
    pub use crate::event::{EventData, EventLog, EventLogBatch};
    pub use crate::extension::{
        AddStackBehavior, AddStackTestType, AdditionArgs, Extension, ExtensionGroup, ExtensionResponse,
        SharedExtensionGroup,
    };
    pub use crate::extensions::{ItemLimitExtension, LoggedEvent, LoggerExtension, RemovalGuardExtension};
    pub use crate::query::{FilterBuilder, StorageFilter, StorageQuery, StorageSort};
    pub use crate::snapshot::StorageSnapshot;
    pub use crate::storage::ItemStorage;

    pub use stash_core::prelude::*;
    pub use stash_event::{Priority, SubscriberId};
}
