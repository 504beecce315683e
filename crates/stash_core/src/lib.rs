//! # stash_core - Stash Core Primitives
//!
//! Foundational types shared by every Stash crate:
//! - **Keys**: entry/stack keys and their monotonic generator
//! - **Addresses**: entry and stack key packed into one 64-bit value
//! - **Tags**: hierarchical reasons for removals and edits
//! - **Items**: item identity, comparison and stack limits
//! - **Config**: storage configuration loaded from TOML
//!
//! ## Key lifetime
//! Keys are never reused for the life of a generator. Code outside the storage may hold a
//! key long after its entry is gone, and must never see it resolve to a different item.

pub mod config;
pub mod error;
pub mod id;
pub mod item;
pub mod key;
pub mod tag;

pub use config::*;
pub use error::*;
pub use id::*;
pub use item::*;
pub use key::*;
pub use tag::{tags, InventoryTag};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::StorageConfig;
    pub use crate::error::{DeniedOperation, Result, StorageError};
    pub use crate::id::{ContainerId, ExtensionId};
    pub use crate::item::{Item, ItemEqualsCheck, ItemRef, ItemStack, ENTIRE_STACK, UNLIMITED_STACK};
    pub use crate::key::{Address, EntryKey, KeyGenerator, StackKey};
    pub use crate::tag::{tags, InventoryTag};
}
