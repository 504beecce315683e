//! Hierarchical reason tags
//!
//! Tags are dotted paths such as `Inventory.Removal.Moving`. A tag matches any of its
//! ancestors, so policies can key off a whole branch of the taxonomy.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A dotted, hierarchical tag describing why something happened
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InventoryTag(Cow<'static, str>);

impl InventoryTag {
    /// Create a tag from a static path
    pub const fn from_static(path: &'static str) -> Self {
        Self(Cow::Borrowed(path))
    }

    /// Create a tag from an owned path
    pub fn new(path: impl Into<String>) -> Self {
        Self(Cow::Owned(path.into()))
    }

    /// The empty tag
    pub const fn none() -> Self {
        Self::from_static("")
    }

    /// Full dotted path
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A tag is valid when it is non-empty
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
    }

    /// True if this tag equals `parent` or lives beneath it
    pub fn matches_tag(&self, parent: &InventoryTag) -> bool {
        if !parent.is_valid() {
            return false;
        }

        match self.0.strip_prefix(parent.as_str()) {
            Some("") => true,
            Some(rest) => rest.starts_with('.'),
            None => false,
        }
    }

    /// Parent path, if any
    pub fn parent(&self) -> Option<InventoryTag> {
        self.0.rfind('.').map(|idx| InventoryTag::new(&self.0[..idx]))
    }
}

impl Default for InventoryTag {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for InventoryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InventoryTag({})", self.0)
    }
}

impl fmt::Display for InventoryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for InventoryTag {
    fn from(path: &'static str) -> Self {
        Self::from_static(path)
    }
}

/// Built-in tags
pub mod tags {
    use super::InventoryTag;

    /// Items entered a container
    pub const ADDITION: InventoryTag = InventoryTag::from_static("Inventory.Addition");

    /// Root of every removal reason
    pub const REMOVAL_BASE: InventoryTag = InventoryTag::from_static("Inventory.Removal");
    /// Items were destroyed
    pub const REMOVAL_DELETION: InventoryTag = InventoryTag::from_static("Inventory.Removal.Deletion");
    /// Items left to go somewhere else
    pub const REMOVAL_MOVING: InventoryTag = InventoryTag::from_static("Inventory.Removal.Moving");
    /// Items were thrown out of the container
    pub const REMOVAL_EJECTION: InventoryTag = InventoryTag::from_static("Inventory.Removal.Ejection");

    /// Root of every edit reason
    pub const EDIT_BASE: InventoryTag = InventoryTag::from_static("Inventory.Edit");
    /// Two stacks were merged
    pub const EDIT_MERGE: InventoryTag = InventoryTag::from_static("Inventory.Edit.Merge");
    /// A stack was split in two
    pub const EDIT_SPLIT: InventoryTag = InventoryTag::from_static("Inventory.Edit.Split");
    /// The item inside an entry changed
    pub const EDIT_ITEM_MUTATED: InventoryTag = InventoryTag::from_static("Inventory.Edit.ItemMutated");

    /// Removal reasons allowed unless an extension objects
    pub fn removal_allowed_by_default() -> Vec<InventoryTag> {
        vec![REMOVAL_DELETION, REMOVAL_MOVING]
    }

    /// Edit reasons allowed unless an extension objects
    pub fn edit_allowed_by_default() -> Vec<InventoryTag> {
        vec![EDIT_MERGE, EDIT_SPLIT]
    }
}
