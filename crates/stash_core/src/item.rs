//! Item identity, stack limits and item stacks

use std::collections::BTreeMap;
use std::ops::BitOr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Amount meaning "every copy in the entry/stack"
pub const ENTIRE_STACK: i32 = -1;

/// Stack limit meaning "no limit"
pub const UNLIMITED_STACK: i32 = -1;

/// True for a positive count or the unlimited sentinel
#[inline]
pub const fn is_valid_stack_amount(value: i32) -> bool {
    value > 0 || value == UNLIMITED_STACK
}

/// Shared handle to an item. Immutable items may be held by many entries at once.
pub type ItemRef = Arc<Item>;

/// Item property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ItemProperty {
    /// Integer value
    Int(i64),
    /// Float value
    Float(f64),
    /// Boolean value
    Bool(bool),
    /// String value
    String(String),
}

impl ItemProperty {
    /// Get as integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Get as string
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

/// How much of two items [`Item::compare_with`] looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComparisonFlags(u8);

impl ComparisonFlags {
    /// Compare nothing beyond identity
    pub const NONE: Self = Self(0);
    /// Either item being mutable makes them unequal
    pub const MUTABILITY_TREAT_AS_UNEQUIVOCABLE: Self = Self(1 << 0);
    /// Skip the mutability check entirely
    pub const MUTABILITY_IGNORE: Self = Self(1 << 1);
    /// Mutability must match
    pub const MUTABILITY_COMPARE: Self = Self(1 << 2);
    /// Only compare primary identifiers
    pub const COMPARE_PRIMARY_IDENTIFIERS: Self = Self(1 << 3);
    /// Compare identifiers, tags and properties
    pub const COMPARE_ALL: Self = Self(1 << 4);

    /// Used when folding incoming stacks into existing entries
    pub const DEFAULT: Self = Self(Self::MUTABILITY_TREAT_AS_UNEQUIVOCABLE.0 | Self::COMPARE_PRIMARY_IDENTIFIERS.0);
    /// Ignore mutability, compare everything else
    pub const CHECK_DATA_ONLY: Self = Self(Self::MUTABILITY_IGNORE.0 | Self::COMPARE_ALL.0);

    /// Check whether any bit of `other` is set
    #[inline]
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for ComparisonFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl Default for ComparisonFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// How a storage looks for an existing entry holding an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemEqualsCheck {
    /// Same allocation
    ComparePointers,
    /// Structural comparison via [`Item::compare_with`] with default flags
    UseCompareWith,
}

/// A logical item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Primary identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Authored stack limit (0 or below = unlimited)
    pub max_stack: i32,
    /// Whether each instance may diverge from others (mutable items never stack)
    pub mutable: bool,
    /// Tags for filtering
    pub tags: Vec<String>,
    /// Custom properties
    pub properties: BTreeMap<String, ItemProperty>,
}

impl Item {
    /// Create a new immutable, unlimited item
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            max_stack: 0,
            mutable: false,
            tags: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Set max stack size
    pub fn with_max_stack(mut self, max: i32) -> Self {
        self.max_stack = max;
        self
    }

    /// Make this item a mutable instance
    pub fn mutable(mut self) -> Self {
        self.mutable = true;
        self
    }

    /// Add a tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Add a property
    pub fn with_property(mut self, key: impl Into<String>, value: ItemProperty) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Wrap in a shared handle
    pub fn into_ref(self) -> ItemRef {
        Arc::new(self)
    }

    /// Check if item has a tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Whether this instance may be changed after creation
    pub fn can_mutate(&self) -> bool {
        self.mutable
    }

    /// Structural comparison
    pub fn compare_with(&self, other: &Item, flags: ComparisonFlags) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }

        if !flags.contains(ComparisonFlags::MUTABILITY_IGNORE) {
            if flags.contains(ComparisonFlags::MUTABILITY_TREAT_AS_UNEQUIVOCABLE) {
                if self.mutable || other.mutable {
                    return false;
                }
            } else if flags.contains(ComparisonFlags::MUTABILITY_COMPARE) && self.mutable != other.mutable {
                return false;
            }
        }

        if flags.contains(ComparisonFlags::COMPARE_PRIMARY_IDENTIFIERS) {
            return self.id == other.id;
        }

        self.id == other.id && self.tags == other.tags && self.properties == other.properties
    }

    /// Whether this item is well-formed enough to be stored
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty()
    }
}

/// The largest count a single stack of `item` may hold, or [`UNLIMITED_STACK`]
pub fn item_stack_limit(item: &Item) -> i32 {
    // Mutable instances can vary, so each one is its own stack
    if item.can_mutate() {
        return 1;
    }

    if item.max_stack <= 0 {
        return UNLIMITED_STACK;
    }

    item.max_stack
}

/// Some number of copies of an item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemStack {
    /// The item
    pub item: ItemRef,
    /// Number of copies
    pub copies: i32,
}

impl ItemStack {
    /// Create a new item stack
    pub fn new(item: ItemRef, copies: i32) -> Self {
        Self { item, copies }
    }

    /// Create a single item
    pub fn single(item: ItemRef) -> Self {
        Self::new(item, 1)
    }

    /// Valid when the item is valid and the copy count is a valid stack amount
    pub fn is_valid(&self) -> bool {
        self.item.is_valid() && is_valid_stack_amount(self.copies)
    }
}

impl PartialEq for ItemStack {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.item, &other.item) && self.copies == other.copies
    }
}
