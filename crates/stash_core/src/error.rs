//! Error types for storage operations

use core::fmt;

use thiserror::Error;

use crate::key::{Address, EntryKey};

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// The kind of request an extension or default policy turned down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeniedOperation {
    /// Adding stacks
    Addition,
    /// Removing entries or stacks
    Removal,
    /// Editing stacks in place (merge, split)
    Edit,
}

impl fmt::Display for DeniedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Addition => write!(f, "Addition"),
            Self::Removal => write!(f, "Removal"),
            Self::Edit => write!(f, "Edit"),
        }
    }
}

/// Errors that can occur while operating on a storage
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// A key was the invalid sentinel
    #[error("Invalid entry key {0:?}")]
    InvalidKey(EntryKey),

    /// An address was empty
    #[error("Invalid address {0:?}")]
    InvalidAddress(Address),

    /// Amount was zero or below the whole-stack sentinel
    #[error("Invalid amount {0}")]
    InvalidAmount(i32),

    /// A tag was empty or outside the expected hierarchy
    #[error("Tag '{tag}' is not a valid {expected} tag")]
    InvalidTag {
        tag: String,
        expected: &'static str,
    },

    /// Entry does not exist
    #[error("Entry {0} not found")]
    EntryNotFound(EntryKey),

    /// Address does not resolve to a stack
    #[error("No stack at address {0}")]
    StackNotFound(Address),

    /// The target stack cannot take any more copies
    #[error("Stack at address {0} is full")]
    StackFull(Address),

    /// An extension or the default policy said no
    #[error("{operation} denied by policy ({tag})")]
    Denied {
        operation: DeniedOperation,
        tag: String,
    },

    /// A key generator was asked to move backwards
    #[error("Key position {requested} is not past current position {current}")]
    KeyRegression {
        requested: i32,
        current: i32,
    },

    /// A key generator has issued its last key
    #[error("Key space exhausted at position {0}")]
    KeysExhausted(i32),

    /// An extension with the same identifier is already registered
    #[error("Extension '{0}' is already registered")]
    DuplicateExtension(String),

    /// No extension with this identifier is registered
    #[error("Extension '{0}' not found")]
    ExtensionNotFound(String),

    /// The item is missing its identity
    #[error("Invalid item '{0}'")]
    InvalidItem(String),

    /// The item cannot be changed in place
    #[error("Item '{0}' is not mutable")]
    ItemNotMutable(String),

    /// Snapshot encoding or decoding failed
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Create a denial error
    pub fn denied(operation: DeniedOperation, tag: impl fmt::Display) -> Self {
        Self::Denied {
            operation,
            tag: tag.to_string(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Whether an extension or default policy rejected the request
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied { .. })
    }

    /// Whether the request was malformed or referred to something that does not exist
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidKey(_)
                | Self::InvalidAddress(_)
                | Self::InvalidAmount(_)
                | Self::InvalidTag { .. }
                | Self::EntryNotFound(_)
                | Self::StackNotFound(_)
                | Self::StackFull(_)
                | Self::InvalidItem(_)
                | Self::ItemNotMutable(_)
        )
    }
}
