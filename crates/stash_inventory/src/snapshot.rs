//! Save data for a storage and its extensions

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use stash_core::{ExtensionId, Result, StorageError};

use crate::entry::Entry;

/// Entries plus per-extension state, keyed by extension identifier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSnapshot {
    pub entries: Vec<Entry>,
    pub extension_data: BTreeMap<ExtensionId, Vec<u8>>,
}

impl StorageSnapshot {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| StorageError::serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| StorageError::serialization(e.to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| StorageError::serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| StorageError::serialization(e.to_string()))
    }

    /// Write the binary form to a file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes).map_err(|e| StorageError::serialization(e.to_string()))
    }

    /// Read the binary form from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| StorageError::serialization(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}
