//! Storage configuration
//!
//! Configuration can be built in code or read from TOML:
//!
//! ```toml
//! key_baseline = 100
//! reset_keys_on_clear = false
//! track_write_lock = false
//! auto_sync_changes = true
//! removal_allowed_by_default = ["Inventory.Removal.Deletion", "Inventory.Removal.Moving"]
//! edit_allowed_by_default = ["Inventory.Edit.Merge", "Inventory.Edit.Split"]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::key::KEY_BASELINE;
use crate::tag::{tags, InventoryTag};

/// Errors from configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Value entry key generation starts from
    pub key_baseline: i32,
    /// Rewind entry keys on clear. Only safe for tooling that holds no stale keys.
    pub reset_keys_on_clear: bool,
    /// Trace every write-lock transition
    pub track_write_lock: bool,
    /// Flush pending changes to observers at the end of every mutating call
    pub auto_sync_changes: bool,
    /// Removal reasons allowed unless an extension objects
    pub removal_allowed_by_default: Vec<InventoryTag>,
    /// Edit reasons allowed unless an extension objects
    pub edit_allowed_by_default: Vec<InventoryTag>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            key_baseline: KEY_BASELINE,
            reset_keys_on_clear: false,
            track_write_lock: false,
            auto_sync_changes: true,
            removal_allowed_by_default: tags::removal_allowed_by_default(),
            edit_allowed_by_default: tags::edit_allowed_by_default(),
        }
    }
}

impl StorageConfig {
    /// Parse from a TOML string
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: StorageConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check values that serde alone cannot
    pub fn validate(&self) -> ConfigResult<()> {
        if self.key_baseline < 0 {
            return Err(ConfigError::Validation(format!(
                "key_baseline must not be negative (got {})",
                self.key_baseline
            )));
        }

        for tag in &self.removal_allowed_by_default {
            if !tag.matches_tag(&tags::REMOVAL_BASE) {
                return Err(ConfigError::Validation(format!("'{}' is not a removal tag", tag)));
            }
        }

        for tag in &self.edit_allowed_by_default {
            if !tag.matches_tag(&tags::EDIT_BASE) {
                return Err(ConfigError::Validation(format!("'{}' is not an edit tag", tag)));
            }
        }

        Ok(())
    }

    /// Whether `reason` is allowed for removal when no extension answers
    pub fn removal_allowed(&self, reason: &InventoryTag) -> bool {
        self.removal_allowed_by_default.contains(reason)
    }

    /// Whether `tag` is allowed for editing when no extension answers
    pub fn edit_allowed(&self, tag: &InventoryTag) -> bool {
        self.edit_allowed_by_default.contains(tag)
    }
}
