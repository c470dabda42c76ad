use std::collections::BTreeMap;

use serde::Deserialize;

use crate::content_types::{ContentTypeTable, DEFAULT_CONTENT_TYPE, UNKNOWN_EXTENSION};
use crate::error::{StorageError, StorageResult};

/// Settings consumed by the mapper, blob store and accessor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base of all resource identifiers, e.g. `http://localhost:3000/`.
    pub base_url: String,
    /// Bucket holding every object.
    pub bucket: String,
    /// Key prefix under which resources are stored. Must end in `/`.
    pub root: String,
    /// Content type of documents whose extension is not in the table.
    pub default_content_type: String,
    /// Extension appended to keys whose content type has no known extension.
    pub unknown_extension: String,
    /// Suffix of metadata sidecars; its extension picks the sidecar format.
    pub sidecar_suffix: String,
    /// Extra extension -> content type entries, overriding the built-in table.
    pub content_types: BTreeMap<String, String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/".to_string(),
            bucket: "pod".to_string(),
            root: "data/".to_string(),
            default_content_type: DEFAULT_CONTENT_TYPE.to_string(),
            unknown_extension: UNKNOWN_EXTENSION.to_string(),
            sidecar_suffix: ".meta".to_string(),
            content_types: BTreeMap::new(),
        }
    }
}

impl StorageConfig {
    /// Checks the settings and normalizes the root prefix.
    pub fn validate(mut self) -> StorageResult<Self> {
        if self.bucket.is_empty() {
            return Err(StorageError::Internal("bucket name must not be empty".into()));
        }
        let root = self.root.trim_start_matches('/');
        if root.is_empty() {
            return Err(StorageError::Internal("root prefix must not be empty".into()));
        }
        self.root = if root.ends_with('/') {
            root.to_string()
        } else {
            format!("{}/", root)
        };
        if !self.sidecar_suffix.starts_with('.') || self.sidecar_suffix.contains('/') {
            return Err(StorageError::Internal(format!(
                "invalid sidecar suffix '{}'",
                self.sidecar_suffix
            )));
        }
        if self.unknown_extension.is_empty() || self.unknown_extension.contains(['.', '/', '$']) {
            return Err(StorageError::Internal(format!(
                "invalid fallback extension '{}'",
                self.unknown_extension
            )));
        }
        Ok(self)
    }

    pub fn content_type_table(&self) -> ContentTypeTable {
        ContentTypeTable::with_overrides(&self.default_content_type, &self.content_types)
    }
}
