// Content Model
// A resolved catalog entry: where a downloaded item lives on disk

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A catalog item resolved from a content identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    /// Content identifier as known by the download catalog
    pub id: String,

    /// Absolute path on disk (file or directory)
    pub path: PathBuf,

    /// Display name for the item
    pub name: String,
}

impl ContentItem {
    pub fn new(id: impl Into<String>, path: PathBuf, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path,
            name: name.into(),
        }
    }
}
