//! Dataset descriptions
//!
//! A dataset is a flat list of shards, each living on one host. The
//! description is usually read from a TOML file:
//!
//! ```toml
//! name = "events-2024"
//!
//! [[shard]]
//! host = "node-a"
//! path = "/data/events/part-0000.bin"
//! entries = 120000
//!
//! [[shard]]
//! host = "node-b"
//! path = "/data/events/part-0001.bin"
//! first = 1000
//! ```

mod element;

pub use element::{Element, ElementSpec};

use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Dataset as described on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescription {
    /// Human-readable dataset name
    #[serde(default)]
    pub name: String,

    /// Shards in insertion order
    #[serde(default, rename = "shard")]
    pub shards: Vec<ElementSpec>,
}

impl DatasetDescription {
    pub fn new(name: impl Into<String>, shards: Vec<ElementSpec>) -> Self {
        Self {
            name: name.into(),
            shards,
        }
    }

    /// Load a dataset description from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "Loading dataset description");

        let content = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to read dataset file");
            e
        })?;

        let dataset: DatasetDescription = toml::from_str(&content)?;
        tracing::info!(
            name = %dataset.name,
            shards = dataset.shards.len(),
            "Dataset description loaded"
        );
        Ok(dataset)
    }

    /// Save the description to a TOML file (atomic write)
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        let temp_path = path.with_extension("toml.tmp");
        std::fs::write(&temp_path, &toml_string)?;
        std::fs::rename(&temp_path, path)?;

        tracing::debug!(path = %path.display(), "Dataset description saved");
        Ok(())
    }

    /// Convert into scheduler elements, preserving order
    pub fn into_elements(self) -> Vec<Element> {
        self.shards.into_iter().map(Element::from_spec).collect()
    }
}
