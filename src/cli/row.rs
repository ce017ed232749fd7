use std::path::Path;

use anyhow::{Context, Result};
use regvault::registry::StringMap;
use regvault::ContainerRegistryRow;
use serde::{Deserialize, Serialize};

/// A stored registry row as a readable JSON document
///
/// The blobs of [`ContainerRegistryRow`] are kept as nested objects instead of
/// byte strings so the file can be inspected and edited by hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowDocument {
    pub registry_type: String,
    pub name: String,
    #[serde(default)]
    pub non_secret: StringMap,
    #[serde(default)]
    pub encrypted_secret: StringMap,
    #[serde(default)]
    pub extras: StringMap,
}

impl RowDocument {
    pub fn from_row(row: &ContainerRegistryRow) -> Result<Self> {
        Ok(Self {
            registry_type: row.registry_type.clone(),
            name: row.name.clone(),
            non_secret: blob_to_map(&row.non_secret).context("Invalid non_secret blob")?,
            encrypted_secret: blob_to_map(&row.encrypted_secret)
                .context("Invalid encrypted_secret blob")?,
            extras: blob_to_map(&row.extras).context("Invalid extras blob")?,
        })
    }

    pub fn to_row(&self) -> Result<ContainerRegistryRow> {
        Ok(ContainerRegistryRow {
            registry_type: self.registry_type.clone(),
            name: self.name.clone(),
            non_secret: serde_json::to_vec(&self.non_secret)?,
            encrypted_secret: serde_json::to_vec(&self.encrypted_secret)?,
            extras: serde_json::to_vec(&self.extras)?,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = read_input(path)?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse row document {}", path.display()))
    }
}

fn blob_to_map(blob: &[u8]) -> Result<StringMap> {
    if blob.is_empty() {
        return Ok(StringMap::new());
    }
    let map: Option<StringMap> = serde_json::from_slice(blob)?;
    Ok(map.unwrap_or_default())
}

/// Read a file, or stdin when the path is `-`
pub fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        use std::io::Read;

        let mut buffer = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buffer)
            .context("Failed to read from stdin")?;
        return Ok(buffer);
    }

    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}
