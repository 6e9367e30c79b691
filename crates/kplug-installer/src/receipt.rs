//! Install receipts.
//!
//! A receipt is the authoritative record that a plugin is installed: the
//! manifest it was installed from, the index that supplied it, and when it
//! was first installed.

use std::path::Path;

use chrono::{DateTime, Utc};
use kplug_index::PluginManifest;
use serde::{Deserialize, Serialize};

use crate::error::InstallError;

const RECEIPT_EXTENSION: &str = "yaml";

/// Where an installed plugin came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptSource {
    pub index: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReceipt {
    pub plugin: PluginManifest,
    pub source: ReceiptSource,
    /// Time of the first install; kept across upgrades.
    pub creation_timestamp: DateTime<Utc>,
}

impl InstallReceipt {
    pub fn new(
        manifest: PluginManifest,
        index_name: impl Into<String>,
        creation_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            plugin: manifest,
            source: ReceiptSource {
                index: index_name.into(),
            },
            creation_timestamp,
        }
    }

    pub fn name(&self) -> &str {
        &self.plugin.name
    }

    pub fn version(&self) -> &str {
        &self.plugin.version
    }
}

/// Serialize `receipt` to `path`. The parent directory must exist.
pub async fn store(receipt: &InstallReceipt, path: &Path) -> Result<(), InstallError> {
    let yaml = serde_yaml::to_string(receipt)?;
    tokio::fs::write(path, yaml).await.map_err(|e| {
        InstallError::Receipt(format!("failed to write {}: {e}", path.display()))
    })?;
    tracing::debug!(plugin = %receipt.name(), path = %path.display(), "stored receipt");
    Ok(())
}

/// Load the receipt at `path`.
///
/// A missing file is [`InstallError::ReceiptNotFound`], distinct from
/// read and parse failures.
pub async fn load(path: &Path) -> Result<InstallReceipt, InstallError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(InstallError::ReceiptNotFound(path.to_path_buf()));
        }
        Err(e) => {
            return Err(InstallError::Receipt(format!(
                "failed to read {}: {e}",
                path.display()
            )));
        }
    };

    serde_yaml::from_str(&content).map_err(|e| {
        InstallError::Receipt(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Load every receipt in `dir`, sorted by plugin name.
///
/// A missing directory yields an empty list.
pub async fn load_all(dir: &Path) -> Result<Vec<InstallReceipt>, InstallError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(InstallError::Receipt(format!(
                "failed to read {}: {e}",
                dir.display()
            )));
        }
    };

    let mut receipts = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(RECEIPT_EXTENSION) {
            continue;
        }
        receipts.push(load(&path).await?);
    }
    receipts.sort_by(|a, b| a.plugin.name.cmp(&b.plugin.name));
    Ok(receipts)
}
