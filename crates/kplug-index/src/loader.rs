//! Loads manifests from a local index checkout.
//!
//! Layout: `{index_dir}/{index_name}/plugins/{plugin_name}.yaml`.

use std::path::{Path, PathBuf};

use crate::error::IndexError;
use crate::manifest::{validate_plugin_name, PluginManifest};

/// Name of the index used when none is given.
pub const DEFAULT_INDEX: &str = "default";

#[derive(Debug, Clone)]
pub struct IndexLoader {
    index_dir: PathBuf,
}

impl IndexLoader {
    pub fn new(index_dir: impl Into<PathBuf>) -> Self {
        Self {
            index_dir: index_dir.into(),
        }
    }

    /// Path of a plugin manifest inside the named index.
    pub fn manifest_path(&self, index_name: &str, plugin_name: &str) -> PathBuf {
        self.index_dir
            .join(index_name)
            .join("plugins")
            .join(format!("{plugin_name}.yaml"))
    }

    /// Load and validate a manifest by plugin name.
    pub fn load(&self, index_name: &str, plugin_name: &str) -> Result<PluginManifest, IndexError> {
        validate_plugin_name(index_name)?;
        validate_plugin_name(plugin_name)?;

        let manifest = Self::load_file(&self.manifest_path(index_name, plugin_name))?;
        if manifest.name != plugin_name {
            return Err(IndexError::InvalidManifest(format!(
                "manifest for '{plugin_name}' declares name '{}'",
                manifest.name
            )));
        }
        Ok(manifest)
    }

    /// Load and validate a manifest from an explicit file.
    pub fn load_file(path: &Path) -> Result<PluginManifest, IndexError> {
        tracing::debug!(path = %path.display(), "loading plugin manifest");

        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                IndexError::NotFound(path.to_path_buf())
            } else {
                IndexError::Io(e)
            }
        })?;

        PluginManifest::parse_and_validate(&content)
    }
}
