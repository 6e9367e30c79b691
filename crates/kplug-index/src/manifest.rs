//! Plugin manifest parsing and validation.
//!
//! Parses the YAML manifests published in a plugin index. A manifest
//! names the plugin, pins its version, and lists one download descriptor
//! per supported platform.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// Length of a hex-encoded SHA-256 digest.
const SHA256_HEX_LEN: usize = 64;

/// Plugin manifest as published in an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Installation identity of the plugin.
    pub name: String,
    /// Semantic version with a leading `v`, e.g. `v1.2.3`.
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    /// Download descriptors, evaluated in order.
    pub platforms: Vec<PlatformDescriptor>,
}

/// One platform-specific way of installing the plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformDescriptor {
    pub selector: Selector,
    pub uri: String,
    /// Hex-encoded SHA-256 of the archive at `uri`.
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileOperation>,
    /// Path of the entry point, relative to the installed version directory.
    pub bin: String,
}

/// A `from` glob and a `to` destination relative to the install directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOperation {
    pub from: String,
    pub to: String,
}

impl FileOperation {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Label selector over `os` / `arch` labels.
///
/// `match_labels` entries and `match_expressions` are ANDed together. An
/// empty selector matches every platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<SelectorRequirement>,
}

impl Selector {
    /// Selector requiring exact `os` and `arch` labels.
    pub fn os_arch(os: &str, arch: &str) -> Self {
        let mut match_labels = BTreeMap::new();
        match_labels.insert("os".to_string(), os.to_string());
        match_labels.insert("arch".to_string(), arch.to_string());
        Self {
            match_labels,
            match_expressions: Vec::new(),
        }
    }
}

/// A set-membership expression inside a [`Selector`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

// ─── Validation helpers ─────────────────────────────────────────────

/// Validate that a plugin name is usable as a single path segment.
///
/// The name keys the install directory and the receipt file, so it must
/// not contain separators or be a relative-directory marker.
pub fn validate_plugin_name(name: &str) -> Result<(), IndexError> {
    if name.is_empty() {
        return Err(IndexError::InvalidManifest(
            "plugin name must not be empty".into(),
        ));
    }
    if name == "." || name == ".." {
        return Err(IndexError::InvalidManifest(format!(
            "plugin name must not be '{name}'"
        )));
    }
    if let Some(ch) = name
        .chars()
        .find(|c| matches!(c, '/' | '\\' | ':') || c.is_whitespace() || c.is_control())
    {
        return Err(IndexError::InvalidManifest(format!(
            "plugin name contains invalid character {ch:?}: '{name}'"
        )));
    }
    Ok(())
}

/// Validate that a path is relative and never climbs out with `..`.
fn validate_path_safety(path: &str, field_name: &str) -> Result<(), IndexError> {
    let p = Path::new(path);
    if p.is_absolute() || path.starts_with('/') || path.starts_with('\\') {
        return Err(IndexError::InvalidManifest(format!(
            "{field_name} must be a relative path, got absolute: '{path}'"
        )));
    }
    for component in p.components() {
        if matches!(component, Component::ParentDir) {
            return Err(IndexError::InvalidManifest(format!(
                "{field_name} must not contain '..': '{path}'"
            )));
        }
    }
    Ok(())
}

fn validate_sha256(value: &str, field_name: &str) -> Result<(), IndexError> {
    if value.len() != SHA256_HEX_LEN || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(IndexError::InvalidManifest(format!(
            "{field_name} must be {SHA256_HEX_LEN} hex characters, got '{value}'"
        )));
    }
    Ok(())
}

impl PluginManifest {
    /// Parse a plugin manifest from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, IndexError> {
        let manifest: PluginManifest = serde_yaml::from_str(yaml)?;
        Ok(manifest)
    }

    /// Validate all fields of a parsed manifest.
    pub fn validate(&self) -> Result<(), IndexError> {
        validate_plugin_name(&self.name)?;

        if !self.version.starts_with('v') {
            return Err(IndexError::InvalidManifest(format!(
                "version must start with 'v', got '{}'",
                self.version
            )));
        }

        if self.platforms.is_empty() {
            return Err(IndexError::InvalidManifest(format!(
                "plugin '{}' declares no platforms",
                self.name
            )));
        }

        for (i, platform) in self.platforms.iter().enumerate() {
            if platform.uri.trim().is_empty() {
                return Err(IndexError::InvalidManifest(format!(
                    "platforms[{i}].uri must not be empty"
                )));
            }
            validate_sha256(&platform.sha256, &format!("platforms[{i}].sha256"))?;

            if platform.bin.is_empty() {
                return Err(IndexError::InvalidManifest(format!(
                    "platforms[{i}].bin must not be empty"
                )));
            }
            validate_path_safety(&platform.bin, &format!("platforms[{i}].bin"))?;

            for (j, op) in platform.files.iter().enumerate() {
                if op.from.is_empty() || op.to.is_empty() {
                    return Err(IndexError::InvalidManifest(format!(
                        "platforms[{i}].files[{j}] needs both 'from' and 'to'"
                    )));
                }
                validate_path_safety(&op.to, &format!("platforms[{i}].files[{j}].to"))?;
            }
        }

        Ok(())
    }

    /// Parse and validate a plugin manifest from a YAML string.
    pub fn parse_and_validate(yaml: &str) -> Result<Self, IndexError> {
        let manifest = Self::parse(yaml)?;
        manifest.validate()?;
        Ok(manifest)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
