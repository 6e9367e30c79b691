//! kplug plugin index
//!
//! Manifest data model shared by the installer and the CLI: plugin
//! manifests, per-platform download descriptors, label selectors, and a
//! loader for manifests stored in a local index directory.

pub mod error;
pub mod loader;
pub mod manifest;

pub use error::IndexError;
pub use loader::{IndexLoader, DEFAULT_INDEX};
pub use manifest::{
    validate_plugin_name, FileOperation, PlatformDescriptor, PluginManifest, Selector,
    SelectorOperator, SelectorRequirement,
};
