//! Install root layout.
//!
//! ```text
//! {root}/bin/{host}-{plugin}           active binary links
//! {root}/store/{plugin}/{version}/     installed files
//! {root}/receipts/{plugin}.yaml        install receipts
//! {root}/index/{index}/plugins/        local manifest indexes
//! ```

use std::path::{Path, PathBuf};

use crate::error::InstallError;

/// Host command plugins extend when none is configured.
pub const DEFAULT_HOST_COMMAND: &str = "kubectl";

/// Directory-name of the default install root under the home directory.
const DEFAULT_ROOT_DIR: &str = ".kplug";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    base: PathBuf,
}

impl Paths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// `~/.kplug`, or `None` when no home directory is known.
    pub fn default_root() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(DEFAULT_ROOT_DIR))
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.base.join("bin")
    }

    pub fn store_dir(&self) -> PathBuf {
        self.base.join("store")
    }

    pub fn receipts_dir(&self) -> PathBuf {
        self.base.join("receipts")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.base.join("index")
    }

    /// `store/{name}`, holding every installed version of a plugin.
    pub fn plugin_install_dir(&self, name: &str) -> PathBuf {
        self.store_dir().join(name)
    }

    pub fn plugin_version_dir(&self, name: &str, version: &str) -> PathBuf {
        self.plugin_install_dir(name).join(version)
    }

    pub fn receipt_path(&self, name: &str) -> PathBuf {
        self.receipts_dir().join(format!("{name}.yaml"))
    }

    /// Create bin, store, receipts, and index directories.
    pub async fn ensure_dirs(&self) -> Result<(), InstallError> {
        for dir in [
            self.bin_dir(),
            self.store_dir(),
            self.receipts_dir(),
            self.index_dir(),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }
}

/// File name of the link for plugin `name`, e.g. `kubectl-view_secret`.
pub fn bin_name(host_command: &str, name: &str) -> String {
    let name = name.replace('-', "_");
    if cfg!(windows) {
        format!("{host_command}-{name}.exe")
    } else {
        format!("{host_command}-{name}")
    }
}
