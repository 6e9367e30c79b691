//! kplug installer
//!
//! Installs plugin binaries from verified archives into a versioned store
//! and links them into a shared bin directory. Install state is tracked by
//! one receipt per plugin. Archives are checksummed before extraction and
//! every archive entry and file rule is confined to its target directory.

pub mod archive;
pub mod error;
pub mod fetch;
pub mod installer;
pub mod move_files;
pub mod paths;
pub mod platform;
pub mod receipt;
pub mod version;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{InstallError, InstallStage, Outcome, Signal};
pub use fetch::{FetchPolicy, Fetcher, Verifier};
pub use installer::{InstallOptions, InstallerConfig, PluginInstaller, SELF_PLUGIN_NAME};
pub use paths::{Paths, DEFAULT_HOST_COMMAND};
pub use platform::{PlatformMatcher, PlatformTarget};
pub use receipt::InstallReceipt;
pub use version::Version;
