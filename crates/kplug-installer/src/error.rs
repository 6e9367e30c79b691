//! Installer error types and lifecycle signals.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Stage of an install operation, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    Resolve,
    Fetch,
    Verify,
    Extract,
    Move,
    Link,
    Receipt,
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstallStage::Resolve => "resolve",
            InstallStage::Fetch => "fetch",
            InstallStage::Verify => "verify",
            InstallStage::Extract => "extract",
            InstallStage::Move => "move",
            InstallStage::Link => "link",
            InstallStage::Receipt => "receipt",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("fetch error: {uri}: {message}")]
    Fetch { uri: String, message: String },

    #[error("exec fetcher is disabled, refusing to run '{0}'")]
    ExecDisabled(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("suspicious archive entry: '{0}'")]
    SuspiciousPath(String),

    #[error("extract error: {0}")]
    Extract(String),

    #[error("move error: {0}")]
    Move(String),

    #[error("path escapes sandbox: '{}' is not under '{}'", .path.display(), .root.display())]
    PathEscape { path: PathBuf, root: PathBuf },

    #[error("link error: {0}")]
    Link(String),

    #[error("receipt error: {0}")]
    Receipt(String),

    #[error("receipt not found: {}", .0.display())]
    ReceiptNotFound(PathBuf),

    #[error("plugin {plugin} was installed but its receipt could not be stored, uninstall may fail: {message}")]
    ReceiptInconsistent { plugin: String, message: String },

    #[error("plugin {plugin} does not offer installation for {os}/{arch}")]
    UnsupportedPlatform {
        plugin: String,
        os: String,
        arch: String,
    },

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("refusing to uninstall {plugin} through itself, remove {} manually", .root.display())]
    SelfUninstall { plugin: String, root: PathBuf },

    #[error("uninstall of {plugin} incomplete: {message}")]
    Uninstall { plugin: String, message: String },

    #[error(transparent)]
    Index(#[from] kplug_index::IndexError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl InstallError {
    /// Stage the failure is attributed to.
    pub fn stage(&self) -> InstallStage {
        match self {
            InstallError::Fetch { .. } | InstallError::ExecDisabled(_) => InstallStage::Fetch,
            InstallError::ChecksumMismatch { .. } => InstallStage::Verify,
            InstallError::UnsupportedFormat(_)
            | InstallError::SuspiciousPath(_)
            | InstallError::Extract(_) => InstallStage::Extract,
            InstallError::Move(_) | InstallError::PathEscape { .. } => InstallStage::Move,
            InstallError::Link(_) => InstallStage::Link,
            InstallError::Receipt(_)
            | InstallError::ReceiptNotFound(_)
            | InstallError::ReceiptInconsistent { .. }
            | InstallError::Yaml(_) => InstallStage::Receipt,
            InstallError::UnsupportedPlatform { .. }
            | InstallError::InvalidSelector(_)
            | InstallError::InvalidVersion(_)
            | InstallError::SelfUninstall { .. }
            | InstallError::Uninstall { .. }
            | InstallError::Index(_)
            | InstallError::Io(_) => InstallStage::Resolve,
        }
    }

    /// Failures that indicate tampered or hostile input.
    pub fn is_security_failure(&self) -> bool {
        matches!(
            self,
            InstallError::ChecksumMismatch { .. }
                | InstallError::SuspiciousPath(_)
                | InstallError::PathEscape { .. }
                | InstallError::ExecDisabled(_)
        )
    }
}

/// Expected no-op conditions that callers should not report as failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    AlreadyInstalled,
    NotInstalled,
    AlreadyUpgraded,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Signal::AlreadyInstalled => "already installed",
            Signal::NotInstalled => "not installed",
            Signal::AlreadyUpgraded => "already upgraded",
        };
        f.write_str(text)
    }
}

/// Result of a lifecycle operation that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Done(T),
    Skipped(Signal),
}

impl<T> Outcome<T> {
    pub fn signal(&self) -> Option<Signal> {
        match self {
            Outcome::Done(_) => None,
            Outcome::Skipped(signal) => Some(*signal),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }
}
