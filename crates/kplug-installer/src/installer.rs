//! Plugin lifecycle: install, upgrade, uninstall.
//!
//! A plugin is installed iff its receipt exists. Each operation checks the
//! receipt first and returns a [`Signal`] instead of an error when there is
//! nothing to do.
//!
//! There is no lock around the receipt check and the receipt write. Two
//! processes operating on the same plugin under the same root at the same
//! time can race; callers that need this must serialize invocations
//! themselves.

use std::path::{Path, PathBuf};

use chrono::Utc;
use kplug_index::{validate_plugin_name, FileOperation, PlatformDescriptor, PluginManifest};

use crate::archive;
use crate::error::{InstallError, Outcome, Signal};
use crate::fetch::{fetcher_for, FetchPolicy, FileFetcher, Fetcher, Sha256Verifier};
use crate::move_files;
use crate::paths::{bin_name, Paths, DEFAULT_HOST_COMMAND};
use crate::platform::{PlatformMatcher, PlatformTarget};
use crate::receipt::{self, InstallReceipt};
use crate::version::Version;

// ─── Constants ──────────────────────────────────────────────────────────

/// Plugin entry under which the manager installs itself.
pub const SELF_PLUGIN_NAME: &str = "kplug";

/// Prefix of the per-install download directory.
const DOWNLOAD_DIR_PREFIX: &str = "kplug-downloads";

// ─── Configuration ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct InstallerConfig {
    pub paths: Paths,
    pub target: PlatformTarget,
    pub fetch_policy: FetchPolicy,
    /// Command plugins extend; prefixes link names.
    pub host_command: String,
    /// Plugin entry that refers to the manager itself.
    pub self_name: String,
}

impl InstallerConfig {
    /// Config for `root` targeting the host platform.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            paths: Paths::new(root),
            target: PlatformTarget::host(),
            fetch_policy: FetchPolicy::default(),
            host_command: DEFAULT_HOST_COMMAND.to_string(),
            self_name: SELF_PLUGIN_NAME.to_string(),
        }
    }

    pub fn with_target(mut self, target: PlatformTarget) -> Self {
        self.target = target;
        self
    }

    pub fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = policy;
        self
    }
}

/// Per-call install options.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Read the archive from this local file instead of the descriptor URI.
    /// The descriptor checksum still applies.
    pub archive_override: Option<PathBuf>,
}

// ─── Installer ──────────────────────────────────────────────────────────

/// Drives plugin installs against one install root.
pub struct PluginInstaller {
    config: InstallerConfig,
    matcher: PlatformMatcher,
}

impl PluginInstaller {
    pub fn new(config: InstallerConfig) -> Self {
        let matcher = PlatformMatcher::new(config.target.clone());
        Self { config, matcher }
    }

    pub fn paths(&self) -> &Paths {
        &self.config.paths
    }

    /// Path of the link for plugin `name` in the bin directory.
    pub fn link_path(&self, name: &str) -> PathBuf {
        self.config
            .paths
            .bin_dir()
            .join(bin_name(&self.config.host_command, name))
    }

    /// Install a plugin that is not yet installed.
    pub async fn install(
        &self,
        manifest: &PluginManifest,
        index_name: &str,
        opts: &InstallOptions,
    ) -> Result<Outcome<InstallReceipt>, InstallError> {
        let name = manifest.name.as_str();
        validate_plugin_name(name)?;
        tracing::info!(plugin = %name, version = %manifest.version, "installing plugin");

        if self.lookup_receipt(name).await?.is_some() {
            tracing::info!(plugin = %name, "plugin already installed");
            return Ok(Outcome::Skipped(Signal::AlreadyInstalled));
        }

        let descriptor = self.select_platform(manifest)?;
        self.config.paths.ensure_dirs().await?;

        let version_dir = self
            .config
            .paths
            .plugin_version_dir(name, &manifest.version);
        self.install_version(name, descriptor, &version_dir, opts)
            .await?;

        let receipt = InstallReceipt::new(manifest.clone(), index_name, Utc::now());
        self.store_receipt(&receipt).await?;

        tracing::info!(
            plugin = %name,
            version = %manifest.version,
            dir = %version_dir.display(),
            "plugin installed successfully"
        );
        Ok(Outcome::Done(receipt))
    }

    /// Replace an installed plugin with a strictly newer version.
    ///
    /// The old version directory is removed afterwards, except for the
    /// manager's own entry on platforms that lock running executables.
    pub async fn upgrade(
        &self,
        manifest: &PluginManifest,
        index_name: &str,
        opts: &InstallOptions,
    ) -> Result<Outcome<InstallReceipt>, InstallError> {
        let name = manifest.name.as_str();
        validate_plugin_name(name)?;

        let Some(installed) = self.lookup_receipt(name).await? else {
            tracing::info!(plugin = %name, "plugin not installed, nothing to upgrade");
            return Ok(Outcome::Skipped(Signal::NotInstalled));
        };

        let current = Version::parse(installed.version())?;
        let candidate = Version::parse(&manifest.version)?;
        if !current.less(&candidate) {
            tracing::info!(
                plugin = %name,
                installed = %current,
                candidate = %candidate,
                "plugin already up to date"
            );
            return Ok(Outcome::Skipped(Signal::AlreadyUpgraded));
        }

        tracing::info!(plugin = %name, from = %current, to = %candidate, "upgrading plugin");

        let descriptor = self.select_platform(manifest)?;
        self.config.paths.ensure_dirs().await?;

        let new_dir = self
            .config
            .paths
            .plugin_version_dir(name, &manifest.version);
        self.install_version(name, descriptor, &new_dir, opts)
            .await?;

        let receipt =
            InstallReceipt::new(manifest.clone(), index_name, installed.creation_timestamp);
        self.store_receipt(&receipt).await?;

        let old_dir = self
            .config
            .paths
            .plugin_version_dir(name, installed.version());
        if name == self.config.self_name && running_binary_is_locked() {
            tracing::warn!(
                plugin = %name,
                dir = %old_dir.display(),
                "old version is in use, leaving it for a later cleanup"
            );
        } else {
            remove_dir_if_exists(&old_dir).await.map_err(|e| {
                InstallError::Move(format!(
                    "upgraded {name} but could not remove old version {}: {e}",
                    old_dir.display()
                ))
            })?;
        }

        tracing::info!(plugin = %name, version = %candidate, "plugin upgraded successfully");
        Ok(Outcome::Done(receipt))
    }

    /// Remove an installed plugin's link, files, and receipt.
    ///
    /// All three removals are attempted even if one fails; completed
    /// removals are not rolled back.
    pub async fn uninstall(&self, name: &str) -> Result<Outcome<()>, InstallError> {
        if name == self.config.self_name {
            return Err(InstallError::SelfUninstall {
                plugin: name.to_string(),
                root: self.config.paths.base().to_path_buf(),
            });
        }
        validate_plugin_name(name)?;

        if self.lookup_receipt(name).await?.is_none() {
            tracing::info!(plugin = %name, "plugin not installed, nothing to uninstall");
            return Ok(Outcome::Skipped(Signal::NotInstalled));
        }

        tracing::info!(plugin = %name, "uninstalling plugin");
        let mut failures = Vec::new();

        let link = self.link_path(name);
        if let Err(e) = remove_link(&link).await {
            failures.push(format!("link {}: {e}", link.display()));
        }

        let install_dir = self.config.paths.plugin_install_dir(name);
        if let Err(e) = remove_dir_if_exists(&install_dir).await {
            failures.push(format!("directory {}: {e}", install_dir.display()));
        }

        let receipt_path = self.config.paths.receipt_path(name);
        if let Err(e) = tokio::fs::remove_file(&receipt_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                failures.push(format!("receipt {}: {e}", receipt_path.display()));
            }
        }

        if !failures.is_empty() {
            return Err(InstallError::Uninstall {
                plugin: name.to_string(),
                message: failures.join("; "),
            });
        }

        tracing::info!(plugin = %name, "plugin uninstalled");
        Ok(Outcome::Done(()))
    }

    /// Remove version directories of `name` other than the installed one.
    ///
    /// Returns the removed directories. Directories that cannot be removed
    /// are logged and skipped.
    pub async fn cleanup_stale_versions(&self, name: &str) -> Result<Vec<PathBuf>, InstallError> {
        validate_plugin_name(name)?;
        let Some(installed) = self.lookup_receipt(name).await? else {
            return Ok(Vec::new());
        };

        let install_dir = self.config.paths.plugin_install_dir(name);
        let mut entries = match tokio::fs::read_dir(&install_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut removed = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if entry.file_name().to_str() == Some(installed.version()) {
                continue;
            }

            let path = entry.path();
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    tracing::info!(plugin = %name, dir = %path.display(), "removed stale version");
                    removed.push(path);
                }
                Err(e) => {
                    tracing::warn!(
                        plugin = %name,
                        dir = %path.display(),
                        error = %e,
                        "failed to remove stale version"
                    );
                }
            }
        }
        Ok(removed)
    }

    /// Receipts of every installed plugin, sorted by name.
    pub async fn list_installed(&self) -> Result<Vec<InstallReceipt>, InstallError> {
        receipt::load_all(&self.config.paths.receipts_dir()).await
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn lookup_receipt(&self, name: &str) -> Result<Option<InstallReceipt>, InstallError> {
        match receipt::load(&self.config.paths.receipt_path(name)).await {
            Ok(receipt) => Ok(Some(receipt)),
            Err(InstallError::ReceiptNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn select_platform<'a>(
        &self,
        manifest: &'a PluginManifest,
    ) -> Result<&'a PlatformDescriptor, InstallError> {
        self.matcher
            .find(&manifest.platforms)?
            .ok_or_else(|| InstallError::UnsupportedPlatform {
                plugin: manifest.name.clone(),
                os: self.config.target.os.clone(),
                arch: self.config.target.arch.clone(),
            })
    }

    /// Fetch, extract, and commit a descriptor into `version_dir`, then
    /// point the plugin's link at its binary.
    async fn install_version(
        &self,
        name: &str,
        descriptor: &PlatformDescriptor,
        version_dir: &Path,
        opts: &InstallOptions,
    ) -> Result<(), InstallError> {
        // Removed on drop, whichever way this returns.
        let download_dir = tempfile::Builder::new()
            .prefix(DOWNLOAD_DIR_PREFIX)
            .tempdir()
            .map_err(|e| InstallError::Extract(format!("failed to create download dir: {e}")))?;

        let fetcher: Box<dyn Fetcher> = match &opts.archive_override {
            Some(path) => {
                tracing::info!(plugin = %name, archive = %path.display(), "using local archive");
                Box::new(FileFetcher::with_override(path))
            }
            None => fetcher_for(&descriptor.uri, &self.config.fetch_policy)?,
        };
        let mut verifier = Sha256Verifier::new(&descriptor.sha256);

        tracing::info!(plugin = %name, uri = %descriptor.uri, "downloading archive");
        archive::fetch_and_extract(
            fetcher.as_ref(),
            &mut verifier,
            &descriptor.uri,
            download_dir.path(),
        )
        .await?;

        let ops = if descriptor.files.is_empty() {
            vec![FileOperation::new("*", ".")]
        } else {
            descriptor.files.clone()
        };
        move_files::stage_and_commit(download_dir.path(), version_dir, &ops).await?;

        let binary = version_dir.join(&descriptor.bin);
        if !move_files::is_subpath(version_dir, &binary) {
            return Err(InstallError::PathEscape {
                path: binary,
                root: version_dir.to_path_buf(),
            });
        }

        // Relative links resolve against the bin directory, not the cwd.
        let binary = std::path::absolute(&binary).map_err(|e| {
            InstallError::Link(format!("failed to resolve {}: {e}", binary.display()))
        })?;
        create_or_update_link(&binary, &self.link_path(name)).await
    }

    async fn store_receipt(&self, receipt: &InstallReceipt) -> Result<(), InstallError> {
        let path = self.config.paths.receipt_path(receipt.name());
        receipt::store(receipt, &path)
            .await
            .map_err(|e| InstallError::ReceiptInconsistent {
                plugin: receipt.name().to_string(),
                message: e.to_string(),
            })
    }
}

// ─── Filesystem helpers ─────────────────────────────────────────────────

fn running_binary_is_locked() -> bool {
    cfg!(windows)
}

async fn remove_dir_if_exists(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Remove the link at `link`. Absent is fine; a non-link is an error.
async fn remove_link(link: &Path) -> Result<(), InstallError> {
    let metadata = match tokio::fs::symlink_metadata(link).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(InstallError::Link(format!(
                "failed to stat {}: {e}",
                link.display()
            )));
        }
    };

    if !metadata.file_type().is_symlink() {
        return Err(InstallError::Link(format!(
            "{} is not a symlink, refusing to replace it",
            link.display()
        )));
    }

    tokio::fs::remove_file(link)
        .await
        .map_err(|e| InstallError::Link(format!("failed to remove {}: {e}", link.display())))?;
    tracing::debug!(link = %link.display(), "removed link");
    Ok(())
}

/// Point `link` at `binary`, replacing an existing symlink.
async fn create_or_update_link(binary: &Path, link: &Path) -> Result<(), InstallError> {
    match tokio::fs::metadata(binary).await {
        Ok(metadata) if metadata.is_file() => {}
        Ok(_) => {
            return Err(InstallError::Link(format!(
                "plugin binary {} is not a regular file",
                binary.display()
            )));
        }
        Err(e) => {
            return Err(InstallError::Link(format!(
                "plugin binary {} not found: {e}",
                binary.display()
            )));
        }
    }

    remove_link(link).await?;

    #[cfg(unix)]
    let result = tokio::fs::symlink(binary, link).await;
    #[cfg(windows)]
    let result = tokio::fs::symlink_file(binary, link).await;

    result.map_err(|e| {
        InstallError::Link(format!(
            "failed to link {} to {}: {e}",
            link.display(),
            binary.display()
        ))
    })?;
    tracing::debug!(link = %link.display(), target = %binary.display(), "linked plugin binary");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use kplug_index::Selector;

    use crate::fetch::sha256_hex;
    use crate::testutil::{tar_gz, zip_archive, Entry};

    struct Fixture {
        root: tempfile::TempDir,
        archives: tempfile::TempDir,
        installer: PluginInstaller,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let archives = tempfile::tempdir().unwrap();
            let config = InstallerConfig::new(root.path())
                .with_target(PlatformTarget::new("linux", "amd64"));
            Self {
                root,
                archives,
                installer: PluginInstaller::new(config),
            }
        }

        fn paths(&self) -> &Paths {
            self.installer.paths()
        }

        /// Write `data` as an archive and return its path and checksum.
        fn archive(&self, file_name: &str, data: &[u8]) -> (PathBuf, String) {
            let path = self.archives.path().join(file_name);
            fs::write(&path, data).unwrap();
            (path, sha256_hex(data))
        }

        /// Manifest for `foo` at `version` whose archive is a local file.
        fn foo(&self, version: &str) -> PluginManifest {
            let data = tar_gz(&[Entry::file("foo", version.as_bytes(), 0o755)]);
            let (path, sha256) = self.archive(&format!("foo-{version}.tar.gz"), &data);
            manifest(
                "foo",
                version,
                descriptor(path.to_str().unwrap(), &sha256, vec![FileOperation::new("*", ".")], "foo"),
            )
        }

        /// Relative paths of everything under the root, links not followed.
        fn snapshot(&self) -> Vec<(PathBuf, Vec<u8>)> {
            let mut out = Vec::new();
            walk(self.root.path(), self.root.path(), &mut out);
            out.sort();
            out
        }
    }

    fn walk(base: &Path, dir: &Path, out: &mut Vec<(PathBuf, Vec<u8>)>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            let meta = fs::symlink_metadata(&path).unwrap();
            let rel = path.strip_prefix(base).unwrap().to_path_buf();
            if meta.is_dir() {
                out.push((rel, Vec::new()));
                walk(base, &path, out);
            } else if meta.file_type().is_symlink() {
                let target = fs::read_link(&path).unwrap();
                out.push((rel, target.to_string_lossy().as_bytes().to_vec()));
            } else {
                out.push((rel, fs::read(&path).unwrap()));
            }
        }
    }

    fn descriptor(uri: &str, sha256: &str, files: Vec<FileOperation>, bin: &str) -> PlatformDescriptor {
        PlatformDescriptor {
            selector: Selector::os_arch("linux", "amd64"),
            uri: uri.to_string(),
            sha256: sha256.to_string(),
            files,
            bin: bin.to_string(),
        }
    }

    fn manifest(name: &str, version: &str, descriptor: PlatformDescriptor) -> PluginManifest {
        PluginManifest {
            name: name.to_string(),
            version: version.to_string(),
            short_description: None,
            homepage: None,
            platforms: vec![descriptor],
        }
    }

    fn no_opts() -> InstallOptions {
        InstallOptions::default()
    }

    // ── Lifecycle scenarios ───────────────────────────────────────────

    #[tokio::test]
    async fn test_lifecycle_install_upgrade_uninstall() {
        let fx = Fixture::new();
        let v1 = fx.foo("v1.0.0");
        let v2 = fx.foo("v1.1.0");
        let link = fx.installer.link_path("foo");
        assert!(link.ends_with(bin_name("kubectl", "foo")));

        // Fresh install.
        let outcome = fx.installer.install(&v1, "default", &no_opts()).await.unwrap();
        let Outcome::Done(first) = outcome else {
            panic!("expected install to run");
        };
        let v1_dir = fx.paths().plugin_version_dir("foo", "v1.0.0");
        assert_eq!(fs::read(v1_dir.join("foo")).unwrap(), b"v1.0.0");
        assert_eq!(fs::read_link(&link).unwrap(), v1_dir.join("foo"));
        let stored = receipt::load(&fx.paths().receipt_path("foo")).await.unwrap();
        assert_eq!(stored.version(), "v1.0.0");
        assert_eq!(stored.source.index, "default");

        // Repeated install is a no-op.
        let before = fx.snapshot();
        let outcome = fx.installer.install(&v1, "default", &no_opts()).await.unwrap();
        assert_eq!(outcome.signal(), Some(Signal::AlreadyInstalled));
        assert_eq!(fx.snapshot(), before);

        // Upgrade.
        let outcome = fx.installer.upgrade(&v2, "default", &no_opts()).await.unwrap();
        assert!(outcome.is_done());
        let v2_dir = fx.paths().plugin_version_dir("foo", "v1.1.0");
        assert_eq!(fs::read(v2_dir.join("foo")).unwrap(), b"v1.1.0");
        assert_eq!(fs::read_link(&link).unwrap(), v2_dir.join("foo"));
        assert!(!v1_dir.exists());
        let stored = receipt::load(&fx.paths().receipt_path("foo")).await.unwrap();
        assert_eq!(stored.version(), "v1.1.0");
        assert_eq!(stored.creation_timestamp, first.creation_timestamp);

        // Repeated upgrade is a no-op.
        let before = fx.snapshot();
        let outcome = fx.installer.upgrade(&v2, "default", &no_opts()).await.unwrap();
        assert_eq!(outcome.signal(), Some(Signal::AlreadyUpgraded));
        assert_eq!(fx.snapshot(), before);

        // Uninstall.
        let outcome = fx.installer.uninstall("foo").await.unwrap();
        assert!(outcome.is_done());
        assert!(fs::symlink_metadata(&link).is_err());
        assert!(!fx.paths().plugin_install_dir("foo").exists());
        assert!(!fx.paths().receipt_path("foo").exists());

        let outcome = fx.installer.uninstall("foo").await.unwrap();
        assert_eq!(outcome.signal(), Some(Signal::NotInstalled));
    }

    #[tokio::test]
    async fn test_downgrade_is_already_upgraded() {
        let fx = Fixture::new();
        fx.installer
            .install(&fx.foo("v1.1.0"), "default", &no_opts())
            .await
            .unwrap();

        let outcome = fx
            .installer
            .upgrade(&fx.foo("v1.0.0"), "default", &no_opts())
            .await
            .unwrap();
        assert_eq!(outcome.signal(), Some(Signal::AlreadyUpgraded));
        assert!(fx.paths().plugin_version_dir("foo", "v1.1.0").exists());
        assert!(!fx.paths().plugin_version_dir("foo", "v1.0.0").exists());
    }

    #[tokio::test]
    async fn test_upgrade_not_installed() {
        let fx = Fixture::new();
        let outcome = fx
            .installer
            .upgrade(&fx.foo("v1.0.0"), "default", &no_opts())
            .await
            .unwrap();
        assert_eq!(outcome.signal(), Some(Signal::NotInstalled));
    }

    // ── Failure paths ─────────────────────────────────────────────────

    #[tokio::test]
    async fn test_unsupported_platform() {
        let fx = Fixture::new();
        let mut m = fx.foo("v1.0.0");
        m.platforms[0].selector = Selector::os_arch("windows", "arm64");

        let err = fx.installer.install(&m, "default", &no_opts()).await.unwrap_err();
        assert!(matches!(err, InstallError::UnsupportedPlatform { .. }));
        assert!(err.to_string().contains("linux/amd64"));
        assert!(!fx.paths().receipt_path("foo").exists());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_installs_nothing() {
        let fx = Fixture::new();
        let mut m = fx.foo("v1.0.0");
        m.platforms[0].sha256 = "0".repeat(64);

        let err = fx.installer.install(&m, "default", &no_opts()).await.unwrap_err();
        assert!(matches!(err, InstallError::ChecksumMismatch { .. }));
        assert!(err.is_security_failure());
        assert!(!fx.paths().plugin_install_dir("foo").exists());
        assert!(fs::symlink_metadata(fx.installer.link_path("foo")).is_err());
        assert!(!fx.paths().receipt_path("foo").exists());
    }

    #[tokio::test]
    async fn test_bin_outside_version_dir_rejected() {
        let fx = Fixture::new();
        let mut m = fx.foo("v1.0.0");
        m.platforms[0].bin = "../../../etc/passwd".to_string();

        let err = fx.installer.install(&m, "default", &no_opts()).await.unwrap_err();
        assert!(matches!(err, InstallError::PathEscape { .. }));
        assert!(!fx.paths().receipt_path("foo").exists());
    }

    #[tokio::test]
    async fn test_missing_bin_is_link_error() {
        let fx = Fixture::new();
        let mut m = fx.foo("v1.0.0");
        m.platforms[0].bin = "not-there".to_string();

        let err = fx.installer.install(&m, "default", &no_opts()).await.unwrap_err();
        assert!(matches!(err, InstallError::Link(_)));
    }

    #[tokio::test]
    async fn test_directory_bin_is_link_error() {
        let fx = Fixture::new();
        let mut m = fx.foo("v1.0.0");
        m.platforms[0].bin = ".".to_string();

        let err = fx.installer.install(&m, "default", &no_opts()).await.unwrap_err();
        assert!(matches!(err, InstallError::Link(_)));
        assert!(err.to_string().contains("not a regular file"));
        assert!(fs::symlink_metadata(fx.installer.link_path("foo")).is_err());
        assert!(!fx.paths().receipt_path("foo").exists());
    }

    /// `path` spelled relative to the current directory.
    #[cfg(unix)]
    fn relative_to_cwd(path: &Path) -> PathBuf {
        let cwd = std::env::current_dir().unwrap();
        let mut rel = PathBuf::new();
        for _ in cwd.components().skip(1) {
            rel.push("..");
        }
        rel.join(path.strip_prefix("/").unwrap())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_relative_root_links_resolve() {
        let fx = Fixture::new();
        let root = relative_to_cwd(fx.root.path());
        assert!(root.is_relative());
        let installer = PluginInstaller::new(
            InstallerConfig::new(&root).with_target(PlatformTarget::new("linux", "amd64")),
        );

        let outcome = installer
            .install(&fx.foo("v1.0.0"), "default", &no_opts())
            .await
            .unwrap();
        assert!(outcome.is_done());

        let link = installer.link_path("foo");
        assert!(fs::read_link(&link).unwrap().is_absolute());
        assert_eq!(fs::read(&link).unwrap(), b"v1.0.0");
        assert!(fs::metadata(&link).unwrap().is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_receipt_write_failure_is_inconsistent() {
        let fx = Fixture::new();
        fx.paths().ensure_dirs().await.unwrap();
        // Reads as absent, but writes through it fail.
        std::os::unix::fs::symlink(
            fx.root.path().join("missing/foo.yaml"),
            fx.paths().receipt_path("foo"),
        )
        .unwrap();

        let err = fx
            .installer
            .install(&fx.foo("v1.0.0"), "default", &no_opts())
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::ReceiptInconsistent { .. }));
        assert_eq!(err.stage(), crate::error::InstallStage::Receipt);

        // Files and link are in place; only the receipt is missing.
        let link = fx.installer.link_path("foo");
        assert_eq!(fs::read(&link).unwrap(), b"v1.0.0");
        assert!(fx.paths().plugin_version_dir("foo", "v1.0.0").join("foo").is_file());
    }

    #[tokio::test]
    async fn test_uninstall_continues_past_failed_step() {
        let fx = Fixture::new();
        fx.installer
            .install(&fx.foo("v1.0.0"), "default", &no_opts())
            .await
            .unwrap();
        let link = fx.installer.link_path("foo");
        fs::remove_file(&link).unwrap();
        fs::write(&link, "user file").unwrap();

        let err = fx.installer.uninstall("foo").await.unwrap_err();
        match &err {
            InstallError::Uninstall { plugin, message } => {
                assert_eq!(plugin, "foo");
                assert!(message.contains("not a symlink"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fs::read_to_string(&link).unwrap(), "user file");
        assert!(!fx.paths().plugin_install_dir("foo").exists());
        assert!(!fx.paths().receipt_path("foo").exists());
    }

    #[tokio::test]
    async fn test_refuses_to_replace_regular_file_link() {
        let fx = Fixture::new();
        fx.paths().ensure_dirs().await.unwrap();
        let link = fx.installer.link_path("foo");
        fs::write(&link, "user file").unwrap();

        let err = fx
            .installer
            .install(&fx.foo("v1.0.0"), "default", &no_opts())
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::Link(_)));
        assert_eq!(fs::read_to_string(&link).unwrap(), "user file");
    }

    #[tokio::test]
    async fn test_uninstall_self_refused() {
        let fx = Fixture::new();
        let err = fx.installer.uninstall(SELF_PLUGIN_NAME).await.unwrap_err();
        match err {
            InstallError::SelfUninstall { root, .. } => assert_eq!(root, fx.root.path()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_traversal_plugin_name_rejected() {
        let fx = Fixture::new();
        let mut m = fx.foo("v1.0.0");
        m.name = "../evil".to_string();

        let err = fx.installer.install(&m, "default", &no_opts()).await.unwrap_err();
        assert!(matches!(err, InstallError::Index(_)));
    }

    // ── Options and defaults ──────────────────────────────────────────

    #[tokio::test]
    async fn test_archive_override_still_verified() {
        let fx = Fixture::new();
        let data = tar_gz(&[Entry::file("foo", b"offline", 0o755)]);
        let (path, sha256) = fx.archive("offline.tar.gz", &data);
        let m = manifest(
            "foo",
            "v1.0.0",
            descriptor("https://downloads.invalid/foo.tar.gz", &sha256, Vec::new(), "foo"),
        );

        let opts = InstallOptions {
            archive_override: Some(path),
        };
        fx.installer.install(&m, "default", &opts).await.unwrap();
        let installed = fx.paths().plugin_version_dir("foo", "v1.0.0").join("foo");
        assert_eq!(fs::read(installed).unwrap(), b"offline");

        let mut tampered = m.clone();
        tampered.name = "bar".to_string();
        tampered.platforms[0].sha256 = "f".repeat(64);
        let err = fx.installer.install(&tampered, "default", &opts).await.unwrap_err();
        assert!(matches!(err, InstallError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn test_zip_with_file_operations() {
        let fx = Fixture::new();
        let data = zip_archive(&[
            Entry::file("foo-linux-amd64/foo", b"zipped", 0o755),
            Entry::file("foo-linux-amd64/LICENSE", b"MIT", 0o644),
            Entry::file("README.md", b"readme", 0o644),
        ]);
        let (path, sha256) = fx.archive("foo.zip", &data);
        let m = manifest(
            "foo",
            "v2.0.0",
            descriptor(
                path.to_str().unwrap(),
                &sha256,
                vec![
                    FileOperation::new("foo-linux-amd64/foo", "bin/foo"),
                    FileOperation::new("foo-linux-amd64/LICENSE", "."),
                ],
                "bin/foo",
            ),
        );

        fx.installer.install(&m, "default", &no_opts()).await.unwrap();

        let dir = fx.paths().plugin_version_dir("foo", "v2.0.0");
        assert_eq!(fs::read(dir.join("bin/foo")).unwrap(), b"zipped");
        assert!(dir.join("LICENSE").exists());
        assert!(!dir.join("README.md").exists());
        assert_eq!(
            fs::read_link(fx.installer.link_path("foo")).unwrap(),
            dir.join("bin/foo")
        );
    }

    #[tokio::test]
    async fn test_cleanup_stale_versions() {
        let fx = Fixture::new();
        fx.installer
            .install(&fx.foo("v1.0.0"), "default", &no_opts())
            .await
            .unwrap();
        let stale = fx.paths().plugin_version_dir("foo", "v0.9.0");
        fs::create_dir_all(stale.join("bin")).unwrap();

        let removed = fx.installer.cleanup_stale_versions("foo").await.unwrap();
        assert_eq!(removed, vec![stale.clone()]);
        assert!(!stale.exists());
        assert!(fx.paths().plugin_version_dir("foo", "v1.0.0").exists());

        let removed = fx.installer.cleanup_stale_versions("not-installed").await.unwrap();
        assert!(removed.is_empty());
    }

    #[tokio::test]
    async fn test_list_installed() {
        let fx = Fixture::new();
        assert!(fx.installer.list_installed().await.unwrap().is_empty());

        fx.installer
            .install(&fx.foo("v1.0.0"), "default", &no_opts())
            .await
            .unwrap();
        let installed = fx.installer.list_installed().await.unwrap();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].name(), "foo");
    }
}
