//! Subcommand handlers.
//!
//! Each handler works through its plugins one by one, logs expected no-op
//! signals at info level, and reports all failures together at the end.

use std::fmt::Display;
use std::path::{Path, PathBuf};

use anyhow::bail;
use kplug_index::{IndexLoader, PluginManifest};
use kplug_installer::{InstallOptions, InstallReceipt, Outcome, PluginInstaller};

/// Index name recorded for plugins installed from a manifest file.
pub const DETACHED_INDEX: &str = "detached";

/// Split `index/name` into its parts; a bare name uses `default_index`.
pub fn parse_plugin_ref<'a>(
    reference: &'a str,
    default_index: &'a str,
) -> anyhow::Result<(&'a str, &'a str)> {
    match reference.split_once('/') {
        Some((index, name)) if !index.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((index, name))
        }
        Some(_) => bail!("invalid plugin reference '{reference}', expected INDEX/NAME or NAME"),
        None => Ok((default_index, reference)),
    }
}

/// Manifests to act on, each paired with the index it came from.
///
/// Names that fail to resolve are logged and added to `failures`.
fn resolve_manifests(
    loader: &IndexLoader,
    default_index: &str,
    names: &[String],
    manifest: Option<&Path>,
    failures: &mut Vec<String>,
) -> anyhow::Result<Vec<(PluginManifest, String)>> {
    if let Some(path) = manifest {
        if !names.is_empty() {
            bail!("plugin names cannot be combined with --manifest");
        }
        let manifest = IndexLoader::load_file(path)?;
        return Ok(vec![(manifest, DETACHED_INDEX.to_string())]);
    }

    let mut manifests = Vec::with_capacity(names.len());
    for reference in names {
        let resolved = parse_plugin_ref(reference, default_index).and_then(|(index, name)| {
            let manifest = loader.load(index, name)?;
            Ok((manifest, index.to_string()))
        });
        match resolved {
            Ok(entry) => manifests.push(entry),
            Err(e) => {
                tracing::error!(plugin = %reference, error = %e, "failed to resolve plugin");
                failures.push(reference.clone());
            }
        }
    }
    Ok(manifests)
}

fn finish(action: &str, failures: Vec<String>) -> anyhow::Result<()> {
    if failures.is_empty() {
        return Ok(());
    }
    bail!("failed to {action} some plugins: {}", failures.join(", "))
}

fn report<T, E: Display>(
    action: &str,
    name: &str,
    result: Result<Outcome<T>, E>,
    failures: &mut Vec<String>,
) {
    match result {
        Ok(Outcome::Done(_)) => tracing::info!(plugin = %name, "{action} complete"),
        Ok(Outcome::Skipped(signal)) => tracing::info!(plugin = %name, "skipped: {signal}"),
        Err(e) => {
            tracing::error!(plugin = %name, error = %e, "{action} failed");
            failures.push(name.to_string());
        }
    }
}

pub async fn install(
    installer: &PluginInstaller,
    loader: &IndexLoader,
    default_index: &str,
    names: &[String],
    manifest: Option<&Path>,
    archive: Option<PathBuf>,
) -> anyhow::Result<()> {
    if names.is_empty() && manifest.is_none() {
        bail!("nothing to install, pass plugin names or --manifest");
    }
    let mut failures = Vec::new();
    let manifests = resolve_manifests(loader, default_index, names, manifest, &mut failures)?;
    let opts = InstallOptions {
        archive_override: archive,
    };

    for (manifest, index) in &manifests {
        let result = installer.install(manifest, index, &opts).await;
        report("install", &manifest.name, result, &mut failures);
    }
    finish("install", failures)
}

pub async fn upgrade(
    installer: &PluginInstaller,
    loader: &IndexLoader,
    default_index: &str,
    names: &[String],
    all: bool,
    manifest: Option<&Path>,
    archive: Option<PathBuf>,
) -> anyhow::Result<()> {
    let opts = InstallOptions {
        archive_override: archive,
    };

    let mut failures = Vec::new();
    let manifests = if all {
        if !names.is_empty() || manifest.is_some() {
            bail!("--all cannot be combined with plugin names or --manifest");
        }
        installed_manifests(installer, loader, &mut failures).await?
    } else {
        if names.is_empty() && manifest.is_none() {
            bail!("nothing to upgrade, pass plugin names, --all, or --manifest");
        }
        resolve_manifests(loader, default_index, names, manifest, &mut failures)?
    };

    for (manifest, index) in &manifests {
        let result = installer.upgrade(manifest, index, &opts).await;
        report("upgrade", &manifest.name, result, &mut failures);
    }
    finish("upgrade", failures)
}

/// Current index manifests for every installed plugin that came from an
/// index. Plugins whose index no longer lists them are skipped; other
/// load errors are logged and added to `failures`.
async fn installed_manifests(
    installer: &PluginInstaller,
    loader: &IndexLoader,
    failures: &mut Vec<String>,
) -> anyhow::Result<Vec<(PluginManifest, String)>> {
    let mut manifests = Vec::new();
    for receipt in installer.list_installed().await? {
        let InstallReceipt { plugin, source, .. } = receipt;
        if source.index == DETACHED_INDEX {
            tracing::info!(plugin = %plugin.name, "installed from a manifest file, skipping");
            continue;
        }
        match loader.load(&source.index, &plugin.name) {
            Ok(manifest) => manifests.push((manifest, source.index)),
            Err(kplug_index::IndexError::NotFound(_)) => {
                tracing::warn!(
                    plugin = %plugin.name,
                    index = %source.index,
                    "plugin no longer in index, skipping"
                );
            }
            Err(e) => {
                tracing::error!(plugin = %plugin.name, error = %e, "failed to load manifest");
                failures.push(plugin.name);
            }
        }
    }
    Ok(manifests)
}

pub async fn uninstall(installer: &PluginInstaller, names: &[String]) -> anyhow::Result<()> {
    if names.is_empty() {
        bail!("nothing to uninstall, pass plugin names");
    }

    let mut failures = Vec::new();
    for name in names {
        let result = installer.uninstall(name).await;
        report("uninstall", name, result, &mut failures);
    }
    finish("uninstall", failures)
}

/// Remove superseded version directories of the named plugins, or of every
/// installed plugin when no names are given.
pub async fn cleanup(installer: &PluginInstaller, names: &[String]) -> anyhow::Result<()> {
    let names: Vec<String> = if names.is_empty() {
        installer
            .list_installed()
            .await?
            .into_iter()
            .map(|receipt| receipt.plugin.name)
            .collect()
    } else {
        names.to_vec()
    };

    let mut total = 0;
    let mut failures = Vec::new();
    for name in &names {
        match installer.cleanup_stale_versions(name).await {
            Ok(removed) => total += removed.len(),
            Err(e) => {
                tracing::error!(plugin = %name, error = %e, "cleanup failed");
                failures.push(name.clone());
            }
        }
    }
    tracing::info!(removed = total, "cleanup complete");
    finish("clean up", failures)
}
