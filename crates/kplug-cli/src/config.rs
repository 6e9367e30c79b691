//! Runtime configuration.
//!
//! Resolved once at startup. Precedence: command-line flags, then
//! `KPLUG_*` environment variables, then `{root}/config.toml`, then
//! defaults.

use std::path::{Path, PathBuf};

use anyhow::Context;
use kplug_index::DEFAULT_INDEX;
use kplug_installer::{
    FetchPolicy, InstallerConfig, Paths, PlatformTarget, DEFAULT_HOST_COMMAND,
};
use serde::Deserialize;

pub const ROOT_ENV: &str = "KPLUG_ROOT";
pub const OS_ENV: &str = "KPLUG_OS";
pub const ARCH_ENV: &str = "KPLUG_ARCH";
pub const ALLOW_EXEC_ENV: &str = "KPLUG_ALLOW_EXEC_FETCH";

const CONFIG_FILE: &str = "config.toml";

/// Settings given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub root: Option<PathBuf>,
    pub os: Option<String>,
    pub arch: Option<String>,
    pub allow_exec_fetch: bool,
}

/// Contents of `{root}/config.toml`. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    os: Option<String>,
    arch: Option<String>,
    allow_exec_fetch: Option<bool>,
    host_command: Option<String>,
    default_index: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KplugConfig {
    pub root: PathBuf,
    pub os: Option<String>,
    pub arch: Option<String>,
    pub allow_exec_fetch: bool,
    pub host_command: String,
    pub default_index: String,
}

impl KplugConfig {
    /// Resolve against the process environment.
    pub fn load(overrides: &Overrides) -> anyhow::Result<Self> {
        Self::resolve(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve with `env` standing in for the process environment.
    pub fn resolve(
        overrides: &Overrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let env = |key: &str| env(key).filter(|v| !v.is_empty());

        let root = overrides
            .root
            .clone()
            .or_else(|| env(ROOT_ENV).map(PathBuf::from))
            .or_else(Paths::default_root)
            .context("cannot determine install root, set KPLUG_ROOT or pass --root")?;
        let root = std::path::absolute(&root)
            .with_context(|| format!("cannot resolve install root {}", root.display()))?;

        let file = read_file_config(&root.join(CONFIG_FILE))?;

        let allow_exec_fetch = overrides.allow_exec_fetch
            || env(ALLOW_EXEC_ENV)
                .map(|v| parse_bool(&v))
                .or(file.allow_exec_fetch)
                .unwrap_or(false);

        Ok(Self {
            os: overrides.os.clone().or_else(|| env(OS_ENV)).or(file.os),
            arch: overrides.arch.clone().or_else(|| env(ARCH_ENV)).or(file.arch),
            allow_exec_fetch,
            host_command: file
                .host_command
                .unwrap_or_else(|| DEFAULT_HOST_COMMAND.to_string()),
            default_index: file
                .default_index
                .unwrap_or_else(|| DEFAULT_INDEX.to_string()),
            root,
        })
    }

    pub fn target(&self) -> PlatformTarget {
        PlatformTarget::resolve(self.os.as_deref(), self.arch.as_deref())
    }

    pub fn installer_config(&self) -> InstallerConfig {
        let mut config = InstallerConfig::new(&self.root)
            .with_target(self.target())
            .with_fetch_policy(FetchPolicy {
                allow_exec: self.allow_exec_fetch,
            });
        config.host_command = self.host_command.clone();
        config
    }
}

fn read_file_config(path: &Path) -> anyhow::Result<FileConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FileConfig::default()),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };
    toml::from_str(&content).with_context(|| format!("invalid config file {}", path.display()))
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
