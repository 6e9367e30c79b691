//! kplug: install, upgrade, and remove command-line plugins.

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kplug_index::IndexLoader;
use kplug_installer::PluginInstaller;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{KplugConfig, Overrides};

/// Plugin manager for command-line tools
#[derive(Parser, Debug)]
#[command(name = "kplug", version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Install root (default: ~/.kplug)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Install for this OS instead of the host's
    #[arg(long, global = true)]
    os: Option<String>,

    /// Install for this architecture instead of the host's
    #[arg(long, global = true)]
    arch: Option<String>,

    /// Allow `exec:` download URIs to run local commands
    #[arg(long, global = true)]
    allow_exec_fetch: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install plugins by name (NAME or INDEX/NAME)
    Install {
        names: Vec<String>,

        /// Install from a manifest file instead of an index
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Read the archive from a local file; requires --manifest
        #[arg(long, requires = "manifest")]
        archive: Option<PathBuf>,
    },
    /// Upgrade installed plugins to their latest index version
    Upgrade {
        names: Vec<String>,

        /// Upgrade every installed plugin
        #[arg(long)]
        all: bool,

        /// Upgrade from a manifest file instead of an index
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Read the archive from a local file; requires --manifest
        #[arg(long, requires = "manifest")]
        archive: Option<PathBuf>,
    },
    /// Remove installed plugins
    Uninstall {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Remove superseded version directories
    Cleanup { names: Vec<String> },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let default_filter = if args.verbose {
        "kplug=debug"
    } else {
        "kplug=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let config = KplugConfig::load(&Overrides {
        root: args.root.clone(),
        os: args.os.clone(),
        arch: args.arch.clone(),
        allow_exec_fetch: args.allow_exec_fetch,
    })?;
    tracing::debug!(
        root = %config.root.display(),
        target = %config.target(),
        "configuration loaded"
    );

    let installer = PluginInstaller::new(config.installer_config());
    installer.paths().ensure_dirs().await?;
    let loader = IndexLoader::new(installer.paths().index_dir());

    // Finish self-upgrades that left the previous version behind.
    if let Err(e) = installer
        .cleanup_stale_versions(kplug_installer::SELF_PLUGIN_NAME)
        .await
    {
        tracing::warn!(error = %e, "failed to clean up old kplug versions");
    }

    let default_index = config.default_index.as_str();
    match args.command {
        Command::Install {
            names,
            manifest,
            archive,
        } => {
            commands::install(
                &installer,
                &loader,
                default_index,
                &names,
                manifest.as_deref(),
                archive,
            )
            .await
        }
        Command::Upgrade {
            names,
            all,
            manifest,
            archive,
        } => {
            commands::upgrade(
                &installer,
                &loader,
                default_index,
                &names,
                all,
                manifest.as_deref(),
                archive,
            )
            .await
        }
        Command::Uninstall { names } => commands::uninstall(&installer, &names).await,
        Command::Cleanup { names } => commands::cleanup(&installer, &names).await,
    }
}
