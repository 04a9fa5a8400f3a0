//! rune-stack - Compose stack deployer for Swarm clusters
//!
//! This is the main CLI entry point.

use clap::{Parser, Subcommand};
use rune_stack::cluster::{EngineClient, MemoryCluster};
use rune_stack::compose::ComposeParser;
use rune_stack::deploy::{self, load_registries, DeployOptions, ResolveImage};
use rune_stack::error::{Result, StackError};
use rune_stack::secrets::SecretStore;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// rune-stack - deploy Compose stacks to Swarm
#[derive(Parser)]
#[command(name = "rune-stack")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Deploys Compose-style stacks onto a Swarm-compatible cluster", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a new stack or update an existing one
    Deploy {
        /// Stack name; defaults to the project name, then the directory name
        stack: Option<String>,
        /// Compose file; may be repeated, later files override earlier ones
        #[arg(short = 'f', long = "file")]
        files: Vec<PathBuf>,
        /// Remove services that are no longer referenced
        #[arg(long)]
        prune: bool,
        /// Query the registry to resolve image digests (always, changed, never)
        #[arg(long, default_value = "always")]
        resolve_image: ResolveImage,
        /// Suppress progress output
        #[arg(short, long)]
        quiet: bool,
        /// Exit immediately instead of waiting for services to converge
        #[arg(long)]
        detach: bool,
        /// Seconds to wait for each service to converge; 0 waits forever
        #[arg(long, default_value = "300")]
        timeout: u64,
        /// Daemon address (tcp://host:port or http(s) URL); defaults to DOCKER_HOST
        #[arg(short = 'H', long)]
        host: Option<String>,
        /// Decrypted secret store (YAML mapping of key to value)
        #[arg(long)]
        secrets: Option<PathBuf>,
        /// Registry credentials (YAML mapping of host to credential)
        #[arg(long)]
        registries: Option<PathBuf>,
        /// Do not update services whose spec would not change
        #[arg(long)]
        skip_unchanged: bool,
        /// Deploy against an in-memory cluster and report what would happen
        #[arg(long)]
        dry_run: bool,
    },
}

/// Default location of a file in the user's config directory
fn default_config_file(name: &str) -> Option<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("rune-stack").join(name))
        .filter(|path| path.exists())
}

fn stack_name(explicit: Option<String>, project_name: Option<&str>, dir: &Path) -> Result<String> {
    explicit
        .or_else(|| project_name.map(str::to_string))
        .or_else(|| dir.file_name().and_then(|s| s.to_str()).map(str::to_string))
        .filter(|s| !s.is_empty())
        .ok_or_else(|| StackError::InvalidConfig("could not determine a stack name".to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Deploy {
            stack,
            files,
            prune,
            resolve_image,
            quiet,
            detach,
            timeout,
            host,
            secrets,
            registries,
            skip_unchanged,
            dry_run,
        } => {
            let working_dir = std::env::current_dir()?;

            let files = if files.is_empty() {
                vec![ComposeParser::find_compose_file(&working_dir)
                    .unwrap_or_else(|| working_dir.join("compose.yaml"))]
            } else {
                files
            };

            let env: HashMap<String, String> = std::env::vars().collect();
            let project = ComposeParser::load_files(&files, &env)?;
            let stack = stack_name(stack, project.name.as_deref(), &project.working_dir)?;

            let secrets = match secrets.or_else(|| default_config_file("secrets.yaml")) {
                Some(path) => SecretStore::load(&path)?,
                None => SecretStore::new(),
            };
            let registries = match registries.or_else(|| default_config_file("registries.yaml")) {
                Some(path) => load_registries(&path)?,
                None => Default::default(),
            };

            let opts = DeployOptions {
                prune,
                resolve_image,
                quiet,
                detach,
                timeout: (timeout > 0).then(|| Duration::from_secs(timeout)),
                registries,
                secrets,
                skip_unchanged,
                ..DeployOptions::new(stack)
            };

            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling deploy");
                    let _ = cancel_tx.send(true);
                }
            });

            if dry_run {
                let cluster = MemoryCluster::new();
                deploy::deploy(&cluster, project, &opts, cancel_rx).await?;
                for call in cluster.calls()? {
                    println!("{}", call);
                }
                return Ok(());
            }

            let client = match host {
                Some(host) => EngineClient::new(&host)?,
                None => EngineClient::from_env()?,
            };
            deploy::deploy(&client, project, &opts, cancel_rx).await?;
        }
    }

    Ok(())
}
