//! ftpgate server binary
//!
//! HTTP front end for provisioning vsftpd virtual users.
//!
//! ## Usage
//!
//! ```bash
//! # Run the server (default)
//! ftpgate-server [--config FILE] [--bind ADDR] [--jail-root DIR] [--log-dir DIR]
//!
//! # Maintenance
//! ftpgate-server list-users
//! ftpgate-server check-path /clients/alice
//! ftpgate-server rebuild-index
//! ftpgate-server print-config
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ftpgate_kernel::{Jail, Provisioner};
use ftpgate_server::{AppState, ConfigSource, ServiceConfig, logging, routes};

/// Provision vsftpd virtual users over HTTP.
#[derive(Parser, Debug)]
#[command(name = "ftpgate-server")]
#[command(about = "HTTP service for vsftpd virtual user provisioning")]
struct Args {
    /// RON config file (default: ~/.config/ftpgate/config.ron if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(long, global = true)]
    bind: Option<SocketAddr>,

    /// Jail root for account home directories, overrides the config file
    #[arg(long, global = true)]
    jail_root: Option<PathBuf>,

    /// Directory for combined.log and error.log, overrides the config file
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server
    Serve,
    /// List usernames in the credential store
    ListUsers,
    /// Resolve a folder against the jail root
    CheckPath { path: String },
    /// Rebuild the lookup index from the credential store
    RebuildIndex,
    /// Print the effective configuration
    PrintConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ftpgate-server: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = match logging::init(config.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ftpgate-server: failed to initialize logging: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let result = match args.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(config).await,
        Command::ListUsers => cmd_list_users(&config).await,
        Command::CheckPath { path } => cmd_check_path(&config, &path).await,
        Command::RebuildIndex => cmd_rebuild_index(&config).await,
        Command::PrintConfig => cmd_print_config(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<ServiceConfig> {
    let (mut config, source) = ServiceConfig::load(args.config.as_deref())?;

    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(jail_root) = &args.jail_root {
        config.provision.jail_root = jail_root.clone();
    }
    if let Some(log_dir) = &args.log_dir {
        config.log_dir = Some(log_dir.clone());
    }
    config.validate()?;

    if let ConfigSource::File(path) = &source {
        eprintln!("ftpgate-server: using config {}", path.display());
    }
    Ok(config)
}

async fn run_server(config: ServiceConfig) -> Result<()> {
    let static_dir = match config.static_dir {
        Some(dir) if dir.is_dir() => Some(dir),
        Some(dir) => {
            tracing::warn!("static directory {} not found, serving API only", dir.display());
            None
        }
        None => None,
    };

    let state = AppState::from_config(&config.provision);
    let filter = routes(state, static_dir, config.cors_origins.clone());

    let (addr, server) = warp::serve(filter)
        .try_bind_with_graceful_shutdown(config.bind, shutdown_signal())
        .with_context(|| format!("failed to bind {}", config.bind))?;

    tracing::info!(
        %addr,
        jail_root = %config.provision.jail_root.display(),
        store = %config.provision.credential_store.display(),
        "ftpgate server listening"
    );
    server.await;
    tracing::info!("ftpgate server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

async fn cmd_list_users(config: &ServiceConfig) -> Result<()> {
    let provisioner = Provisioner::from_config(&config.provision);
    let users = provisioner.store().list().await?;
    for user in &users {
        println!("{user}");
    }
    tracing::debug!(count = users.len(), "listed users");
    Ok(())
}

async fn cmd_check_path(config: &ServiceConfig, path: &str) -> Result<()> {
    let jail = Jail::new(&config.provision.jail_root);
    let resolved = jail.resolve(path).await?;
    println!("{}", resolved.display());
    Ok(())
}

async fn cmd_rebuild_index(config: &ServiceConfig) -> Result<()> {
    let provisioner = Provisioner::from_config(&config.provision);
    let commit = provisioner.store().rebuild_index().await?;
    tracing::info!(
        records = commit.records,
        index = %config.provision.credential_index.display(),
        "lookup index rebuilt"
    );
    Ok(())
}

fn cmd_print_config(config: &ServiceConfig) -> Result<()> {
    println!("{}", config.to_ron()?);
    Ok(())
}
