//! FileVault Daemon
//!
//! Serves files below the storage root to authenticated users.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::{default_config_path, Config};
use daemon::{JsonUserStore, LocalFileStore, Permission, PermissionSet, Router, Server, ServerOptions};
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// FileVault Daemon - authenticated remote file access.
#[derive(Parser, Debug)]
#[command(name = "filevault-daemon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start serving files
    Start {
        /// Create the stock users (root, tester, guest) if they are missing
        #[arg(long)]
        init_users: bool,
    },

    /// Manage users and their permissions
    #[command(subcommand)]
    Users(UsersCommands),

    /// Inspect or create the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Subcommands for user management.
#[derive(Subcommand, Debug, Clone)]
pub enum UsersCommands {
    /// List all users
    List,

    /// Add a user
    Add {
        /// Username
        username: String,

        /// Password
        #[arg(long, short)]
        password: String,

        /// Permission to grant (repeatable)
        #[arg(long = "permission", short = 'P')]
        permissions: Vec<Permission>,
    },

    /// Remove a user
    Remove {
        /// Username
        username: String,
    },

    /// Grant permissions to a user
    Grant {
        /// Username
        username: String,

        /// Permissions to grant
        #[arg(required = true)]
        permissions: Vec<Permission>,
    },

    /// Revoke permissions from a user
    Revoke {
        /// Username
        username: String,

        /// Permissions to revoke
        #[arg(required = true)]
        permissions: Vec<Permission>,
    },
}

/// Subcommands for configuration.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;
    let overrides = config.apply_env_overrides();
    config.validate()?;

    let level = if cli.verbose {
        "debug"
    } else {
        config.daemon.log_level.as_str()
    };
    let log_dir = match cli.command {
        Commands::Start { .. } => config.daemon.log_dir.clone(),
        _ => None,
    };
    let _log_guard = init_tracing(level, log_dir.as_deref());
    for applied in &overrides {
        tracing::info!(
            variable = applied.variable,
            value = %applied.value,
            "Configuration overridden from environment"
        );
    }

    match cli.command {
        Commands::Start { init_users } => {
            tracing::info!("FileVault daemon starting...");
            tracing::debug!(path = %config_path.display(), "Using config file");
            run_server(config, init_users).await?;
        }
        Commands::Users(cmd) => {
            let users = JsonUserStore::open(&config.storage.users_file).await?;
            run_users_command(&users, cmd).await?;
        }
        Commands::Config(ConfigCommands::Show) => {
            print!("{}", config.to_toml()?);
        }
        Commands::Config(ConfigCommands::Init { force }) => {
            if config_path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists at {} (use --force to overwrite)",
                    config_path.display()
                );
            }
            Config::default().save(&config_path)?;
            println!("Wrote {}", config_path.display());
        }
    }

    Ok(())
}

/// Install the global subscriber. `RUST_LOG` overrides `level`.
///
/// With a log directory, output goes to a daily rolling file and the
/// returned guard must be held until exit.
fn init_tracing(level: &str, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "filevault-daemon.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

/// Run the server until SIGINT or SIGTERM.
async fn run_server(config: Config, init_users: bool) -> anyhow::Result<()> {
    let files = LocalFileStore::open(&config.storage.root)
        .await
        .with_context(|| {
            format!(
                "Failed to open storage root {}",
                config.storage.root.display()
            )
        })?;
    let users = JsonUserStore::open(&config.storage.users_file).await?;

    if init_users {
        for (username, password) in users.create_default().await? {
            println!("Created user {} with password {}", username, password);
        }
    }
    if users.is_empty().await {
        tracing::warn!(
            "No users configured; every login will fail. Add one with `filevault-daemon users add` or start with --init-users"
        );
    }

    let router = Arc::new(Router::new(Arc::new(files), Arc::new(users)));
    let server = Server::bind(
        config.server.bind_address.as_str(),
        router,
        ServerOptions::from_config(&config),
    )
    .await
    .with_context(|| format!("Failed to bind {}", config.server.bind_address))?;
    tracing::info!(root = %config.storage.root.display(), "Serving files");

    let shutdown = CancellationToken::new();
    let mut server_task = tokio::spawn(server.run(shutdown.clone()));

    tokio::select! {
        result = &mut server_task => {
            result.context("Server task failed")??;
            return Ok(());
        }
        signal = wait_for_shutdown_signal() => signal?,
    }

    shutdown.cancel();
    server_task.await.context("Server task failed")??;
    tracing::info!("FileVault daemon stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for SIGINT")?;
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

async fn run_users_command(users: &JsonUserStore, cmd: UsersCommands) -> anyhow::Result<()> {
    match cmd {
        UsersCommands::List => {
            let records = users.list_users().await;
            if records.is_empty() {
                println!("No users registered.");
            } else {
                println!("{:<20} PERMISSIONS", "USERNAME");
                for record in records {
                    println!("{:<20} {}", record.username, record.permissions);
                }
            }
        }
        UsersCommands::Add {
            username,
            password,
            permissions,
        } => {
            let permissions: PermissionSet = permissions.into_iter().collect();
            users.add_user(&username, &password, permissions.clone()).await?;
            println!("Added {} ({})", username, permissions);
        }
        UsersCommands::Remove { username } => match users.remove_user(&username).await? {
            Some(_) => println!("Removed {}", username),
            None => anyhow::bail!("User {} not found", username),
        },
        UsersCommands::Grant {
            username,
            permissions,
        } => {
            let updated = users.grant(&username, &permissions).await?;
            println!("{}: {}", username, updated);
        }
        UsersCommands::Revoke {
            username,
            permissions,
        } => {
            let updated = users.revoke(&username, &permissions).await?;
            println!("{}: {}", username, updated);
        }
    }
    Ok(())
}
