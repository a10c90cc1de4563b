//! FileVault command line client.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use client::Client;
use protocol::TracingProgress;
use tracing_subscriber::EnvFilter;

/// Default daemon address.
const DEFAULT_SERVER: &str = "127.0.0.1:16239";

/// FileVault client - transfer files to and from a FileVault daemon.
#[derive(Parser, Debug)]
#[command(name = "filevault")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Daemon address
    #[arg(short, long, global = true, default_value = DEFAULT_SERVER)]
    pub server: String,

    /// Username
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// Password
    #[arg(short, long, global = true)]
    pub password: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Download a remote file to a local path
    Download { remote: String, local: PathBuf },

    /// Upload a local file to a remote path
    Upload { local: PathBuf, remote: String },

    /// Delete a remote file
    Delete { remote: String },

    /// Rename a remote file
    Rename { from: String, to: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut client = Client::connect(cli.server.as_str())
        .await?
        .with_observer(Arc::new(TracingProgress));

    if let Some(user) = &cli.user {
        let password = cli.password.as_deref().unwrap_or_default();
        client
            .login(user, password)
            .await
            .with_context(|| format!("Login as {} failed", user))?;
    }

    run(&mut client, cli.command).await?;
    client.close().await?;
    Ok(())
}

async fn run(client: &mut Client, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Download { remote, local } => {
            let data = client.download(&remote).await?;
            write_local(&local, &data).await?;
            println!("{} -> {} ({} bytes)", remote, local.display(), data.len());
        }
        Commands::Upload { local, remote } => {
            let data = tokio::fs::read(&local)
                .await
                .with_context(|| format!("Failed to read {}", local.display()))?;
            let size = data.len();
            client.upload(&remote, data).await?;
            println!("{} -> {} ({} bytes)", local.display(), remote, size);
        }
        Commands::Delete { remote } => {
            client.delete(&remote).await?;
            println!("Deleted {}", remote);
        }
        Commands::Rename { from, to } => {
            client.rename(&from, &to).await?;
            println!("{} -> {}", from, to);
        }
    }
    Ok(())
}

async fn write_local(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, data)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}
