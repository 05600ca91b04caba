//! Command-line front end for the download manager
//!
//! ```text
//! lending-dl get https://example.com/books/moby-dick.epub --title "Moby Dick"
//! lending-dl list
//! lending-dl resume-all
//! lending-dl clear
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use downloads::{
    CallbackListener, CompositeListener, Credential, DownloadEvent, DownloadId, DownloadListener,
    DownloadManager, DownloadStatus, LoggingListener, ManagerConfig, ReqwestTransport,
};
use downloads::downloader::InfoStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lending-dl")]
#[command(about = "Resumable downloads of lent books", long_about = None)]
struct Cli {
    /// Directory holding partial payloads and download records
    #[arg(long, env = "LENDING_DL_STORAGE", default_value = "downloads")]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    storage: PathBuf,

    /// Number of downloads transferring at the same time
    #[arg(long, env = "LENDING_DL_MAX_CONCURRENT", default_value_t = 4)]
    max_concurrent: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download one URI and move the payload into place
    Get {
        #[arg(value_hint = clap::ValueHint::Url)]
        uri: String,

        /// Human-readable title shown in progress output
        #[arg(long)]
        title: Option<String>,

        /// User name presented if the server asks for authentication
        #[arg(long, env = "LENDING_DL_USER")]
        user: Option<String>,

        #[arg(long, env = "LENDING_DL_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Where to put the finished payload
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Show every download known to the storage directory
    List,
    /// Resume paused downloads and wait for all transfers to settle
    ResumeAll,
    /// Cancel everything and delete all files in the storage directory
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = ManagerConfig::builder(&cli.storage)
        .with_max_concurrent_downloads(cli.max_concurrent)
        .build()?;

    match cli.command {
        Command::Get {
            uri,
            title,
            user,
            password,
            output,
        } => {
            let credential = match (user, password) {
                (Some(user), Some(password)) => Some(Credential::new(user, password)),
                (None, None) => None,
                _ => bail!("--user and --password must be given together"),
            };
            get(config, &uri, title, credential, output).await
        }
        Command::List => list(config).await,
        Command::ResumeAll => resume_all(config).await,
        Command::Clear => clear(config).await,
    }
}

async fn open(config: ManagerConfig) -> anyhow::Result<DownloadManager> {
    let transport = Arc::new(ReqwestTransport::from_config(&config)?);
    let manager = DownloadManager::open_with_listener(config, transport, Arc::new(LoggingListener))
        .await
        .context("could not open the storage directory")?;
    Ok(manager)
}

/// Listener that logs and forwards the events a command waits on
fn forwarding_listener() -> (Arc<dyn DownloadListener>, mpsc::UnboundedReceiver<DownloadEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener = CompositeListener::new()
        .add_listener(LoggingListener)
        .add_listener(CallbackListener::new(move |event| {
            let _ = tx.send(event);
        }));
    (Arc::new(listener), rx)
}

fn default_output(uri: &str, id: DownloadId) -> PathBuf {
    let name = uri
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("download-{}", id));
    Path::new(".").join(name)
}

async fn get(
    config: ManagerConfig,
    uri: &str,
    title: Option<String>,
    credential: Option<Credential>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let manager = open(config).await?;
    let (listener, mut events) = forwarding_listener();
    let title = title.unwrap_or_else(|| uri.to_string());
    let id = manager.enqueue(uri, credential, title, listener)?;
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    bail!("download {} stopped reporting", id);
                };
                match event {
                    DownloadEvent::Completed { .. } => break,
                    DownloadEvent::Failed { error, .. } => {
                        bail!("download failed ({}): {}", error.category, error.message)
                    }
                    DownloadEvent::Cancelled { .. } => bail!("download was cancelled"),
                    DownloadEvent::Paused { snapshot } if !interrupted => {
                        info!("Continuing '{}' from byte {}", snapshot.title, snapshot.current_bytes);
                        manager.resume(id);
                    }
                    DownloadEvent::Paused { snapshot } => {
                        println!(
                            "Paused at {} bytes; run `lending-dl resume-all` to continue",
                            snapshot.current_bytes
                        );
                        return Ok(());
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, pausing download {}", id);
                interrupted = true;
                manager.pause(id);
            }
        }
    }

    let destination = output.unwrap_or_else(|| default_output(uri, id));
    let path = manager.take(id, &destination).await?;
    manager.acknowledge(id);
    println!("Saved to {}", path.display());
    Ok(())
}

/// Print the records as stored; opening a manager would restart transfers
async fn list(config: ManagerConfig) -> anyhow::Result<()> {
    let snapshots = InfoStore::new(&config.storage_dir)
        .snapshots()
        .await
        .context("could not read the storage directory")?;
    if snapshots.is_empty() {
        println!("No downloads");
        return Ok(());
    }

    for snapshot in &snapshots {
        let size = snapshot
            .expected_bytes
            .map(|total| format!("{}/{}", snapshot.current_bytes, total))
            .unwrap_or_else(|| snapshot.current_bytes.to_string());
        println!(
            "{:>4}  {:<22} {:>16}  {}",
            snapshot.id, snapshot.status, size, snapshot.title
        );
    }
    Ok(())
}

async fn resume_all(config: ManagerConfig) -> anyhow::Result<()> {
    let manager = open(config).await?;

    for snapshot in manager.status_snapshot_all().values() {
        if snapshot.status == DownloadStatus::Paused {
            manager.resume(snapshot.id);
        }
    }

    loop {
        let running = manager
            .status_snapshot_all()
            .values()
            .filter(|snapshot| snapshot.status.is_running())
            .count();
        if running == 0 {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(250)) => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, pausing {} downloads", running);
                for snapshot in manager.status_snapshot_all().values() {
                    manager.pause(snapshot.id);
                }
            }
        }
    }

    let completed = manager
        .status_snapshot_all()
        .values()
        .filter(|snapshot| snapshot.status == DownloadStatus::CompletedNotTaken)
        .count();
    println!("{} downloads ready to take", completed);
    Ok(())
}

async fn clear(config: ManagerConfig) -> anyhow::Result<()> {
    let manager = open(config).await?;
    let count = manager.status_snapshot_all().len();
    manager.destroy_all().await;
    println!("Removed {} downloads", count);
    Ok(())
}
