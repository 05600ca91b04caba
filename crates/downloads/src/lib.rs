//! Downloads Library
//!
//! This library provides a resumable download manager for book content.
//! Transfers survive pause/resume, redirects, a one-shot authentication
//! retry and process restarts: every download keeps its state in a small
//! metadata record next to its partial payload, and a new manager opened
//! over the same directory picks the work up again.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use downloads::{
//!     DownloadEvent, DownloadManager, CallbackListener, ManagerConfig,
//!     ReqwestTransport,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> downloads::Result<()> {
//! // Create a manager configuration
//! let config = ManagerConfig::builder("/var/lib/books/downloads")
//!     .with_max_concurrent_downloads(2)
//!     .build()?;
//!
//! // Create the transport and open the manager (recovers earlier downloads)
//! let transport = Arc::new(ReqwestTransport::from_config(&config)?);
//! let manager = DownloadManager::open(config, transport).await?;
//!
//! // Listen for life-cycle events
//! let listener = Arc::new(CallbackListener::new(|event: DownloadEvent| {
//!     match event {
//!         DownloadEvent::DataReceived { snapshot } => {
//!             println!("{}: {} bytes", snapshot.title, snapshot.current_bytes);
//!         }
//!         DownloadEvent::Completed { snapshot } => {
//!             println!("{} is ready", snapshot.title);
//!         }
//!         _ => {}
//!     }
//! }));
//!
//! // Enqueue a download
//! let id = manager.enqueue(
//!     "https://example.com/books/moby-dick.epub",
//!     None,
//!     "Moby Dick",
//!     listener,
//! )?;
//!
//! // Later, claim the finished payload
//! let path = manager.take(id, "/home/reader/books/moby-dick.epub").await?;
//! println!("Saved to {}", path.display());
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Resumable transfers**: partial payloads are appended to with HTTP Range requests
//! - **Pause, resume and cancel**: cooperative flags checked between chunks
//! - **Redirect and authentication handling**: bounded redirect chains, one credentialed retry per hop
//! - **Crash recovery**: metadata records are written atomically and reloaded at startup
//! - **Deduplication**: enqueueing a URI that is already downloading returns the existing id
//! - **Pluggable transport**: any [`HttpTransport`] can be injected; `reqwest` is the default

pub mod downloader;

// Re-export commonly used types for convenience
pub use downloader::{
    CallbackListener, CompositeListener, Credential, DownloadError, DownloadEvent, DownloadId,
    DownloadInfo, DownloadListener, DownloadManager, DownloadMetrics, DownloadMetricsSnapshot,
    DownloadSnapshot, DownloadStatus, HttpResponse, HttpTransport, LoggingListener,
    ManagerConfig, ManagerConfigBuilder, NullListener, RedirectFollower, ReqwestTransport,
    Result, SnapshotError, TransportError,
};
