//! Downloader module
//!
//! This module contains all the download functionality including
//! core types, configuration, the redirect follower, the per-download
//! task and the manager that owns them.
//!
//! The call chain flows as follows:
//!
//! User Code
//! ↓
//! DownloadManager (manager.rs)
//! ↓
//! DownloadTask (task.rs), one run per worker permit
//! ↓
//! RedirectFollower (follower.rs)
//! ↓
//! HttpTransport (core/http.rs)

pub mod config;
pub mod core;
pub mod follower;
pub mod manager;
pub mod task;

// Re-export main types for convenience
pub use config::{ManagerConfig, ManagerConfigBuilder};
pub use self::core::{
    CallbackListener, CompositeListener, Credential, DownloadError, DownloadEvent, DownloadId,
    DownloadInfo, DownloadListener, DownloadMetrics, DownloadMetricsSnapshot, DownloadSnapshot,
    DownloadStatus, ErrorSeverity, EventCallback, FileOperation, HttpResponse, HttpTransport,
    InfoStore, LoggingListener, NullListener, ReqwestTransport, Result, SnapshotError,
    TransportError,
};
pub use follower::{RedirectFollower, ResolvedResponse};
pub use manager::DownloadManager;
pub use task::DownloadTask;
