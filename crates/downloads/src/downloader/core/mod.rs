//! Core types used throughout the download manager
//!
//! This module contains the fundamental types that all other modules depend on:
//! identifiers, the status tag, credentials, errors, snapshots, the listener
//! interface, the HTTP capability and the on-disk record codec.

pub mod error;
pub mod files;
pub mod http;
pub mod listener;
pub mod metrics;
pub mod persistence;
pub mod snapshot;

// Re-export main types for convenience
pub use error::{DownloadError, ErrorSeverity, FileOperation, Result, TransportError};
pub use files::DownloadFiles;
pub use http::{ByteStream, HttpResponse, HttpTransport, ReqwestTransport};
pub use listener::{
    CallbackListener, CompositeListener, DownloadEvent, DownloadListener, EventCallback,
    LoggingListener, NullListener,
};
pub use metrics::{DownloadMetrics, DownloadMetricsSnapshot};
pub use persistence::{DownloadInfo, InfoStore, LoadedRecords};
pub use snapshot::{DownloadSnapshot, SnapshotError};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Process-unique identifier of a download
///
/// Identifiers are allocated from a monotonic counter and never reissued,
/// not even after the download they named has been acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadId(pub u64);

impl DownloadId {
    pub fn value(self) -> u64 {
        self.0
    }

    /// Following id, or `None` once the id space is exhausted
    pub(crate) fn checked_next(self) -> Option<Self> {
        self.0.checked_add(1).map(DownloadId)
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Life-cycle state of a download
///
/// `Cancelled`, `Failed` and `CompletedTaken` are terminal. `CompletedNotTaken`
/// only moves on when the payload is taken (or taking it fails).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DownloadStatus {
    InProgress,
    InProgressResumed,
    Paused,
    Cancelled,
    CompletedNotTaken,
    CompletedTaken,
    Failed,
}

impl DownloadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadStatus::Cancelled | DownloadStatus::Failed | DownloadStatus::CompletedTaken
        )
    }

    /// A run is (or is about to be) moving bytes
    pub fn is_running(self) -> bool {
        matches!(
            self,
            DownloadStatus::InProgress | DownloadStatus::InProgressResumed
        )
    }

    /// Whether a new request for the same URI should be folded into this download
    pub fn is_reusable(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DownloadStatus::InProgress => "in progress",
            DownloadStatus::InProgressResumed => "in progress (resumed)",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Cancelled => "cancelled",
            DownloadStatus::CompletedNotTaken => "completed, not taken",
            DownloadStatus::CompletedTaken => "completed, taken",
            DownloadStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Credential presented after a server answers 401
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
