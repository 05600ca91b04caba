//! Point-in-time views of downloads

use serde::{Deserialize, Serialize};
use url::Url;

use crate::downloader::core::{DownloadError, DownloadId, DownloadStatus};

/// Serializable summary of the error that failed a download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotError {
    /// Stable category, see [`DownloadError::category`]
    pub category: String,
    /// Message including the full cause chain
    pub message: String,
}

impl From<&DownloadError> for SnapshotError {
    fn from(error: &DownloadError) -> Self {
        Self {
            category: error.category().to_string(),
            message: error.full_message(),
        }
    }
}

/// Immutable copy of a download's observable state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSnapshot {
    pub id: DownloadId,
    pub current_bytes: u64,
    /// Total size, `None` until the server announced it
    pub expected_bytes: Option<u64>,
    pub title: String,
    pub uri: Url,
    pub status: DownloadStatus,
    /// Present only when `status` is `Failed`
    pub error: Option<SnapshotError>,
}

impl DownloadSnapshot {
    /// Fraction of the payload received, when the total is known
    pub fn progress(&self) -> Option<f64> {
        match self.expected_bytes {
            Some(0) => Some(1.0),
            Some(total) => Some(self.current_bytes as f64 / total as f64),
            None => None,
        }
    }
}
