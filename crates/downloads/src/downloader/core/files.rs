//! File operation utilities
//!
//! Every download owns four files in the storage directory, all keyed by its id:
//!
//! - `N.data`: finished payload
//! - `N.tmp`: partial payload; its length is the resume offset
//! - `N.info`: persisted metadata record
//! - `N.info_tmp`: staging file for the record

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::downloader::core::{DownloadError, DownloadId, FileOperation, Result};

pub const DATA_EXTENSION: &str = "data";
pub const PARTIAL_EXTENSION: &str = "tmp";
pub const INFO_EXTENSION: &str = "info";
pub const INFO_STAGING_EXTENSION: &str = "info_tmp";

/// Paths of the files belonging to one download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadFiles {
    pub data: PathBuf,
    pub partial: PathBuf,
    pub info: PathBuf,
    pub info_staging: PathBuf,
}

impl DownloadFiles {
    pub fn new(dir: &Path, id: DownloadId) -> Self {
        let file = |extension: &str| dir.join(format!("{}.{}", id, extension));
        Self {
            data: file(DATA_EXTENSION),
            partial: file(PARTIAL_EXTENSION),
            info: file(INFO_EXTENSION),
            info_staging: file(INFO_STAGING_EXTENSION),
        }
    }

    /// Length of the partial payload, zero when none exists yet
    pub async fn partial_len(&self) -> Result<u64> {
        file_len(&self.partial).await
    }

    /// Length of the finished payload, zero when none exists
    pub async fn data_len(&self) -> Result<u64> {
        file_len(&self.data).await
    }

    /// Delete every file of the download
    pub async fn remove_all(&self) -> Result<()> {
        for path in [&self.data, &self.partial, &self.info, &self.info_staging] {
            remove_if_exists(path).await?;
        }
        Ok(())
    }

    /// Delete everything except the finished payload
    pub async fn remove_transient(&self) -> Result<()> {
        for path in [&self.partial, &self.info, &self.info_staging] {
            remove_if_exists(path).await?;
        }
        Ok(())
    }

    /// Whether any file of the download is still on disk
    pub async fn any_exists(&self) -> bool {
        for path in [&self.data, &self.partial, &self.info, &self.info_staging] {
            if fs::try_exists(path).await.unwrap_or(false) {
                return true;
            }
        }
        false
    }
}

/// Extract the id from a storage file name such as `12.info`
pub fn parse_file_id(path: &Path) -> Option<DownloadId> {
    let stem = path.file_stem()?.to_str()?;
    stem.parse::<u64>().ok().map(DownloadId)
}

async fn file_len(path: &Path) -> Result<u64> {
    match fs::metadata(path).await {
        Ok(metadata) => Ok(metadata.len()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
        Err(e) => Err(DownloadError::file_system(path, FileOperation::Metadata, e)),
    }
}

/// Remove a file, treating an already missing file as success
pub async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DownloadError::file_system(path, FileOperation::Delete, e)),
    }
}

/// Atomically rename a file within the storage directory
///
/// This is used to ensure payloads are atomic - the finished file either
/// exists completely or not at all.
pub async fn atomic_rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to)
        .await
        .map_err(|e| DownloadError::file_system(from, FileOperation::Move, e))?;
    debug!("Atomically renamed {} to {}", from.display(), to.display());
    Ok(())
}

/// Move a file to a destination that may live on another filesystem
///
/// Tries a rename first and falls back to copy-then-remove when the rename
/// is refused.
pub async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::file_system(parent, FileOperation::CreateDir, e))?;
        }
    }

    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(rename_error) => {
            if rename_error.kind() == ErrorKind::NotFound {
                return Err(DownloadError::file_system(from, FileOperation::Move, rename_error));
            }
            debug!(
                "Rename of {} failed ({}), copying instead",
                from.display(),
                rename_error
            );
            fs::copy(from, to)
                .await
                .map_err(|e| DownloadError::file_system(to, FileOperation::Write, e))?;
            fs::remove_file(from)
                .await
                .map_err(|e| DownloadError::file_system(from, FileOperation::Delete, e))?;
            Ok(())
        }
    }
}
