//! Persisted download records
//!
//! Each download mirrors its status into `N.info` as JSON. Records are
//! written to `N.info_tmp` first, synced, and renamed over `N.info`, so a
//! reader never sees a half-written record.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

use crate::downloader::core::files::{
    parse_file_id, remove_if_exists, DownloadFiles, INFO_EXTENSION, INFO_STAGING_EXTENSION,
};
use crate::downloader::core::{
    Credential, DownloadError, DownloadId, DownloadSnapshot, DownloadStatus, FileOperation,
    Result,
};

/// Durable counterpart of a download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadInfo {
    pub id: DownloadId,
    pub credential: Option<Credential>,
    pub title: String,
    pub uri: Url,
    pub expected_bytes: Option<u64>,
    pub status: DownloadStatus,
}

impl DownloadInfo {
    /// Adjust a record found on disk at startup
    ///
    /// A running status on disk means the process died mid-transfer, so the
    /// download continues as resumed.
    pub fn recovered(mut self) -> Self {
        if self.status.is_running() {
            self.status = DownloadStatus::InProgressResumed;
        }
        self
    }
}

/// Result of scanning a storage directory
#[derive(Debug, Default)]
pub struct LoadedRecords {
    pub records: Vec<DownloadInfo>,
    /// Records that could not be decoded, one error each
    pub corrupt: Vec<DownloadError>,
    /// Highest id named by any file in the directory, readable or not
    pub max_id: Option<DownloadId>,
}

/// Reads and writes the records of one storage directory
#[derive(Debug, Clone)]
pub struct InfoStore {
    dir: PathBuf,
}

impl InfoStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn files(&self, id: DownloadId) -> DownloadFiles {
        DownloadFiles::new(&self.dir, id)
    }

    /// Create the storage directory when missing
    pub async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| DownloadError::persistence(&self.dir, FileOperation::CreateDir, e))
    }

    /// Write a record with the stage-then-rename pattern
    pub async fn save(&self, info: &DownloadInfo) -> Result<()> {
        let files = self.files(info.id);
        let encoded = serde_json::to_vec_pretty(info).map_err(|e| {
            DownloadError::persistence(
                &files.info_staging,
                FileOperation::Write,
                std::io::Error::new(ErrorKind::InvalidData, e),
            )
        })?;

        let mut staging = fs::File::create(&files.info_staging)
            .await
            .map_err(|e| DownloadError::persistence(&files.info_staging, FileOperation::Create, e))?;
        staging
            .write_all(&encoded)
            .await
            .map_err(|e| DownloadError::persistence(&files.info_staging, FileOperation::Write, e))?;
        staging
            .sync_all()
            .await
            .map_err(|e| DownloadError::persistence(&files.info_staging, FileOperation::Sync, e))?;
        drop(staging);

        fs::rename(&files.info_staging, &files.info)
            .await
            .map_err(|e| DownloadError::persistence(&files.info, FileOperation::Move, e))?;

        debug!(id = %info.id, status = ?info.status, "Persisted download record");
        Ok(())
    }

    /// Read and decode one record
    pub async fn load(&self, path: &Path) -> Result<DownloadInfo> {
        let bytes = fs::read(path)
            .await
            .map_err(|e| DownloadError::persistence(path, FileOperation::Read, e))?;
        let info: DownloadInfo =
            serde_json::from_slice(&bytes).map_err(|e| DownloadError::CorruptRecord {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if parse_file_id(path) != Some(info.id) {
            return Err(DownloadError::CorruptRecord {
                path: path.to_path_buf(),
                reason: format!("record names id {} but file name does not", info.id),
            });
        }

        Ok(info)
    }

    /// Scan the directory for records
    ///
    /// Unreadable records are reported in [`LoadedRecords::corrupt`] and do not
    /// stop the scan. Leftover staging files from an interrupted write are
    /// removed; the record they were replacing is still intact.
    pub async fn load_all(&self) -> Result<LoadedRecords> {
        let mut loaded = LoadedRecords::default();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| DownloadError::persistence(&self.dir, FileOperation::Read, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DownloadError::persistence(&self.dir, FileOperation::Read, e))?
        {
            let path = entry.path();
            let Some(id) = parse_file_id(&path) else {
                continue;
            };
            if id.checked_next().is_none() {
                warn!("Ignoring {}: id leaves no room for another download", path.display());
                continue;
            }
            loaded.max_id = loaded.max_id.max(Some(id));

            match path.extension().and_then(|extension| extension.to_str()) {
                Some(INFO_EXTENSION) => match self.load(&path).await {
                    Ok(info) => loaded.records.push(info),
                    Err(e) => {
                        warn!("Skipping download record {}: {}", path.display(), e);
                        loaded.corrupt.push(e);
                    }
                },
                Some(INFO_STAGING_EXTENSION) => {
                    debug!("Removing interrupted record write {}", path.display());
                    remove_if_exists(&path).await?;
                }
                _ => {}
            }
        }

        loaded.records.sort_by_key(|info| info.id);
        Ok(loaded)
    }

    /// Bytes held on disk for a record: the payload once complete, otherwise
    /// the partial file
    pub async fn stored_bytes(&self, info: &DownloadInfo) -> Result<u64> {
        let files = self.files(info.id);
        if info.status == DownloadStatus::CompletedNotTaken {
            files.data_len().await
        } else {
            files.partial_len().await
        }
    }

    /// Snapshots of every readable record exactly as stored
    ///
    /// Nothing is scheduled, so this is safe to call while another process
    /// owns the directory. A missing directory has no downloads.
    pub async fn snapshots(&self) -> Result<Vec<DownloadSnapshot>> {
        if !fs::try_exists(&self.dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let loaded = self.load_all().await?;
        let mut snapshots = Vec::with_capacity(loaded.records.len());
        for info in loaded.records {
            let current_bytes = self.stored_bytes(&info).await?;
            snapshots.push(DownloadSnapshot {
                id: info.id,
                current_bytes,
                expected_bytes: info.expected_bytes,
                title: info.title,
                uri: info.uri,
                status: info.status,
                error: None,
            });
        }
        Ok(snapshots)
    }
}
