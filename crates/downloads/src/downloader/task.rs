//! A single download and its state machine
//!
//! A [`DownloadTask`] is created by the manager and driven by runs scheduled
//! on the worker pool. A run resolves the URI, appends the response body to
//! `N.tmp`, checks the cancel/pause flags after every chunk, and on a clean
//! end renames `N.tmp` to `N.data`.
//!
//! Every transition goes through the transition lock and follows the same
//! order: update memory, persist the record, notify listeners. A snapshot
//! therefore never trails the record on disk, and the record never trails
//! what listeners were told.

use futures::StreamExt;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::downloader::config::ManagerConfig;
use crate::downloader::core::files::{atomic_rename, move_file};
use crate::downloader::core::listener::{guarded, ListenerSet};
use crate::downloader::core::{
    Credential, DownloadError, DownloadFiles, DownloadId, DownloadInfo, DownloadListener,
    DownloadMetrics, DownloadSnapshot, DownloadStatus, FileOperation, HttpTransport, InfoStore,
    Result, SnapshotError,
};
use crate::downloader::follower::{RedirectFollower, ResolvedResponse};

/// How a scheduled run came about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunStart {
    /// First run of a newly enqueued download
    Fresh,
    /// Run started by `resume` on a paused download
    Resumed,
    /// Run started for a record found on disk at startup
    Recovered,
    /// Run started to settle a control request on an idle download
    Control,
}

/// Shared collaborators a run needs
#[derive(Clone)]
pub(crate) struct RunContext {
    pub transport: Arc<dyn HttpTransport>,
    pub config: Arc<ManagerConfig>,
    pub metrics: Arc<DownloadMetrics>,
}

/// Why a transfer stopped without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Completed,
    Paused,
    Cancelled,
}

#[derive(Debug, Clone)]
struct TaskState {
    status: DownloadStatus,
    current_bytes: u64,
    expected_bytes: Option<u64>,
    error: Option<SnapshotError>,
}

/// One download: identity, observable state and control flags
pub struct DownloadTask {
    id: DownloadId,
    uri: Url,
    title: String,
    credential: Option<Credential>,
    state: Mutex<TaskState>,
    cancel_requested: AtomicBool,
    pause_requested: AtomicBool,
    listeners: ListenerSet,
    store: InfoStore,
    transitions: tokio::sync::Mutex<()>,
}

impl DownloadTask {
    pub(crate) fn new(
        id: DownloadId,
        uri: Url,
        title: String,
        credential: Option<Credential>,
        store: InfoStore,
    ) -> Self {
        Self::with_state(
            id,
            uri,
            title,
            credential,
            store,
            TaskState {
                status: DownloadStatus::InProgress,
                current_bytes: 0,
                expected_bytes: None,
                error: None,
            },
        )
    }

    /// Rebuild a task from a record found on disk
    pub(crate) fn recovered(info: DownloadInfo, current_bytes: u64, store: InfoStore) -> Self {
        let info = info.recovered();
        Self::with_state(
            info.id,
            info.uri,
            info.title,
            info.credential,
            store,
            TaskState {
                status: info.status,
                current_bytes,
                expected_bytes: info.expected_bytes,
                error: None,
            },
        )
    }

    fn with_state(
        id: DownloadId,
        uri: Url,
        title: String,
        credential: Option<Credential>,
        store: InfoStore,
        state: TaskState,
    ) -> Self {
        Self {
            id,
            uri,
            title,
            credential,
            state: Mutex::new(state),
            cancel_requested: AtomicBool::new(false),
            pause_requested: AtomicBool::new(false),
            listeners: ListenerSet::default(),
            store,
            transitions: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> DownloadId {
        self.id
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn status(&self) -> DownloadStatus {
        self.state().status
    }

    pub fn files(&self) -> DownloadFiles {
        self.store.files(self.id)
    }

    /// Immutable copy of the current observable state
    pub fn snapshot(&self) -> DownloadSnapshot {
        let state = self.state();
        self.snapshot_of(&state)
    }

    /// Record mirrored to `N.info`
    pub fn info(&self) -> DownloadInfo {
        let state = self.state();
        DownloadInfo {
            id: self.id,
            credential: self.credential.clone(),
            title: self.title.clone(),
            uri: self.uri.clone(),
            expected_bytes: state.expected_bytes,
            status: state.status,
        }
    }

    fn state(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot_of(&self, state: &TaskState) -> DownloadSnapshot {
        DownloadSnapshot {
            id: self.id,
            current_bytes: state.current_bytes,
            expected_bytes: state.expected_bytes,
            title: self.title.clone(),
            uri: self.uri.clone(),
            status: state.status,
            error: state.error.clone(),
        }
    }

    fn set_status(&self, status: DownloadStatus, error: Option<SnapshotError>) -> DownloadSnapshot {
        let mut state = self.state();
        state.status = status;
        state.error = error;
        self.snapshot_of(&state)
    }

    fn set_current_bytes(&self, bytes: u64) -> DownloadSnapshot {
        let mut state = self.state();
        state.current_bytes = bytes;
        self.snapshot_of(&state)
    }

    async fn persist(&self) -> Result<()> {
        self.store.save(&self.info()).await
    }

    /// Set the cancel flag; returns false when it was already set
    pub(crate) fn request_cancel(&self) -> bool {
        !self.cancel_requested.swap(true, Ordering::SeqCst)
    }

    /// Set the pause flag; returns false when it was already set
    pub(crate) fn request_pause(&self) -> bool {
        !self.pause_requested.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Move a paused download back to running ahead of its new run
    pub(crate) fn prepare_resume(&self) -> bool {
        let mut state = self.state();
        if state.status != DownloadStatus::Paused || self.is_cancel_requested() {
            return false;
        }
        self.pause_requested.store(false, Ordering::SeqCst);
        state.status = DownloadStatus::InProgressResumed;
        true
    }

    /// Attach a listener, optionally replaying the current state to it
    pub(crate) fn attach(&self, listener: Arc<dyn DownloadListener>, replay: bool) {
        if !replay {
            self.listeners.attach(listener);
            return;
        }

        let snapshot = self
            .listeners
            .attach_with(Arc::clone(&listener), || self.snapshot());
        let target = listener.as_ref();
        match snapshot.status {
            status if status.is_running() => guarded("started", || {
                target.on_started(&snapshot, snapshot.expected_bytes)
            }),
            DownloadStatus::Paused => guarded("paused", || target.on_paused(&snapshot)),
            DownloadStatus::CompletedNotTaken => {
                guarded("completed", || target.on_completed(&snapshot))
            }
            _ => {}
        }
    }

    fn pending_stop(&self) -> Option<Stop> {
        if self.cancel_requested.load(Ordering::SeqCst) {
            Some(Stop::Cancelled)
        } else if self.pause_requested.load(Ordering::SeqCst) {
            Some(Stop::Paused)
        } else {
            None
        }
    }

    /// Body of one scheduled run
    pub(crate) async fn run(self: Arc<Self>, start: RunStart, ctx: RunContext) {
        let metrics = &*ctx.metrics;

        match self.status() {
            status if status.is_running() => {}
            DownloadStatus::Paused => {
                if self.is_cancel_requested() {
                    self.finish_cancelled(metrics).await;
                } else if start == RunStart::Recovered {
                    let snapshot = self.snapshot();
                    self.listeners.notify("paused", |l| l.on_paused(&snapshot));
                }
                return;
            }
            DownloadStatus::CompletedNotTaken => {
                if start == RunStart::Recovered {
                    let snapshot = self.snapshot();
                    self.listeners.notify("completed", |l| l.on_completed(&snapshot));
                }
                return;
            }
            status => {
                if start == RunStart::Recovered {
                    self.clean_up_recovered(status).await;
                }
                return;
            }
        }

        if let Err(e) = self.announce(start, metrics).await {
            self.finish_failed(e, metrics).await;
            return;
        }

        match self.transfer(&ctx).await {
            Ok(Stop::Completed) => {
                if let Err(e) = self.finish_completed(metrics).await {
                    self.finish_failed(e, metrics).await;
                }
            }
            Ok(Stop::Paused) => {
                if let Err(e) = self.finish_paused(metrics).await {
                    self.finish_failed(e, metrics).await;
                }
            }
            Ok(Stop::Cancelled) => self.finish_cancelled(metrics).await,
            Err(e) => self.finish_failed(e, metrics).await,
        }
    }

    /// Persist the running record and tell listeners a resumed run began
    async fn announce(&self, start: RunStart, metrics: &DownloadMetrics) -> Result<()> {
        let _transition = self.transitions.lock().await;
        self.persist().await?;

        if start == RunStart::Resumed {
            metrics.record_resumed();
            let snapshot = self.snapshot();
            info!("Resuming '{}'", self.title);
            self.listeners.notify("resumed", |l| l.on_resumed(&snapshot));
        }
        Ok(())
    }

    async fn transfer(&self, ctx: &RunContext) -> Result<Stop> {
        if let Some(stop) = self.pending_stop() {
            return Ok(stop);
        }

        let files = self.files();
        let offset = files.partial_len().await?;
        self.set_current_bytes(offset);
        debug!("Starting transfer of {} from byte {}", self.uri, offset);

        let follower = RedirectFollower::new(
            &*ctx.transport,
            self.credential.as_ref(),
            ctx.config.redirect_limit,
        );
        let ResolvedResponse { uri, response, .. } = follower.resolve(&self.uri, offset).await?;

        let known_total = self.state().expected_bytes;
        let (start_byte, expected) = match response.status {
            StatusCode::PARTIAL_CONTENT if offset > 0 => {
                let total = response
                    .content_range_total()
                    .or_else(|| response.content_length.map(|length| offset + length))
                    .or(known_total);
                (offset, total)
            }
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 && known_total == Some(offset) => {
                debug!("Partial payload already holds all {} bytes", offset);
                return self.promote_partial(&files, offset).await;
            }
            status if status.is_success() => {
                if offset > 0 {
                    debug!("Server ignored the range request, restarting from byte 0");
                }
                (0, response.content_length)
            }
            StatusCode::UNAUTHORIZED => {
                return Err(DownloadError::Authentication {
                    uri: uri.to_string(),
                });
            }
            status => {
                return Err(DownloadError::UnexpectedStatus {
                    uri: uri.to_string(),
                    status: status.as_u16(),
                });
            }
        };

        if let Some(total) = expected {
            if total < start_byte {
                return Err(DownloadError::UnexpectedLength {
                    uri: uri.to_string(),
                    expected: total,
                    actual: start_byte,
                });
            }
        }

        let snapshot = self.record_expected(start_byte, expected).await?;
        info!("Downloading '{}' from {} ({:?} bytes)", self.title, uri, expected);
        self.listeners
            .notify("started", |l| l.on_started(&snapshot, expected));

        let mut file = if start_byte > 0 {
            fs::OpenOptions::new()
                .append(true)
                .open(&files.partial)
                .await
                .map_err(|e| DownloadError::file_system(&files.partial, FileOperation::Write, e))?
        } else {
            fs::File::create(&files.partial)
                .await
                .map_err(|e| DownloadError::file_system(&files.partial, FileOperation::Create, e))?
        };

        let mut body = response.body;
        let mut received = start_byte;
        let mut first_chunk = true;
        let mut last_report: Option<Instant> = None;
        let mut reported = start_byte;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| DownloadError::transport(uri.as_str(), e))?;
            if chunk.is_empty() {
                continue;
            }

            let next_total = received + chunk.len() as u64;
            if let Some(total) = expected {
                if next_total > total {
                    return Err(DownloadError::UnexpectedLength {
                        uri: uri.to_string(),
                        expected: total,
                        actual: next_total,
                    });
                }
            }

            file.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::file_system(&files.partial, FileOperation::Write, e))?;
            received = next_total;
            ctx.metrics.record_bytes(chunk.len() as u64);

            let snapshot = self.set_current_bytes(received);
            if first_chunk {
                first_chunk = false;
                self.listeners
                    .notify("receiving_data", |l| l.on_receiving_data(&snapshot));
            }

            let due = last_report
                .map_or(true, |at| at.elapsed() >= ctx.config.progress_interval)
                || Some(received) == expected;
            if due {
                last_report = Some(Instant::now());
                reported = received;
                self.listeners
                    .notify("data_received", |l| l.on_data_received(&snapshot));
            }

            if let Some(stop) = self.pending_stop() {
                sync_partial(&mut file, &files.partial).await?;
                debug!("Stopping at byte {} ({:?})", received, stop);
                return Ok(stop);
            }
        }

        sync_partial(&mut file, &files.partial).await?;
        drop(file);

        // Without a known size the last chunk may fall inside the interval
        if reported < received {
            let snapshot = self.snapshot();
            self.listeners
                .notify("data_received", |l| l.on_data_received(&snapshot));
        }

        if let Some(total) = expected {
            if received < total {
                return Err(DownloadError::UnexpectedLength {
                    uri: uri.to_string(),
                    expected: total,
                    actual: received,
                });
            }
        }

        if let Some(stop) = self.pending_stop() {
            return Ok(stop);
        }

        self.promote_partial(&files, received).await
    }

    /// Store the size announced by the server, persisting it when it changed
    async fn record_expected(
        &self,
        start_byte: u64,
        expected: Option<u64>,
    ) -> Result<DownloadSnapshot> {
        let _transition = self.transitions.lock().await;
        let (snapshot, changed) = {
            let mut state = self.state();
            let changed = state.expected_bytes != expected;
            state.current_bytes = start_byte;
            state.expected_bytes = expected;
            (self.snapshot_of(&state), changed)
        };
        if changed {
            self.persist().await?;
        }
        Ok(snapshot)
    }

    /// Rename the finished partial payload to its final name
    async fn promote_partial(&self, files: &DownloadFiles, received: u64) -> Result<Stop> {
        atomic_rename(&files.partial, &files.data).await?;
        let mut state = self.state();
        state.current_bytes = received;
        if state.expected_bytes.is_none() {
            state.expected_bytes = Some(received);
        }
        Ok(Stop::Completed)
    }

    async fn finish_completed(&self, metrics: &DownloadMetrics) -> Result<()> {
        let _transition = self.transitions.lock().await;
        let snapshot = self.set_status(DownloadStatus::CompletedNotTaken, None);
        self.persist().await?;
        metrics.record_completed();
        info!("Completed '{}' ({} bytes)", self.title, snapshot.current_bytes);
        self.listeners
            .notify("completed", |l| l.on_completed(&snapshot));
        Ok(())
    }

    async fn finish_paused(&self, metrics: &DownloadMetrics) -> Result<()> {
        let _transition = self.transitions.lock().await;
        let snapshot = self.set_status(DownloadStatus::Paused, None);

        // A cancel that saw the task running must not be lost once it is paused
        if self.is_cancel_requested() {
            self.cancel_locked(metrics).await;
            return Ok(());
        }

        self.persist().await?;
        metrics.record_paused();
        info!("Paused '{}' at byte {}", self.title, snapshot.current_bytes);
        self.listeners.notify("paused", |l| l.on_paused(&snapshot));
        Ok(())
    }

    async fn finish_cancelled(&self, metrics: &DownloadMetrics) {
        let _transition = self.transitions.lock().await;
        self.cancel_locked(metrics).await;
    }

    /// Cancel transition; the caller holds the transition lock
    async fn cancel_locked(&self, metrics: &DownloadMetrics) {
        let snapshot = self.set_status(DownloadStatus::Cancelled, None);
        if let Err(e) = self.persist().await {
            warn!("Could not record cancellation of '{}': {}", self.title, e);
        }
        metrics.record_cancelled();
        info!("Cancelled '{}'", self.title);
        self.listeners
            .notify("cancelled", |l| l.on_cancelled(&snapshot));
        self.remove_files(&snapshot).await;
    }

    async fn finish_failed(&self, error: DownloadError, metrics: &DownloadMetrics) {
        let _transition = self.transitions.lock().await;
        self.fail_locked(&error, metrics).await;
    }

    /// Failure transition; the caller holds the transition lock
    async fn fail_locked(&self, error: &DownloadError, metrics: &DownloadMetrics) {
        let snapshot = self.set_status(DownloadStatus::Failed, Some(SnapshotError::from(error)));
        if let Err(e) = self.persist().await {
            warn!("Could not record failure of '{}': {}", self.title, e);
        }
        metrics.record_failed();
        error!("Download '{}' failed: {}", self.title, error.full_message());
        self.listeners
            .notify("failed", |l| l.on_failed(&snapshot, error));
        self.remove_files(&snapshot).await;
    }

    /// Delete every file of a cancelled or failed download, then announce it
    async fn remove_files(&self, snapshot: &DownloadSnapshot) {
        if let Err(e) = self.files().remove_all().await {
            warn!("Could not remove files of '{}': {}", self.title, e);
            return;
        }
        self.listeners
            .notify("cleaned_up", |l| l.on_cleaned_up(snapshot));
    }

    /// Finish the cleanup of a record that was already terminal on disk
    async fn clean_up_recovered(&self, status: DownloadStatus) {
        let _transition = self.transitions.lock().await;
        let files = self.files();
        let result = if status == DownloadStatus::CompletedTaken {
            files.remove_transient().await
        } else {
            files.remove_all().await
        };

        match result {
            Ok(()) => {
                debug!("Cleaned up recovered {} download '{}'", status, self.title);
                let snapshot = self.snapshot();
                self.listeners
                    .notify("cleaned_up", |l| l.on_cleaned_up(&snapshot));
            }
            Err(e) => warn!("Could not clean up recovered download '{}': {}", self.title, e),
        }
    }

    /// Hand the finished payload to the caller
    ///
    /// Moves `N.data` to `destination`. On success the download becomes
    /// `CompletedTaken` and its remaining files are removed; if the move fails
    /// the download becomes `Failed`.
    pub(crate) async fn take(
        &self,
        destination: &Path,
        metrics: &DownloadMetrics,
    ) -> Result<PathBuf> {
        let _transition = self.transitions.lock().await;
        let status = self.status();
        if status != DownloadStatus::CompletedNotTaken {
            return Err(DownloadError::NotTakeable {
                id: self.id,
                status,
            });
        }

        let files = self.files();
        if let Err(error) = move_file(&files.data, destination).await {
            self.fail_locked(&error, metrics).await;
            return Err(error);
        }

        let snapshot = self.set_status(DownloadStatus::CompletedTaken, None);
        if let Err(e) = self.persist().await {
            warn!("Could not record that '{}' was taken: {}", self.title, e);
        }
        metrics.record_taken();
        info!("Took '{}' into {}", self.title, destination.display());

        match files.remove_transient().await {
            Ok(()) => self
                .listeners
                .notify("cleaned_up", |l| l.on_cleaned_up(&snapshot)),
            Err(e) => warn!("Could not remove records of '{}': {}", self.title, e),
        }

        Ok(destination.to_path_buf())
    }
}

impl std::fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadTask")
            .field("id", &self.id)
            .field("uri", &self.uri.as_str())
            .field("title", &self.title)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

async fn sync_partial(file: &mut fs::File, path: &Path) -> Result<()> {
    file.flush()
        .await
        .map_err(|e| DownloadError::file_system(path, FileOperation::Write, e))?;
    file.sync_all()
        .await
        .map_err(|e| DownloadError::file_system(path, FileOperation::Sync, e))
}
