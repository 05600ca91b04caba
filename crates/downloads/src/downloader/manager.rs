//! Download manager
//!
//! Owns the registry of live downloads, allocates identifiers, schedules
//! runs on a bounded worker pool and rebuilds state from the storage
//! directory when opened.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use url::Url;

use crate::downloader::config::ManagerConfig;
use crate::downloader::core::{
    Credential, DownloadError, DownloadId, DownloadListener, DownloadMetrics,
    DownloadMetricsSnapshot, DownloadSnapshot, DownloadStatus, HttpTransport, InfoStore,
    NullListener, Result,
};
use crate::downloader::task::{DownloadTask, RunContext, RunStart};

#[derive(Default)]
struct Registry {
    tasks: HashMap<DownloadId, Arc<DownloadTask>>,
    runs: HashMap<DownloadId, JoinHandle<()>>,
}

/// Manages resumable downloads into one storage directory
///
/// The manager is cheap to share behind an `Arc`; every operation takes
/// `&self`. Control operations never block on network I/O: they set a flag
/// or schedule a run and return.
pub struct DownloadManager {
    config: Arc<ManagerConfig>,
    transport: Arc<dyn HttpTransport>,
    store: InfoStore,
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    workers: Arc<Semaphore>,
    metrics: Arc<DownloadMetrics>,
}

impl DownloadManager {
    /// Open a manager over `config.storage_dir`, recovering what was left there
    pub async fn open(config: ManagerConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        Self::open_with_listener(config, transport, Arc::new(NullListener)).await
    }

    /// Open a manager and attach `listener` to every recovered download
    ///
    /// Records that cannot be decoded are logged and skipped; their ids are
    /// still never reissued.
    pub async fn open_with_listener(
        config: ManagerConfig,
        transport: Arc<dyn HttpTransport>,
        listener: Arc<dyn DownloadListener>,
    ) -> Result<Self> {
        config.validate()?;

        let store = InfoStore::new(&config.storage_dir);
        store.ensure_dir().await?;
        let loaded = store.load_all().await?;

        let manager = Self {
            workers: Arc::new(Semaphore::new(config.max_concurrent_downloads)),
            config: Arc::new(config),
            transport,
            store: store.clone(),
            registry: Mutex::new(Registry::default()),
            next_id: AtomicU64::new(
                loaded
                    .max_id
                    .and_then(DownloadId::checked_next)
                    .map_or(0, |id| id.value()),
            ),
            metrics: Arc::new(DownloadMetrics::default()),
        };

        info!(
            "Opened download manager in {} ({} records, {} unreadable)",
            store.dir().display(),
            loaded.records.len(),
            loaded.corrupt.len()
        );

        for info in loaded.records {
            let current_bytes = store.stored_bytes(&info).await?;

            let task = Arc::new(DownloadTask::recovered(info, current_bytes, store.clone()));
            task.attach(Arc::clone(&listener), false);
            debug!(id = %task.id(), status = %task.status(), "Recovered download '{}'", task.title());

            let mut registry = manager.registry();
            registry.tasks.insert(task.id(), Arc::clone(&task));
            manager.schedule(&mut registry, task, RunStart::Recovered);
            manager.metrics.record_recovered();
        }

        Ok(manager)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_context(&self) -> RunContext {
        RunContext {
            transport: Arc::clone(&self.transport),
            config: Arc::clone(&self.config),
            metrics: Arc::clone(&self.metrics),
        }
    }

    fn allocate_id(&self) -> DownloadId {
        DownloadId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Spawn a run for `task` once a worker permit is free
    fn schedule(&self, registry: &mut Registry, task: Arc<DownloadTask>, start: RunStart) {
        let id = task.id();
        let workers = Arc::clone(&self.workers);
        let ctx = self.run_context();

        let handle = tokio::spawn(
            async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    warn!("Worker pool closed before the run could start");
                    return;
                };
                task.run(start, ctx).await;
            }
            .instrument(info_span!("download", id = %id)),
        );

        // Any replaced handle belongs to a run that has already settled
        registry.runs.insert(id, handle);
    }

    fn task(&self, id: DownloadId) -> Option<Arc<DownloadTask>> {
        self.registry().tasks.get(&id).cloned()
    }

    /// Request a download of `uri`
    ///
    /// When a non-terminal download of the same URI exists, its id is returned
    /// and `listener` is attached to it; the listener is immediately told the
    /// current state. Otherwise a new download is created and scheduled. The
    /// returned id is valid for status queries right away.
    pub fn enqueue(
        &self,
        uri: &str,
        credential: Option<Credential>,
        title: impl Into<String>,
        listener: Arc<dyn DownloadListener>,
    ) -> Result<DownloadId> {
        let uri = Url::parse(uri).map_err(|e| DownloadError::invalid_url(uri, e))?;
        let title = title.into();

        let mut registry = self.registry();
        let existing = registry
            .tasks
            .values()
            .find(|task| task.uri() == &uri && task.status().is_reusable())
            .cloned();

        if let Some(task) = existing {
            drop(registry);
            debug!(id = %task.id(), "Reusing existing download of {}", uri);
            task.attach(listener, true);
            self.metrics.record_deduplicated();
            return Ok(task.id());
        }

        let id = self.allocate_id();
        let task = Arc::new(DownloadTask::new(
            id,
            uri,
            title,
            credential,
            self.store.clone(),
        ));
        task.attach(listener, false);
        registry.tasks.insert(id, Arc::clone(&task));
        info!(id = %id, "Enqueued '{}' from {}", task.title(), task.uri());
        self.schedule(&mut registry, task, RunStart::Fresh);
        self.metrics.record_enqueued();

        Ok(id)
    }

    /// Ask a download to stop and discard everything it fetched
    ///
    /// A running download observes the request at its next chunk boundary. A
    /// paused one is settled by a short run. Anything else is left alone.
    pub fn cancel(&self, id: DownloadId) {
        let mut registry = self.registry();
        let Some(task) = registry.tasks.get(&id).cloned() else {
            debug!(id = %id, "Ignoring cancel of unknown download");
            return;
        };

        let status = task.status();
        if !status.is_running() && status != DownloadStatus::Paused {
            debug!(id = %id, "Ignoring cancel of {} download", status);
            return;
        }

        // Status is read again after the flag is set; a run that pauses
        // concurrently checks the flag once its status reads Paused
        if task.request_cancel() && task.status() == DownloadStatus::Paused {
            self.schedule(&mut registry, task, RunStart::Control);
        }
    }

    /// Ask a running download to stop, keeping its partial payload
    pub fn pause(&self, id: DownloadId) {
        let Some(task) = self.task(id) else {
            debug!(id = %id, "Ignoring pause of unknown download");
            return;
        };

        if task.status().is_running() {
            task.request_pause();
        } else {
            debug!(id = %id, "Ignoring pause of {} download", task.status());
        }
    }

    /// Continue a paused download from its partial payload
    pub fn resume(&self, id: DownloadId) {
        let mut registry = self.registry();
        let Some(task) = registry.tasks.get(&id).cloned() else {
            debug!(id = %id, "Ignoring resume of unknown download");
            return;
        };

        if task.prepare_resume() {
            self.schedule(&mut registry, task, RunStart::Resumed);
        } else {
            debug!(id = %id, "Ignoring resume of {} download", task.status());
        }
    }

    /// Forget a finished download
    ///
    /// Only `Cancelled`, `Failed` and `CompletedTaken` downloads can be
    /// acknowledged; returns whether the download was removed. Its id is never
    /// handed out again.
    pub fn acknowledge(&self, id: DownloadId) -> bool {
        let mut registry = self.registry();
        let terminal = registry
            .tasks
            .get(&id)
            .is_some_and(|task| task.status().is_terminal());
        if !terminal {
            return false;
        }

        registry.tasks.remove(&id);
        // Detached rather than aborted so a run still deleting files can finish
        registry.runs.remove(&id);
        debug!(id = %id, "Acknowledged download");
        true
    }

    /// Attach another listener to an existing download
    pub fn attach(&self, id: DownloadId, listener: Arc<dyn DownloadListener>) -> bool {
        match self.task(id) {
            Some(task) => {
                task.attach(listener, false);
                true
            }
            None => false,
        }
    }

    pub fn status_snapshot(&self, id: DownloadId) -> Option<DownloadSnapshot> {
        self.task(id).map(|task| task.snapshot())
    }

    /// Snapshots of every known download, ordered by id
    pub fn status_snapshot_all(&self) -> BTreeMap<DownloadId, DownloadSnapshot> {
        let tasks: Vec<Arc<DownloadTask>> = self.registry().tasks.values().cloned().collect();
        tasks
            .into_iter()
            .map(|task| (task.id(), task.snapshot()))
            .collect()
    }

    /// Move the finished payload of `id` to `destination`
    ///
    /// The download must be `CompletedNotTaken`. If the move fails the
    /// download fails and its files are removed.
    pub async fn take<P: AsRef<Path>>(&self, id: DownloadId, destination: P) -> Result<PathBuf> {
        let task = self
            .task(id)
            .ok_or(DownloadError::UnknownDownload { id })?;
        task.take(destination.as_ref(), &self.metrics).await
    }

    /// Cancel every download, wait for the runs to settle and delete all files
    pub async fn destroy_all(&self) {
        let (tasks, runs) = {
            let mut registry = self.registry();
            let tasks: Vec<Arc<DownloadTask>> = registry.tasks.values().cloned().collect();

            for task in &tasks {
                let status = task.status();
                if (status.is_running() || status == DownloadStatus::Paused)
                    && task.request_cancel()
                    && task.status() == DownloadStatus::Paused
                {
                    self.schedule(&mut registry, Arc::clone(task), RunStart::Control);
                }
            }

            let runs: Vec<JoinHandle<()>> = registry.runs.drain().map(|(_, run)| run).collect();
            registry.tasks.clear();
            (tasks, runs)
        };

        for run in runs {
            if let Err(e) = run.await {
                warn!("Download run ended abnormally: {}", e);
            }
        }

        for task in &tasks {
            if let Err(e) = task.files().remove_all().await {
                warn!(id = %task.id(), "Could not remove files: {}", e);
            }
        }

        info!("Destroyed {} downloads", tasks.len());
    }

    pub fn metrics(&self) -> DownloadMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("storage_dir", &self.config.storage_dir)
            .field("downloads", &self.registry().tasks.len())
            .finish_non_exhaustive()
    }
}
