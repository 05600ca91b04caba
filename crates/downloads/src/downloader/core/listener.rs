//! Life-cycle notifications for downloads

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::downloader::core::{DownloadError, DownloadSnapshot, SnapshotError};

/// Receiver of download life-cycle notifications
///
/// Every method has an empty default so implementations only override what
/// they care about. Methods are called from worker tasks; a panicking
/// listener is caught and logged and never affects the download.
pub trait DownloadListener: Send + Sync {
    /// A response was obtained; `expected_bytes` is the total size when known
    fn on_started(&self, _snapshot: &DownloadSnapshot, _expected_bytes: Option<u64>) {}
    /// The first chunk of this run arrived
    fn on_receiving_data(&self, _snapshot: &DownloadSnapshot) {}
    /// More bytes were written (throttled)
    fn on_data_received(&self, _snapshot: &DownloadSnapshot) {}
    fn on_paused(&self, _snapshot: &DownloadSnapshot) {}
    fn on_resumed(&self, _snapshot: &DownloadSnapshot) {}
    fn on_cancelled(&self, _snapshot: &DownloadSnapshot) {}
    fn on_completed(&self, _snapshot: &DownloadSnapshot) {}
    fn on_failed(&self, _snapshot: &DownloadSnapshot, _error: &DownloadError) {}
    /// All files of a finished download have been removed
    fn on_cleaned_up(&self, _snapshot: &DownloadSnapshot) {}
}

/// Owned form of a notification, for closure-based listeners
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    Started {
        snapshot: DownloadSnapshot,
        expected_bytes: Option<u64>,
    },
    ReceivingData {
        snapshot: DownloadSnapshot,
    },
    DataReceived {
        snapshot: DownloadSnapshot,
    },
    Paused {
        snapshot: DownloadSnapshot,
    },
    Resumed {
        snapshot: DownloadSnapshot,
    },
    Cancelled {
        snapshot: DownloadSnapshot,
    },
    Completed {
        snapshot: DownloadSnapshot,
    },
    Failed {
        snapshot: DownloadSnapshot,
        error: SnapshotError,
    },
    CleanedUp {
        snapshot: DownloadSnapshot,
    },
}

impl DownloadEvent {
    pub fn snapshot(&self) -> &DownloadSnapshot {
        match self {
            DownloadEvent::Started { snapshot, .. }
            | DownloadEvent::ReceivingData { snapshot }
            | DownloadEvent::DataReceived { snapshot }
            | DownloadEvent::Paused { snapshot }
            | DownloadEvent::Resumed { snapshot }
            | DownloadEvent::Cancelled { snapshot }
            | DownloadEvent::Completed { snapshot }
            | DownloadEvent::Failed { snapshot, .. }
            | DownloadEvent::CleanedUp { snapshot } => snapshot,
        }
    }

    /// Short name of the event kind
    pub fn kind(&self) -> &'static str {
        match self {
            DownloadEvent::Started { .. } => "started",
            DownloadEvent::ReceivingData { .. } => "receiving_data",
            DownloadEvent::DataReceived { .. } => "data_received",
            DownloadEvent::Paused { .. } => "paused",
            DownloadEvent::Resumed { .. } => "resumed",
            DownloadEvent::Cancelled { .. } => "cancelled",
            DownloadEvent::Completed { .. } => "completed",
            DownloadEvent::Failed { .. } => "failed",
            DownloadEvent::CleanedUp { .. } => "cleaned_up",
        }
    }
}

/// Callback receiving every event of a download
pub type EventCallback = Arc<dyn Fn(DownloadEvent) + Send + Sync>;

/// Listener forwarding every notification to a closure as a [`DownloadEvent`]
#[derive(Clone)]
pub struct CallbackListener {
    callback: EventCallback,
}

impl CallbackListener {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(DownloadEvent) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    pub fn from_callback(callback: EventCallback) -> Self {
        Self { callback }
    }
}

impl std::fmt::Debug for CallbackListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackListener").finish_non_exhaustive()
    }
}

impl DownloadListener for CallbackListener {
    fn on_started(&self, snapshot: &DownloadSnapshot, expected_bytes: Option<u64>) {
        (self.callback)(DownloadEvent::Started {
            snapshot: snapshot.clone(),
            expected_bytes,
        });
    }

    fn on_receiving_data(&self, snapshot: &DownloadSnapshot) {
        (self.callback)(DownloadEvent::ReceivingData {
            snapshot: snapshot.clone(),
        });
    }

    fn on_data_received(&self, snapshot: &DownloadSnapshot) {
        (self.callback)(DownloadEvent::DataReceived {
            snapshot: snapshot.clone(),
        });
    }

    fn on_paused(&self, snapshot: &DownloadSnapshot) {
        (self.callback)(DownloadEvent::Paused {
            snapshot: snapshot.clone(),
        });
    }

    fn on_resumed(&self, snapshot: &DownloadSnapshot) {
        (self.callback)(DownloadEvent::Resumed {
            snapshot: snapshot.clone(),
        });
    }

    fn on_cancelled(&self, snapshot: &DownloadSnapshot) {
        (self.callback)(DownloadEvent::Cancelled {
            snapshot: snapshot.clone(),
        });
    }

    fn on_completed(&self, snapshot: &DownloadSnapshot) {
        (self.callback)(DownloadEvent::Completed {
            snapshot: snapshot.clone(),
        });
    }

    fn on_failed(&self, snapshot: &DownloadSnapshot, error: &DownloadError) {
        (self.callback)(DownloadEvent::Failed {
            snapshot: snapshot.clone(),
            error: SnapshotError::from(error),
        });
    }

    fn on_cleaned_up(&self, snapshot: &DownloadSnapshot) {
        (self.callback)(DownloadEvent::CleanedUp {
            snapshot: snapshot.clone(),
        });
    }
}

/// Listener that does nothing
#[derive(Debug, Default)]
pub struct NullListener;

impl DownloadListener for NullListener {}

/// Listener writing every notification to the `tracing` log
#[derive(Debug, Default)]
pub struct LoggingListener;

impl DownloadListener for LoggingListener {
    fn on_started(&self, snapshot: &DownloadSnapshot, expected_bytes: Option<u64>) {
        match expected_bytes {
            Some(size) => info!(id = %snapshot.id, "Started '{}' ({} bytes)", snapshot.title, size),
            None => info!(id = %snapshot.id, "Started '{}'", snapshot.title),
        }
    }

    fn on_data_received(&self, snapshot: &DownloadSnapshot) {
        match snapshot.progress() {
            Some(fraction) => debug!(
                id = %snapshot.id,
                "{:.1}% ({}/{} bytes)",
                fraction * 100.0,
                snapshot.current_bytes,
                snapshot.expected_bytes.unwrap_or_default()
            ),
            None => debug!(id = %snapshot.id, "{} bytes", snapshot.current_bytes),
        }
    }

    fn on_paused(&self, snapshot: &DownloadSnapshot) {
        info!(id = %snapshot.id, "Paused '{}' at {} bytes", snapshot.title, snapshot.current_bytes);
    }

    fn on_resumed(&self, snapshot: &DownloadSnapshot) {
        info!(id = %snapshot.id, "Resumed '{}'", snapshot.title);
    }

    fn on_cancelled(&self, snapshot: &DownloadSnapshot) {
        info!(id = %snapshot.id, "Cancelled '{}'", snapshot.title);
    }

    fn on_completed(&self, snapshot: &DownloadSnapshot) {
        info!(id = %snapshot.id, "Completed '{}' ({} bytes)", snapshot.title, snapshot.current_bytes);
    }

    fn on_failed(&self, snapshot: &DownloadSnapshot, error: &DownloadError) {
        warn!(id = %snapshot.id, "Failed '{}': {}", snapshot.title, error.full_message());
    }

    fn on_cleaned_up(&self, snapshot: &DownloadSnapshot) {
        debug!(id = %snapshot.id, "Cleaned up files of '{}'", snapshot.title);
    }
}

/// Composite listener that forwards notifications to multiple listeners
#[derive(Default)]
pub struct CompositeListener {
    listeners: Vec<Arc<dyn DownloadListener>>,
}

impl std::fmt::Debug for CompositeListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeListener")
            .field("listeners_count", &self.listeners.len())
            .finish()
    }
}

impl CompositeListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener<L: DownloadListener + 'static>(mut self, listener: L) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn add_shared(mut self, listener: Arc<dyn DownloadListener>) -> Self {
        self.listeners.push(listener);
        self
    }
}

impl DownloadListener for CompositeListener {
    fn on_started(&self, snapshot: &DownloadSnapshot, expected_bytes: Option<u64>) {
        for listener in &self.listeners {
            listener.on_started(snapshot, expected_bytes);
        }
    }

    fn on_receiving_data(&self, snapshot: &DownloadSnapshot) {
        for listener in &self.listeners {
            listener.on_receiving_data(snapshot);
        }
    }

    fn on_data_received(&self, snapshot: &DownloadSnapshot) {
        for listener in &self.listeners {
            listener.on_data_received(snapshot);
        }
    }

    fn on_paused(&self, snapshot: &DownloadSnapshot) {
        for listener in &self.listeners {
            listener.on_paused(snapshot);
        }
    }

    fn on_resumed(&self, snapshot: &DownloadSnapshot) {
        for listener in &self.listeners {
            listener.on_resumed(snapshot);
        }
    }

    fn on_cancelled(&self, snapshot: &DownloadSnapshot) {
        for listener in &self.listeners {
            listener.on_cancelled(snapshot);
        }
    }

    fn on_completed(&self, snapshot: &DownloadSnapshot) {
        for listener in &self.listeners {
            listener.on_completed(snapshot);
        }
    }

    fn on_failed(&self, snapshot: &DownloadSnapshot, error: &DownloadError) {
        for listener in &self.listeners {
            listener.on_failed(snapshot, error);
        }
    }

    fn on_cleaned_up(&self, snapshot: &DownloadSnapshot) {
        for listener in &self.listeners {
            listener.on_cleaned_up(snapshot);
        }
    }
}

/// Listeners attached to one download
///
/// Delivery happens outside the internal lock and each call is isolated
/// with `catch_unwind`.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: Mutex<Vec<Arc<dyn DownloadListener>>>,
}

impl ListenerSet {
    pub(crate) fn attach(&self, listener: Arc<dyn DownloadListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Register `listener` and capture the state it should be told about
    ///
    /// The snapshot is taken while the list is locked. Every transition
    /// publishes its status before `notify` copies the list, so it reaches
    /// the new listener either through the returned snapshot or as a later
    /// event.
    pub(crate) fn attach_with<S>(
        &self,
        listener: Arc<dyn DownloadListener>,
        snapshot: S,
    ) -> DownloadSnapshot
    where
        S: FnOnce() -> DownloadSnapshot,
    {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let current = snapshot();
        listeners.push(listener);
        current
    }

    pub(crate) fn notify<F>(&self, event: &'static str, deliver: F)
    where
        F: Fn(&dyn DownloadListener),
    {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for listener in listeners {
            guarded(event, || deliver(listener.as_ref()));
        }
    }
}

/// Run one listener call, logging instead of propagating a panic
pub(crate) fn guarded<F: FnOnce()>(event: &'static str, call: F) {
    if panic::catch_unwind(AssertUnwindSafe(call)).is_err() {
        warn!("Download listener panicked while handling '{}'", event);
    }
}
