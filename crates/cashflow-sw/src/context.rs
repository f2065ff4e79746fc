//! Process-wide worker context.
//!
//! Every event handler receives the context explicitly. It is created when a
//! worker version starts installing and retired when a newer version
//! supersedes it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cashflow_common::WorkerConfig;
use cashflow_net::Network;
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tracing::{debug, info};

use crate::cache::CacheStorage;
use crate::clients::ClientHost;
use crate::lifecycle::WorkerState;
use crate::notification::NotificationHost;
use crate::sync::{PendingWrite, SyncQueue};
use crate::ServiceWorkerError;

/// Host-provided collaborators.
#[derive(Clone)]
pub struct WorkerHosts {
    pub network: Arc<dyn Network>,
    pub notifications: Arc<dyn NotificationHost>,
    pub clients: Arc<dyn ClientHost>,
}

/// Notices emitted to the host as the worker changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerNotice {
    /// Lifecycle state changed.
    StateChange { version: String, state: WorkerState },
    /// A stale cache generation was deleted.
    GenerationRemoved { name: String },
}

/// Shared state for one worker version.
pub struct WorkerContext {
    config: WorkerConfig,
    caches: Arc<RwLock<CacheStorage>>,
    hosts: WorkerHosts,
    sync_queue: Mutex<SyncQueue>,
    state: RwLock<WorkerState>,
    in_flight: AtomicUsize,
    idle: Notify,
    notice_tx: mpsc::UnboundedSender<WorkerNotice>,
}

impl WorkerContext {
    /// Create a context with empty cache storage.
    pub fn new(
        config: WorkerConfig,
        hosts: WorkerHosts,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<WorkerNotice>) {
        Self::with_storage(config, hosts, Arc::new(RwLock::new(CacheStorage::new())))
    }

    /// Create a context over cache storage shared with other versions.
    ///
    /// A newer version installs into the same storage the active one keeps
    /// serving from, and its activation removes the older generations.
    pub fn with_storage(
        config: WorkerConfig,
        hosts: WorkerHosts,
        storage: Arc<RwLock<CacheStorage>>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<WorkerNotice>) {
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let sync_queue = SyncQueue::new(config.sync.queue_path.clone());

        info!(version = %config.cache_version, origin = %config.origin, "Worker context created");

        let ctx = Arc::new(Self {
            config,
            caches: storage,
            hosts,
            sync_queue: Mutex::new(sync_queue),
            state: RwLock::new(WorkerState::Parsed),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            notice_tx,
        });
        (ctx, notice_rx)
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Version tag of the current generation.
    pub fn version(&self) -> &str {
        &self.config.cache_version
    }

    pub fn caches(&self) -> &RwLock<CacheStorage> {
        &self.caches
    }

    /// Handle to the storage, for creating the next version's context.
    pub fn shared_caches(&self) -> Arc<RwLock<CacheStorage>> {
        Arc::clone(&self.caches)
    }

    pub fn network(&self) -> &dyn Network {
        self.hosts.network.as_ref()
    }

    pub fn notifications(&self) -> &dyn NotificationHost {
        self.hosts.notifications.as_ref()
    }

    pub fn clients(&self) -> &dyn ClientHost {
        self.hosts.clients.as_ref()
    }

    pub fn sync_queue(&self) -> &Mutex<SyncQueue> {
        &self.sync_queue
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    pub(crate) async fn set_state(&self, state: WorkerState) {
        *self.state.write().await = state;
        debug!(version = %self.config.cache_version, ?state, "Worker state changed");
        self.notify(WorkerNotice::StateChange {
            version: self.config.cache_version.clone(),
            state,
        });
    }

    pub(crate) fn notify(&self, notice: WorkerNotice) {
        // Hosts that don't listen drop the receiver.
        let _ = self.notice_tx.send(notice);
    }

    /// Append a write to the durable sync queue.
    pub async fn enqueue_write(
        &self,
        kind: &str,
        payload: JsonValue,
    ) -> Result<PendingWrite, ServiceWorkerError> {
        self.sync_queue.lock().await.enqueue(kind, payload).await
    }

    /// Number of dispatched tasks that have not finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn begin_task(self: &Arc<Self>) -> TaskGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        TaskGuard {
            ctx: Arc::clone(self),
        }
    }

    /// Mark this version redundant and wait for in-flight tasks to finish.
    ///
    /// Called when a newer version supersedes this one. New fetches are no
    /// longer intercepted once this starts.
    pub async fn retire(&self) {
        self.set_state(WorkerState::Redundant).await;

        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                break;
            }
            notified.await;
        }

        info!(version = %self.config.cache_version, "Worker retired");
    }
}

/// Keeps the worker alive while a dispatched task runs.
pub(crate) struct TaskGuard {
    ctx: Arc<WorkerContext>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.ctx.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.ctx.idle.notify_waiters();
        }
    }
}
