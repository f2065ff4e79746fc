//! Deferred synchronization of writes made while offline.
//!
//! Pending writes live in a JSON file. A sync trigger delivers them in order;
//! an item leaves the queue only once the server acknowledged it.

use std::path::{Path, PathBuf};

use cashflow_net::{NetError, Request};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::context::WorkerContext;
use crate::ServiceWorkerError;

/// A write waiting to be delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    /// Queue-local ID.
    pub id: u64,
    /// Kind of write, e.g. "transaction".
    pub kind: String,
    /// Request body sent to the server.
    pub payload: JsonValue,
    /// Queued at (ms since epoch).
    pub queued_at: u64,
    /// Failed delivery attempts so far.
    pub attempts: u32,
}

impl PendingWrite {
    /// IDs restart once the queue drains, so the enqueue time disambiguates.
    fn identity(&self) -> (u64, u64) {
        (self.id, self.queued_at)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueFile {
    items: Vec<PendingWrite>,
}

/// Durable queue of pending writes.
#[derive(Debug, Clone)]
pub struct SyncQueue {
    path: PathBuf,
}

impl SyncQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every pending write. A missing file is an empty queue.
    ///
    /// A file that exists but can't be decoded is an error; it is never
    /// overwritten by an empty queue.
    pub async fn load(&self) -> Result<Vec<PendingWrite>, ServiceWorkerError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let file: QueueFile = serde_json::from_slice(&raw)
            .map_err(|e| ServiceWorkerError::QueueCorrupt(e.to_string()))?;
        Ok(file.items)
    }

    /// Replace the queue contents atomically.
    pub async fn save(&self, items: &[PendingWrite]) -> Result<(), ServiceWorkerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = QueueFile {
            items: items.to_vec(),
        };
        let raw = serde_json::to_vec_pretty(&file)
            .map_err(|e| ServiceWorkerError::QueueCorrupt(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Append a write and persist the queue.
    pub async fn enqueue(
        &self,
        kind: &str,
        payload: JsonValue,
    ) -> Result<PendingWrite, ServiceWorkerError> {
        let mut items = self.load().await?;
        let id = items.iter().map(|i| i.id).max().unwrap_or(0) + 1;
        let write = PendingWrite {
            id,
            kind: kind.to_string(),
            payload,
            queued_at: crate::now_millis(),
            attempts: 0,
        };
        items.push(write.clone());
        self.save(&items).await?;

        debug!(id, kind, pending = items.len(), "Write queued for sync");
        Ok(write)
    }
}

/// Result of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    pub delivered: usize,
    pub remaining: usize,
}

/// Deliver pending writes to the server.
///
/// Every item is attempted once, in order. Delivered items are removed,
/// failed ones stay with their attempt count bumped. Resolves with
/// [`ServiceWorkerError::SyncIncomplete`] when anything remains so the host
/// schedules another sync.
///
/// The queue file is re-read before it is written back, so writes enqueued
/// through another [`SyncQueue`] on the same path while delivery was in
/// progress are kept.
pub async fn sync_pending_transactions(
    ctx: &WorkerContext,
) -> Result<SyncReport, ServiceWorkerError> {
    let queue = ctx.sync_queue().lock().await;
    let items = queue.load().await?;
    if items.is_empty() {
        debug!("No pending writes");
        return Ok(SyncReport::default());
    }

    info!(pending = items.len(), "Syncing pending writes");
    let endpoint = ctx.config().resolve(&ctx.config().sync.endpoint)?;

    let mut delivered = Vec::new();
    let mut failed = Vec::new();

    for item in &items {
        match deliver(ctx, &endpoint, item).await {
            Ok(()) => delivered.push(item.identity()),
            Err(e) => {
                warn!(id = item.id, attempts = item.attempts + 1, error = %e, "Write not delivered");
                failed.push(item.identity());
            }
        }
    }

    let mut remaining = queue.load().await?;
    remaining.retain(|item| !delivered.contains(&item.identity()));
    for item in remaining.iter_mut() {
        if failed.contains(&item.identity()) {
            item.attempts += 1;
        }
    }
    queue.save(&remaining).await?;

    let report = SyncReport {
        delivered: delivered.len(),
        remaining: remaining.len(),
    };
    if report.remaining > 0 {
        return Err(ServiceWorkerError::SyncIncomplete {
            delivered: report.delivered,
            remaining: report.remaining,
        });
    }

    info!(delivered = report.delivered, "Sync complete");
    Ok(report)
}

/// POST the write's payload to the sync endpoint.
async fn deliver(
    ctx: &WorkerContext,
    endpoint: &url::Url,
    item: &PendingWrite,
) -> Result<(), ServiceWorkerError> {
    let request = Request::post_json(endpoint.clone(), &item.payload)?
        .timeout(ctx.config().network_timeout());
    let response = ctx.network().fetch(request).await?;
    if !response.ok() {
        return Err(NetError::RequestFailed(format!(
            "sync endpoint answered {}",
            response.status
        ))
        .into());
    }
    Ok(())
}

/// Handle a sync event. Tags other than the configured one are ignored.
pub async fn handle_sync(
    ctx: &WorkerContext,
    tag: &str,
) -> Result<Option<SyncReport>, ServiceWorkerError> {
    if tag != ctx.config().sync.tag {
        debug!(tag, "Ignoring sync tag");
        return Ok(None);
    }
    sync_pending_transactions(ctx).await.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::WindowRegistry;
    use crate::context::WorkerHosts;
    use crate::notification::NotificationCenter;
    use crate::testing::{TestWorker, ORIGIN};
    use async_trait::async_trait;
    use cashflow_common::WorkerConfig;
    use cashflow_net::{Network, Response, ResponseType};
    use http::StatusCode;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const SYNC_URL: &str = "https://cash.example/api/transactions/sync/";

    #[tokio::test]
    async fn test_queue_round_trip_and_ids() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SyncQueue::new(dir.path().join("nested").join("queue.json"));

        assert!(queue.load().await.unwrap().is_empty());

        let first = queue.enqueue("transaction", json!({"amount": "1.00"})).await.unwrap();
        let second = queue.enqueue("transaction", json!({"amount": "2.00"})).await.unwrap();
        assert_eq!((first.id, second.id), (1, 2));

        let items = queue.load().await.unwrap();
        assert_eq!(items, vec![first, second]);
    }

    #[tokio::test]
    async fn test_corrupt_queue_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        tokio::fs::write(&path, b"{oops").await.unwrap();

        let queue = SyncQueue::new(&path);
        assert!(matches!(
            queue.load().await,
            Err(ServiceWorkerError::QueueCorrupt(_))
        ));
        assert!(queue.enqueue("transaction", json!({})).await.is_err());
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"{oops");
    }

    #[tokio::test]
    async fn test_sync_delivers_everything() {
        let worker = TestWorker::new();
        worker.network.respond(SYNC_URL, 201, ResponseType::Basic, "{}");
        worker.ctx.enqueue_write("transaction", json!({"amount": "10.00"})).await.unwrap();
        worker.ctx.enqueue_write("transaction", json!({"amount": "20.00"})).await.unwrap();

        let report = handle_sync(&worker.ctx, "sync-transactions").await.unwrap();
        assert_eq!(report, Some(SyncReport { delivered: 2, remaining: 0 }));
        assert_eq!(
            worker.network.bodies_to(SYNC_URL),
            vec![json!({"amount": "10.00"}), json!({"amount": "20.00"})]
        );

        let queue = worker.ctx.sync_queue().lock().await;
        assert!(queue.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_undelivered() {
        let worker = TestWorker::new();
        worker.network.respond(SYNC_URL, 200, ResponseType::Basic, "{}");
        worker.network.reject_bodies_containing(SYNC_URL, "\"amount\":\"20.00\"");

        worker.ctx.enqueue_write("transaction", json!({"amount": "10.00"})).await.unwrap();
        worker.ctx.enqueue_write("transaction", json!({"amount": "20.00"})).await.unwrap();
        worker.ctx.enqueue_write("transaction", json!({"amount": "30.00"})).await.unwrap();

        let err = handle_sync(&worker.ctx, "sync-transactions").await.unwrap_err();
        assert!(matches!(
            err,
            ServiceWorkerError::SyncIncomplete { delivered: 2, remaining: 1 }
        ));

        let left = worker.ctx.sync_queue().lock().await.load().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].payload, json!({"amount": "20.00"}));
        assert_eq!(left[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_network_outage_keeps_queue() {
        let worker = TestWorker::new();
        worker.network.fail(SYNC_URL);
        worker.ctx.enqueue_write("transaction", json!({"amount": "5.00"})).await.unwrap();

        assert!(handle_sync(&worker.ctx, "sync-transactions").await.is_err());
        assert!(handle_sync(&worker.ctx, "sync-transactions").await.is_err());

        let left = worker.ctx.sync_queue().lock().await.load().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_rejected_write_is_a_network_failure() {
        let worker = TestWorker::new();
        worker.network.respond(SYNC_URL, 400, ResponseType::Basic, "{}");
        let write = worker.ctx.enqueue_write("transaction", json!({})).await.unwrap();

        let endpoint = url::Url::parse(SYNC_URL).unwrap();
        let err = deliver(&worker.ctx, &endpoint, &write).await.unwrap_err();
        assert_eq!(err.failure_kind(), cashflow_common::FailureKind::Network);
    }

    /// Accepts every write and, on the first one, queues another write
    /// through a separate handle on the same file.
    struct EnqueueDuringDelivery {
        queue: SyncQueue,
        enqueued: AtomicBool,
    }

    #[async_trait]
    impl Network for EnqueueDuringDelivery {
        async fn fetch(&self, request: Request) -> Result<Response, NetError> {
            if !self.enqueued.swap(true, Ordering::SeqCst) {
                self.queue
                    .enqueue("transaction", json!({"amount": "99.00"}))
                    .await
                    .unwrap();
            }
            Ok(Response::new(request.url, StatusCode::OK, ResponseType::Basic))
        }
    }

    #[tokio::test]
    async fn test_write_queued_during_sync_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending-writes.json");
        let mut config = WorkerConfig {
            origin: url::Url::parse(ORIGIN).unwrap(),
            ..WorkerConfig::default()
        };
        config.sync.queue_path = path.clone();

        let hosts = WorkerHosts {
            network: Arc::new(EnqueueDuringDelivery {
                queue: SyncQueue::new(&path),
                enqueued: AtomicBool::new(false),
            }),
            notifications: Arc::new(NotificationCenter::new()),
            clients: Arc::new(WindowRegistry::new()),
        };
        let (ctx, _notices) = WorkerContext::new(config, hosts);
        ctx.enqueue_write("transaction", json!({"amount": "1.00"})).await.unwrap();

        let err = sync_pending_transactions(&ctx).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceWorkerError::SyncIncomplete { delivered: 1, remaining: 1 }
        ));

        let left = SyncQueue::new(&path).load().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].payload, json!({"amount": "99.00"}));
        assert_eq!(left[0].attempts, 0);
    }

    #[tokio::test]
    async fn test_other_tags_ignored() {
        let worker = TestWorker::new();
        worker.ctx.enqueue_write("transaction", json!({})).await.unwrap();

        assert_eq!(handle_sync(&worker.ctx, "sync-goals").await.unwrap(), None);
        assert_eq!(worker.network.call_count(), 0);
    }
}
