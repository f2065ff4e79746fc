//! # CashFlow Service Worker
//!
//! Background worker for the CashFlow Manager web application.
//!
//! ## Features
//!
//! - **Cache Storage**: versioned cache generations keyed by request identity
//! - **Fetch Interception**: cache-first with write-through for same-origin responses
//! - **Lifecycle**: install-time precache, activation-time cleanup of stale generations
//! - **Push**: payload decoding with defaults, notification display
//! - **Click Routing**: focus an open application window or open a new one
//! - **Background Sync**: durable queue of offline writes flushed on demand
//!
//! ## Architecture
//!
//! ```text
//! host runtime
//!     │
//!     └── dispatch(WorkerEvent) ──→ EventTask (awaited by host)
//!             │
//!             └── WorkerContext
//!                     ├── CacheStorage
//!                     │       └── Cache (generation) ── RequestKey → CacheEntry
//!                     ├── Network
//!                     ├── NotificationHost
//!                     ├── ClientHost
//!                     └── SyncQueue
//! ```

pub mod cache;
pub mod clients;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod lifecycle;
pub mod notification;
pub mod sync;

pub use cache::{Cache, CacheEntry, CacheStorage, RequestKey};
pub use clients::{
    handle_notification_click, ClickOutcome, Client, ClientHost, ClientQuery, ClientType,
    WindowRegistry,
};
pub use context::{WorkerContext, WorkerHosts, WorkerNotice};
pub use dispatch::{dispatch, EventOutcome, EventTask, WorkerEvent};
pub use error::ServiceWorkerError;
pub use fetch::{handle_fetch, is_cacheable};
pub use lifecycle::{activate, install, WorkerState};
pub use notification::{
    decode_push, handle_push, NotificationCenter, NotificationData, NotificationDescriptor,
    NotificationHost, ReceiveState,
};
pub use sync::{handle_sync, sync_pending_transactions, PendingWrite, SyncQueue, SyncReport};

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
pub(crate) mod testing;
