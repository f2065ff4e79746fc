//! Open application views and notification click routing.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::context::WorkerContext;
use crate::notification::NotificationDescriptor;
use crate::ServiceWorkerError;

// ==================== Client ====================

/// An open view known to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Current URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Whether this worker controls the client.
    pub controlled: bool,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

impl ClientType {
    fn accepts(&self, other: ClientType) -> bool {
        *self == ClientType::All || *self == other
    }
}

/// Options for [`ClientHost::match_all`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientQuery {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Host-side view management.
#[async_trait]
pub trait ClientHost: Send + Sync {
    /// Enumerate open clients, queried live.
    async fn match_all(&self, query: ClientQuery) -> Vec<Client>;

    /// Bring a window client to the foreground.
    async fn focus(&self, id: &str) -> Result<Client, ServiceWorkerError>;

    /// Navigate a window client.
    async fn navigate(&self, id: &str, url: &Url) -> Result<Client, ServiceWorkerError>;

    /// Open a new window.
    async fn open_window(&self, url: &Url) -> Result<Client, ServiceWorkerError>;
}

// ==================== Window Registry ====================

/// Headless in-memory set of open views.
#[derive(Debug, Default)]
pub struct WindowRegistry {
    clients: RwLock<Vec<Client>>,
    next_id: AtomicU64,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a view opened outside the worker.
    pub async fn add(&self, client: Client) {
        self.clients.write().await.push(client);
    }

    /// Register a window at `url`, returning its ID.
    pub async fn add_window(&self, url: Url, controlled: bool) -> String {
        let id = self.allocate_id();
        self.add(Client {
            id: id.clone(),
            url,
            client_type: ClientType::Window,
            focused: false,
            controlled,
        })
        .await;
        id
    }

    /// Remove a client.
    pub async fn remove(&self, id: &str) -> Option<Client> {
        let mut clients = self.clients.write().await;
        let index = clients.iter().position(|c| c.id == id)?;
        Some(clients.remove(index))
    }

    /// Snapshot of every client.
    pub async fn all(&self) -> Vec<Client> {
        self.clients.read().await.clone()
    }

    fn allocate_id(&self) -> String {
        format!("client-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn update_window<F>(&self, id: &str, update: F) -> Result<Client, ServiceWorkerError>
    where
        F: FnOnce(&mut Client),
    {
        let mut clients = self.clients.write().await;
        let client = clients
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ServiceWorkerError::Client(format!("no client {id}")))?;

        if client.client_type != ClientType::Window {
            return Err(ServiceWorkerError::Client(format!("{id} is not a window")));
        }
        update(client);
        Ok(client.clone())
    }
}

#[async_trait]
impl ClientHost for WindowRegistry {
    async fn match_all(&self, query: ClientQuery) -> Vec<Client> {
        self.clients
            .read()
            .await
            .iter()
            .filter(|c| query.include_uncontrolled || c.controlled)
            .filter(|c| query.client_type.accepts(c.client_type))
            .cloned()
            .collect()
    }

    async fn focus(&self, id: &str) -> Result<Client, ServiceWorkerError> {
        let focused = self.update_window(id, |c| c.focused = true).await?;
        for client in self.clients.write().await.iter_mut() {
            if client.id != id {
                client.focused = false;
            }
        }
        Ok(focused)
    }

    async fn navigate(&self, id: &str, url: &Url) -> Result<Client, ServiceWorkerError> {
        self.update_window(id, |c| c.url = url.clone()).await
    }

    async fn open_window(&self, url: &Url) -> Result<Client, ServiceWorkerError> {
        let client = Client {
            id: self.allocate_id(),
            url: url.clone(),
            client_type: ClientType::Window,
            focused: true,
            controlled: false,
        };

        let mut clients = self.clients.write().await;
        for other in clients.iter_mut() {
            other.focused = false;
        }
        clients.push(client.clone());
        Ok(client)
    }
}

// ==================== Click Routing ====================

/// What a notification click did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// An existing window was focused and navigated.
    Focused { client_id: String, url: Url },
    /// A new window was opened.
    Opened { client_id: String, url: Url },
}

/// Route a notification click to an application view.
///
/// The notification is closed first, whatever happens next. An open window
/// on the application origin is reused; a new window is opened only when
/// none exists.
pub async fn handle_notification_click(
    ctx: &WorkerContext,
    notification: NotificationDescriptor,
) -> Result<ClickOutcome, ServiceWorkerError> {
    if let Err(e) = ctx.notifications().close(&notification.tag).await {
        warn!(tag = %notification.tag, error = %e, "Failed to close notification");
    }

    let route = if notification.data.url.is_empty() {
        ctx.config().dashboard_route.as_str()
    } else {
        notification.data.url.as_str()
    };
    let target = ctx.config().resolve(route)?;
    debug!(target = %target, "Notification clicked");

    let windows = ctx
        .clients()
        .match_all(ClientQuery {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        })
        .await;

    if let Some(existing) = windows.iter().find(|c| ctx.config().is_same_origin(&c.url)) {
        let focused = ctx.clients().focus(&existing.id).await?;
        let navigated = ctx.clients().navigate(&focused.id, &target).await?;
        info!(client = %navigated.id, url = %target, "Focused existing window");
        return Ok(ClickOutcome::Focused {
            client_id: navigated.id,
            url: target,
        });
    }

    let opened = ctx.clients().open_window(&target).await?;
    info!(client = %opened.id, url = %target, "Opened new window");
    Ok(ClickOutcome::Opened {
        client_id: opened.id,
        url: target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::{NotificationHost, NotificationDescriptor};
    use crate::testing::TestWorker;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn clicked(target: &str) -> NotificationDescriptor {
        let mut descriptor = NotificationDescriptor::fallback("/core/dashboard/", 1);
        descriptor.data.url = target.to_string();
        descriptor
    }

    #[tokio::test]
    async fn test_registry_match_all_filters() {
        let registry = WindowRegistry::new();
        registry.add_window(url("https://cash.example/"), true).await;
        registry.add_window(url("https://cash.example/reports/"), false).await;
        registry
            .add(Client {
                id: "worker-1".to_string(),
                url: url("https://cash.example/worker.js"),
                client_type: ClientType::Worker,
                focused: false,
                controlled: true,
            })
            .await;

        let controlled = registry.match_all(ClientQuery::default()).await;
        assert_eq!(controlled.len(), 1);

        let all_windows = registry
            .match_all(ClientQuery {
                include_uncontrolled: true,
                client_type: ClientType::Window,
            })
            .await;
        assert_eq!(all_windows.len(), 2);

        let everything = registry
            .match_all(ClientQuery {
                include_uncontrolled: true,
                client_type: ClientType::All,
            })
            .await;
        assert_eq!(everything.len(), 3);
    }

    #[tokio::test]
    async fn test_registry_rejects_focusing_workers() {
        let registry = WindowRegistry::new();
        registry
            .add(Client {
                id: "worker-1".to_string(),
                url: url("https://cash.example/worker.js"),
                client_type: ClientType::Worker,
                focused: false,
                controlled: true,
            })
            .await;

        assert!(registry.focus("worker-1").await.is_err());
        assert!(registry.focus("missing").await.is_err());
        assert!(registry.remove("worker-1").await.is_some());
    }

    #[tokio::test]
    async fn test_click_focuses_existing_window() {
        let worker = TestWorker::new();
        let id = worker
            .windows
            .add_window(url("https://cash.example/reports/"), false)
            .await;

        let outcome = handle_notification_click(&worker.ctx, clicked("/transactions/12/"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ClickOutcome::Focused {
                client_id: id.clone(),
                url: url("https://cash.example/transactions/12/"),
            }
        );
        let windows = worker.windows.all().await;
        assert_eq!(windows.len(), 1);
        assert!(windows[0].focused);
        assert_eq!(windows[0].url.as_str(), "https://cash.example/transactions/12/");
    }

    #[tokio::test]
    async fn test_click_with_no_windows_opens_one() {
        let worker = TestWorker::new();

        let outcome = handle_notification_click(&worker.ctx, clicked("/core/dashboard/"))
            .await
            .unwrap();

        assert!(matches!(outcome, ClickOutcome::Opened { .. }));
        let windows = worker.windows.all().await;
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].url.as_str(), "https://cash.example/core/dashboard/");
    }

    #[tokio::test]
    async fn test_click_ignores_foreign_origin_windows() {
        let worker = TestWorker::new();
        worker
            .windows
            .add_window(url("https://bank.example/cash.example/"), false)
            .await;

        let outcome = handle_notification_click(&worker.ctx, clicked("/"))
            .await
            .unwrap();

        assert!(matches!(outcome, ClickOutcome::Opened { .. }));
        assert_eq!(worker.windows.all().await.len(), 2);
    }

    #[tokio::test]
    async fn test_click_without_url_targets_dashboard() {
        let worker = TestWorker::new();
        let outcome = handle_notification_click(&worker.ctx, clicked(""))
            .await
            .unwrap();

        match outcome {
            ClickOutcome::Opened { url, .. } => {
                assert_eq!(url.as_str(), "https://cash.example/core/dashboard/");
            }
            other => panic!("Expected a new window, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_click_closes_notification() {
        let worker = TestWorker::new();
        let notification = clicked("/");
        worker.notifications.show(&notification).await.unwrap();

        handle_notification_click(&worker.ctx, notification)
            .await
            .unwrap();
        assert!(worker.notifications.displayed().await.is_empty());
    }
}
