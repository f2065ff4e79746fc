//! Event dispatch.
//!
//! Each event runs as its own task. The host holds the returned
//! [`EventTask`] and awaits it; the worker stays alive until every
//! dispatched task has completed.

use std::sync::Arc;

use bytes::Bytes;
use cashflow_net::{Request, Response};
use tokio::task::JoinHandle;
use tracing::{debug, error, info_span, Instrument};

use crate::clients::{handle_notification_click, ClickOutcome};
use crate::context::WorkerContext;
use crate::fetch::handle_fetch;
use crate::lifecycle::{activate, install};
use crate::notification::{handle_push, NotificationDescriptor};
use crate::sync::{handle_sync, SyncReport};
use crate::ServiceWorkerError;

/// Events delivered by the host.
#[derive(Debug)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Push(Option<Bytes>),
    NotificationClick(NotificationDescriptor),
    NotificationClose(NotificationDescriptor),
    Sync(String),
}

impl WorkerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerEvent::Install => "install",
            WorkerEvent::Activate => "activate",
            WorkerEvent::Fetch(_) => "fetch",
            WorkerEvent::Push(_) => "push",
            WorkerEvent::NotificationClick(_) => "notificationclick",
            WorkerEvent::NotificationClose(_) => "notificationclose",
            WorkerEvent::Sync(_) => "sync",
        }
    }
}

/// What a completed event produced.
#[derive(Debug)]
pub enum EventOutcome {
    Installed { cached: usize },
    Activated { removed: Vec<String> },
    Responded(Response),
    Displayed(NotificationDescriptor),
    Routed(ClickOutcome),
    Dismissed,
    Synced(SyncReport),
    /// The event did not concern this worker.
    Ignored,
}

/// Handle to a dispatched event.
#[derive(Debug)]
pub struct EventTask {
    kind: &'static str,
    handle: JoinHandle<Result<EventOutcome, ServiceWorkerError>>,
}

impl EventTask {
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Wait for the event to finish.
    pub async fn wait(self) -> Result<EventOutcome, ServiceWorkerError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(ServiceWorkerError::TaskAborted(format!("{}: {e}", self.kind))),
        }
    }
}

/// Dispatch an event to its handler on a new task.
///
/// Must be called from within a tokio runtime.
pub fn dispatch(ctx: &Arc<WorkerContext>, event: WorkerEvent) -> EventTask {
    let kind = event.kind();
    let guard = ctx.begin_task();
    let ctx = Arc::clone(ctx);
    let span = info_span!("worker_event", kind, version = %ctx.version());

    let handle = tokio::spawn(
        async move {
            let _guard = guard;
            let result = run(&ctx, event).await;
            match &result {
                Ok(outcome) => debug!(?outcome, "Event handled"),
                Err(e) => error!(error = %e, kind = e.failure_kind().as_str(), "Event failed"),
            }
            result
        }
        .instrument(span),
    );

    EventTask { kind, handle }
}

async fn run(ctx: &WorkerContext, event: WorkerEvent) -> Result<EventOutcome, ServiceWorkerError> {
    match event {
        WorkerEvent::Install => install(ctx).await.map(|cached| EventOutcome::Installed { cached }),
        WorkerEvent::Activate => activate(ctx)
            .await
            .map(|removed| EventOutcome::Activated { removed }),
        WorkerEvent::Fetch(request) => handle_fetch(ctx, request).await.map(EventOutcome::Responded),
        WorkerEvent::Push(payload) => handle_push(ctx, payload).await.map(EventOutcome::Displayed),
        WorkerEvent::NotificationClick(notification) => handle_notification_click(ctx, notification)
            .await
            .map(EventOutcome::Routed),
        WorkerEvent::NotificationClose(notification) => {
            debug!(tag = %notification.tag, "Notification dismissed");
            Ok(EventOutcome::Dismissed)
        }
        WorkerEvent::Sync(tag) => Ok(match handle_sync(ctx, &tag).await? {
            Some(report) => EventOutcome::Synced(report),
            None => EventOutcome::Ignored,
        }),
    }
}
