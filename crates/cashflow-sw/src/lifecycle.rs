//! Install and activate handling.

use cashflow_net::{Request, RequestMode};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context::{WorkerContext, WorkerNotice};
use crate::ServiceWorkerError;

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WorkerState {
    /// Context created, nothing run yet.
    #[default]
    Parsed,
    /// Precaching the manifest.
    Installing,
    /// Precache stored, waiting for activation.
    Installed,
    /// Removing stale generations.
    Activating,
    /// Active and intercepting fetches.
    Activated,
    /// Install failed or superseded by a newer version.
    Redundant,
}

impl WorkerState {
    /// Only an activated worker intercepts fetches.
    pub fn can_intercept_fetch(&self) -> bool {
        matches!(self, WorkerState::Activated)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Redundant)
    }
}

/// Run the install step: fetch every manifest route and store the responses
/// in the current generation.
///
/// All-or-nothing. A transport failure or non-2xx status on any route stores
/// nothing and leaves the worker redundant. Returns the number of entries
/// written.
pub async fn install(ctx: &WorkerContext) -> Result<usize, ServiceWorkerError> {
    let state = ctx.state().await;
    if state != WorkerState::Parsed {
        return Err(ServiceWorkerError::StateError(format!(
            "cannot install from {state:?}"
        )));
    }
    ctx.set_state(WorkerState::Installing).await;

    match precache(ctx).await {
        Ok(count) => {
            ctx.set_state(WorkerState::Installed).await;
            info!(version = ctx.version(), entries = count, "Cache opened and precached");
            Ok(count)
        }
        Err(e) => {
            warn!(version = ctx.version(), error = %e, "Install failed");
            ctx.set_state(WorkerState::Redundant).await;
            Err(e)
        }
    }
}

async fn precache(ctx: &WorkerContext) -> Result<usize, ServiceWorkerError> {
    let mut fetched = Vec::with_capacity(ctx.config().precache.len());

    for route in &ctx.config().precache {
        let url = ctx.config().resolve(route)?;
        let request = Request::get(url).mode(RequestMode::SameOrigin);

        let response = ctx
            .network()
            .fetch(request.clone())
            .await
            .map_err(|e| ServiceWorkerError::InstallFailed {
                route: route.clone(),
                reason: e.to_string(),
            })?;

        if !response.ok() {
            return Err(ServiceWorkerError::InstallFailed {
                route: route.clone(),
                reason: format!("status {}", response.status),
            });
        }
        fetched.push((request, response));
    }

    let count = fetched.len();
    let mut caches = ctx.caches().write().await;
    let cache = caches.open(ctx.version());
    for (request, response) in fetched {
        cache.put(&request, response);
    }
    Ok(count)
}

/// Run the activate step: delete every generation except the current one.
///
/// The worker only reaches [`WorkerState::Activated`] after cleanup
/// completes. Returns the names of the deleted generations.
pub async fn activate(ctx: &WorkerContext) -> Result<Vec<String>, ServiceWorkerError> {
    let state = ctx.state().await;
    if state != WorkerState::Installed {
        return Err(ServiceWorkerError::StateError(format!(
            "cannot activate from {state:?}"
        )));
    }
    ctx.set_state(WorkerState::Activating).await;

    let removed = {
        let mut caches = ctx.caches().write().await;
        let stale: Vec<String> = caches
            .keys()
            .into_iter()
            .filter(|name| name != ctx.version())
            .collect();

        for name in &stale {
            info!(generation = %name, "Removing stale cache generation");
            caches.delete(name);
        }
        caches.open(ctx.version());
        stale
    };

    for name in &removed {
        ctx.notify(WorkerNotice::GenerationRemoved { name: name.clone() });
    }

    ctx.set_state(WorkerState::Activated).await;
    Ok(removed)
}
