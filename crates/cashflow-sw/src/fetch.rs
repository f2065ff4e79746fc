//! Fetch interception: cache-first, write-through on eligible misses.

use cashflow_net::{Request, Response, ResponseType};
use http::{Method, StatusCode};
use tracing::{debug, trace};

use crate::context::WorkerContext;
use crate::ServiceWorkerError;

/// Whether a network response may be written to the cache.
///
/// Only GET requests answered with a 200 same-origin ("basic") response are
/// stored.
pub fn is_cacheable(method: &Method, response: &Response) -> bool {
    *method == Method::GET
        && response.status == StatusCode::OK
        && response.response_type == ResponseType::Basic
}

/// Answer a request from the current generation, falling back to the network.
///
/// A network failure on a miss is returned to the caller as is.
pub async fn handle_fetch(
    ctx: &WorkerContext,
    request: Request,
) -> Result<Response, ServiceWorkerError> {
    if !ctx.state().await.can_intercept_fetch() {
        trace!(url = %request.url, "Worker not active, passing through");
        return Ok(ctx.network().fetch(request).await?);
    }

    if request.method != Method::GET {
        trace!(url = %request.url, method = %request.method, "Non-GET request, passing through");
        return Ok(ctx.network().fetch(request).await?);
    }

    {
        let caches = ctx.caches().read().await;
        if let Some(entry) = caches.match_in(ctx.version(), &request) {
            debug!(url = %request.url, "Cache hit");
            return Ok(entry.to_response());
        }
    }

    debug!(url = %request.url, "Cache miss, fetching");
    let key = request.clone();
    let response = ctx.network().fetch(request).await?;

    if is_cacheable(&key.method, &response) {
        let snapshot = response.duplicate();
        ctx.caches()
            .write()
            .await
            .open(ctx.version())
            .put(&key, snapshot);
        trace!(url = %key.url, "Stored response in current generation");
    } else {
        trace!(
            url = %key.url,
            status = %response.status,
            response_type = response.response_type.as_str(),
            "Response not cacheable"
        );
    }

    Ok(response)
}
