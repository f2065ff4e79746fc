//! Subscription round trips with the application server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cashflow_common::WorkerConfig;
use cashflow_net::{Network, Request, Response};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, warn};

use crate::{
    decode_application_server_key, device_name, Permission, PushError, PushPlatform,
    PushSubscription, SubscribeOptions,
};

#[derive(Deserialize)]
struct ServerError {
    error: Option<String>,
}

/// Manages this device's push subscription.
pub struct PushClient {
    platform: Arc<dyn PushPlatform>,
    network: Arc<dyn Network>,
    config: WorkerConfig,
    application_server_key: String,
    user_agent: String,
    subscribed: AtomicBool,
    capability_reported: AtomicBool,
}

impl PushClient {
    pub fn new(
        platform: Arc<dyn PushPlatform>,
        network: Arc<dyn Network>,
        config: WorkerConfig,
        application_server_key: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            network,
            config,
            application_server_key: application_server_key.into(),
            user_agent: user_agent.into(),
            subscribed: AtomicBool::new(false),
            capability_reported: AtomicBool::new(false),
        }
    }

    /// Last known subscription status.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    /// Check platform support and load the current subscription status.
    pub async fn init(&self) -> Result<bool, PushError> {
        self.ensure_capable()?;
        self.check_subscription().await
    }

    /// Refresh [`is_subscribed`](Self::is_subscribed) from the platform.
    pub async fn check_subscription(&self) -> Result<bool, PushError> {
        let subscribed = self.platform.get_subscription().await?.is_some();
        self.subscribed.store(subscribed, Ordering::Release);
        if subscribed {
            debug!("Existing push subscription found");
        }
        Ok(subscribed)
    }

    /// Ask for permission, subscribe, and register the subscription with the server.
    pub async fn subscribe(&self) -> Result<PushSubscription, PushError> {
        self.ensure_capable()?;

        let permission = self.platform.request_permission().await;
        if permission != Permission::Granted {
            warn!(?permission, "Notification permission not granted");
            return Err(PushError::PermissionDenied(permission));
        }

        let key = decode_application_server_key(&self.application_server_key)?;
        let subscription = self
            .platform
            .subscribe(SubscribeOptions {
                user_visible_only: true,
                application_server_key: key,
            })
            .await?;
        debug!(endpoint = %subscription.endpoint, "Subscription created");

        let body = json!({
            "subscription": subscription,
            "device_name": device_name(&self.user_agent),
        });
        self.post(&self.config.push.subscribe, Some(&body)).await?;

        self.subscribed.store(true, Ordering::Release);
        info!("Push notifications enabled");
        Ok(subscription)
    }

    /// Cancel the subscription locally and on the server.
    ///
    /// Returns `false` when there was nothing to cancel.
    pub async fn unsubscribe(&self) -> Result<bool, PushError> {
        let Some(subscription) = self.platform.get_subscription().await? else {
            debug!("No subscription to cancel");
            self.subscribed.store(false, Ordering::Release);
            return Ok(false);
        };

        self.platform.unsubscribe().await?;
        self.subscribed.store(false, Ordering::Release);

        let body = json!({ "endpoint": subscription.endpoint });
        self.post(&self.config.push.unsubscribe, Some(&body)).await?;

        info!("Push notifications disabled");
        Ok(true)
    }

    /// Ask the server to push a test notification to this user.
    pub async fn send_test(&self) -> Result<JsonValue, PushError> {
        let reply = self.post(&self.config.push.test, None).await?;
        info!("Test notification requested");
        Ok(reply)
    }

    fn ensure_capable(&self) -> Result<(), PushError> {
        let missing = if !self.platform.supports_service_worker() {
            "background workers"
        } else if !self.platform.supports_push() {
            "push notifications"
        } else {
            return Ok(());
        };

        if !self.capability_reported.swap(true, Ordering::AcqRel) {
            warn!(missing, "Push unavailable on this platform");
        }
        Err(PushError::CapabilityAbsent(missing))
    }

    async fn post(&self, route: &str, body: Option<&JsonValue>) -> Result<JsonValue, PushError> {
        let url = self.config.resolve(route)?;
        let request = match body {
            Some(body) => Request::post_json(url, body)?,
            None => Request::post_json(url, &json!({}))?,
        }
        .timeout(self.config.network_timeout());

        let response = self.network.fetch(request).await?;
        read_reply(response)
    }
}

fn read_reply(response: Response) -> Result<JsonValue, PushError> {
    let status = response.status;
    if !response.ok() {
        let message = response
            .json::<ServerError>()
            .ok()
            .and_then(|e| e.error)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });
        warn!(status = status.as_u16(), %message, "Server rejected push request");
        return Err(PushError::Server {
            status: status.as_u16(),
            message,
        });
    }

    if response.body_len() == 0 {
        return Ok(JsonValue::Null);
    }
    Ok(response.json()?)
}
