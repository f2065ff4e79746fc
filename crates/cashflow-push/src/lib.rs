//! # CashFlow Push
//!
//! Page-side push subscription management for CashFlow Manager.
//!
//! ## Features
//!
//! - **Capability checks**: background worker and push support, reported once
//! - **Permission flow**: denied permission never reaches the server
//! - **Subscription round trip**: subscribe, unsubscribe and test against the
//!   application server
//!
//! ## Architecture
//!
//! ```text
//! PushClient
//!     ├── PushPlatform (host: permission, subscription store)
//!     └── Network (application server)
//!             ├── POST /api/push/subscribe/
//!             ├── POST /api/push/unsubscribe/
//!             └── POST /api/push/test/
//! ```

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use cashflow_common::FailureKind;
use cashflow_net::NetError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod client;

pub use client::PushClient;

/// Errors raised by the push client.
#[derive(Error, Debug)]
pub enum PushError {
    #[error("Not supported on this platform: {0}")]
    CapabilityAbsent(&'static str),

    #[error("Notification permission is {0:?}; enable notifications for this site in the browser settings")]
    PermissionDenied(Permission),

    #[error("Invalid application server key: {0}")]
    InvalidKey(String),

    #[error("Server answered {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl PushError {
    /// Failure class of this error.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            PushError::CapabilityAbsent(_) => FailureKind::CapabilityAbsent,
            PushError::PermissionDenied(_) => FailureKind::PermissionDenied,
            PushError::InvalidKey(_) | PushError::InvalidUrl(_) => FailureKind::Decode,
            PushError::Server { .. } => FailureKind::Network,
            PushError::Network(e) => e.failure_kind(),
            PushError::Platform(_) => FailureKind::State,
        }
    }
}

/// Notification permission as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Granted,
    Denied,
    /// The user dismissed the prompt without choosing.
    Default,
}

/// Encryption keys of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// A push subscription in the shape the server stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub endpoint: String,
    pub expiration_time: Option<u64>,
    pub keys: SubscriptionKeys,
}

/// Options for creating a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Every push must result in a visible notification.
    pub user_visible_only: bool,
    /// Decoded public key of the application server.
    pub application_server_key: Vec<u8>,
}

/// Host push facilities.
#[async_trait]
pub trait PushPlatform: Send + Sync {
    /// Whether a background worker can be registered at all.
    fn supports_service_worker(&self) -> bool;

    /// Whether the push service is reachable.
    fn supports_push(&self) -> bool;

    /// Ask the user for notification permission.
    async fn request_permission(&self) -> Permission;

    /// The existing subscription, if any.
    async fn get_subscription(&self) -> Result<Option<PushSubscription>, PushError>;

    /// Create a subscription with the push service.
    async fn subscribe(&self, options: SubscribeOptions) -> Result<PushSubscription, PushError>;

    /// Cancel the existing subscription locally.
    async fn unsubscribe(&self) -> Result<(), PushError>;
}

/// Decode a URL-safe base64 application server key.
///
/// Missing padding is tolerated, as is the standard alphabet.
pub fn decode_application_server_key(key: &str) -> Result<Vec<u8>, PushError> {
    let normalized: String = key
        .trim()
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();

    if normalized.is_empty() {
        return Err(PushError::InvalidKey("empty key".to_string()));
    }

    URL_SAFE_NO_PAD
        .decode(normalized.as_bytes())
        .map_err(|e| PushError::InvalidKey(e.to_string()))
}

/// Short device label derived from a user agent string.
pub fn device_name(user_agent: &str) -> &'static str {
    const DEVICES: [(&str, &str); 6] = [
        ("iPhone", "iPhone"),
        ("iPad", "iPad"),
        ("Android", "Android"),
        ("Windows", "Windows"),
        ("Mac", "Mac"),
        ("Linux", "Linux"),
    ];

    DEVICES
        .iter()
        .find(|(marker, _)| user_agent.contains(marker))
        .map(|(_, name)| *name)
        .unwrap_or("Navegador")
}
