//! Push notification receiving and display.
//!
//! ```text
//! Idle ──→ PayloadReceived ──→ Decoded ─────────────────→ Displayed
//!   │              └────────→ DecodeFailed ─→ DefaultsApplied ─→ Displayed
//!   └─(no payload)──────────────────────────→ DefaultsApplied ─→ Displayed
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::context::WorkerContext;
use crate::ServiceWorkerError;

const DEFAULT_TITLE: &str = "CashFlow Manager";
const DEFAULT_BODY: &str = "Nova notificação";
const DEFAULT_ICON: &str = "/static/icons/icon-192x192.png";
const DEFAULT_BADGE: &str = "/static/icons/icon-72x72.png";
const DEFAULT_TAG: &str = "cashflow-notification";
const DEFAULT_VIBRATE: [u32; 3] = [200, 100, 200];

// ==================== Descriptor ====================

/// Data attached to a notification and handed back on click.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    /// Navigation target.
    pub url: String,
    /// Receive time (ms since epoch).
    pub timestamp: u64,
}

/// Everything needed to display one notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDescriptor {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub tag: String,
    pub require_interaction: bool,
    pub data: NotificationData,
}

impl NotificationDescriptor {
    /// The hard-coded default descriptor.
    pub fn fallback(dashboard_route: &str, timestamp: u64) -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            body: DEFAULT_BODY.to_string(),
            icon: DEFAULT_ICON.to_string(),
            badge: DEFAULT_BADGE.to_string(),
            vibrate: DEFAULT_VIBRATE.to_vec(),
            tag: DEFAULT_TAG.to_string(),
            require_interaction: false,
            data: NotificationData {
                url: dashboard_route.to_string(),
                timestamp,
            },
        }
    }
}

/// Stage reached while handling a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    Idle,
    PayloadReceived,
    Decoded,
    DecodeFailed,
    DefaultsApplied,
    Displayed,
}

/// A non-empty string field of the payload, else the default.
fn pick(payload: &Map<String, JsonValue>, key: &str, default: String) -> String {
    payload
        .get(key)
        .and_then(JsonValue::as_str)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or(default)
}

/// Build a descriptor from a raw push payload.
///
/// Returns the descriptor and the state reached before display: `Decoded`
/// when the payload was merged, `DefaultsApplied` when it was absent or not
/// a JSON object. Fields are merged one at a time; a missing, empty or
/// non-string field keeps its default.
pub fn decode_push(
    payload: Option<&[u8]>,
    dashboard_route: &str,
    timestamp: u64,
) -> (NotificationDescriptor, ReceiveState) {
    let defaults = NotificationDescriptor::fallback(dashboard_route, timestamp);

    let raw = match payload {
        Some(raw) if !raw.iter().all(u8::is_ascii_whitespace) => raw,
        _ => {
            debug!("Push without payload, using defaults");
            return (defaults, ReceiveState::DefaultsApplied);
        }
    };

    let parsed = match serde_json::from_slice::<JsonValue>(raw) {
        Ok(JsonValue::Object(parsed)) => parsed,
        Ok(other) => {
            warn!(kind = json_kind(&other), state = ?ReceiveState::DecodeFailed, "Push payload is not an object");
            return (defaults, ReceiveState::DefaultsApplied);
        }
        Err(e) => {
            warn!(error = %e, state = ?ReceiveState::DecodeFailed, "Failed to parse push payload");
            return (defaults, ReceiveState::DefaultsApplied);
        }
    };

    let descriptor = NotificationDescriptor {
        title: pick(&parsed, "title", defaults.title),
        body: pick(&parsed, "body", defaults.body),
        icon: pick(&parsed, "icon", defaults.icon),
        badge: pick(&parsed, "badge", defaults.badge),
        data: NotificationData {
            url: pick(&parsed, "url", defaults.data.url),
            timestamp,
        },
        ..defaults
    };
    (descriptor, ReceiveState::Decoded)
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

// ==================== Host ====================

/// Platform notification surface.
#[async_trait]
pub trait NotificationHost: Send + Sync {
    /// Display a notification. Completes once the platform has shown it.
    async fn show(&self, descriptor: &NotificationDescriptor) -> Result<(), ServiceWorkerError>;

    /// Close displayed notifications with this tag.
    async fn close(&self, tag: &str) -> Result<(), ServiceWorkerError>;
}

/// Headless notification surface that keeps displayed notifications in memory.
///
/// A notification with the same tag as a displayed one replaces it.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    displayed: RwLock<Vec<NotificationDescriptor>>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently displayed notifications, oldest first.
    pub async fn displayed(&self) -> Vec<NotificationDescriptor> {
        self.displayed.read().await.clone()
    }
}

#[async_trait]
impl NotificationHost for NotificationCenter {
    async fn show(&self, descriptor: &NotificationDescriptor) -> Result<(), ServiceWorkerError> {
        let mut displayed = self.displayed.write().await;
        displayed.retain(|d| d.tag != descriptor.tag);
        displayed.push(descriptor.clone());
        Ok(())
    }

    async fn close(&self, tag: &str) -> Result<(), ServiceWorkerError> {
        self.displayed.write().await.retain(|d| d.tag != tag);
        Ok(())
    }
}

// ==================== Handler ====================

/// Handle a push delivery: decode, apply defaults, display.
///
/// Decode failures never prevent display. The returned future resolves only
/// after the host has shown the notification.
pub async fn handle_push(
    ctx: &WorkerContext,
    payload: Option<Bytes>,
) -> Result<NotificationDescriptor, ServiceWorkerError> {
    debug!(
        state = ?ReceiveState::PayloadReceived,
        bytes = payload.as_ref().map(|p| p.len()).unwrap_or(0),
        "Push received"
    );

    let (descriptor, state) = decode_push(
        payload.as_deref(),
        &ctx.config().dashboard_route,
        crate::now_millis(),
    );

    ctx.notifications().show(&descriptor).await?;

    info!(
        title = %descriptor.title,
        tag = %descriptor.tag,
        via = ?state,
        state = ?ReceiveState::Displayed,
        "Notification displayed"
    );
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestWorker;

    const DASHBOARD: &str = "/core/dashboard/";

    #[test]
    fn test_partial_payload_merges_over_defaults() {
        let (descriptor, state) = decode_push(
            Some(br#"{"title":"Alert","body":"Low balance"}"#.as_slice()),
            DASHBOARD,
            42,
        );

        assert_eq!(state, ReceiveState::Decoded);
        assert_eq!(descriptor.title, "Alert");
        assert_eq!(descriptor.body, "Low balance");
        assert_eq!(descriptor.icon, "/static/icons/icon-192x192.png");
        assert_eq!(descriptor.badge, "/static/icons/icon-72x72.png");
        assert_eq!(descriptor.data.url, DASHBOARD);
        assert_eq!(descriptor.data.timestamp, 42);
    }

    #[test]
    fn test_empty_payload_is_exact_default() {
        for payload in [None, Some(&b""[..]), Some(&b"  \n"[..])] {
            let (descriptor, state) = decode_push(payload, DASHBOARD, 7);
            assert_eq!(state, ReceiveState::DefaultsApplied);
            assert_eq!(descriptor, NotificationDescriptor::fallback(DASHBOARD, 7));
            assert_eq!(descriptor.title, "CashFlow Manager");
            assert_eq!(descriptor.body, "Nova notificação");
        }
    }

    #[test]
    fn test_undecodable_payloads_fall_back() {
        let payloads: [&[u8]; 5] = [b"not json", b"42", b"null", br#"["Alert"]"#, b"{\"title\":"];
        for payload in payloads {
            let (descriptor, state) = decode_push(Some(payload), DASHBOARD, 1);
            assert_eq!(state, ReceiveState::DefaultsApplied);
            assert_eq!(descriptor, NotificationDescriptor::fallback(DASHBOARD, 1));
        }
    }

    #[test]
    fn test_wrong_typed_field_keeps_the_others() {
        let (descriptor, state) = decode_push(
            Some(br#"{"title":"Alert","body":"Low balance","badge":123,"url":null}"#.as_slice()),
            DASHBOARD,
            5,
        );

        assert_eq!(state, ReceiveState::Decoded);
        assert_eq!(descriptor.title, "Alert");
        assert_eq!(descriptor.body, "Low balance");
        assert_eq!(descriptor.badge, "/static/icons/icon-72x72.png");
        assert_eq!(descriptor.data.url, DASHBOARD);
    }

    #[test]
    fn test_url_and_unknown_fields() {
        let (descriptor, _) = decode_push(
            Some(br#"{"url":"/transactions/12/","priority":"high","icon":""}"#.as_slice()),
            DASHBOARD,
            1,
        );
        assert_eq!(descriptor.data.url, "/transactions/12/");
        assert_eq!(descriptor.icon, "/static/icons/icon-192x192.png");
        assert_eq!(descriptor.vibrate, vec![200, 100, 200]);
        assert_eq!(descriptor.tag, "cashflow-notification");
        assert!(!descriptor.require_interaction);
    }

    #[test]
    fn test_descriptor_serializes_camel_case() {
        let json = serde_json::to_value(NotificationDescriptor::fallback(DASHBOARD, 3)).unwrap();
        assert_eq!(json["requireInteraction"], false);
        assert_eq!(json["data"]["url"], DASHBOARD);
    }

    #[tokio::test]
    async fn test_notification_center_replaces_by_tag() {
        let center = NotificationCenter::new();
        let mut first = NotificationDescriptor::fallback(DASHBOARD, 1);
        first.title = "first".to_string();
        let second = NotificationDescriptor::fallback(DASHBOARD, 2);

        center.show(&first).await.unwrap();
        center.show(&second).await.unwrap();
        assert_eq!(center.displayed().await, vec![second]);

        center.close("cashflow-notification").await.unwrap();
        assert!(center.displayed().await.is_empty());
    }

    #[tokio::test]
    async fn test_handle_push_displays() {
        let worker = TestWorker::new();
        let shown = handle_push(
            &worker.ctx,
            Some(Bytes::from_static(br#"{"title":"Alert","body":"Low balance"}"#)),
        )
        .await
        .unwrap();

        assert_eq!(worker.notifications.displayed().await, vec![shown.clone()]);
        assert_eq!(shown.title, "Alert");
    }

    #[tokio::test]
    async fn test_handle_push_bad_payload_still_displays_default() {
        let worker = TestWorker::new();
        let shown = handle_push(&worker.ctx, Some(Bytes::from_static(b"{broken")))
            .await
            .unwrap();

        let displayed = worker.notifications.displayed().await;
        assert_eq!(displayed.len(), 1);
        assert_eq!(
            displayed[0],
            NotificationDescriptor::fallback(DASHBOARD, shown.data.timestamp)
        );
    }
}
