//! Worker error type.

use cashflow_common::FailureKind;
use cashflow_net::NetError;
use thiserror::Error;

/// Errors that can occur while handling a worker event.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Install failed for {route}: {reason}")]
    InstallFailed { route: String, reason: String },

    #[error("State error: {0}")]
    StateError(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Sync queue is corrupt: {0}")]
    QueueCorrupt(String),

    #[error("Sync incomplete: {delivered} delivered, {remaining} still pending")]
    SyncIncomplete { delivered: usize, remaining: usize },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Task aborted: {0}")]
    TaskAborted(String),
}

impl ServiceWorkerError {
    /// Failure class of this error.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ServiceWorkerError::Network(e) => e.failure_kind(),
            ServiceWorkerError::InstallFailed { .. } => FailureKind::Network,
            ServiceWorkerError::SyncIncomplete { .. } => FailureKind::Network,
            ServiceWorkerError::Notification(_) => FailureKind::PermissionDenied,
            ServiceWorkerError::Storage(_) | ServiceWorkerError::QueueCorrupt(_) => {
                FailureKind::Storage
            }
            ServiceWorkerError::InvalidUrl(_) => FailureKind::Decode,
            ServiceWorkerError::StateError(_)
            | ServiceWorkerError::Client(_)
            | ServiceWorkerError::TaskAborted(_) => FailureKind::State,
        }
    }
}
