//! # CashFlow Common
//!
//! Shared building blocks for the CashFlow background worker and its callers.
//!
//! ## Features
//!
//! - Failure taxonomy shared by every crate's error type
//! - Worker configuration (routes, cache version, endpoints)
//! - Logging configuration and setup

use std::path::PathBuf;
use thiserror::Error;

pub mod config;
pub mod logging;

pub use config::{PushEndpoints, SyncConfig, WorkerConfig};
pub use logging::{init_logging, LogConfig, LogFormat, LOG_ENV};

/// Broad class of a failure, used to decide how a caller reacts.
///
/// Nothing in the worker is fatal: every class degrades to skipping one
/// operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Feature not supported by this browser or device. Reported once.
    CapabilityAbsent,
    /// The user declined a permission prompt.
    PermissionDenied,
    /// Network or server failure. Propagated, never retried here.
    Network,
    /// Inbound data could not be decoded.
    Decode,
    /// Local persistence failed.
    Storage,
    /// Operation not valid in the current lifecycle state.
    State,
}

impl FailureKind {
    /// Stable name for log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::CapabilityAbsent => "capability_absent",
            FailureKind::PermissionDenied => "permission_denied",
            FailureKind::Network => "network",
            FailureKind::Decode => "decode",
            FailureKind::Storage => "storage",
            FailureKind::State => "state",
        }
    }

    /// Whether the failure should be shown to the user.
    ///
    /// Decode failures are recovered locally and stay invisible.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, FailureKind::Decode)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid route {0:?}: routes must start with '/'")]
    InvalidRoute(String),
}
