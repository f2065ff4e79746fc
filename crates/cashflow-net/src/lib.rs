//! # CashFlow Net
//!
//! Request/response model and HTTP loading for the CashFlow background worker.
//!
//! ## Design Goals
//!
//! 1. **Single-read responses**: a [`Response`] is consumed once; callers that
//!    need to both return and persist it call [`Response::duplicate`] first
//! 2. **Response typing**: every response is tagged basic, cors, opaque or error
//!    relative to the application origin
//! 3. **Swappable transport**: the worker talks to the [`Network`] trait, so hosts
//!    and tests can provide their own

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cashflow_common::FailureKind;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::Serialize;
use thiserror::Error;
use url::Url;

pub mod loader;

pub use loader::{HttpLoader, LoaderConfig};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Body decode failed: {0}")]
    Decode(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl NetError {
    /// Failure class of this error.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            NetError::Decode(_) => FailureKind::Decode,
            _ => FailureKind::Network,
        }
    }
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Request mode, deciding how cross-origin responses are exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level navigation.
    Navigate,
    /// Only same-origin URLs are allowed.
    SameOrigin,
    /// Cross-origin allowed; response exposed as cors.
    #[default]
    Cors,
    /// Cross-origin allowed; response exposed as opaque.
    NoCors,
}

/// Outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
    pub mode: RequestMode,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            mode: RequestMode::default(),
        }
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Create a POST request with a JSON body.
    pub fn post_json<T: Serialize>(url: Url, value: &T) -> Result<Self, NetError> {
        let body = serde_json::to_vec(value).map_err(|e| NetError::Decode(e.to_string()))?;
        Ok(Self::post(url, Bytes::from(body)).header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        ))
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Set request mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }
}

/// How a response is exposed to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseType {
    /// Same-origin response, fully readable.
    Basic,
    /// Cross-origin response exposed via CORS.
    Cors,
    /// Cross-origin no-cors response; status and body hidden.
    Opaque,
    /// Network error.
    Error,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Basic => "basic",
            ResponseType::Cors => "cors",
            ResponseType::Opaque => "opaque",
            ResponseType::Error => "error",
        }
    }
}

/// Response to a request.
///
/// Not `Clone`: the body accessors take `self`, so a response is
/// read once. Use [`Response::duplicate`] to obtain a second copy.
#[derive(Debug)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    body: Bytes,
}

impl Response {
    /// Create a response with an empty body.
    pub fn new(url: Url, status: StatusCode, response_type: ResponseType) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            response_type,
            body: Bytes::new(),
        }
    }

    /// Create an opaque response. Headers and body are withheld.
    pub fn opaque(url: Url) -> Self {
        Self::new(url, StatusCode::OK, ResponseType::Opaque)
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if the response was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Body length in bytes.
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Produce an identical, independent copy of this response.
    pub fn duplicate(&self) -> Self {
        Self {
            url: self.url.clone(),
            status: self.status,
            headers: self.headers.clone(),
            response_type: self.response_type,
            body: self.body.clone(),
        }
    }

    /// Consume the response, returning its body.
    pub fn bytes(self) -> Bytes {
        self.body
    }

    /// Consume the response, returning its body as text.
    pub fn text(self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::Decode(e.to_string()))
    }

    /// Consume the response, decoding its body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::Decode(e.to_string()))
    }
}

/// Transport used by the worker to reach the network.
#[async_trait]
pub trait Network: Send + Sync {
    /// Issue a request. Transport failures are errors; HTTP error statuses are not.
    async fn fetch(&self, request: Request) -> Result<Response, NetError>;
}
