//! Versioned resource cache.
//!
//! A [`CacheStorage`] holds named generations. Each [`Cache`] maps a request
//! identity to an immutable snapshot of a response.

use bytes::Bytes;
use cashflow_net::{Request, Response, ResponseType};
use hashbrown::HashMap;
use http::{header, HeaderMap, StatusCode};
use url::Url;

// ==================== Request Identity ====================

/// Lookup key for a cached response: method plus URL without fragment.
///
/// Header-sensitive matching is handled per entry through `Vary`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    /// Key for a request.
    pub fn of(request: &Request) -> Self {
        let mut url = request.url.clone();
        url.set_fragment(None);
        Self {
            method: request.method.as_str().to_string(),
            url: url.into(),
        }
    }
}

// ==================== Cache Entry ====================

/// A stored response snapshot.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Response URL.
    pub url: Url,

    /// Response status.
    pub status: StatusCode,

    /// Response type at the time it was stored.
    pub response_type: ResponseType,

    /// Response headers.
    pub headers: HeaderMap,

    /// Response body.
    pub body: Bytes,

    /// Request header values the response varies on. `None` means the header was absent.
    pub vary: Vec<(String, Option<String>)>,

    /// Vary: * was present; the entry never matches a lookup.
    pub vary_wildcard: bool,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Build a snapshot from a response, recording the request headers it varies on.
    pub fn snapshot(request: &Request, response: Response) -> Self {
        let mut vary = Vec::new();
        let mut vary_wildcard = false;

        for value in response.headers.get_all(header::VARY) {
            let Ok(value) = value.to_str() else { continue };
            for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                if name == "*" {
                    vary_wildcard = true;
                    continue;
                }
                let name = name.to_ascii_lowercase();
                let request_value = request
                    .headers
                    .get(name.as_str())
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                vary.push((name, request_value));
            }
        }

        let url = response.url.clone();
        let status = response.status;
        let response_type = response.response_type;
        let headers = response.headers.clone();

        Self {
            url,
            status,
            response_type,
            headers,
            body: response.bytes(),
            vary,
            vary_wildcard,
            cached_at: crate::now_millis(),
        }
    }

    /// Whether this entry answers the given request.
    pub fn matches(&self, request: &Request) -> bool {
        if self.vary_wildcard {
            return false;
        }
        self.vary.iter().all(|(name, expected)| {
            let actual = request
                .headers
                .get(name.as_str())
                .and_then(|v| v.to_str().ok());
            actual == expected.as_deref()
        })
    }

    /// Materialize a fresh response from the snapshot.
    pub fn to_response(&self) -> Response {
        let mut response = Response::new(self.url.clone(), self.status, self.response_type)
            .with_body(self.body.clone());
        response.headers = self.headers.clone();
        response
    }
}

// ==================== Cache ====================

/// One cache generation.
#[derive(Debug, Default)]
pub struct Cache {
    /// Generation name (version tag).
    pub name: String,

    entries: HashMap<RequestKey, CacheEntry>,
}

impl Cache {
    /// Create an empty generation.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, request: &Request) -> Option<&CacheEntry> {
        self.entries
            .get(&RequestKey::of(request))
            .filter(|entry| entry.matches(request))
    }

    /// Store a response under the request's identity, replacing any previous entry.
    pub fn put(&mut self, request: &Request, response: Response) {
        let entry = CacheEntry::snapshot(request, response);
        self.entries.insert(RequestKey::of(request), entry);
    }

    /// Delete entry.
    pub fn delete(&mut self, request: &Request) -> bool {
        self.entries.remove(&RequestKey::of(request)).is_some()
    }

    /// Get all keys.
    pub fn keys(&self) -> Vec<&RequestKey> {
        self.entries.keys().collect()
    }

    /// Check whether a URL is stored for GET.
    pub fn contains_url(&self, url: &str) -> bool {
        self.entries
            .keys()
            .any(|key| key.method == "GET" && key.url == url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// All cache generations, in creation order.
#[derive(Debug, Default)]
pub struct CacheStorage {
    generations: Vec<Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a generation, creating it if it doesn't exist.
    pub fn open(&mut self, name: &str) -> &mut Cache {
        let index = match self.generations.iter().position(|c| c.name == name) {
            Some(index) => index,
            None => {
                self.generations.push(Cache::new(name));
                self.generations.len() - 1
            }
        };
        &mut self.generations[index]
    }

    /// Get a generation without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.generations.iter().find(|c| c.name == name)
    }

    /// Check if a generation exists.
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Delete a generation and all its entries.
    pub fn delete(&mut self, name: &str) -> bool {
        let before = self.generations.len();
        self.generations.retain(|c| c.name != name);
        self.generations.len() != before
    }

    /// Get all generation names.
    pub fn keys(&self) -> Vec<String> {
        self.generations.iter().map(|c| c.name.clone()).collect()
    }

    /// Match a request within one generation.
    pub fn match_in(&self, name: &str, request: &Request) -> Option<&CacheEntry> {
        self.get(name)?.match_request(request)
    }
}
