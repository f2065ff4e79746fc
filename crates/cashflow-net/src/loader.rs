//! reqwest-backed implementation of [`Network`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, trace};
use url::Url;

use crate::{NetError, Network, Request, RequestMode, Response, ResponseType};

/// HTTP loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Application origin used to classify responses.
    pub origin: Url,
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Default timeout.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
    /// Enable cookies.
    pub cookies_enabled: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse("http://localhost:8000/").expect("static origin is valid"),
            user_agent: format!("CashFlowWorker/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "pt-BR,pt;q=0.9,en;q=0.8".to_string(),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
            cookies_enabled: true,
        }
    }
}

/// Network transport backed by a shared reqwest client.
pub struct HttpLoader {
    client: Client,
    config: LoaderConfig,
}

impl HttpLoader {
    /// Create a new loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .cookie_store(config.cookies_enabled)
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(origin = %config.origin, "HttpLoader initialized");

        Ok(Self { client, config })
    }

    /// The configured application origin.
    pub fn origin(&self) -> &Url {
        &self.config.origin
    }

    fn classify(&self, request: &Request, final_url: &Url) -> ResponseType {
        if final_url.origin() == self.config.origin.origin() {
            ResponseType::Basic
        } else if request.mode == RequestMode::NoCors {
            ResponseType::Opaque
        } else {
            ResponseType::Cors
        }
    }
}

#[async_trait]
impl Network for HttpLoader {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        if request.mode == RequestMode::SameOrigin
            && request.url.origin() != self.config.origin.origin()
        {
            return Err(NetError::RequestFailed(format!(
                "cross-origin request in same-origin mode: {}",
                request.url
            )));
        }

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        req_builder = req_builder.header("Accept-Language", &self.config.accept_language);

        if let Some(ref body) = request.body {
            req_builder = req_builder.body(body.clone());
        }

        let timeout = request.timeout.unwrap_or(self.config.default_timeout);
        req_builder = req_builder.timeout(timeout);

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(timeout)
            } else {
                NetError::HttpError(e)
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let response_type = self.classify(&request, &url);

        if response_type == ResponseType::Opaque {
            trace!(url = %url, "Opaque response, withholding body");
            return Ok(Response::opaque(url));
        }

        let body = response.bytes().await?;

        trace!(
            url = %url,
            status = %status,
            response_type = response_type.as_str(),
            body_len = body.len(),
            "Response received"
        );

        let mut out = Response::new(url, status, response_type).with_body(body);
        out.headers = headers;
        Ok(out)
    }
}
