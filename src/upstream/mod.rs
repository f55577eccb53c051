use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::UpstreamError;

/// Per-call settings for an outbound request.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Sent as `Authorization: Bearer <token>` when present.
    pub token: Option<String>,
    pub timeout: Duration,
}

impl RequestOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: None,
            timeout,
        }
    }

    pub fn bearer(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }
}

/// Outbound calls to the evaluation service.
///
/// Implementations never retry. A call that exceeds `RequestOptions::timeout`
/// fails with `UpstreamError::Timeout`, a non-2xx answer with
/// `UpstreamError::Status`.
#[async_trait]
pub trait UpstreamGateway: Send + Sync {
    async fn get(&self, path: &str, opts: RequestOptions) -> Result<Value, UpstreamError>;

    async fn post(
        &self,
        path: &str,
        body: &Value,
        opts: RequestOptions,
    ) -> Result<Value, UpstreamError>;
}

/// `reqwest`-backed gateway rooted at the evaluation service base URL.
pub struct HttpGateway {
    base_url: String,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(base_url: &str) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| UpstreamError::Transport {
                path: base_url.to_string(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn execute(
        &self,
        path: &str,
        request: reqwest::RequestBuilder,
        opts: RequestOptions,
    ) -> Result<Value, UpstreamError> {
        let mut request = request.timeout(opts.timeout);
        if let Some(token) = opts.token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify(path, opts.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Upstream {} answered HTTP {}", path, status);
            return Err(UpstreamError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| classify(path, opts.timeout, e))?;
        debug!("Upstream {} answered {} bytes", path, bytes.len());
        serde_json::from_slice(&bytes).map_err(|e| UpstreamError::InvalidBody {
            path: path.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl UpstreamGateway for HttpGateway {
    async fn get(&self, path: &str, opts: RequestOptions) -> Result<Value, UpstreamError> {
        let request = self.client.get(self.url(path));
        self.execute(path, request, opts).await
    }

    async fn post(
        &self,
        path: &str,
        body: &Value,
        opts: RequestOptions,
    ) -> Result<Value, UpstreamError> {
        let request = self.client.post(self.url(path)).json(body);
        self.execute(path, request, opts).await
    }
}

/// Sorts a `reqwest` failure into timeout vs. everything else.
fn classify(path: &str, timeout: Duration, err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout {
            path: path.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else if err.is_decode() {
        UpstreamError::InvalidBody {
            path: path.to_string(),
            message: err.to_string(),
        }
    } else {
        UpstreamError::Transport {
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}
