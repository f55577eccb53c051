pub mod numbers;
pub mod social;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::{HeaderMap, Method};
use serde_json::Value;

use crate::error::ApiError;

pub use numbers::NumbersService;
pub use social::SocialService;

/// An inbound request with its body already collected.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiRequest {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_json(mut self, body: &Value) -> Self {
        self.body = Bytes::from(body.to_string());
        self
    }

    /// Non-empty path segments, e.g. `/numbers/p` → `["numbers", "p"]`.
    pub fn segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }

    pub fn json_body(&self) -> Result<Value, ApiError> {
        serde_json::from_slice(&self.body)
            .map_err(|_| ApiError::Validation("Invalid JSON body".to_string()))
    }
}

/// A JSON-over-HTTP service mounted by `server::serve`.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    /// Label used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Whether responses carry a permissive CORS header.
    fn allow_any_origin(&self) -> bool {
        false
    }

    async fn handle(&self, req: ApiRequest) -> Result<Value, ApiError>;
}

/// Fails with 405 unless `req` uses `expected`.
pub(crate) fn require_method(req: &ApiRequest, expected: Method) -> Result<(), ApiError> {
    if req.method == expected {
        Ok(())
    } else {
        Err(ApiError::MethodNotAllowed)
    }
}
