use hyper::StatusCode;
use thiserror::Error;

/// Failure of a single outbound call to the evaluation service.
///
/// Timeouts stay a separate variant all the way up to the request handlers so
/// they can answer 408 instead of a generic 500.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("upstream request to {path} timed out after {timeout_ms}ms")]
    Timeout { path: String, timeout_ms: u64 },

    #[error("upstream {path} answered HTTP {status}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    #[error("upstream request to {path} failed: {message}")]
    Transport { path: String, message: String },

    #[error("upstream {path} returned an unusable body: {message}")]
    InvalidBody { path: String, message: String },
}

impl UpstreamError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, UpstreamError::Timeout { .. })
    }

    /// True when upstream refused our credentials (401/403).
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, UpstreamError::Status { status: 401 | 403, .. })
    }

    /// Short label used for the `kind` metric dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Timeout { .. } => "timeout",
            UpstreamError::Status { .. } if self.is_auth_rejection() => "auth",
            UpstreamError::Status { .. } => "status",
            UpstreamError::Transport { .. } => "transport",
            UpstreamError::InvalidBody { .. } => "body",
        }
    }
}

/// Errors surfaced to HTTP clients. The display string becomes the
/// `error` field of the JSON response body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("Authentication required")]
    AuthRequired,

    #[error("{0}")]
    UpstreamTimeout(String),

    #[error("{0}")]
    UpstreamAuth(String),

    #[error("{0}")]
    UpstreamUnavailable(String),

    #[error("Not found")]
    NotFound,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("{0}")]
    Internal(String),
}

/// Per-endpoint wording for translated upstream failures.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamContext {
    pub timeout: &'static str,
    pub rejected: &'static str,
    pub unavailable: &'static str,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::AuthRequired | ApiError::UpstreamAuth(_) => StatusCode::UNAUTHORIZED,
            ApiError::UpstreamTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::UpstreamUnavailable(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_string() })
    }

    /// Maps an upstream failure onto the client-facing error kinds:
    /// timeout → 408, credential rejection → 401, anything else → 500.
    pub fn from_upstream(err: &UpstreamError, ctx: UpstreamContext) -> Self {
        if err.is_timeout() {
            ApiError::UpstreamTimeout(ctx.timeout.to_string())
        } else if err.is_auth_rejection() {
            ApiError::UpstreamAuth(ctx.rejected.to_string())
        } else {
            ApiError::UpstreamUnavailable(ctx.unavailable.to_string())
        }
    }
}
