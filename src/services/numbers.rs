use async_trait::async_trait;
use hyper::Method;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{ApiRequest, RouteHandler, require_method};
use crate::admin::ServiceMetrics;
use crate::config::NumbersConfig;
use crate::error::{ApiError, UpstreamContext, UpstreamError};
use crate::session::SessionStore;
use crate::upstream::{RequestOptions, UpstreamGateway};
use crate::window::{NumberCategory, WindowStore};

/// Fields `/auth` must carry before it is forwarded upstream.
pub const AUTH_FIELDS: [&str; 6] = [
    "email",
    "name",
    "rollNo",
    "accessCode",
    "clientID",
    "clientSecret",
];

const REGISTER_ERRORS: UpstreamContext = UpstreamContext {
    timeout: "Registration request timed out",
    rejected: "Registration rejected",
    unavailable: "Registration failed",
};

const NUMBERS_ERRORS: UpstreamContext = UpstreamContext {
    timeout: "Request timeout",
    rejected: "Authentication failed",
    unavailable: "Failed to fetch numbers from server",
};

#[derive(Deserialize)]
struct NumbersPayload {
    #[serde(default)]
    numbers: Vec<i64>,
}

/// `/register`, `/auth` and `/numbers/:numberid`.
pub struct NumbersService {
    gateway: Arc<dyn UpstreamGateway>,
    windows: WindowStore,
    session: SessionStore,
    config: NumbersConfig,
    metrics: Arc<ServiceMetrics>,
}

impl NumbersService {
    pub fn new(
        gateway: Arc<dyn UpstreamGateway>,
        config: NumbersConfig,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            gateway,
            windows: WindowStore::new(config.window_size),
            session: SessionStore::new(),
            config,
            metrics,
        }
    }

    pub fn windows(&self) -> &WindowStore {
        &self.windows
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    fn upstream_failed(&self, err: &UpstreamError) {
        warn!("Upstream call failed: {}", err);
        self.metrics.record_upstream_failure(err.kind());
    }

    async fn register(&self) -> Result<Value, ApiError> {
        let payload = self.config.registration_payload();
        debug!("Forwarding registration to upstream");
        let opts = RequestOptions::with_timeout(self.config.register_timeout());
        match self.gateway.post("/register", &payload, opts).await {
            Ok(body) => {
                info!("Registration accepted by upstream");
                Ok(body)
            }
            Err(err) => {
                self.upstream_failed(&err);
                Err(ApiError::from_upstream(&err, REGISTER_ERRORS))
            }
        }
    }

    async fn authenticate(&self, req: &ApiRequest) -> Result<Value, ApiError> {
        let body = req.json_body()?;
        if !AUTH_FIELDS.iter().all(|field| is_truthy(body.get(*field))) {
            return Err(ApiError::Validation("Missing required fields".to_string()));
        }
        let email = body.get("email").and_then(Value::as_str).unwrap_or_default();
        info!("Authentication request for {}", email);

        let opts = RequestOptions::with_timeout(self.config.auth_timeout());
        let response = self.gateway.post("/auth", &body, opts).await.map_err(|err| {
            self.upstream_failed(&err);
            ApiError::UpstreamAuth("Authentication failed".to_string())
        })?;

        match response.get("access_token").and_then(Value::as_str) {
            Some(token) if !token.is_empty() => {
                self.session.store(token.to_string());
                Ok(response)
            }
            _ => {
                warn!("Upstream /auth answered without an access_token");
                Err(ApiError::UpstreamAuth("Authentication failed".to_string()))
            }
        }
    }

    async fn numbers(&self, number_id: &str) -> Result<Value, ApiError> {
        let category = NumberCategory::from_id(number_id)
            .ok_or_else(|| ApiError::Validation("Invalid number type".to_string()))?;
        let token = self.session.token().ok_or(ApiError::AuthRequired)?;

        let path = format!("/numbers/{}", category.endpoint());
        let opts = RequestOptions::with_timeout(self.config.fetch_timeout()).bearer(Some(token));
        let body = self.gateway.get(&path, opts).await.map_err(|err| {
            self.upstream_failed(&err);
            ApiError::from_upstream(&err, NUMBERS_ERRORS)
        })?;

        let payload: NumbersPayload = serde_json::from_value(body).map_err(|e| {
            let err = UpstreamError::InvalidBody {
                path: path.clone(),
                message: e.to_string(),
            };
            self.upstream_failed(&err);
            ApiError::from_upstream(&err, NUMBERS_ERRORS)
        })?;

        let (report, admitted) = self.windows.update(category, &payload.numbers);
        self.metrics.record_admitted(category.id(), admitted);
        debug!(
            "Window {:?}: received {}, admitted {}, holding {}",
            category,
            payload.numbers.len(),
            admitted,
            report.numbers.len()
        );

        serde_json::to_value(report).map_err(|e| ApiError::Internal(e.to_string()))
    }
}

#[async_trait]
impl RouteHandler for NumbersService {
    fn name(&self) -> &'static str {
        "numbers"
    }

    async fn handle(&self, req: ApiRequest) -> Result<Value, ApiError> {
        match req.segments().as_slice() {
            ["register"] => {
                require_method(&req, Method::POST)?;
                self.register().await
            }
            ["auth"] => {
                require_method(&req, Method::POST)?;
                self.authenticate(&req).await
            }
            ["numbers", number_id] => {
                require_method(&req, Method::GET)?;
                self.numbers(number_id).await
            }
            _ => Err(ApiError::NotFound),
        }
    }
}

/// Presence check for `/auth` fields: absent, null, false, 0 and "" fail.
fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness_follows_presence_rules() {
        assert!(!is_truthy(None));
        assert!(!is_truthy(Some(&Value::Null)));
        assert!(!is_truthy(Some(&json!(""))));
        assert!(!is_truthy(Some(&json!(0))));
        assert!(!is_truthy(Some(&json!(false))));
        assert!(is_truthy(Some(&json!("x"))));
        assert!(is_truthy(Some(&json!(22053257))));
        assert!(is_truthy(Some(&json!({}))));
    }
}
