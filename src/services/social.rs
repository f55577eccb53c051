use async_trait::async_trait;
use hyper::Method;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::{ApiRequest, RouteHandler, require_method};
use crate::admin::ServiceMetrics;
use crate::cache::AggregateCache;
use crate::config::SocialConfig;
use crate::error::ApiError;
use crate::ranking::{PostView, posts_by_type, top_users_by_post_count};
use crate::upstream::UpstreamGateway;

/// `/users` and `/posts/:type`, both served from the aggregate cache.
///
/// A failed refresh never fails the request: the previous snapshot (possibly
/// empty) is served instead and the failure is only logged and counted.
pub struct SocialService {
    cache: AggregateCache,
    metrics: Arc<ServiceMetrics>,
    cors: bool,
}

impl SocialService {
    pub fn new(
        gateway: Arc<dyn UpstreamGateway>,
        config: &SocialConfig,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            cache: AggregateCache::new(gateway, config.cache_settings()),
            metrics,
            cors: config.cors,
        }
    }

    pub fn cache(&self) -> &AggregateCache {
        &self.cache
    }

    async fn ensure_fresh(&self) {
        match self.cache.refresh_if_stale(Instant::now()).await {
            Ok(outcome) => {
                debug!("Cache check: {}", outcome.label());
                self.metrics.record_refresh(outcome.label());
            }
            Err(err) => {
                warn!("Serving previous snapshot after failed refresh: {}", err);
                self.metrics.record_refresh("failed");
                self.metrics.record_upstream_failure(err.kind());
            }
        }
    }

    async fn top_users(&self) -> Value {
        self.ensure_fresh().await;
        let snapshot = self.cache.snapshot();
        json!({ "users": top_users_by_post_count(&snapshot) })
    }

    async fn posts(&self, kind: &str) -> Value {
        self.ensure_fresh().await;
        let snapshot = self.cache.snapshot();
        json!({ "posts": posts_by_type(&snapshot, PostView::parse(kind)) })
    }
}

#[async_trait]
impl RouteHandler for SocialService {
    fn name(&self) -> &'static str {
        "social"
    }

    fn allow_any_origin(&self) -> bool {
        self.cors
    }

    async fn handle(&self, req: ApiRequest) -> Result<Value, ApiError> {
        match req.segments().as_slice() {
            ["users"] => {
                require_method(&req, Method::GET)?;
                Ok(self.top_users().await)
            }
            ["posts", kind] => {
                require_method(&req, Method::GET)?;
                Ok(self.posts(kind).await)
            }
            _ => Err(ApiError::NotFound),
        }
    }
}
