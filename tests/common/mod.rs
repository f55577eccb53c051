#![allow(dead_code)]

use async_trait::async_trait;
use evalhub::error::UpstreamError;
use evalhub::upstream::{RequestOptions, UpstreamGateway};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// One recorded upstream call.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: &'static str,
    pub path: String,
    pub token: Option<String>,
    pub body: Option<Value>,
}

/// In-memory gateway answering from a path → response table.
/// Unscripted paths answer 404.
#[derive(Default)]
pub struct ScriptedGateway {
    responses: Mutex<HashMap<String, Result<Value, UpstreamError>>>,
    calls: Mutex<Vec<Call>>,
    delay: Option<Duration>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay` before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn respond(&self, path: &str, body: Value) {
        self.responses
            .lock()
            .unwrap()
            .insert(path.to_string(), Ok(body));
    }

    pub fn fail(&self, path: &str, err: UpstreamError) {
        self.responses
            .lock()
            .unwrap()
            .insert(path.to_string(), Err(err));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls().iter().filter(|c| c.path == path).count()
    }

    async fn answer(
        &self,
        method: &'static str,
        path: &str,
        body: Option<Value>,
        opts: RequestOptions,
    ) -> Result<Value, UpstreamError> {
        self.calls.lock().unwrap().push(Call {
            method,
            path: path.to_string(),
            token: opts.token,
            body,
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.responses.lock().unwrap().get(path).cloned();
        scripted.unwrap_or_else(|| {
            Err(UpstreamError::Status {
                path: path.to_string(),
                status: 404,
                body: String::new(),
            })
        })
    }
}

#[async_trait]
impl UpstreamGateway for ScriptedGateway {
    async fn get(&self, path: &str, opts: RequestOptions) -> Result<Value, UpstreamError> {
        self.answer("GET", path, None, opts).await
    }

    async fn post(
        &self,
        path: &str,
        body: &Value,
        opts: RequestOptions,
    ) -> Result<Value, UpstreamError> {
        self.answer("POST", path, Some(body.clone()), opts).await
    }
}

/// Scripts a small social graph:
/// user 1 has 1 post, user 2 has 3, user 3 has 3, user 4 has 2.
/// Post `10*u + k` has `k` comments.
pub fn script_social_graph(gateway: &ScriptedGateway) {
    gateway.respond(
        "/users",
        json!({ "users": { "1": "John Doe", "2": "Jane Doe", "3": "Alice", "4": "Bob" } }),
    );
    for (user, count) in [(1u64, 1u64), (2, 3), (3, 3), (4, 2)] {
        let posts: Vec<Value> = (1..=count)
            .map(|k| {
                json!({ "id": 10 * user + k, "userid": user, "content": format!("post {k} by {user}") })
            })
            .collect();
        gateway.respond(&format!("/users/{user}/posts"), json!({ "posts": posts }));
        for k in 1..=count {
            let post_id = 10 * user + k;
            let comments: Vec<Value> = (1..=k)
                .map(|c| json!({ "id": post_id * 100 + c, "postid": post_id, "content": "nice" }))
                .collect();
            gateway.respond(
                &format!("/posts/{post_id}/comments"),
                json!({ "comments": comments }),
            );
        }
    }
}
