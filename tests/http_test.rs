use async_trait::async_trait;
use evalhub::admin::ServiceMetrics;
use evalhub::config::{NumbersConfig, SocialConfig};
use evalhub::error::ApiError;
use evalhub::server::{self, ServerContext};
use evalhub::services::{ApiRequest, NumbersService, RouteHandler, SocialService};
use evalhub::upstream::{HttpGateway, UpstreamGateway};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Stand-in for the evaluation service, served over real HTTP.
#[derive(Default)]
struct MockUpstream {
    seen_tokens: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl RouteHandler for MockUpstream {
    fn name(&self) -> &'static str {
        "upstream"
    }

    async fn handle(&self, req: ApiRequest) -> Result<Value, ApiError> {
        let token = req
            .headers
            .get(hyper::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string);
        self.seen_tokens.lock().unwrap().push(token.clone());

        match req.segments().as_slice() {
            ["auth"] => {
                let body = req.json_body()?;
                if body["clientSecret"] == "secret" {
                    Ok(json!({ "token_type": "Bearer", "access_token": "tok" }))
                } else {
                    Err(ApiError::UpstreamAuth("bad credentials".to_string()))
                }
            }
            ["numbers", "rand"] => {
                tokio::time::sleep(Duration::from_millis(400)).await;
                Ok(json!({ "numbers": [1] }))
            }
            ["numbers", _] if token.as_deref() != Some("tok") => {
                Err(ApiError::UpstreamAuth("invalid token".to_string()))
            }
            ["numbers", "primes"] => Ok(json!({ "numbers": [2, 3, 5, 7] })),
            ["users"] => Ok(json!({ "users": { "1": "John", "2": "Jane" } })),
            ["users", "1", "posts"] => Ok(json!({
                "posts": [{ "id": 100, "userid": 1, "content": "hello" }]
            })),
            ["users", "2", "posts"] => Ok(json!({
                "posts": [
                    { "id": 200, "userid": 2, "content": "first" },
                    { "id": 201, "userid": 2, "content": "second" }
                ]
            })),
            ["posts", "201", "comments"] => Ok(json!({
                "comments": [{ "id": 1, "postid": 201, "content": "nice" }]
            })),
            ["posts", _, "comments"] => Ok(json!({ "comments": [] })),
            _ => Err(ApiError::NotFound),
        }
    }
}

async fn spawn_server(handler: Arc<dyn RouteHandler>) -> (SocketAddr, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let ctx = ServerContext {
        handler,
        metrics: Arc::new(ServiceMetrics::new().unwrap()),
        access_logger: None,
    };
    tokio::spawn(server::serve(listener, ctx, shutdown.clone()));
    (addr, shutdown)
}

async fn spawn_upstream() -> (Arc<MockUpstream>, Arc<dyn UpstreamGateway>, CancellationToken) {
    let mock = Arc::new(MockUpstream::default());
    let (addr, shutdown) = spawn_server(mock.clone()).await;
    let gateway = HttpGateway::new(&format!("http://{addr}/")).unwrap();
    (mock, Arc::new(gateway), shutdown)
}

#[tokio::test]
async fn numbers_flow_over_http() {
    let (mock, gateway, upstream_shutdown) = spawn_upstream().await;
    let config = NumbersConfig {
        fetch_timeout_ms: 150,
        ..NumbersConfig::default()
    };
    let metrics = Arc::new(ServiceMetrics::new().unwrap());
    let service = Arc::new(NumbersService::new(gateway, config, metrics));
    let (addr, shutdown) = spawn_server(service).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let resp = client.get(format!("{base}/numbers/p")).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    let credentials = json!({
        "email": "a@b.c", "name": "A", "rollNo": "1",
        "accessCode": "x", "clientID": "id", "clientSecret": "secret"
    });
    let resp = client
        .post(format!("{base}/auth"))
        .json(&credentials)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["access_token"], "tok");

    let resp = client.get(format!("{base}/numbers/p")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "numbers": [2, 3, 5, 7], "average": 4.25 }));
    assert_eq!(
        mock.seen_tokens.lock().unwrap().last().cloned().flatten().as_deref(),
        Some("tok")
    );

    let resp = client.get(format!("{base}/numbers/r")).send().await.unwrap();
    assert_eq!(resp.status(), 408);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "error": "Request timeout" }));

    let resp = client.get(format!("{base}/numbers/z")).send().await.unwrap();
    assert_eq!(resp.status(), 400);

    shutdown.cancel();
    upstream_shutdown.cancel();
}

#[tokio::test]
async fn bad_credentials_are_401() {
    let (_mock, gateway, upstream_shutdown) = spawn_upstream().await;
    let metrics = Arc::new(ServiceMetrics::new().unwrap());
    let service = Arc::new(NumbersService::new(
        gateway,
        NumbersConfig::default(),
        metrics,
    ));
    let (addr, shutdown) = spawn_server(service).await;
    let client = reqwest::Client::new();

    let credentials = json!({
        "email": "a@b.c", "name": "A", "rollNo": "1",
        "accessCode": "x", "clientID": "id", "clientSecret": "wrong"
    });
    let resp = client
        .post(format!("http://{addr}/auth"))
        .json(&credentials)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "error": "Authentication failed" }));

    let resp = client
        .post(format!("http://{addr}/auth"))
        .body("{oops")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "error": "Invalid JSON body" }));

    shutdown.cancel();
    upstream_shutdown.cancel();
}

#[tokio::test]
async fn social_flow_over_http() {
    let (_mock, gateway, upstream_shutdown) = spawn_upstream().await;
    let metrics = Arc::new(ServiceMetrics::new().unwrap());
    let service = Arc::new(SocialService::new(
        gateway,
        &SocialConfig::default(),
        metrics,
    ));
    let (addr, shutdown) = spawn_server(service).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let resp = client.get(format!("{base}/users")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["access-control-allow-origin"].to_str().unwrap(),
        "*"
    );
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body,
        json!({ "users": [
            { "userId": "2", "username": "Jane", "postCount": 2 },
            { "userId": "1", "username": "John", "postCount": 1 }
        ] })
    );

    let body: Value = client
        .get(format!("{base}/posts/popular"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["posts"].as_array().unwrap().len(), 1);
    assert_eq!(body["posts"][0]["id"], 201);

    let resp = client
        .request(reqwest::Method::OPTIONS, format!("{base}/users"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    shutdown.cancel();
    upstream_shutdown.cancel();
}

#[tokio::test]
async fn health_metrics_and_unknown_routes() {
    let (_mock, gateway, upstream_shutdown) = spawn_upstream().await;
    let metrics = Arc::new(ServiceMetrics::new().unwrap());
    let service = Arc::new(NumbersService::new(
        gateway,
        NumbersConfig::default(),
        metrics,
    ));
    let (addr, shutdown) = spawn_server(service).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let body: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({ "status": "ok", "service": "numbers" }));

    let resp = client.get(format!("{base}/nothing/here")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "error": "Not found" }));

    let resp = client.get(format!("{base}/auth")).send().await.unwrap();
    assert_eq!(resp.status(), 405);
    assert!(resp.headers().get("access-control-allow-origin").is_none());

    let text = client
        .get(format!("{base}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("evalhub_http_requests_total"));
    assert!(text.contains("status=\"404\""));

    shutdown.cancel();
    upstream_shutdown.cancel();
}
