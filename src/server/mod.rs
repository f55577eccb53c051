use bytes::Bytes;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::admin::{ServiceMetrics, health_body};
use crate::services::{ApiRequest, RouteHandler};
use crate::telemetry::access_log::{AccessLogEntry, AccessLogger, unix_timestamp};

type ServerBody = BoxBody<Bytes, hyper::Error>;

/// Everything a connection task needs, shared across all connections.
#[derive(Clone)]
pub struct ServerContext {
    pub handler: Arc<dyn RouteHandler>,
    pub metrics: Arc<ServiceMetrics>,
    pub access_logger: Option<Arc<AccessLogger>>,
}

/// Binds `bind_addr` and serves until `shutdown` is cancelled.
pub async fn start_server(
    bind_addr: &str,
    ctx: ServerContext,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    serve(listener, ctx, shutdown).await;
    Ok(())
}

/// Accept loop over an already-bound listener. Each connection gets its own
/// task; in-flight connections finish after the loop stops accepting.
pub async fn serve(listener: TcpListener, ctx: ServerContext, shutdown: CancellationToken) {
    let service = ctx.handler.name();
    match listener.local_addr() {
        Ok(addr) => info!("{} service listening on {}", service, addr),
        Err(e) => error!("{} service listener has no local address: {}", service, e),
    }

    loop {
        let (stream, peer) = tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok(s) => s,
                    Err(e) => {
                        error!("Accept error: {}", e);
                        continue;
                    }
                }
            }
            _ = shutdown.cancelled() => {
                info!("{} service shutting down, no new connections accepted.", service);
                break;
            }
        };

        let conn_ctx = ctx.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req| {
                let ctx = conn_ctx.clone();
                async move { handle_request(req, peer, ctx).await }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, svc).await {
                debug!("Error serving connection from {}: {:?}", peer, e);
            }
        });
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    peer: SocketAddr,
    ctx: ServerContext,
) -> Result<Response<ServerBody>, hyper::Error> {
    let start_time = Instant::now();
    let service = ctx.handler.name();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    debug!("{} {} from {}", method, path, peer);

    let (status, body, content_type) = match (&method, path.as_str()) {
        (&Method::GET, "/health") => json_parts(StatusCode::OK, &health_body(service)),
        (&Method::GET, "/metrics") => (
            StatusCode::OK,
            Bytes::from(ctx.metrics.encode()),
            "text/plain; version=0.0.4",
        ),
        (&Method::OPTIONS, _) if ctx.handler.allow_any_origin() => {
            (StatusCode::NO_CONTENT, Bytes::new(), "text/plain")
        }
        _ => {
            let (parts, incoming) = req.into_parts();
            let api_req = ApiRequest {
                method: parts.method,
                path: path.clone(),
                headers: parts.headers,
                body: incoming.collect().await?.to_bytes(),
            };
            match ctx.handler.handle(api_req).await {
                Ok(value) => json_parts(StatusCode::OK, &value),
                Err(err) => {
                    debug!("{} {} failed: {}", method, path, err);
                    json_parts(err.status(), &err.body())
                }
            }
        }
    };

    let bytes_sent = body.len() as u64;
    let mut resp = Response::new(Full::new(body).map_err(|never| match never {}).boxed());
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    if ctx.handler.allow_any_origin() {
        add_cors_headers(resp.headers_mut());
    }

    let elapsed = start_time.elapsed();
    ctx.metrics
        .record_request(service, method.as_str(), status.as_u16(), elapsed.as_secs_f64());
    if let Some(logger) = &ctx.access_logger {
        logger.log(AccessLogEntry {
            timestamp: unix_timestamp(),
            service: service.to_string(),
            client_ip: peer.ip().to_string(),
            method: method.to_string(),
            path,
            status: status.as_u16(),
            latency_ms: elapsed.as_millis() as u64,
            bytes_sent,
            user_agent,
        });
    }

    Ok(resp)
}

fn json_parts(status: StatusCode, value: &serde_json::Value) -> (StatusCode, Bytes, &'static str) {
    (status, Bytes::from(value.to_string()), "application/json")
}

fn add_cors_headers(headers: &mut hyper::HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
}
