use evalhub::*;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use config::ServiceKind;
use server::ServerContext;
use services::{NumbersService, RouteHandler, SocialService};
use telemetry::access_log::{AccessLogger, LogFormat};

/// The runtime is built by hand rather than with `#[tokio::main]` so that
/// `worker_threads` from the config file decides its size.
///
/// Usage: `evalhub <numbers|social> [config path]`
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let kind: ServiceKind = args
        .next()
        .ok_or("usage: evalhub <numbers|social> [config path]")?
        .parse()?;
    let config_path = args.next().unwrap_or_else(|| "evalhub.conf".to_string());

    telemetry::init_telemetry(kind.name());

    let mut cfg = config::load_config(&config_path)?;
    cfg.apply_port_override(kind, std::env::var("PORT").ok().as_deref())?;
    let bind_addr = cfg.bind_for(kind).to_string();

    tracing::info!(
        "Starting {} service with {} worker threads (config: {}, upstream: {})",
        kind.name(),
        cfg.workers,
        config_path,
        cfg.upstream_base_url
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cfg.workers)
        .enable_all()
        .build()?;

    rt.block_on(async move {
        let shutdown_token = CancellationToken::new();
        let shutdown_token_signal = shutdown_token.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, initiating graceful shutdown...");
            shutdown_token_signal.cancel();
        });

        let metrics = Arc::new(admin::ServiceMetrics::new()?);
        let gateway: Arc<dyn upstream::UpstreamGateway> =
            Arc::new(upstream::HttpGateway::new(&cfg.upstream_base_url)?);

        let access_logger = cfg.access_log_path.as_deref().map(|path| {
            let format = LogFormat::parse(cfg.access_log_format.as_deref().unwrap_or("json"));
            Arc::new(AccessLogger::new(path, format))
        });

        let handler: Arc<dyn RouteHandler> = match kind {
            ServiceKind::Numbers => Arc::new(NumbersService::new(
                gateway,
                cfg.numbers.clone(),
                Arc::clone(&metrics),
            )),
            ServiceKind::Social => Arc::new(SocialService::new(
                gateway,
                &cfg.social,
                Arc::clone(&metrics),
            )),
        };

        let ctx = ServerContext {
            handler,
            metrics,
            access_logger,
        };
        server::start_server(&bind_addr, ctx, shutdown_token).await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    tracing::info!("{} service stopped", kind.name());
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => { tracing::info!("Received Ctrl+C"); }
                    _ = sigterm.recv() => { tracing::info!("Received SIGTERM"); }
                }
            }
            Err(e) => {
                tracing::warn!("Failed to register SIGTERM handler: {}", e);
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = ctrl_c.await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
    }
}
