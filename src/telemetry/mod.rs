pub mod access_log;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "evalhub=debug,info";

/// Installs the global `tracing` subscriber. Calling it twice is harmless;
/// the second call only reports that a subscriber already exists.
pub fn init_telemetry(service: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();

    match installed {
        Ok(()) => tracing::info!(service, "Telemetry initialized."),
        Err(e) => tracing::debug!("Tracing subscriber already installed: {}", e),
    }
}
