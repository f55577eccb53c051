pub mod parser;

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::cache::CacheSettings;
use crate::window::DEFAULT_WINDOW_SIZE;

pub const DEFAULT_UPSTREAM: &str = "http://20.244.56.144/evaluation-service";
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error in '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("invalid value '{value}' for '{key}': {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: &'static str,
    },

    #[error("unknown service '{0}' (expected 'numbers' or 'social')")]
    UnknownService(String),
}

/// Which of the two HTTP services this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Numbers,
    Social,
}

impl ServiceKind {
    pub fn name(self) -> &'static str {
        match self {
            ServiceKind::Numbers => "numbers",
            ServiceKind::Social => "social",
        }
    }
}

impl FromStr for ServiceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "numbers" => Ok(ServiceKind::Numbers),
            "social" => Ok(ServiceKind::Social),
            _ => Err(ConfigError::UnknownService(s.to_string())),
        }
    }
}

/// Settings for the sliding-window numbers service.
#[derive(Debug, Clone)]
pub struct NumbersConfig {
    pub bind: String,
    pub window_size: usize,
    /// Timeout for `/numbers/<endpoint>` calls.
    pub fetch_timeout_ms: u64,
    pub register_timeout_ms: u64,
    pub auth_timeout_ms: u64,
    /// Payload forwarded to upstream `/register`, in file order.
    pub registration: Vec<(String, String)>,
}

impl NumbersConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn register_timeout(&self) -> Duration {
        Duration::from_millis(self.register_timeout_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    /// The registration profile as a JSON object.
    pub fn registration_payload(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .registration
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl Default for NumbersConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{DEFAULT_PORT}"),
            window_size: DEFAULT_WINDOW_SIZE,
            fetch_timeout_ms: 500,
            register_timeout_ms: 1_000,
            auth_timeout_ms: 1_000,
            registration: [
                ("email", "student@example.com"),
                ("name", "Student"),
                ("mobileNo", "0000000000"),
                ("githubUsername", "student"),
                ("rollNo", "0"),
                ("collegeName", "Example University"),
                ("accessCode", "changeme"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        }
    }
}

/// Settings for the social-graph service.
#[derive(Debug, Clone)]
pub struct SocialConfig {
    pub bind: String,
    pub cache_ttl_ms: u64,
    pub fetch_timeout_ms: u64,
    pub fan_out_concurrency: usize,
    /// Optional bearer token attached to every upstream call.
    pub access_token: Option<String>,
    /// Adds `Access-Control-Allow-Origin: *` and answers preflights.
    pub cors: bool,
}

impl SocialConfig {
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            ttl: Duration::from_millis(self.cache_ttl_ms),
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            fan_out_concurrency: self.fan_out_concurrency,
            access_token: self.access_token.clone(),
        }
    }
}

impl Default for SocialConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{DEFAULT_PORT}"),
            cache_ttl_ms: 60_000,
            fetch_timeout_ms: 2_000,
            fan_out_concurrency: 8,
            access_token: None,
            cors: true,
        }
    }
}

/// The global application configuration state.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub workers: usize,
    pub upstream_base_url: String,
    /// Path to write access logs. If None, access logging is disabled.
    pub access_log_path: Option<String>,
    /// "json" (default), "combined", or "common".
    pub access_log_format: Option<String>,
    pub numbers: NumbersConfig,
    pub social: SocialConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            upstream_base_url: DEFAULT_UPSTREAM.to_string(),
            access_log_path: None,
            access_log_format: None,
            numbers: NumbersConfig::default(),
            social: SocialConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn bind_for(&self, kind: ServiceKind) -> &str {
        match kind {
            ServiceKind::Numbers => &self.numbers.bind,
            ServiceKind::Social => &self.social.bind,
        }
    }

    /// Applies a `PORT` environment value to the selected service's bind
    /// address, keeping its host part.
    pub fn apply_port_override(
        &mut self,
        kind: ServiceKind,
        port: Option<&str>,
    ) -> Result<(), ConfigError> {
        let Some(port) = port else {
            return Ok(());
        };
        let port: u16 = parse_value("PORT", port)?;
        let bind = match kind {
            ServiceKind::Numbers => &mut self.numbers.bind,
            ServiceKind::Social => &mut self.social.bind,
        };
        let host = bind.rsplit_once(':').map(|(h, _)| h).unwrap_or("0.0.0.0");
        let updated = format!("{host}:{port}");
        *bind = updated;
        Ok(())
    }

    /// Builds the final configuration from a parsed file on top of defaults.
    pub fn from_file(file: parser::ConfigFile) -> Result<Self, ConfigError> {
        let mut cfg = AppConfig::default();

        if let Some(v) = file.directives.get("worker_threads") {
            cfg.workers = parse_value("worker_threads", v)?;
            if cfg.workers == 0 {
                return Err(invalid("worker_threads", v, "must be at least 1"));
            }
        }
        if let Some(v) = file.directives.get("access_log") {
            cfg.access_log_path = Some(v.clone());
        }
        if let Some(v) = file.directives.get("access_log_format") {
            cfg.access_log_format = Some(v.clone());
        }
        if let Some(upstream) = &file.upstream {
            if let Some(url) = upstream.get("base_url") {
                cfg.upstream_base_url = url.clone();
            }
        }

        if let Some(block) = file.numbers {
            let d = &block.directives;
            let n = &mut cfg.numbers;
            if let Some(v) = d.get("listen") {
                n.bind = listen_addr(v);
            }
            set_parsed(d, "window_size", &mut n.window_size)?;
            set_parsed(d, "fetch_timeout_ms", &mut n.fetch_timeout_ms)?;
            set_parsed(d, "register_timeout_ms", &mut n.register_timeout_ms)?;
            set_parsed(d, "auth_timeout_ms", &mut n.auth_timeout_ms)?;
            if n.window_size == 0 {
                return Err(invalid("window_size", "0", "must be at least 1"));
            }
            if let Some(register) = block.register {
                n.registration = register;
            }
        }

        if let Some(block) = file.social {
            let d = &block.directives;
            let s = &mut cfg.social;
            if let Some(v) = d.get("listen") {
                s.bind = listen_addr(v);
            }
            set_parsed(d, "cache_ttl_ms", &mut s.cache_ttl_ms)?;
            set_parsed(d, "fetch_timeout_ms", &mut s.fetch_timeout_ms)?;
            set_parsed(d, "fan_out_concurrency", &mut s.fan_out_concurrency)?;
            if s.fan_out_concurrency == 0 {
                return Err(invalid("fan_out_concurrency", "0", "must be at least 1"));
            }
            if let Some(v) = d.get("access_token") {
                s.access_token = (!v.is_empty()).then(|| v.clone());
            }
            if let Some(v) = d.get("cors") {
                s.cors = parse_switch("cors", v)?;
            }
        }

        Ok(cfg)
    }
}

/// Loads the config file at `conf_path`. A missing file yields the defaults;
/// an unreadable or malformed one is an error.
pub fn load_config(conf_path: &str) -> Result<AppConfig, ConfigError> {
    let content = match std::fs::read_to_string(conf_path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("Could not find {}, using default config", conf_path);
            return Ok(AppConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: conf_path.to_string(),
                source,
            });
        }
    };

    let file = parser::parse_config(&content).map_err(|message| ConfigError::Parse {
        path: conf_path.to_string(),
        message,
    })?;
    let cfg = AppConfig::from_file(file)?;
    tracing::info!("Loaded config from {}", conf_path);
    Ok(cfg)
}

/// `3000` binds every interface; `host:port` is used as given.
fn listen_addr(value: &str) -> String {
    if value.contains(':') {
        value.to_string()
    } else {
        format!("0.0.0.0:{value}")
    }
}

fn set_parsed<T: FromStr>(
    directives: &HashMap<String, String>,
    key: &str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Some(v) = directives.get(key) {
        *slot = parse_value(key, v)?;
    }
    Ok(())
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse::<T>()
        .map_err(|_| invalid(key, value, "not a valid number"))
}

fn parse_switch(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        _ => Err(invalid(key, value, "expected on/off")),
    }
}

fn invalid(key: &str, value: &str, reason: &'static str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason,
    }
}
