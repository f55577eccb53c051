use serde::Serialize;
use std::time::SystemTime;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, info};

/// The output format for access log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Newline-delimited JSON (structured, default).
    Json,
    /// `$ip - [$time] "$method $path HTTP/1.1" $status $bytes "-" "$ua"`
    Combined,
    /// `$ip - - [$time] "$method $path HTTP/1.1" $status $bytes`
    Common,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "combined" => LogFormat::Combined,
            "common" => LogFormat::Common,
            _ => LogFormat::Json,
        }
    }
}

/// One served request.
#[derive(Debug, Clone, Serialize)]
pub struct AccessLogEntry {
    pub timestamp: String,
    pub service: String,
    pub client_ip: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub latency_ms: u64,
    pub bytes_sent: u64,
    /// User-Agent header value (empty string if absent).
    pub user_agent: String,
}

impl AccessLogEntry {
    fn as_combined(&self) -> String {
        format!(
            "{} - [{}] \"{} {} HTTP/1.1\" {} {} \"-\" \"{}\"",
            self.client_ip,
            self.timestamp,
            self.method,
            self.path,
            self.status,
            self.bytes_sent,
            self.user_agent,
        )
    }

    fn as_common(&self) -> String {
        format!(
            "{} - - [{}] \"{} {} HTTP/1.1\" {} {}",
            self.client_ip, self.timestamp, self.method, self.path, self.status, self.bytes_sent,
        )
    }

    /// Renders the entry as a single line without the trailing newline.
    pub fn render(&self, format: LogFormat) -> String {
        match format {
            LogFormat::Json => serde_json::to_string(self).unwrap_or_default(),
            LogFormat::Combined => self.as_combined(),
            LogFormat::Common => self.as_common(),
        }
    }
}

/// Seconds since the epoch with millisecond precision, e.g. `1718000000.123Z`.
pub fn unix_timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:03}Z", now.as_secs(), now.subsec_millis())
}

/// Appends entries to a file from a background task. `log` never blocks the
/// request path.
pub struct AccessLogger {
    sender: mpsc::UnboundedSender<AccessLogEntry>,
}

impl AccessLogger {
    /// Spawns the writer task; must be called inside a Tokio runtime.
    /// Creates the log directory if it doesn't exist.
    pub fn new(log_path: &str, format: LogFormat) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<AccessLogEntry>();
        let path = log_path.to_string();

        tokio::spawn(async move {
            if let Some(parent) = std::path::Path::new(&path).parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }

            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await;

            match file {
                Ok(mut f) => {
                    info!("Access log writer started: {} (format: {:?})", path, format);
                    while let Some(entry) = receiver.recv().await {
                        let line = entry.render(format);
                        if line.is_empty() {
                            continue;
                        }
                        if let Err(e) = f.write_all(format!("{line}\n").as_bytes()).await {
                            error!("Failed to write access log {}: {}", path, e);
                        }
                    }
                    let _ = f.flush().await;
                }
                Err(e) => {
                    error!("Failed to open access log file {}: {}", path, e);
                    while receiver.recv().await.is_some() {}
                }
            }
        });

        Self { sender }
    }

    pub fn log(&self, entry: AccessLogEntry) {
        let _ = self.sender.send(entry);
    }
}
