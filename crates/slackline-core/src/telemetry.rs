// Tracing initialization
//
// Structured stdout logging through tracing-subscriber. Called once by the
// server binary before anything else logs.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when neither `RUST_LOG` nor `LOG_LEVEL` is set
pub const DEFAULT_LOG_FILTER: &str = "slackline=info,tower_http=info";

/// Configuration for log output
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Log filter (e.g., "info", "debug", "slackline_core=debug")
    pub log_filter: Option<String>,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "slackline".to_string(),
            log_filter: None,
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    /// - `LOG_FORMAT`: "json" for JSON lines
    pub fn from_env() -> Self {
        Self {
            service_name: "slackline".to_string(),
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok())
                .filter(|v| !v.trim().is_empty()),
            json: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        }
    }

    /// The filter directives in effect
    ///
    /// A bare level such as "debug" applies to the slackline crates only.
    pub fn filter_directives(&self) -> String {
        match self.log_filter.as_deref().map(str::trim) {
            Some(filter) => match bare_level(filter) {
                Some(level) => format!("slackline={},tower_http=info", level),
                None => filter.to_string(),
            },
            None => DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

/// Normalized level name when `filter` is a single level, in any case
fn bare_level(filter: &str) -> Option<&'static str> {
    match filter.to_ascii_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" => Some("error"),
        _ => None,
    }
}

/// Initialize the global subscriber
pub fn init_tracing(config: &TelemetryConfig) {
    let filter = EnvFilter::try_new(config.filter_directives())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let console_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(filter)
            .boxed()
    };

    tracing_subscriber::registry().with(console_layer).init();

    tracing::debug!(service = %config.service_name, "tracing initialized");
}
