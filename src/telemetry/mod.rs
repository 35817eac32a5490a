//! Logging setup and span vocabulary
//!
//! Structured `tracing` output through `tracing-subscriber`, either compact
//! text for local runs or JSON for log shipping.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup record
    pub service_name: String,
    pub service_version: String,
    /// Emit one JSON object per line
    pub json_format: bool,
    /// Filter directive, e.g. `info` or `agritrace=debug,sqlx=warn`
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "agritrace".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            json_format: false,
            log_level: "info".to_string(),
        }
    }
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("SERVICE_NAME").unwrap_or_else(|_| "agritrace".to_string()),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            json_format: std::env::var("LOG_JSON")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            log_level: std::env::var("LOG_LEVEL")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if config.json_format {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        subscriber.with(fmt_layer).try_init()?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact();
        subscriber.with(fmt_layer).try_init()?;
    }

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        json = config.json_format,
        "Logging initialized"
    );
    Ok(())
}

/// Span names for the main operations
pub mod spans {
    pub const SUBMIT_IMAGE: &str = "submit_image";
    pub const HUMAN_DECISION: &str = "record_human_decision";
    pub const VERIFIED_IMAGE: &str = "certification.on_verified_image";
    pub const PUBLISH_CERTIFICATE: &str = "certification.publish";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "agritrace");
        assert!(!config.json_format);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_second_init_fails() {
        let config = TelemetryConfig {
            log_level: "warn".to_string(),
            ..TelemetryConfig::default()
        };
        let _ = init_telemetry(&config);
        assert!(init_telemetry(&config).is_err());
    }
}
