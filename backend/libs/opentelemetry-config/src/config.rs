//! Tracing configuration structures

use serde::{Deserialize, Serialize};

const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Configuration for logging and distributed tracing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Export spans over OTLP. Logging is installed either way.
    pub enabled: bool,

    /// OTLP/gRPC collector endpoint
    pub otlp_endpoint: String,

    /// Sample rate (0.0 to 1.0)
    pub sample_rate: f64,

    /// Service version reported as `service.version`
    pub service_version: String,

    /// Deployment environment (development, staging, production)
    pub environment: String,

    /// Emit log lines as JSON instead of the human-readable format
    pub json_logs: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            sample_rate: 1.0,
            service_version: "dev".to_string(),
            environment: "development".to_string(),
            json_logs: false,
        }
    }
}

impl TracingConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `ENABLE_TRACING`: Export spans (true/false, falls back to `enabled_by_default`)
    /// - `OTLP_ENDPOINT`: OTLP collector endpoint (default: http://localhost:4317)
    /// - `TRACING_SAMPLE_RATE`: Sample rate (0.0-1.0)
    /// - `SERVICE_VERSION`: Service version
    /// - `APP_ENV`: Environment (development/staging/production)
    /// - `LOG_FORMAT`: `json` for structured log lines
    pub fn from_env(enabled_by_default: bool) -> Self {
        let enabled = std::env::var("ENABLE_TRACING")
            .ok()
            .and_then(|v| v.trim().to_ascii_lowercase().parse().ok())
            .unwrap_or(enabled_by_default);

        let otlp_endpoint =
            std::env::var("OTLP_ENDPOINT").unwrap_or_else(|_| DEFAULT_OTLP_ENDPOINT.to_string());

        let sample_rate = std::env::var("TRACING_SAMPLE_RATE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(1.0)
            .clamp(0.0, 1.0);

        let service_version =
            std::env::var("SERVICE_VERSION").unwrap_or_else(|_| "dev".to_string());

        let environment = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let json_logs = std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Self {
            enabled,
            otlp_endpoint,
            sample_rate,
            service_version,
            environment,
            json_logs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.otlp_endpoint, "http://localhost:4317");
    }

    #[test]
    #[serial]
    fn test_enabled_falls_back_to_service_default() {
        std::env::remove_var("ENABLE_TRACING");
        assert!(TracingConfig::from_env(true).enabled);
        assert!(!TracingConfig::from_env(false).enabled);

        std::env::set_var("ENABLE_TRACING", "False");
        assert!(!TracingConfig::from_env(true).enabled);
        std::env::remove_var("ENABLE_TRACING");
    }

    #[test]
    #[serial]
    fn test_sample_rate_clamping() {
        std::env::set_var("TRACING_SAMPLE_RATE", "2.5");
        let config = TracingConfig::from_env(false);
        assert_eq!(config.sample_rate, 1.0);
        std::env::remove_var("TRACING_SAMPLE_RATE");
    }
}
