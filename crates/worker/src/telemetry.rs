// Telemetry Module
//
// Console logging for the mammoth binary: an EnvFilter-driven fmt layer on a
// tracing-subscriber registry.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when neither `RUST_LOG` nor `LOG_LEVEL` is set
pub const DEFAULT_LOG_FILTER: &str = "mammoth_worker=info,mammoth_durable=info";

// ============================================================================
// Telemetry Configuration
// ============================================================================

/// Configuration for logging
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name, attached to the startup log line
    pub service_name: String,
    /// Whether to enable console logging
    pub enable_console: bool,
    /// Log filter (e.g., "info", "debug", "mammoth_durable=debug")
    pub log_filter: Option<String>,
    /// Whether to print the event target
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "mammoth".to_string(),
            enable_console: true,
            log_filter: None,
            with_target: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `RUST_LOG`: Full log filter
    /// - `LOG_LEVEL`: Level applied to the mammoth crates when `RUST_LOG` is unset
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let log_filter = lookup("RUST_LOG").or_else(|| {
            lookup("LOG_LEVEL")
                .map(|level| format!("mammoth_worker={level},mammoth_durable={level}"))
        });

        Self {
            log_filter,
            ..Default::default()
        }
    }

    /// The filter directives actually applied
    pub fn filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Install the global subscriber
///
/// Fails if a global subscriber is already installed.
///
/// # Example
///
/// ```ignore
/// use mammoth_worker::telemetry::{init_telemetry, TelemetryConfig};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     init_telemetry(TelemetryConfig::from_env())?;
///     // ... your application code
///     Ok(())
/// }
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> anyhow::Result<()> {
    let console_layer = if config.enable_console {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(config.with_target)
                .with_filter(config.filter()),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .try_init()?;

    tracing::debug!(
        service = %config.service_name,
        filter = config.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER),
        "Telemetry initialized"
    );
    Ok(())
}
