//! Shared tracing/logging initialization.
//!
//! Sets up `tracing_subscriber` with an env-filter and optional JSON output,
//! plus an OpenTelemetry export layer when the `metrics` feature is enabled.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"stormbatch_runner=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = env_filter(default_filter);
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Keeps the telemetry pipeline alive. Empty when no endpoint was configured
/// or the `metrics` feature is off.
#[derive(Default)]
pub struct TelemetryGuard {
    #[cfg(feature = "metrics")]
    metrics: Option<crate::metrics::MetricsGuard>,
}

impl TelemetryGuard {
    /// Flush buffered telemetry. A no-op without an active pipeline.
    pub fn shutdown(self) {
        #[cfg(feature = "metrics")]
        if let Some(guard) = self.metrics
            && let Err(e) = guard.shutdown()
        {
            tracing::warn!(error = %e, "Failed to flush telemetry");
        }
    }
}

/// Like [`init_tracing`], additionally exporting spans over OTLP to
/// `endpoint` when the `metrics` feature is compiled in.
///
/// Falls back to plain logging if the exporter cannot be built.
pub fn init_tracing_with_metrics(
    default_filter: &str,
    log_json: bool,
    endpoint: Option<&str>,
) -> TelemetryGuard {
    #[cfg(feature = "metrics")]
    if let Some(endpoint) = endpoint {
        use opentelemetry::trace::TracerProvider as _;

        match crate::metrics::init_metrics(endpoint) {
            Ok(guard) => {
                let tracer = guard.tracer_provider().tracer("stormbatch");
                let registry = tracing_subscriber::registry()
                    .with(env_filter(default_filter))
                    .with(tracing_opentelemetry::layer().with_tracer(tracer));
                if log_json {
                    registry.with(tracing_subscriber::fmt::layer().json()).init();
                } else {
                    registry.with(tracing_subscriber::fmt::layer()).init();
                }
                return TelemetryGuard {
                    metrics: Some(guard),
                };
            }
            Err(e) => {
                init_tracing(default_filter, log_json);
                tracing::warn!(endpoint, error = %e, "OpenTelemetry disabled");
                return TelemetryGuard::default();
            }
        }
    }

    #[cfg(not(feature = "metrics"))]
    let _ = endpoint;

    init_tracing(default_filter, log_json);
    TelemetryGuard::default()
}

fn env_filter(default_filter: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    )
}
