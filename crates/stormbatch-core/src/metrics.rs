//! OTLP export of batch telemetry (`metrics` feature).
//!
//! [`init_metrics`] installs global tracer and meter providers that push to
//! an `OpenTelemetry` collector. [`BatchMetrics`] holds the instruments the
//! supervisor updates; without an installed provider they record nothing.

use opentelemetry::metrics::{Counter, UpDownCounter};
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

const METER_NAME: &str = "stormbatch";

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Cannot build OTLP exporter: {0}")]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),

    #[error("OpenTelemetry SDK error: {0}")]
    Sdk(#[from] opentelemetry_sdk::error::OTelSdkError),
}

/// Owns the installed providers. Dropping it does not flush; call
/// [`MetricsGuard::shutdown`] before the process exits.
pub struct MetricsGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl MetricsGuard {
    pub const fn tracer_provider(&self) -> &SdkTracerProvider {
        &self.tracer_provider
    }

    /// Flush pending spans and metric points, then stop both exporters.
    pub fn shutdown(self) -> Result<(), MetricsError> {
        self.tracer_provider.shutdown()?;
        self.meter_provider.shutdown()?;
        Ok(())
    }
}

/// Install OTLP/gRPC span and metric exporters pointed at `endpoint`
/// (e.g. `http://localhost:4317`) as the global providers.
pub fn init_metrics(endpoint: &str) -> Result<MetricsGuard, MetricsError> {
    let spans = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(spans)
        .build();
    global::set_tracer_provider(tracer_provider.clone());

    let points = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(points)
        .build();
    global::set_meter_provider(meter_provider.clone());

    Ok(MetricsGuard {
        tracer_provider,
        meter_provider,
    })
}

/// Instruments describing one batch run.
///
/// - `stormbatch.jobs.launched`: analysis processes started
/// - `stormbatch.jobs.completed`: terminal outcomes, labelled `outcome`
/// - `stormbatch.jobs.running`: processes currently running
#[derive(Clone)]
pub struct BatchMetrics {
    launched: Counter<u64>,
    completed: Counter<u64>,
    running: UpDownCounter<i64>,
}

impl BatchMetrics {
    /// Create the instruments on the global meter provider.
    pub fn new() -> Self {
        let meter = global::meter(METER_NAME);
        Self {
            launched: meter
                .u64_counter("stormbatch.jobs.launched")
                .with_description("Analysis processes started")
                .build(),
            completed: meter
                .u64_counter("stormbatch.jobs.completed")
                .with_description("Jobs that reached a terminal outcome")
                .build(),
            running: meter
                .i64_up_down_counter("stormbatch.jobs.running")
                .with_description("Analysis processes currently running")
                .build(),
        }
    }

    pub fn job_launched(&self) {
        self.launched.add(1, &[]);
        self.running.add(1, &[]);
    }

    /// Record a terminal outcome. `was_running` is false for jobs that
    /// never started.
    pub fn job_completed(&self, outcome: &'static str, was_running: bool) {
        self.completed.add(1, &[KeyValue::new("outcome", outcome)]);
        if was_running {
            self.running.add(-1, &[]);
        }
    }
}

impl Default for BatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}
