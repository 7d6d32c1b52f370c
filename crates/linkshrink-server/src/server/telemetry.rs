//! # Telemetry Features
//!
//! Console logging through `tracing_subscriber` is always on. OpenTelemetry
//! export is opt-in through cargo features.
//!
//! ## Feature matrix
//!
//! - `otel-tracing`: Exports spans through OpenTelemetry.
//! - `otel-metrics`: Exports counters and histograms through OpenTelemetry.
//! - `stdout`: Enables the stdout exporter for whichever of the two is on.
//!
//! ## Span behavior
//!
//! - Spans (for example the one around each storage deletion) are exported to
//!   any enabled telemetry backend
//! - Events inside a span become span events
//! - Events outside of a span only reach the console log
//!
//! ## Metrics behavior
//!
//! The `increment_*` and `record_*` helpers below always exist. Without
//! `otel-metrics` they compile to no-ops so call sites need no `cfg`.
//!
//! ```bash
//! cargo run --features otel-tracing,otel-metrics,stdout
//! ```

// Disallow using `stdout` without `otel-tracing` or `otel-metrics`
#[cfg(all(
    feature = "stdout",
    not(any(feature = "otel-tracing", feature = "otel-metrics"))
))]
compile_error!(
    "The 'stdout' feature requires at least one of 'otel-tracing' or 'otel-metrics' to be enabled."
);

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "otel-metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter};
#[cfg(feature = "otel-metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "otel-metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "otel-metrics", feature = "otel-tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "otel-metrics", feature = "otel-tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "otel-metrics", feature = "otel-tracing"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "otel-tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "otel-tracing")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "otel-tracing")]
use opentelemetry_sdk::trace as sdktrace;

const SERVICE_NAME: &str = "linkshrink";

/// Providers that must be flushed before the process exits.
pub struct TelemetryProviders {
    #[cfg(feature = "otel-tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "otel-metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "otel-tracing")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "otel-tracing")]
    let tracer_provider = init_tracer();

    #[cfg(feature = "otel-metrics")]
    let meter_provider = init_metrics();

    #[cfg(any(feature = "otel-metrics", feature = "otel-tracing"))]
    let scope = InstrumentationScope::builder(SERVICE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "otel-tracing")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "otel-metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.try_init()?;

    Ok(TelemetryProviders {
        #[cfg(feature = "otel-tracing")]
        tracer_provider,
        #[cfg(feature = "otel-metrics")]
        meter_provider,
    })
}

impl TelemetryProviders {
    /// Flushes and shuts down every enabled exporter.
    pub fn shutdown(self) {
        #[cfg(feature = "otel-tracing")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "otel-metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }

        #[cfg(not(any(feature = "otel-tracing", feature = "otel-metrics")))]
        let _ = self;
    }
}

#[cfg(any(feature = "otel-metrics", feature = "otel-tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "otel-metrics")]
fn init_metrics() -> sdkmetrics::SdkMeterProvider {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    builder.build()
}

#[cfg(feature = "otel-tracing")]
fn init_tracer() -> sdktrace::SdkTracerProvider {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::SpanExporter;
        let exporter = SpanExporter::default();
        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();
        builder.with_span_processor(batch)
    };

    builder.build()
}

// Metric handles - only compiled when metrics are enabled
#[cfg(feature = "otel-metrics")]
static LINKS_CREATED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "otel-metrics")]
static DELETE_REQUESTS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "otel-metrics")]
static REJECTED_DELETES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "otel-metrics")]
static IDS_PER_TASK: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "otel-metrics")]
static LINKS_DELETED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "otel-metrics")]
static POOL_FAILURES: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "otel-metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = LINKS_CREATED.set(
        meter
            .u64_counter("links_created")
            .with_description("Short links created")
            .build(),
    );

    let _ = DELETE_REQUESTS.set(
        meter
            .u64_counter("delete_requests")
            .with_description("Bulk deletion requests received")
            .build(),
    );

    let _ = REJECTED_DELETES.set(
        meter
            .u64_counter("rejected_deletes")
            .with_description("Deletion tasks refused by a closed pool")
            .build(),
    );

    let _ = IDS_PER_TASK.set(
        meter
            .f64_histogram("ids_per_task")
            .with_description("Identifiers per queued deletion task")
            .build(),
    );

    let _ = LINKS_DELETED.set(
        meter
            .u64_counter("links_deleted")
            .with_description("Identifiers applied by the deletion workers")
            .build(),
    );

    let _ = POOL_FAILURES.set(
        meter
            .u64_counter("pool_failures")
            .with_description("Storage failures that stopped the deletion pool")
            .build(),
    );
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "otel-metrics")]
pub fn increment_links_created(count: u64) {
    if let Some(counter) = LINKS_CREATED.get() {
        counter.add(count, &[]);
    }
}

#[cfg(not(feature = "otel-metrics"))]
pub fn increment_links_created(_count: u64) {}

#[cfg(feature = "otel-metrics")]
pub fn increment_delete_requests() {
    if let Some(counter) = DELETE_REQUESTS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "otel-metrics"))]
pub fn increment_delete_requests() {}

#[cfg(feature = "otel-metrics")]
pub fn increment_rejected_deletes() {
    if let Some(counter) = REJECTED_DELETES.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "otel-metrics"))]
pub fn increment_rejected_deletes() {}

#[cfg(feature = "otel-metrics")]
pub fn record_ids_per_task(count: f64) {
    if let Some(histogram) = IDS_PER_TASK.get() {
        histogram.record(count, &[]);
    }
}

#[cfg(not(feature = "otel-metrics"))]
pub fn record_ids_per_task(_count: f64) {}

#[cfg(feature = "otel-metrics")]
pub fn increment_links_deleted(count: u64) {
    if let Some(counter) = LINKS_DELETED.get() {
        counter.add(count, &[]);
    }
}

#[cfg(not(feature = "otel-metrics"))]
pub fn increment_links_deleted(_count: u64) {}

#[cfg(feature = "otel-metrics")]
pub fn increment_pool_failures() {
    if let Some(counter) = POOL_FAILURES.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "otel-metrics"))]
pub fn increment_pool_failures() {}
