//! Tracing subscriber initialization for pipeline and governor runs.
//!
//! Installs a structured `fmt` layer (human-readable or JSON lines) and,
//! when requested, bridges spans to OpenTelemetry through a stdout
//! exporter -- enough for local development; production deployments swap
//! the exporter for OTLP at this one seam.

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// How the subscriber should be assembled.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingOptions {
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
    /// Bridge spans to OpenTelemetry (stdout exporter).
    pub otel: bool,
}

/// Held so the exporter can be flushed on shutdown.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Install the global tracing subscriber.
///
/// Filtering follows `RUST_LOG` via `EnvFilter::from_default_env()`;
/// span-close events are recorded so stage and governor spans carry their
/// duration. Fails if a global subscriber is already set.
pub fn init_tracing(options: TracingOptions) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::from_default_env();
    let registry = tracing_subscriber::registry().with(env_filter);

    let tracer = options.otel.then(|| {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("trellis");
        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
        tracer
    });

    if options.json {
        let otel_layer = tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t));
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .with(otel_layer)
            .init();
    } else {
        let otel_layer = tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t));
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .with(otel_layer)
            .init();
    }

    Ok(())
}

/// Flush buffered spans and shut the OTel provider down. No-op when OTel
/// was never enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}
