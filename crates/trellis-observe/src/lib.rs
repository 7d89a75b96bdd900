//! Observability setup for Trellis: tracing subscriber initialization
//! with structured logging and optional OpenTelemetry trace export.

pub mod tracing_setup;
