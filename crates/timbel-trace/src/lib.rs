//! Logging and OpenTelemetry setup for Timbel.
//!
//! Installs the global `tracing` subscriber (pretty or JSON output with an
//! `EnvFilter`, optional OTLP export) and provides span constructors for
//! monitor operations.

pub mod spans;
pub mod tracer;

pub use spans::{pipeline_span, stage_span, subscription_span};
pub use tracer::{LogFormat, OtlpConfig, TracerError, TracingConfig, init_tracer, shutdown_tracer};
