//! Metrics instrumentation for services, exported over OTLP.
//!
//! [`meterkit`] picks a metrics provider from configuration, wires HTTP request metrics
//! in as a [tower] layer and samples runtime gauges on the provider's own timer. When
//! export is disabled everything still works and records nothing, so instrumented code
//! never needs to check.
//!
//! # Getting Started
//!
//! Build a [`MetricsConfig`], then [`install`] it. The provider you get back hands out
//! [`Counter`]s, [`Histogram`]s and [`ObservableGauge`]s. Call [`Provider::shutdown`]
//! before exiting to flush the last collection.
//!
//! For HTTP services, [`HttpMetrics::layer`] counts requests and times them by method,
//! path and status. For process health, [`runtime::collect_runtime_metrics`] registers
//! the memory and runtime gauges.
//!
//! # Feature Flags
//!
//! - `jemalloc`: [`runtime::JemallocStats`] reads memory statistics from jemalloc.

mod config;
mod error;
mod instrument;
mod provider;
mod resource;

pub mod aggregation;
pub mod downstream;
pub mod http;
pub mod pipeline;
pub mod runtime;
pub mod types;

pub use config::MetricsConfig;
pub use downstream::{Connection, ConnectionFactory, GrpcConnectionFactory};
pub use error::Error;
pub use http::{HttpMetrics, HttpMetricsLayer, RequestContext};
pub use instrument::{
    Counter, Histogram, InstrumentDescriptor, InstrumentKind, ObservableGauge, Observer,
};
pub use provider::{install, CallbackRegistration, ExportingProvider, NoopProvider, Provider};
pub use resource::{ResourceBuilder, ServiceIdentity};
