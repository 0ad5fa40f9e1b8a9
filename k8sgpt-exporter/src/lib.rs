//! Prometheus exporter for K8sGPT diagnostic results.
//!
//! The exporter periodically lists K8sGPT result resources, folds them into
//! label-keyed counts and serves them on an HTTP `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  Record Source  │────>│     Poller      │────>│    Collector    │────>│   HTTP Server   │
//! │ (API / kubectl) │     │  (aggregation)  │     │ (reconciliation)│     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! Each poll replaces the exported gauges wholesale: label combinations that
//! the latest poll no longer produces are removed rather than left stale. A
//! failed poll leaves the previous values in place and increments
//! `k8sgpt_analysis_errors_total`.
//!
//! # Usage
//!
//! ```bash
//! POLL_INTERVAL=30 EXPORTER_PORT=8080 k8sgpt-exporter --config config.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod aggregate;
pub mod collector;
pub mod config;
pub mod http;
pub mod mapping;
pub mod poller;
pub mod source;

pub use aggregate::{Aggregate, NamespaceFilter, aggregate_records};
pub use collector::{MetricCollector, MetricFamily, SeriesKey, SharedCollector};
pub use config::ExporterConfig;
pub use http::HttpServer;
pub use poller::Poller;
pub use source::{RecordSource, SharedSource, SourceError, build_source};
