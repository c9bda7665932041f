//! System utilities and monitoring
//!
//! This module contains the metrics collaborator workers report task
//! outcomes to.

pub mod metrics;

pub use metrics::{MetricConfig, MetricContext, MetricService, NoopMetricService, PrometheusMetricService, TaskTimer};
