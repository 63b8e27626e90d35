//! Observability for preview runs
//!
//! - `metrics`: Prometheus counters written for the textfile collector
//! - `cdevents`: optional CDEvents emission for deployed and removed previews

pub mod cdevents;
pub mod metrics;

pub use cdevents::{CDEventsSink, EventsError};
pub use metrics::PreviewMetrics;
