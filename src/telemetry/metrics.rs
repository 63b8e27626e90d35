//! Prometheus metrics for preview runs
//!
//! The CLI is short-lived, so nothing is scraped: the registry is encoded
//! once at the end of a command and written to a file picked up by the
//! node-exporter textfile collector.

use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::path::Path;

/// Preview metrics registry
#[derive(Clone)]
pub struct PreviewMetrics {
    registry: Registry,
    /// Previews by result (`success` or a failure kind)
    pub deployments_total: IntCounterVec,
    /// Time spent on one service, success or not
    pub deploy_duration_seconds: Histogram,
    /// Domains replaced by a local fallback hostname
    pub domain_fallbacks_total: IntCounter,
    /// Cleanup operations by resource (`domain`, `namespace`) and result
    pub cleanup_total: IntCounterVec,
}

impl PreviewMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let deployments_total = IntCounterVec::new(
            Opts::new(
                "preview_deployments_total",
                "Total number of service preview deployments",
            ),
            &["result"],
        )?;
        registry.register(Box::new(deployments_total.clone()))?;

        let deploy_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "preview_deploy_duration_seconds",
                "Duration of a single service preview in seconds",
            )
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        )?;
        registry.register(Box::new(deploy_duration_seconds.clone()))?;

        let domain_fallbacks_total = IntCounter::with_opts(Opts::new(
            "preview_domain_fallbacks_total",
            "Previews that got a locally computed hostname instead of an API domain",
        ))?;
        registry.register(Box::new(domain_fallbacks_total.clone()))?;

        let cleanup_total = IntCounterVec::new(
            Opts::new(
                "preview_cleanup_total",
                "Total number of cleanup operations",
            ),
            &["resource", "result"],
        )?;
        registry.register(Box::new(cleanup_total.clone()))?;

        Ok(Self {
            registry,
            deployments_total,
            deploy_duration_seconds,
            domain_fallbacks_total,
            cleanup_total,
        })
    }

    pub fn record_deployment(&self, result: &str, duration_secs: f64) {
        self.deployments_total.with_label_values(&[result]).inc();
        self.deploy_duration_seconds.observe(duration_secs);
    }

    pub fn record_domain_fallback(&self) {
        self.domain_fallbacks_total.inc();
    }

    pub fn record_cleanup(&self, resource: &str, result: &str) {
        self.cleanup_total
            .with_label_values(&[resource, result])
            .inc();
    }

    /// Encode all metrics to Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
        })
    }

    /// Write the text encoding to `path`
    ///
    /// Written to a sibling temp file and renamed, so the collector never
    /// reads a half-written file.
    pub fn write_to(&self, path: &Path) -> Result<(), prometheus::Error> {
        let encoded = self.encode()?;
        let tmp = path.with_extension("prom.tmp");
        std::fs::write(&tmp, encoded)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "metrics_test.rs"]
mod tests;
