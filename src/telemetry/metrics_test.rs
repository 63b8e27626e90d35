//! Tests for preview metrics

use super::*;

#[test]
fn test_metrics_creation() {
    let metrics = PreviewMetrics::new().expect("should create metrics");

    // Prometheus only outputs vector metrics that have values
    metrics.record_deployment("success", 12.0);
    metrics.record_cleanup("namespace", "success");

    let output = metrics.encode().expect("should encode metrics");
    assert!(output.contains("preview_deployments_total"));
    assert!(output.contains("preview_deploy_duration_seconds"));
    assert!(output.contains("preview_domain_fallbacks_total 0"));
    assert!(output.contains("preview_cleanup_total"));
}

#[test]
fn test_record_deployment_by_result() {
    let metrics = PreviewMetrics::new().expect("should create metrics");

    metrics.record_deployment("success", 20.0);
    metrics.record_deployment("success", 40.0);
    metrics.record_deployment("NoServiceFound", 3.0);

    let output = metrics.encode().expect("should encode metrics");

    assert!(output.contains("preview_deployments_total{result=\"success\"} 2"));
    assert!(output.contains("preview_deployments_total{result=\"NoServiceFound\"} 1"));
    assert!(output.contains("preview_deploy_duration_seconds_count 3"));
}

#[test]
fn test_record_domain_fallback() {
    let metrics = PreviewMetrics::new().expect("should create metrics");

    metrics.record_domain_fallback();
    metrics.record_domain_fallback();

    let output = metrics.encode().expect("should encode metrics");
    assert!(output.contains("preview_domain_fallbacks_total 2"));
}

#[test]
fn test_record_cleanup() {
    let metrics = PreviewMetrics::new().expect("should create metrics");

    metrics.record_cleanup("domain", "error");
    metrics.record_cleanup("namespace", "success");
    metrics.record_cleanup("namespace", "success");

    let output = metrics.encode().expect("should encode metrics");
    assert!(output.contains("preview_cleanup_total{resource=\"domain\",result=\"error\"} 1"));
    assert!(output.contains("preview_cleanup_total{resource=\"namespace\",result=\"success\"} 2"));
}

#[test]
fn test_write_to_textfile() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("preview.prom");
    let metrics = PreviewMetrics::new().expect("should create metrics");
    metrics.record_deployment("success", 1.0);

    metrics.write_to(&path).expect("should write metrics");

    let written = std::fs::read_to_string(&path).expect("should read metrics");
    assert!(written.contains("preview_deployments_total{result=\"success\"} 1"));
    assert!(!dir.path().join("preview.prom.tmp").exists());
}
