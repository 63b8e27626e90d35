//! Teardown of every preview environment of a pull request
//!
//! The `pr-number` label is the index. Each matching namespace has the
//! domain id recorded on it released first, then the namespace is deleted.
//! Both steps are best effort and the sweep never stops early.

use super::cluster::{ClusterError, PreviewCluster};
use super::domain::DomainProvisioner;
use super::pull_request_selector;
use crate::telemetry::cdevents::CDEventsSink;
use crate::telemetry::metrics::PreviewMetrics;
use tracing::{error, info, warn};

/// What a cleanup sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub namespaces_deleted: usize,
    pub domains_released: usize,
    pub domain_failures: usize,
    pub namespace_failures: usize,
}

impl CleanupSummary {
    pub fn is_clean(&self) -> bool {
        self.domain_failures == 0 && self.namespace_failures == 0
    }
}

/// Delete all preview namespaces and domains of a pull request
///
/// Only a failure to list namespaces is an error; zero matches is a no-op.
pub async fn cleanup_pull_request(
    cluster: &dyn PreviewCluster,
    domains: &dyn DomainProvisioner,
    pr_number: u64,
    metrics: Option<&PreviewMetrics>,
    events: Option<&CDEventsSink>,
) -> Result<CleanupSummary, ClusterError> {
    let namespaces = cluster
        .find_namespaces(&pull_request_selector(pr_number))
        .await?;

    let mut summary = CleanupSummary::default();
    if namespaces.is_empty() {
        info!(pr = pr_number, "No preview namespaces to clean up");
        return Ok(summary);
    }
    info!(pr = pr_number, count = namespaces.len(), "Cleaning up preview namespaces");

    for namespace in &namespaces {
        if let Some(domain_id) = namespace.domain_id() {
            match domains.release(domain_id).await {
                Ok(()) => {
                    info!(namespace = %namespace.name, domain_id, "Domain released");
                    summary.domains_released += 1;
                    record(metrics, "domain", "success");
                }
                Err(e) => {
                    warn!(namespace = %namespace.name, domain_id, error = %e, "Failed to release domain");
                    summary.domain_failures += 1;
                    record(metrics, "domain", "error");
                }
            }
        }

        match cluster.delete_namespace(&namespace.name).await {
            Ok(()) => {
                info!(namespace = %namespace.name, "Namespace deleted");
                summary.namespaces_deleted += 1;
                record(metrics, "namespace", "success");

                if let Some(sink) = events {
                    if let Err(e) = sink.emit_preview_removed(&namespace.name).await {
                        warn!(namespace = %namespace.name, error = %e, "Failed to emit CDEvent");
                    }
                }
            }
            Err(e) => {
                error!(namespace = %namespace.name, error = %e, "Failed to delete namespace");
                summary.namespace_failures += 1;
                record(metrics, "namespace", "error");
            }
        }
    }

    info!(
        pr = pr_number,
        namespaces_deleted = summary.namespaces_deleted,
        domains_released = summary.domains_released,
        failures = summary.domain_failures + summary.namespace_failures,
        "Cleanup finished"
    );
    Ok(summary)
}

fn record(metrics: Option<&PreviewMetrics>, resource: &str, result: &str) {
    if let Some(metrics) = metrics {
        metrics.record_cleanup(resource, result);
    }
}

#[cfg(test)]
#[path = "cleanup_test.rs"]
mod tests;
