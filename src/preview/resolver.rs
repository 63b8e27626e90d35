//! Service resolution and readiness
//!
//! Live cluster state is preferred over static manifest analysis because it
//! reflects what exists after kustomize templating. Fallback order:
//! 1. first live Service in the namespace
//! 2. first Service in the rendered overlay
//! 3. first Service in the raw base manifests

use super::cluster::{ClusterError, PreviewCluster};
use super::manifests::parse_documents;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Port assumed when a Service declares none
pub const DEFAULT_PORT: i32 = 80;

/// Where a resolved endpoint came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointSource {
    Live,
    Manifest,
}

/// The canonical network endpoint of a preview workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub name: String,
    pub port: i32,
    pub source: EndpointSource,
}

impl ServiceEndpoint {
    /// `http://<service>.<namespace>:<port>`
    pub fn internal_url(&self, namespace: &str) -> String {
        format!("http://{}.{}:{}", self.name, namespace, self.port)
    }
}

/// Resolve the workload's Service, live state first
///
/// Listing failures are logged and treated like an empty namespace so that
/// the manifest fallbacks still get a chance. `None` means no Service
/// exists anywhere.
pub async fn resolve_service(
    cluster: &dyn PreviewCluster,
    namespace: &str,
    manifest_texts: &[&str],
) -> Option<ServiceEndpoint> {
    match cluster.list_services(namespace).await {
        Ok(services) => {
            if let Some(svc) = services.into_iter().next() {
                debug!(namespace, service = %svc.name, "Resolved Service from live state");
                return Some(ServiceEndpoint {
                    name: svc.name,
                    port: svc.port.unwrap_or(DEFAULT_PORT),
                    source: EndpointSource::Live,
                });
            }
        }
        Err(e) => {
            warn!(namespace, error = %e, "Failed to list live Services, using manifests");
        }
    }

    manifest_texts.iter().find_map(|text| {
        let endpoint = service_from_manifest(text)?;
        debug!(namespace, service = %endpoint.name, "Resolved Service from manifests");
        Some(endpoint)
    })
}

/// First `kind: Service` document in manifest text
pub fn service_from_manifest(text: &str) -> Option<ServiceEndpoint> {
    // Text that fails to parse simply yields nothing here
    let docs = parse_documents("service lookup", text).ok()?;
    docs.iter()
        .filter(|d| d["kind"] == "Service")
        .find_map(|d| {
            let name = d["metadata"]["name"].as_str()?.to_string();
            let port = d["spec"]["ports"][0]["port"]
                .as_i64()
                .and_then(|p| i32::try_from(p).ok())
                .unwrap_or(DEFAULT_PORT);
            Some(ServiceEndpoint {
                name,
                port,
                source: EndpointSource::Manifest,
            })
        })
}

/// Poll the Service's endpoints, bounded by `attempts`
///
/// Returns `true` once an address is ready. A timeout returns `false`; it is
/// never an error, callers attach a warning instead.
pub async fn wait_for_endpoints(
    cluster: &dyn PreviewCluster,
    namespace: &str,
    service: &str,
    attempts: u32,
    interval: Duration,
) -> bool {
    for attempt in 1..=attempts {
        match cluster.endpoints_ready(namespace, service).await {
            Ok(true) => {
                info!(namespace, service, attempt, "Service endpoints ready");
                return true;
            }
            Ok(false) => debug!(namespace, service, attempt, "Service endpoints not ready yet"),
            Err(e) => debug!(namespace, service, attempt, error = %e, "Endpoint check failed"),
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }

    warn!(namespace, service, attempts, "Service endpoints not ready, continuing");
    false
}

/// Poll Deployment availability until `timeout`
pub async fn wait_for_deployments(
    cluster: &dyn PreviewCluster,
    namespace: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<bool, ClusterError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cluster.deployments_available(namespace).await? {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
#[path = "resolver_test.rs"]
mod tests;
