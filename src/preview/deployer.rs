//! Preview deployment of a single service
//!
//! Every step has its own failure policy, and a failure only ever affects the
//! service being deployed:
//! 1. resolve manifests (missing → skipped before touching the cluster)
//! 2. validate everything before any mutation
//! 3. create + label the namespace (idempotent)
//! 4. apply; base manifests file by file, all files must succeed
//! 5. wait for Deployments (timeout is a warning)

use super::cluster::PreviewCluster;
use super::manifests::{load_manifests, ManifestBundle, ManifestObject, ManifestSource};
use super::outcome::{DeploymentOutcome, FailureKind};
use super::resolver::wait_for_deployments;
use super::{
    namespace_labels, preview_namespace, PreviewRequest, PreviewState, ServiceId,
    ANNOTATION_BRANCH, ANNOTATION_CREATED_AT, LABEL_STATE,
};
use crate::config::PreviewConfig;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

/// Number of namespace events kept for diagnostics
pub const DIAGNOSTIC_EVENTS: usize = 10;

/// A service whose manifests were applied
#[derive(Debug, Clone)]
pub struct DeployedPreview {
    pub namespace: String,
    pub bundle: ManifestBundle,
    pub warnings: Vec<String>,
}

/// Why a deployment stopped, with diagnostics when a namespace exists
#[derive(Debug, Clone, PartialEq)]
pub struct DeployFailure {
    pub kind: FailureKind,
    pub detail: String,
    pub namespace: Option<String>,
    pub events: Vec<String>,
}

impl DeployFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            namespace: None,
            events: Vec::new(),
        }
    }

    pub fn into_outcome(self, service: &ServiceId) -> DeploymentOutcome {
        DeploymentOutcome::Failure {
            service: service.clone(),
            namespace: self.namespace,
            kind: self.kind,
            detail: self.detail,
            events: self.events,
        }
    }
}

/// Deploy one service into its preview namespace
pub async fn deploy_service(
    cluster: &dyn PreviewCluster,
    config: &PreviewConfig,
    request: &PreviewRequest,
    service: &ServiceId,
) -> Result<DeployedPreview, DeployFailure> {
    let (source, searched) = resolve_source(config, service);

    if source.is_missing() {
        warn!(service = %service, searched = %searched, "No manifests found, skipping");
        return Err(DeployFailure::new(
            FailureKind::ManifestMissing,
            format!("No manifests found: {searched}"),
        ));
    }

    let bundle = load_manifests(&source, &config.kustomize_bin)
        .await
        .map_err(|e| {
            error!(service = %service, error = %e, "Failed to load manifests");
            DeployFailure::new(e.failure_kind(), e.to_string())
        })?;

    let objects: Vec<ManifestObject> = bundle.objects().cloned().collect();
    if objects.is_empty() {
        return Err(DeployFailure::new(
            FailureKind::ValidationFailed,
            "Manifests contain no Kubernetes objects",
        ));
    }

    // Validate before any cluster mutation
    cluster.validate(&objects).await.map_err(|e| {
        error!(service = %service, error = %e, "Manifest validation failed");
        DeployFailure::new(FailureKind::ValidationFailed, e.to_string())
    })?;

    let namespace = preview_namespace(request.pr_number, service);
    let annotations = BTreeMap::from([
        (ANNOTATION_CREATED_AT.to_string(), chrono::Utc::now().to_rfc3339()),
        (ANNOTATION_BRANCH.to_string(), request.branch.clone()),
    ]);
    cluster
        .ensure_namespace(&namespace, &namespace_labels(request, service), &annotations)
        .await
        .map_err(|e| {
            error!(service = %service, namespace = %namespace, error = %e, "Failed to create namespace");
            let mut failure = DeployFailure::new(
                FailureKind::DeploymentFailed,
                format!("Failed to create namespace {namespace}: {e}"),
            );
            failure.namespace = Some(namespace.clone());
            failure
        })?;

    if let Err(detail) = apply_bundle(cluster, &namespace, &bundle).await {
        error!(service = %service, namespace = %namespace, detail = %detail, "Deployment failed");
        return Err(fail_in_namespace(cluster, &namespace, FailureKind::DeploymentFailed, detail).await);
    }

    set_state(cluster, &namespace, PreviewState::Deployed).await;
    info!(service = %service, namespace = %namespace, "Manifests applied");

    let mut warnings = Vec::new();
    match wait_for_deployments(
        cluster,
        &namespace,
        config.rollout_timeout,
        config.readiness_interval,
    )
    .await
    {
        Ok(true) => info!(namespace = %namespace, "Deployments available"),
        Ok(false) => {
            warn!(namespace = %namespace, "Deployments not available before timeout");
            warnings.push(format!(
                "Deployments not available after {}s",
                config.rollout_timeout.as_secs()
            ));
        }
        Err(e) => {
            warn!(namespace = %namespace, error = %e, "Failed to check Deployment availability");
            warnings.push(format!("Could not check Deployment availability: {e}"));
        }
    }

    Ok(DeployedPreview {
        namespace,
        bundle,
        warnings,
    })
}

/// Manifest source for a service, plus a description of where it looked
///
/// Community references resolve to `<community_root>/<name>.y[a]ml`. A
/// service tree under the services root is used when no such file exists.
fn resolve_source(config: &PreviewConfig, service: &ServiceId) -> (ManifestSource, String) {
    let layout = &config.layout;
    let service_dir = layout.service_dir(&service.category, &service.name);
    let tree_source = || ManifestSource::resolve(&service_dir, &layout.overlay);
    let tree_searched = format!(
        "overlays/{} or base in {}",
        layout.overlay,
        service_dir.display()
    );

    if !service.is_community() {
        return (tree_source(), tree_searched);
    }

    let community_dir = layout.community_dir();
    match ManifestSource::resolve_file(&community_dir, &service.name) {
        ManifestSource::Missing => {
            let source = tree_source();
            let searched = format!(
                "{}.yaml in {}, {tree_searched}",
                service.name,
                community_dir.display()
            );
            (source, searched)
        }
        file => (file, community_dir.display().to_string()),
    }
}

/// Apply all units; `Err` carries a human-readable detail
///
/// An overlay is one unit. Base manifests are one unit per file and every
/// file must apply for the deployment to count as successful.
async fn apply_bundle(
    cluster: &dyn PreviewCluster,
    namespace: &str,
    bundle: &ManifestBundle,
) -> Result<(), String> {
    let mut errors = Vec::new();
    let mut applied_units = 0;

    for unit in &bundle.units {
        let mut unit_ok = true;
        for object in &unit.objects {
            if let Err(e) = cluster.apply(namespace, object).await {
                warn!(namespace, origin = %unit.origin, error = %e, "Apply failed");
                errors.push(e.to_string());
                unit_ok = false;
            }
        }
        if unit_ok {
            applied_units += 1;
        }
    }

    if errors.is_empty() {
        return Ok(());
    }

    let total = bundle.units.len();
    let summary = match bundle.source {
        ManifestSource::Base(_) | ManifestSource::File(_) => {
            format!("Applied {applied_units} out of {total} manifest files")
        }
        _ => "Failed to apply overlay".to_string(),
    };
    Err(format!("{summary}: {}", errors.join("; ")))
}

/// Build a failure for a service whose namespace exists
pub(crate) async fn fail_in_namespace(
    cluster: &dyn PreviewCluster,
    namespace: &str,
    kind: FailureKind,
    detail: String,
) -> DeployFailure {
    let events = match cluster.recent_events(namespace, DIAGNOSTIC_EVENTS).await {
        Ok(events) => events,
        Err(e) => {
            warn!(namespace, error = %e, "Failed to collect namespace events");
            Vec::new()
        }
    };
    set_state(cluster, namespace, PreviewState::Failed).await;

    DeployFailure {
        kind,
        detail,
        namespace: Some(namespace.to_string()),
        events,
    }
}

/// Record the lifecycle state label; failures are only logged
pub(crate) async fn set_state(cluster: &dyn PreviewCluster, namespace: &str, state: PreviewState) {
    let labels = BTreeMap::from([(LABEL_STATE.to_string(), state.to_string())]);
    if let Err(e) = cluster.label_namespace(namespace, &labels).await {
        warn!(namespace, state = %state, error = %e, "Failed to label namespace state");
    }
}

#[cfg(test)]
#[path = "deployer_test.rs"]
mod tests;
