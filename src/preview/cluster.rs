//! Cluster access for preview environments
//!
//! `PreviewCluster` is the seam between orchestration logic and the
//! Kubernetes API. `KubeCluster` implements it with kube-rs; tests use an
//! in-memory fake.

use super::manifests::ManifestObject;
use super::{ANNOTATION_DOMAIN_ID, LABEL_DOMAIN_ID};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Endpoints, Event, Namespace, Service};
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::{self, Scope};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("unknown resource kind {api_version}/{kind}: {message}")]
    UnknownKind {
        api_version: String,
        kind: String,
        message: String,
    },

    #[error("failed to apply {kind}/{name}: {message}")]
    ApplyFailed {
        kind: String,
        name: String,
        message: String,
    },
}

/// A Service as seen in the cluster, reduced to what previews need
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveService {
    pub name: String,
    /// First declared port, if any
    pub port: Option<i32>,
}

/// A preview namespace found by label lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewNamespace {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl PreviewNamespace {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Domain id recorded at deploy time
    ///
    /// The annotation holds the id verbatim; the label is only read for
    /// namespaces that predate the annotation.
    pub fn domain_id(&self) -> Option<&str> {
        self.annotations
            .get(ANNOTATION_DOMAIN_ID)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .or_else(|| self.label(LABEL_DOMAIN_ID))
    }
}

#[async_trait]
pub trait PreviewCluster: Send + Sync {
    /// Check that every object's kind is served by the API server
    async fn validate(&self, objects: &[ManifestObject]) -> Result<(), ClusterError>;

    /// Create the namespace, or re-label it when it already exists
    async fn ensure_namespace(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError>;

    /// Merge labels into an existing namespace
    async fn label_namespace(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError>;

    /// Merge annotations into an existing namespace
    async fn annotate_namespace(
        &self,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError>;

    /// Server-side apply one object into `namespace`
    async fn apply(&self, namespace: &str, object: &ManifestObject) -> Result<(), ClusterError>;

    async fn list_services(&self, namespace: &str) -> Result<Vec<LiveService>, ClusterError>;

    /// True once the Service has at least one ready endpoint address
    async fn endpoints_ready(&self, namespace: &str, service: &str) -> Result<bool, ClusterError>;

    /// True once every Deployment in the namespace reports all replicas available
    async fn deployments_available(&self, namespace: &str) -> Result<bool, ClusterError>;

    /// Most recent namespace events, oldest first, formatted for humans
    async fn recent_events(&self, namespace: &str, limit: usize)
        -> Result<Vec<String>, ClusterError>;

    async fn find_namespaces(&self, selector: &str) -> Result<Vec<PreviewNamespace>, ClusterError>;

    /// Delete a namespace; an already-deleted namespace is success
    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError>;
}

/// kube-rs backed cluster access
pub struct KubeCluster {
    client: Client,
    field_manager: String,
}

impl KubeCluster {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    async fn resolve_kind(
        &self,
        object: &ManifestObject,
    ) -> Result<(discovery::ApiResource, discovery::ApiCapabilities), ClusterError> {
        let (group, version) = object.group_version();
        let gvk = GroupVersionKind::gvk(group, version, &object.kind);
        discovery::pinned_kind(&self.client, &gvk)
            .await
            .map_err(|e| ClusterError::UnknownKind {
                api_version: object.api_version.clone(),
                kind: object.kind.clone(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl PreviewCluster for KubeCluster {
    async fn validate(&self, objects: &[ManifestObject]) -> Result<(), ClusterError> {
        for object in objects {
            self.resolve_kind(object).await?;
        }
        debug!(objects = objects.len(), "Manifests validated against API discovery");
        Ok(())
    }

    async fn ensure_namespace(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());

        match namespaces.get(name).await {
            Ok(_) => {
                info!(namespace = %name, "Namespace already exists, updating labels");
                self.label_namespace(name, labels).await
            }
            Err(kube::Error::Api(err)) if err.code == 404 => {
                info!(namespace = %name, "Creating namespace");
                let ns = Namespace {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        labels: Some(labels.clone()),
                        annotations: Some(annotations.clone()),
                        ..Default::default()
                    },
                    ..Default::default()
                };
                match namespaces.create(&PostParams::default(), &ns).await {
                    Ok(_) => Ok(()),
                    // Lost a race with a concurrent run
                    Err(kube::Error::Api(err)) if err.code == 409 => {
                        self.label_namespace(name, labels).await
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => {
                error!(error = ?e, namespace = %name, "Failed to get namespace");
                Err(e.into())
            }
        }
    }

    async fn label_namespace(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "metadata": { "labels": labels } });
        namespaces
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn annotate_namespace(
        &self,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "metadata": { "annotations": annotations } });
        namespaces
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn apply(&self, namespace: &str, object: &ManifestObject) -> Result<(), ClusterError> {
        let (resource, capabilities) = self.resolve_kind(object).await?;

        let api: Api<DynamicObject> = match capabilities.scope {
            Scope::Namespaced => Api::namespaced_with(self.client.clone(), namespace, &resource),
            Scope::Cluster => {
                warn!(kind = %object.kind, name = %object.name, "Applying cluster-scoped object");
                Api::all_with(self.client.clone(), &resource)
            }
        };

        let params = PatchParams::apply(&self.field_manager).force();
        api.patch(&object.name, &params, &Patch::Apply(&object.body))
            .await
            .map_err(|e| ClusterError::ApplyFailed {
                kind: object.kind.clone(),
                name: object.name.clone(),
                message: e.to_string(),
            })?;

        info!(namespace, kind = %object.kind, name = %object.name, "Applied");
        Ok(())
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<LiveService>, ClusterError> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let list = services.list(&ListParams::default()).await?;

        Ok(list
            .items
            .iter()
            .map(|svc| LiveService {
                name: svc.name_any(),
                port: svc
                    .spec
                    .as_ref()
                    .and_then(|s| s.ports.as_ref())
                    .and_then(|ports| ports.first())
                    .map(|p| p.port),
            })
            .collect())
    }

    async fn endpoints_ready(&self, namespace: &str, service: &str) -> Result<bool, ClusterError> {
        let endpoints: Api<Endpoints> = Api::namespaced(self.client.clone(), namespace);

        match endpoints.get_opt(service).await? {
            Some(ep) => Ok(ep
                .subsets
                .unwrap_or_default()
                .iter()
                .any(|s| s.addresses.as_ref().is_some_and(|a| !a.is_empty()))),
            None => Ok(false),
        }
    }

    async fn deployments_available(&self, namespace: &str) -> Result<bool, ClusterError> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let list = deployments.list(&ListParams::default()).await?;

        Ok(list.items.iter().all(|d| {
            let desired = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            let available = d
                .status
                .as_ref()
                .and_then(|s| s.available_replicas)
                .unwrap_or(0);
            available >= desired
        }))
    }

    async fn recent_events(
        &self,
        namespace: &str,
        limit: usize,
    ) -> Result<Vec<String>, ClusterError> {
        let events: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let list = events.list(&ListParams::default()).await?;

        let formatted: Vec<String> = list.items.iter().map(format_event).collect();
        let skip = formatted.len().saturating_sub(limit);
        Ok(formatted.into_iter().skip(skip).collect())
    }

    async fn find_namespaces(&self, selector: &str) -> Result<Vec<PreviewNamespace>, ClusterError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let list = namespaces
            .list(&ListParams::default().labels(selector))
            .await?;

        Ok(list
            .items
            .iter()
            .map(|ns| PreviewNamespace {
                name: ns.name_any(),
                labels: ns.labels().clone(),
                annotations: ns.annotations().clone(),
            })
            .collect())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());

        match namespaces.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(namespace = %name, "Namespace deletion requested");
                Ok(())
            }
            Err(kube::Error::Api(err)) if err.code == 404 => {
                info!(namespace = %name, "Namespace already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// `<type> <reason> <object>: <message>`
fn format_event(event: &Event) -> String {
    let object = match (&event.involved_object.kind, &event.involved_object.name) {
        (Some(kind), Some(name)) => format!("{}/{}", kind, name),
        _ => "-".to_string(),
    };
    format!(
        "{} {} {}: {}",
        event.type_.as_deref().unwrap_or("Normal"),
        event.reason.as_deref().unwrap_or("Unknown"),
        object,
        event.message.as_deref().unwrap_or("").trim()
    )
}
