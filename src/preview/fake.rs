//! In-memory stand-ins for the cluster and the domain API

#![allow(clippy::unwrap_used)] // Test helpers can use unwrap

use super::cluster::{ClusterError, LiveService, PreviewCluster, PreviewNamespace};
use super::domain::{DomainError, DomainGrant, DomainProvisioner, DomainRequest};
use super::manifests::ManifestObject;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

#[derive(Default)]
pub struct FakeClusterState {
    pub namespaces: BTreeMap<String, BTreeMap<String, String>>,
    pub annotations: BTreeMap<String, BTreeMap<String, String>>,
    /// `(namespace, kind, name)` in apply order
    pub applied: Vec<(String, String, String)>,
    pub services: BTreeMap<String, Vec<LiveService>>,
    pub deleted: Vec<String>,
    pub endpoint_checks: u32,
    /// Log of mutating calls, for ordering assertions
    pub calls: Vec<String>,
}

/// Fake cluster; behaviour knobs are set before use
#[derive(Default)]
pub struct FakeCluster {
    pub state: Mutex<FakeClusterState>,
    /// Kinds the "API server" rejects during validation
    pub unknown_kinds: BTreeSet<String>,
    /// Object names whose apply fails
    pub failing_objects: BTreeSet<String>,
    /// Applied Services show up as live Services
    pub register_applied_services: bool,
    /// Endpoint checks that report not-ready before becoming ready; None = never ready
    pub endpoints_ready_after: Option<u32>,
    pub deployments_available: bool,
    pub events: Vec<String>,
    pub fail_delete: BTreeSet<String>,
    pub fail_listing: bool,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            register_applied_services: true,
            endpoints_ready_after: Some(0),
            deployments_available: true,
            ..Default::default()
        }
    }

    pub fn with_namespace(self, name: &str, labels: &[(&str, &str)]) -> Self {
        self.state.lock().unwrap().namespaces.insert(
            name.to_string(),
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    pub fn with_live_service(self, namespace: &str, name: &str, port: Option<i32>) -> Self {
        self.state
            .lock()
            .unwrap()
            .services
            .entry(namespace.to_string())
            .or_default()
            .push(LiveService {
                name: name.to_string(),
                port,
            });
        self
    }

    pub fn applied(&self) -> Vec<(String, String, String)> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn namespace_labels(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.state.lock().unwrap().namespaces.get(name).cloned()
    }

    pub fn namespace_annotations(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.state.lock().unwrap().annotations.get(name).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl PreviewCluster for FakeCluster {
    async fn validate(&self, objects: &[ManifestObject]) -> Result<(), ClusterError> {
        match objects.iter().find(|o| self.unknown_kinds.contains(&o.kind)) {
            Some(o) => Err(ClusterError::UnknownKind {
                api_version: o.api_version.clone(),
                kind: o.kind.clone(),
                message: "the server could not find the requested resource".to_string(),
            }),
            None => Ok(()),
        }
    }

    async fn ensure_namespace(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("ensure_namespace:{name}"));
        state
            .namespaces
            .entry(name.to_string())
            .or_default()
            .extend(labels.clone());
        state
            .annotations
            .entry(name.to_string())
            .or_default()
            .extend(annotations.clone());
        Ok(())
    }

    async fn label_namespace(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.namespaces.get_mut(name) {
            existing.extend(labels.clone());
        }
        Ok(())
    }

    async fn annotate_namespace(
        &self,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.namespaces.contains_key(name) {
            state
                .annotations
                .entry(name.to_string())
                .or_default()
                .extend(annotations.clone());
        }
        Ok(())
    }

    async fn apply(&self, namespace: &str, object: &ManifestObject) -> Result<(), ClusterError> {
        if self.failing_objects.contains(&object.name) {
            return Err(ClusterError::ApplyFailed {
                kind: object.kind.clone(),
                name: object.name.clone(),
                message: "admission webhook denied the request".to_string(),
            });
        }

        let mut state = self.state.lock().unwrap();
        state.applied.push((
            namespace.to_string(),
            object.kind.clone(),
            object.name.clone(),
        ));
        if self.register_applied_services && object.kind == "Service" {
            let port = object.body["spec"]["ports"][0]["port"]
                .as_i64()
                .map(|p| p as i32);
            state
                .services
                .entry(namespace.to_string())
                .or_default()
                .push(LiveService {
                    name: object.name.clone(),
                    port,
                });
        }
        Ok(())
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<LiveService>, ClusterError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .services
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }

    async fn endpoints_ready(&self, _namespace: &str, _service: &str) -> Result<bool, ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.endpoint_checks += 1;
        Ok(match self.endpoints_ready_after {
            Some(after) => state.endpoint_checks > after,
            None => false,
        })
    }

    async fn deployments_available(&self, _namespace: &str) -> Result<bool, ClusterError> {
        Ok(self.deployments_available)
    }

    async fn recent_events(
        &self,
        _namespace: &str,
        limit: usize,
    ) -> Result<Vec<String>, ClusterError> {
        Ok(self.events.iter().take(limit).cloned().collect())
    }

    async fn find_namespaces(&self, selector: &str) -> Result<Vec<PreviewNamespace>, ClusterError> {
        if self.fail_listing {
            return Err(ClusterError::UnknownKind {
                api_version: "v1".to_string(),
                kind: "Namespace".to_string(),
                message: "forbidden".to_string(),
            });
        }

        let wanted: Vec<(&str, &str)> = selector
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .collect();

        let state = self.state.lock().unwrap();
        let found = state
            .namespaces
            .iter()
            .filter(|(_, labels)| {
                wanted
                    .iter()
                    .all(|(k, v)| labels.get(*k).map(String::as_str) == Some(*v))
            })
            .map(|(name, labels)| PreviewNamespace {
                name: name.clone(),
                labels: labels.clone(),
                annotations: state.annotations.get(name).cloned().unwrap_or_default(),
            })
            .collect();
        Ok(found)
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_namespace:{name}"));
        if self.fail_delete.contains(name) {
            return Err(ClusterError::ApplyFailed {
                kind: "Namespace".to_string(),
                name: name.to_string(),
                message: "forbidden".to_string(),
            });
        }
        state.namespaces.remove(name);
        state.annotations.remove(name);
        state.deleted.push(name.to_string());
        Ok(())
    }
}

/// Fake domain API recording every request
#[derive(Default)]
pub struct FakeDomains {
    pub fail_generate: bool,
    pub fail_release: BTreeSet<String>,
    /// Id handed out instead of `dom-<namespace>`
    pub grant_id: Option<String>,
    pub requests: Mutex<Vec<DomainRequest>>,
    pub released: Mutex<Vec<String>>,
    /// Every release attempt, including failed ones
    pub calls: Mutex<Vec<String>>,
}

impl FakeDomains {
    pub fn requests(&self) -> Vec<DomainRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl DomainProvisioner for FakeDomains {
    async fn generate(&self, request: &DomainRequest) -> Result<DomainGrant, DomainError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail_generate {
            return Err(DomainError::Rejected("success=false".to_string()));
        }
        let full_domain = format!("pr-{}-{}.example.com", request.pull_request_id, request.service_name);
        Ok(DomainGrant {
            url: format!("https://{full_domain}"),
            full_domain,
            id: self
                .grant_id
                .clone()
                .unwrap_or_else(|| format!("dom-{}", request.namespace)),
        })
    }

    async fn release(&self, domain_id: &str) -> Result<(), DomainError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("release:{domain_id}"));
        if self.fail_release.contains(domain_id) {
            return Err(DomainError::Status(500));
        }
        self.released.lock().unwrap().push(domain_id.to_string());
        Ok(())
    }
}
