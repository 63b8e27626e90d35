//! Per-service deployment outcomes and the run artifact
//!
//! The artifact is the hand-off between the `deploy` and `report` steps of a
//! CI job. Its absence is meaningful (the deploy step never ran), so reading
//! it distinguishes "missing" from "unreadable".

use super::{PreviewRequest, ServiceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to access run artifact {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed run artifact: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Why a service preview failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Neither overlay nor base manifests exist
    ManifestMissing,
    /// Manifests rejected before any cluster mutation
    ValidationFailed,
    /// Apply failed, fully or partially
    DeploymentFailed,
    /// Nothing routes to the workload
    NoServiceFound,
    /// Manifests could not be rendered or parsed
    ManifestParseError,
    /// Domain API failed and strict domains are enabled
    DomainApiError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ManifestMissing => "ManifestMissing",
            FailureKind::ValidationFailed => "ValidationFailed",
            FailureKind::DeploymentFailed => "DeploymentFailed",
            FailureKind::NoServiceFound => "NoServiceFound",
            FailureKind::ManifestParseError => "ManifestParseError",
            FailureKind::DomainApiError => "DomainApiError",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of previewing one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum DeploymentOutcome {
    #[serde(rename_all = "camelCase")]
    Success {
        service: ServiceId,
        namespace: String,
        domain: String,
        url: String,
        /// Empty when the domain is a local fallback
        domain_id: String,
        service_name: String,
        port: i32,
        internal_url: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Failure {
        service: ServiceId,
        /// Set once a namespace was created for the service
        #[serde(default, skip_serializing_if = "Option::is_none")]
        namespace: Option<String>,
        kind: FailureKind,
        detail: String,
        /// Recent namespace events captured for diagnostics
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        events: Vec<String>,
    },
}

impl DeploymentOutcome {
    pub fn failure(service: &ServiceId, kind: FailureKind, detail: impl Into<String>) -> Self {
        DeploymentOutcome::Failure {
            service: service.clone(),
            namespace: None,
            kind,
            detail: detail.into(),
            events: Vec::new(),
        }
    }

    pub fn service(&self) -> &ServiceId {
        match self {
            DeploymentOutcome::Success { service, .. } => service,
            DeploymentOutcome::Failure { service, .. } => service,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DeploymentOutcome::Success { .. })
    }

    /// Metrics label: `success` or the failure kind
    pub fn result_label(&self) -> &'static str {
        match self {
            DeploymentOutcome::Success { .. } => "success",
            DeploymentOutcome::Failure { kind, .. } => kind.as_str(),
        }
    }
}

/// Everything the report step needs from a deploy run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunArtifact {
    pub pr_number: u64,
    pub branch: String,
    pub generated_at: DateTime<Utc>,
    pub outcomes: Vec<DeploymentOutcome>,
}

impl RunArtifact {
    pub fn new(request: &PreviewRequest, outcomes: Vec<DeploymentOutcome>) -> Self {
        Self {
            pr_number: request.pr_number,
            branch: request.branch.clone(),
            generated_at: Utc::now(),
            outcomes,
        }
    }

    pub fn successes(&self) -> impl Iterator<Item = &DeploymentOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeploymentOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn write_to(&self, path: &Path) -> Result<(), ArtifactError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| ArtifactError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Read an artifact; `Ok(None)` when the file does not exist
    pub fn read_from(path: &Path) -> Result<Option<Self>, ArtifactError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ArtifactError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }
}

#[cfg(test)]
#[path = "outcome_test.rs"]
mod tests;
