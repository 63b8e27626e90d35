//! Preview environment orchestration
//!
//! One preview environment exists per (pull request, service) pair and lives
//! in its own namespace. Namespace metadata is the only persisted state:
//! - `pr-number` label links the namespace to its pull request (cleanup index)
//! - `homelab-preview/domain-id` annotation links it to the externally owned
//!   domain record; the `domain-id` label mirrors it when the id is a valid
//!   label value
//! - `preview-state` label tracks the lifecycle (pending → deployed → ready | failed)

pub mod cleanup;
pub mod cluster;
pub mod deployer;
pub mod domain;
pub mod manifests;
pub mod outcome;
pub mod pipeline;
pub mod report;
pub mod resolver;

#[cfg(test)]
pub(crate) mod fake;

pub use crate::changes::ServiceId;
pub use cleanup::{cleanup_pull_request, CleanupSummary};
pub use outcome::{DeploymentOutcome, FailureKind, RunArtifact};
pub use pipeline::PreviewPipeline;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const LABEL_PR_NUMBER: &str = "pr-number";
pub const LABEL_SERVICE: &str = "service";
pub const LABEL_CREATED_BY: &str = "created-by";
pub const LABEL_DOMAIN_ID: &str = "domain-id";
pub const LABEL_STATE: &str = "preview-state";
pub const CREATED_BY: &str = "homelab-preview";
pub const ANNOTATION_CREATED_AT: &str = "homelab-preview/created-at";
pub const ANNOTATION_BRANCH: &str = "homelab-preview/branch";
pub const ANNOTATION_DOMAIN_ID: &str = "homelab-preview/domain-id";

/// Kubernetes limit for namespace names (DNS-1123 label)
const MAX_NAMESPACE_LEN: usize = 63;

/// The pull request a pipeline run works on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewRequest {
    pub pr_number: u64,
    pub branch: String,
}

impl PreviewRequest {
    pub fn new(pr_number: u64, branch: impl Into<String>) -> Self {
        Self {
            pr_number,
            branch: branch.into(),
        }
    }
}

/// Lifecycle of a preview environment, stored in the `preview-state` label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewState {
    Pending,
    Deployed,
    Ready,
    Failed,
}

impl PreviewState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreviewState::Pending => "pending",
            PreviewState::Deployed => "deployed",
            PreviewState::Ready => "ready",
            PreviewState::Failed => "failed",
        }
    }
}

impl fmt::Display for PreviewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespace for a service preview: `preview-pr-<id>-<category>-<name>`
///
/// Lower-cased, characters outside `[a-z0-9-]` replaced with `-`, truncated
/// to 63 characters without a trailing `-`.
pub fn preview_namespace(pr_number: u64, service: &ServiceId) -> String {
    let raw = format!("preview-pr-{}-{}-{}", pr_number, service.category, service.name);
    let mut name: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    name.truncate(MAX_NAMESPACE_LEN);
    name.trim_end_matches('-').to_string()
}

/// Label selector matching every preview namespace of a pull request
pub fn pull_request_selector(pr_number: u64) -> String {
    format!(
        "{}={},{}={}",
        LABEL_PR_NUMBER, pr_number, LABEL_CREATED_BY, CREATED_BY
    )
}

/// Labels written when the namespace is created
pub fn namespace_labels(request: &PreviewRequest, service: &ServiceId) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_PR_NUMBER.to_string(), request.pr_number.to_string()),
        (LABEL_SERVICE.to_string(), label_value(&service.slug())),
        (LABEL_CREATED_BY.to_string(), CREATED_BY.to_string()),
        (LABEL_STATE.to_string(), PreviewState::Pending.to_string()),
    ])
}

/// Coerce arbitrary text into a valid label value
pub fn label_value(raw: &str) -> String {
    let mut value: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    value.truncate(MAX_NAMESPACE_LEN);
    value
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}
