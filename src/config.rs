//! Runtime configuration for the preview pipeline
//!
//! Values come from CLI flags with environment fallbacks (see `main.rs`);
//! this module only holds the resolved settings and their defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Directory holding `<category>/<name>` service trees
pub const DEFAULT_SERVICES_ROOT: &str = "apps";

/// Directory holding flat community reference manifests
pub const DEFAULT_COMMUNITY_ROOT: &str = "community";

/// Kustomize overlay used for previews
pub const DEFAULT_OVERLAY: &str = "preview";

/// Suffix for locally computed fallback hostnames
pub const DEFAULT_DOMAIN_SUFFIX: &str = "preview.homelab.local";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "homelab-preview";

/// Number of endpoint readiness checks before giving up
pub const DEFAULT_READINESS_ATTEMPTS: u32 = 12;

/// Delay between endpoint readiness checks
pub const DEFAULT_READINESS_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound for waiting on Deployment availability
pub const DEFAULT_ROLLOUT_TIMEOUT: Duration = Duration::from_secs(300);

/// Repository layout used by change detection and manifest resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLayout {
    /// Repository checkout root
    pub root: PathBuf,
    /// Services root, relative to `root`
    pub services_root: String,
    /// Community references root, relative to `root`
    pub community_root: String,
    /// Overlay directory name under `<service>/overlays/`
    pub overlay: String,
}

impl RepoLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            services_root: DEFAULT_SERVICES_ROOT.to_string(),
            community_root: DEFAULT_COMMUNITY_ROOT.to_string(),
            overlay: DEFAULT_OVERLAY.to_string(),
        }
    }

    /// Directory holding the manifests of `category/name`
    pub fn service_dir(&self, category: &str, name: &str) -> PathBuf {
        self.root
            .join(&self.services_root)
            .join(category)
            .join(name)
    }

    /// Directory holding flat `<name>.yaml` community references
    pub fn community_dir(&self) -> PathBuf {
        self.root.join(&self.community_root)
    }
}

/// Domain-generation API settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainSettings {
    /// Base URL, e.g. `https://domains.homelab.local`
    pub api_url: String,
    /// Optional bearer token
    pub api_token: Option<String>,
    /// Suffix for fallback hostnames
    pub suffix: String,
    /// Request strict access control for generated domains
    pub use_zero_trust: bool,
    /// Treat domain API failures as service failures instead of falling back
    pub strict: bool,
}

impl Default for DomainSettings {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3000".to_string(),
            api_token: None,
            suffix: DEFAULT_DOMAIN_SUFFIX.to_string(),
            use_zero_trust: true,
            strict: false,
        }
    }
}

/// Resolved configuration for one pipeline invocation
#[derive(Debug, Clone)]
pub struct PreviewConfig {
    pub layout: RepoLayout,
    pub domains: DomainSettings,
    /// Binary used to render overlays
    pub kustomize_bin: String,
    pub readiness_attempts: u32,
    pub readiness_interval: Duration,
    pub rollout_timeout: Duration,
    pub field_manager: String,
}

impl PreviewConfig {
    pub fn new(layout: RepoLayout, domains: DomainSettings) -> Self {
        Self {
            layout,
            domains,
            kustomize_bin: "kustomize".to_string(),
            readiness_attempts: DEFAULT_READINESS_ATTEMPTS,
            readiness_interval: DEFAULT_READINESS_INTERVAL,
            rollout_timeout: DEFAULT_ROLLOUT_TIMEOUT,
            field_manager: FIELD_MANAGER.to_string(),
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self::new(RepoLayout::new("."), DomainSettings::default())
    }
}
