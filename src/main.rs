//! homelab-preview: per-pull-request preview environments
//!
//! Subcommands map to CI workflow steps:
//! - `detect`: list services changed in a revision range
//! - `deploy`: preview every changed service, write the run artifact
//! - `report`: render the artifact as Markdown, optionally comment on the PR
//! - `cleanup`: delete every preview namespace and domain of a closed PR

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use homelab_preview::changes::{changed_paths, detect_services};
use homelab_preview::config::{
    DomainSettings, RepoLayout, DEFAULT_COMMUNITY_ROOT, DEFAULT_DOMAIN_SUFFIX, DEFAULT_OVERLAY,
    DEFAULT_SERVICES_ROOT, FIELD_MANAGER,
};
use homelab_preview::github::{GitHubClient, DEFAULT_API_URL};
use homelab_preview::preview::cluster::KubeCluster;
use homelab_preview::preview::domain::HttpDomainProvisioner;
use homelab_preview::preview::report::{render_report, ReportInput, ReportOptions};
use homelab_preview::preview::{cleanup_pull_request, PreviewPipeline, RunArtifact};
use homelab_preview::telemetry::{CDEventsSink, PreviewMetrics};
use homelab_preview::{PreviewConfig, PreviewRequest, ServiceId};
use kube::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

const DEFAULT_ARTIFACT: &str = "preview-run.json";

#[derive(Debug, Parser)]
#[command(name = "homelab-preview")]
#[command(about = "Preview environments for homelab pull requests", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the services changed between two revisions
    Detect {
        #[command(flatten)]
        layout: LayoutArgs,
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Deploy preview environments and write the run artifact
    Deploy(DeployArgs),

    /// Render the run artifact as a Markdown report
    Report(ReportArgs),

    /// Delete all preview environments of a pull request
    Cleanup {
        /// Pull request number
        #[arg(long, env = "PREVIEW_PR_NUMBER")]
        pr: u64,
        #[command(flatten)]
        domains: DomainArgs,
        /// Write Prometheus metrics to this file
        #[arg(long, env = "PREVIEW_METRICS_FILE")]
        metrics_file: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct LayoutArgs {
    /// Repository checkout root
    #[arg(long, env = "PREVIEW_REPO_ROOT", default_value = ".")]
    repo: PathBuf,
    /// Directory holding `<category>/<name>` services
    #[arg(long, env = "PREVIEW_SERVICES_ROOT", default_value = DEFAULT_SERVICES_ROOT)]
    services_root: String,
    /// Directory holding community references
    #[arg(long, env = "PREVIEW_COMMUNITY_ROOT", default_value = DEFAULT_COMMUNITY_ROOT)]
    community_root: String,
    /// Kustomize overlay used for previews
    #[arg(long, env = "PREVIEW_OVERLAY", default_value = DEFAULT_OVERLAY)]
    overlay: String,
}

impl LayoutArgs {
    fn layout(&self) -> RepoLayout {
        RepoLayout {
            root: self.repo.clone(),
            services_root: self.services_root.clone(),
            community_root: self.community_root.clone(),
            overlay: self.overlay.clone(),
        }
    }
}

#[derive(Debug, Args)]
struct RangeArgs {
    /// Base revision of the diff
    #[arg(long, env = "PREVIEW_BASE_REF")]
    base: String,
    /// Head revision of the diff
    #[arg(long, env = "PREVIEW_HEAD_REF", default_value = "HEAD")]
    head: String,
}

#[derive(Debug, Args)]
struct DomainArgs {
    /// Domain-generation API base URL
    #[arg(long, env = "PREVIEW_DOMAIN_API_URL", default_value = "http://localhost:3000")]
    domain_api_url: String,
    /// Bearer token for the domain API
    #[arg(long, env = "PREVIEW_DOMAIN_API_TOKEN", hide_env_values = true)]
    domain_api_token: Option<String>,
}

#[derive(Debug, Args)]
struct DeployArgs {
    /// Pull request number
    #[arg(long, env = "PREVIEW_PR_NUMBER")]
    pr: u64,
    /// Pull request head branch
    #[arg(long, env = "PREVIEW_BRANCH")]
    branch: String,
    /// Base revision; services are detected from the diff
    #[arg(long, env = "PREVIEW_BASE_REF", conflicts_with = "services", required_unless_present = "services")]
    base: Option<String>,
    /// Head revision of the diff
    #[arg(long, env = "PREVIEW_HEAD_REF", default_value = "HEAD")]
    head: String,
    /// Explicit `category/name` services, skipping detection
    #[arg(long = "service", value_name = "CATEGORY/NAME")]
    services: Vec<String>,
    #[command(flatten)]
    layout: LayoutArgs,
    #[command(flatten)]
    domains: DomainArgs,
    /// Suffix for fallback hostnames
    #[arg(long, env = "PREVIEW_DOMAIN_SUFFIX", default_value = DEFAULT_DOMAIN_SUFFIX)]
    domain_suffix: String,
    /// Do not request zero-trust access for generated domains
    #[arg(long, env = "PREVIEW_NO_ZERO_TRUST")]
    no_zero_trust: bool,
    /// Fail a service instead of using a fallback hostname
    #[arg(long, env = "PREVIEW_STRICT_DOMAINS")]
    strict_domains: bool,
    /// Binary used to render overlays
    #[arg(long, env = "PREVIEW_KUSTOMIZE", default_value = "kustomize")]
    kustomize: String,
    /// Endpoint readiness checks before warning
    #[arg(long, env = "PREVIEW_READINESS_ATTEMPTS", default_value_t = 12)]
    readiness_attempts: u32,
    /// Seconds between readiness checks
    #[arg(long, env = "PREVIEW_READINESS_INTERVAL", default_value_t = 5)]
    readiness_interval: u64,
    /// Seconds to wait for Deployments to become available
    #[arg(long, env = "PREVIEW_ROLLOUT_TIMEOUT", default_value_t = 300)]
    rollout_timeout: u64,
    /// Run artifact path
    #[arg(long, env = "PREVIEW_OUTPUT", default_value = DEFAULT_ARTIFACT)]
    output: PathBuf,
    /// Write Prometheus metrics to this file
    #[arg(long, env = "PREVIEW_METRICS_FILE")]
    metrics_file: Option<PathBuf>,
}

impl DeployArgs {
    fn config(&self) -> PreviewConfig {
        let domains = DomainSettings {
            api_url: self.domains.domain_api_url.clone(),
            api_token: self.domains.domain_api_token.clone(),
            suffix: self.domain_suffix.clone(),
            use_zero_trust: !self.no_zero_trust,
            strict: self.strict_domains,
        };
        PreviewConfig {
            kustomize_bin: self.kustomize.clone(),
            readiness_attempts: self.readiness_attempts,
            readiness_interval: Duration::from_secs(self.readiness_interval),
            rollout_timeout: Duration::from_secs(self.rollout_timeout),
            field_manager: FIELD_MANAGER.to_string(),
            ..PreviewConfig::new(self.layout.layout(), domains)
        }
    }
}

#[derive(Debug, Args)]
struct ReportArgs {
    /// Run artifact written by `deploy`
    #[arg(long, env = "PREVIEW_OUTPUT", default_value = DEFAULT_ARTIFACT)]
    input: PathBuf,
    /// Post the report as a pull request comment
    #[arg(long, requires = "pr")]
    comment: bool,
    /// Pull request number
    #[arg(long, env = "PREVIEW_PR_NUMBER")]
    pr: Option<u64>,
    /// Link to the CI run shown in the report
    #[arg(long, env = "PREVIEW_RUN_URL")]
    run_url: Option<String>,
    /// `owner/name` of the repository
    #[arg(long, env = "GITHUB_REPOSITORY")]
    repository: Option<String>,
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,
    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_API_URL)]
    github_api_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries service ids and reports
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Detect { layout, range } => {
            let services = detect(&layout.layout(), &range.base, &range.head).await?;
            for service in services {
                println!("{service}");
            }
            Ok(())
        }
        Command::Deploy(args) => deploy(args).await,
        Command::Report(args) => report(args).await,
        Command::Cleanup {
            pr,
            domains,
            metrics_file,
        } => cleanup(pr, domains, metrics_file).await,
    }
}

async fn detect(layout: &RepoLayout, base: &str, head: &str) -> anyhow::Result<Vec<ServiceId>> {
    let paths = changed_paths(&layout.root, base, head)
        .await
        .with_context(|| format!("Failed to diff {base}..{head}"))?;
    let services = detect_services(&paths, layout);
    info!(
        base,
        head,
        files = paths.len(),
        services = services.len(),
        "Detected changed services"
    );
    Ok(services)
}

/// Services named with `--service`, sorted and deduplicated like detection
fn explicit_services(raw: &[String]) -> anyhow::Result<Vec<ServiceId>> {
    let mut services = raw
        .iter()
        .map(|s| ServiceId::parse(s))
        .collect::<Result<Vec<_>, _>>()?;
    services.sort();
    services.dedup();
    Ok(services)
}

async fn deploy(args: DeployArgs) -> anyhow::Result<()> {
    let config = args.config();
    let request = PreviewRequest::new(args.pr, args.branch.clone());

    let services = match &args.base {
        Some(base) => detect(&config.layout, base, &args.head).await?,
        None => explicit_services(&args.services)?,
    };

    let client = match Client::try_default().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to create Kubernetes client");
            return Err(e.into());
        }
    };
    info!("Connected to Kubernetes cluster");

    let cluster = KubeCluster::new(client, config.field_manager.clone());
    let domains = HttpDomainProvisioner::from_settings(&config.domains)?;
    let metrics = PreviewMetrics::new()?;
    let sink = CDEventsSink::new();

    let outcomes = PreviewPipeline::new(&cluster, &domains, &config)
        .with_metrics(&metrics)
        .with_events(&sink)
        .run(&request, &services)
        .await;

    let artifact = RunArtifact::new(&request, outcomes);
    artifact.write_to(&args.output)?;
    info!(
        path = %args.output.display(),
        succeeded = artifact.successes().count(),
        failed = artifact.failures().count(),
        "Run artifact written"
    );

    write_metrics(&metrics, args.metrics_file.as_deref());
    Ok(())
}

async fn report(args: ReportArgs) -> anyhow::Result<()> {
    let input = ReportInput::from(RunArtifact::read_from(&args.input)?);
    if matches!(input, ReportInput::Missing) {
        warn!(path = %args.input.display(), "Run artifact not found");
    }
    let options = ReportOptions {
        run_url: args.run_url.clone(),
        ..ReportOptions::default()
    };
    let body = render_report(&input, &options);
    println!("{body}");

    if args.comment {
        let Some(pr) = args.pr else {
            bail!("--comment requires --pr");
        };
        let repository = args
            .repository
            .context("GITHUB_REPOSITORY is required to comment")?;
        let token = args
            .github_token
            .context("GITHUB_TOKEN is required to comment")?;
        let client = GitHubClient::new(args.github_api_url, repository, token)?;
        client.post_comment(pr, &body).await?;
    }
    Ok(())
}

async fn cleanup(
    pr: u64,
    domains: DomainArgs,
    metrics_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let client = Client::try_default().await?;
    let cluster = KubeCluster::new(client, FIELD_MANAGER);
    let settings = DomainSettings {
        api_url: domains.domain_api_url,
        api_token: domains.domain_api_token,
        ..DomainSettings::default()
    };
    let provisioner = HttpDomainProvisioner::from_settings(&settings)?;
    let metrics = PreviewMetrics::new()?;
    let sink = CDEventsSink::new();

    let summary = cleanup_pull_request(&cluster, &provisioner, pr, Some(&metrics), Some(&sink))
        .await
        .with_context(|| format!("Failed to list preview namespaces of PR {pr}"))?;
    if !summary.is_clean() {
        warn!(
            domain_failures = summary.domain_failures,
            namespace_failures = summary.namespace_failures,
            "Cleanup finished with failures"
        );
    }

    write_metrics(&metrics, metrics_file.as_deref());
    Ok(())
}

/// Metrics are best effort and never fail a command
fn write_metrics(metrics: &PreviewMetrics, path: Option<&Path>) {
    let Some(path) = path else {
        return;
    };
    match metrics.write_to(path) {
        Ok(()) => info!(path = %path.display(), "Metrics written"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to write metrics"),
    }
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
