//! Markdown report for the pull request
//!
//! Rendering is a pure function of the run artifact. A missing artifact and
//! an empty run are both valid terminal states with their own wording.

use super::outcome::{DeploymentOutcome, FailureKind, RunArtifact};
use std::fmt::Write;

/// Hidden marker identifying report comments
pub const REPORT_MARKER: &str = "<!-- homelab-preview-report -->";

/// What the report step found
#[derive(Debug, Clone, PartialEq)]
pub enum ReportInput {
    /// The deploy step never produced an artifact
    Missing,
    Run(RunArtifact),
}

impl From<Option<RunArtifact>> for ReportInput {
    fn from(artifact: Option<RunArtifact>) -> Self {
        match artifact {
            Some(run) => ReportInput::Run(run),
            None => ReportInput::Missing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOptions {
    /// Events listed per failure
    pub max_events: usize,
    /// Link to the CI run logs
    pub run_url: Option<String>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            max_events: 10,
            run_url: None,
        }
    }
}

/// Overall classification of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSummary {
    NoServices,
    AllSuccess,
    AllFailure,
    Mixed,
}

impl RunSummary {
    pub fn classify(outcomes: &[DeploymentOutcome]) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        match (outcomes.len(), succeeded) {
            (0, _) => RunSummary::NoServices,
            (total, ok) if ok == total => RunSummary::AllSuccess,
            (_, 0) => RunSummary::AllFailure,
            _ => RunSummary::Mixed,
        }
    }
}

/// Troubleshooting guidance per failure kind
pub fn hint(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::ManifestMissing => {
            "Add an `overlays/preview` kustomization or YAML files under `base/` for this service."
        }
        FailureKind::ValidationFailed => {
            "Check `apiVersion`/`kind` against the cluster and run `kustomize build` locally."
        }
        FailureKind::DeploymentFailed => {
            "Inspect the events below; admission webhooks, quotas and immutable fields are common causes."
        }
        FailureKind::NoServiceFound => {
            "Add a `Service` resource so the preview has something to route to."
        }
        FailureKind::ManifestParseError => {
            "The manifests are not valid YAML or the overlay failed to render; run `kustomize build` locally."
        }
        FailureKind::DomainApiError => {
            "The domain API rejected the request; check its logs or retry the workflow."
        }
    }
}

/// Render the comment body
pub fn render_report(input: &ReportInput, options: &ReportOptions) -> String {
    let mut out = String::new();
    out.push_str(REPORT_MARKER);
    out.push('\n');

    let run = match input {
        ReportInput::Missing => {
            out.push_str("## ⚠️ Preview Environments\n\n");
            out.push_str(
                "No deployment results were found. The preview pipeline did not run to \
                 completion, so no environments were created for this pull request.\n",
            );
            push_run_link(&mut out, options);
            return out;
        }
        ReportInput::Run(run) => run,
    };

    let summary = RunSummary::classify(&run.outcomes);
    let succeeded = run.successes().count();
    let total = run.outcomes.len();

    match summary {
        RunSummary::NoServices => {
            out.push_str("## ℹ️ Preview Environments\n\n");
            out.push_str(
                "No service changes were detected in this pull request, so no preview \
                 environments were deployed.\n",
            );
            push_run_link(&mut out, options);
            return out;
        }
        RunSummary::AllSuccess => {
            out.push_str("## 🚀 Preview Environments Ready\n\n");
            let _ = writeln!(out, "All {total} preview environment(s) deployed successfully.");
        }
        RunSummary::AllFailure => {
            out.push_str("## ❌ Preview Deployment Failed\n\n");
            let _ = writeln!(out, "None of the {total} preview environment(s) could be deployed.");
        }
        RunSummary::Mixed => {
            out.push_str("## ⚠️ Preview Environments Partially Deployed\n\n");
            let _ = writeln!(out, "{succeeded} of {total} preview environment(s) deployed successfully.");
        }
    }

    if succeeded > 0 {
        out.push_str("\n### Deployed\n");
        for outcome in run.successes() {
            render_success(&mut out, outcome);
        }
    }
    if succeeded < total {
        out.push_str("\n### Failed\n");
        for outcome in run.failures() {
            render_failure(&mut out, outcome, options);
        }
    }

    out.push_str("\n---\n");
    let _ = writeln!(
        out,
        "Branch `{}` · generated {}",
        run.branch,
        run.generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    out.push_str("\nPreview environments are deleted automatically when this pull request is closed.\n");
    push_run_link(&mut out, options);
    out
}

fn render_success(out: &mut String, outcome: &DeploymentOutcome) {
    let DeploymentOutcome::Success {
        service,
        namespace,
        domain,
        url,
        service_name,
        port,
        internal_url,
        warnings,
        ..
    } = outcome
    else {
        return;
    };

    let _ = writeln!(out, "\n#### ✅ `{service}`");
    let _ = writeln!(out, "- **URL:** [{domain}]({url})");
    let _ = writeln!(out, "- **Namespace:** `{namespace}`");
    let _ = writeln!(out, "- **Service:** `{service_name}:{port}`");
    let _ = writeln!(out, "- **Internal URL:** `{internal_url}`");
    for warning in warnings {
        let _ = writeln!(out, "- ⚠️ {warning}");
    }
}

fn render_failure(out: &mut String, outcome: &DeploymentOutcome, options: &ReportOptions) {
    let DeploymentOutcome::Failure {
        service,
        namespace,
        kind,
        detail,
        events,
    } = outcome
    else {
        return;
    };

    let _ = writeln!(out, "\n#### ❌ `{service}`: {kind}");
    let _ = writeln!(out, "- **Detail:** {}", detail.replace('\n', " "));
    if let Some(namespace) = namespace {
        let _ = writeln!(out, "- **Namespace:** `{namespace}`");
    }
    let _ = writeln!(out, "- **Hint:** {}", hint(*kind));

    if !events.is_empty() && options.max_events > 0 {
        let shown = &events[events.len().saturating_sub(options.max_events)..];
        out.push_str("\n<details><summary>Recent events</summary>\n\n```\n");
        for event in shown {
            out.push_str(event);
            out.push('\n');
        }
        out.push_str("```\n</details>\n");
    }
}

fn push_run_link(out: &mut String, options: &ReportOptions) {
    if let Some(url) = &options.run_url {
        let _ = writeln!(out, "\n[Workflow logs]({url})");
    }
}

#[cfg(test)]
#[path = "report_test.rs"]
mod tests;
