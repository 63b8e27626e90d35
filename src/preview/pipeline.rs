//! Sequential preview pipeline
//!
//! Services are processed one at a time in change-set order. Each one ends in
//! exactly one `DeploymentOutcome`; nothing a single service does can abort
//! the run.

use super::cluster::PreviewCluster;
use super::deployer::{deploy_service, fail_in_namespace, set_state};
use super::domain::{bind_domain, DomainProvisioner, DomainRequest};
use super::outcome::{DeploymentOutcome, FailureKind};
use super::resolver::{resolve_service, wait_for_endpoints};
use super::{
    label_value, PreviewRequest, PreviewState, ServiceId, ANNOTATION_DOMAIN_ID, LABEL_DOMAIN_ID,
};
use crate::config::PreviewConfig;
use crate::telemetry::cdevents::CDEventsSink;
use crate::telemetry::metrics::PreviewMetrics;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{error, info, warn};

pub struct PreviewPipeline<'a> {
    cluster: &'a dyn PreviewCluster,
    domains: &'a dyn DomainProvisioner,
    config: &'a PreviewConfig,
    metrics: Option<&'a PreviewMetrics>,
    events: Option<&'a CDEventsSink>,
}

impl<'a> PreviewPipeline<'a> {
    pub fn new(
        cluster: &'a dyn PreviewCluster,
        domains: &'a dyn DomainProvisioner,
        config: &'a PreviewConfig,
    ) -> Self {
        Self {
            cluster,
            domains,
            config,
            metrics: None,
            events: None,
        }
    }

    pub fn with_metrics(mut self, metrics: &'a PreviewMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_events(mut self, events: &'a CDEventsSink) -> Self {
        self.events = Some(events);
        self
    }

    /// Preview every service in order, collecting one outcome per service
    pub async fn run(&self, request: &PreviewRequest, services: &[ServiceId]) -> Vec<DeploymentOutcome> {
        info!(
            pr = request.pr_number,
            branch = %request.branch,
            services = services.len(),
            "Starting preview run"
        );

        let mut outcomes = Vec::with_capacity(services.len());
        for service in services {
            let started = Instant::now();
            let outcome = self.preview_service(request, service).await;

            if let Some(metrics) = self.metrics {
                metrics.record_deployment(outcome.result_label(), started.elapsed().as_secs_f64());
            }
            if let (Some(sink), DeploymentOutcome::Success { .. }) = (self.events, &outcome) {
                if let Err(e) = sink.emit_preview_deployed(request, &outcome).await {
                    warn!(service = %service, error = %e, "Failed to emit CDEvent");
                }
            }

            match &outcome {
                DeploymentOutcome::Success { url, .. } => {
                    info!(service = %service, url = %url, "Preview ready")
                }
                DeploymentOutcome::Failure { kind, detail, .. } => {
                    error!(service = %service, kind = %kind, detail = %detail, "Preview failed")
                }
            }
            outcomes.push(outcome);
        }

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        info!(
            succeeded,
            failed = outcomes.len() - succeeded,
            "Preview run finished"
        );
        outcomes
    }

    /// Deploy, resolve and bind a domain for one service
    pub async fn preview_service(&self, request: &PreviewRequest, service: &ServiceId) -> DeploymentOutcome {
        let deployed = match deploy_service(self.cluster, self.config, request, service).await {
            Ok(deployed) => deployed,
            Err(failure) => return failure.into_outcome(service),
        };
        let namespace = deployed.namespace;
        let mut warnings = deployed.warnings;

        let fallback_texts = deployed.bundle.fallback_texts();
        let Some(endpoint) = resolve_service(self.cluster, &namespace, &fallback_texts).await else {
            return fail_in_namespace(
                self.cluster,
                &namespace,
                FailureKind::NoServiceFound,
                "No Service resource found in the namespace or manifests; nothing can route to the workload"
                    .to_string(),
            )
            .await
            .into_outcome(service);
        };

        let ready = wait_for_endpoints(
            self.cluster,
            &namespace,
            &endpoint.name,
            self.config.readiness_attempts,
            self.config.readiness_interval,
        )
        .await;
        if !ready {
            warnings.push(format!(
                "Service endpoints not ready after {} checks",
                self.config.readiness_attempts
            ));
        }

        let internal_url = endpoint.internal_url(&namespace);
        let domain_request = DomainRequest {
            service_name: endpoint.name.clone(),
            namespace: namespace.clone(),
            internal_service: internal_url.clone(),
            port: endpoint.port,
            use_zero_trust: self.config.domains.use_zero_trust,
            pull_request_id: request.pr_number,
            branch: request.branch.clone(),
        };

        let binding = match bind_domain(self.domains, &domain_request, service, &self.config.domains).await {
            Ok(binding) => binding,
            Err(e) => {
                return fail_in_namespace(
                    self.cluster,
                    &namespace,
                    FailureKind::DomainApiError,
                    format!("Domain generation failed: {e}"),
                )
                .await
                .into_outcome(service);
            }
        };

        if let Some(reason) = &binding.fallback_reason {
            if let Some(metrics) = self.metrics {
                metrics.record_domain_fallback();
            }
            warnings.push(format!(
                "Domain API unavailable ({reason}); fallback hostname may not route"
            ));
        }

        if !binding.id.is_empty() {
            self.record_domain_id(&namespace, &binding.id, &mut warnings).await;
        }
        set_state(self.cluster, &namespace, PreviewState::Ready).await;

        DeploymentOutcome::Success {
            service: service.clone(),
            namespace,
            domain: binding.domain,
            url: binding.url,
            domain_id: binding.id,
            service_name: endpoint.name,
            port: endpoint.port,
            internal_url,
            warnings,
        }
    }

    /// Store the domain id on the namespace so cleanup can release it
    ///
    /// The annotation keeps the id verbatim. The `domain-id` label is only
    /// set when the id is already a valid label value.
    async fn record_domain_id(&self, namespace: &str, id: &str, warnings: &mut Vec<String>) {
        let annotations = BTreeMap::from([(ANNOTATION_DOMAIN_ID.to_string(), id.to_string())]);
        if let Err(e) = self.cluster.annotate_namespace(namespace, &annotations).await {
            warn!(namespace, domain_id = id, error = %e, "Failed to record domain id");
            warnings.push(format!("Domain id {id} not recorded on namespace"));
            return;
        }

        if label_value(id) != id {
            warn!(namespace, domain_id = id, "Domain id is not a valid label value");
            warnings.push(format!(
                "Domain id {id} is not a valid label value; recorded as annotation only"
            ));
            return;
        }

        let labels = BTreeMap::from([(LABEL_DOMAIN_ID.to_string(), id.to_string())]);
        if let Err(e) = self.cluster.label_namespace(namespace, &labels).await {
            warn!(namespace, domain_id = id, error = %e, "Failed to label domain id");
        }
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod tests;
