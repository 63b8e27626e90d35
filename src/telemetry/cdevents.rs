//! CDEvents emission for preview environments
//!
//! A successful preview emits `service.deployed`; a namespace deleted by
//! cleanup emits `service.removed`. The environment id is the preview
//! namespace so both events of one preview correlate.

use crate::preview::{DeploymentOutcome, PreviewRequest};
use cloudevents::Event;
use serde_json::json;
use thiserror::Error;

#[cfg(test)]
use std::sync::{Arc, Mutex};

const EVENT_SOURCE: &str = "/homelab-preview";

#[derive(Debug, Error)]
pub enum EventsError {
    #[error("failed to build CDEvent: {0}")]
    Build(String),

    #[error("failed to send CDEvent: {0}")]
    Send(String),
}

/// CDEvents sink for emitting events
pub struct CDEventsSink {
    #[cfg(not(test))]
    enabled: bool,
    #[cfg(not(test))]
    sink_url: Option<String>,
    #[cfg(not(test))]
    client: reqwest::Client,
    #[cfg(test)]
    mock_events: Arc<Mutex<Vec<Event>>>,
}

#[cfg(not(test))]
impl Default for CDEventsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl CDEventsSink {
    /// Create a sink configured from the environment
    ///
    /// - PREVIEW_CDEVENTS_ENABLED: "true" to enable emission (default: false)
    /// - PREVIEW_CDEVENTS_SINK_URL: HTTP endpoint receiving CloudEvents
    #[cfg(not(test))]
    pub fn new() -> Self {
        let enabled = std::env::var("PREVIEW_CDEVENTS_ENABLED")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let sink_url = std::env::var("PREVIEW_CDEVENTS_SINK_URL")
            .ok()
            .filter(|url| !url.is_empty());

        CDEventsSink {
            enabled,
            sink_url,
            client: reqwest::Client::new(),
        }
    }

    #[cfg(test)]
    pub fn new_mock() -> Self {
        CDEventsSink {
            mock_events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[cfg(test)]
    #[allow(clippy::unwrap_used)] // Test helper can use unwrap
    pub fn get_emitted_events(&self) -> Vec<Event> {
        self.mock_events.lock().unwrap().clone()
    }

    #[cfg(test)]
    #[allow(clippy::unwrap_used)] // Test helper can use unwrap
    async fn deliver(&self, event: Event) -> Result<(), EventsError> {
        self.mock_events.lock().unwrap().push(event);
        Ok(())
    }

    /// POST the CloudEvent as JSON; a no-op unless enabled with a sink URL
    #[cfg(not(test))]
    async fn deliver(&self, event: Event) -> Result<(), EventsError> {
        if !self.enabled {
            return Ok(());
        }
        let Some(url) = &self.sink_url else {
            return Ok(());
        };

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/cloudevents+json")
            .json(&event)
            .send()
            .await
            .map_err(|e| EventsError::Send(format!("HTTP POST failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(EventsError::Send(format!(
                "sink returned status {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Emit `service.deployed` for a successful preview
    ///
    /// Failure outcomes are ignored.
    pub async fn emit_preview_deployed(
        &self,
        request: &PreviewRequest,
        outcome: &DeploymentOutcome,
    ) -> Result<(), EventsError> {
        let DeploymentOutcome::Success { .. } = outcome else {
            return Ok(());
        };
        let event = build_service_deployed_event(request, outcome)?;
        self.deliver(event).await
    }

    /// Emit `service.removed` for a deleted preview namespace
    pub async fn emit_preview_removed(&self, namespace: &str) -> Result<(), EventsError> {
        let event = build_service_removed_event(namespace)?;
        self.deliver(event).await
    }
}

fn build_service_deployed_event(
    request: &PreviewRequest,
    outcome: &DeploymentOutcome,
) -> Result<Event, EventsError> {
    use cdevents_sdk::latest::service_deployed;
    use cdevents_sdk::{CDEvent, Subject};

    let DeploymentOutcome::Success {
        service,
        namespace,
        url,
        domain_id,
        ..
    } = outcome
    else {
        return Err(EventsError::Build("outcome is not a success".to_string()));
    };

    let cdevent = CDEvent::from(
        Subject::from(service_deployed::Content {
            artifact_id: format!(
                "pkg:generic/{}/{}@pr-{}",
                service.category, service.name, request.pr_number
            )
            .try_into()
            .map_err(|e| EventsError::Build(format!("Invalid artifact_id: {}", e)))?,
            environment: service_deployed::ContentEnvironment {
                id: namespace
                    .to_string()
                    .try_into()
                    .map_err(|e| EventsError::Build(format!("Invalid environment id: {}", e)))?,
                source: Some(
                    format!("/api/v1/namespaces/{}", namespace)
                        .try_into()
                        .map_err(|e| {
                            EventsError::Build(format!("Invalid environment source: {}", e))
                        })?,
                ),
            },
        })
        .with_id(
            format!("/previews/{}", namespace)
                .try_into()
                .map_err(|e| EventsError::Build(format!("Invalid subject id: {}", e)))?,
        )
        .with_source(
            EVENT_SOURCE
                .try_into()
                .map_err(|e| EventsError::Build(format!("Invalid subject source: {}", e)))?,
        ),
    )
    .with_id(
        uuid::Uuid::new_v4()
            .to_string()
            .try_into()
            .map_err(|e| EventsError::Build(format!("Invalid event id: {}", e)))?,
    )
    .with_source(
        EVENT_SOURCE
            .try_into()
            .map_err(|e| EventsError::Build(format!("Invalid event source: {}", e)))?,
    )
    .with_custom_data(json!({
        "preview": {
            "pullRequest": request.pr_number,
            "branch": request.branch,
            "service": service.to_string(),
            "url": url,
            "domainId": domain_id,
        }
    }));

    cdevent
        .try_into()
        .map_err(|e| EventsError::Build(format!("Failed to convert to CloudEvent: {}", e)))
}

fn build_service_removed_event(namespace: &str) -> Result<Event, EventsError> {
    use cdevents_sdk::latest::service_removed;
    use cdevents_sdk::{CDEvent, Subject};

    let cdevent = CDEvent::from(
        Subject::from(service_removed::Content {
            environment: Some(service_removed::ContentEnvironment {
                id: namespace
                    .to_string()
                    .try_into()
                    .map_err(|e| EventsError::Build(format!("Invalid environment id: {}", e)))?,
                source: Some(
                    format!("/api/v1/namespaces/{}", namespace)
                        .try_into()
                        .map_err(|e| {
                            EventsError::Build(format!("Invalid environment source: {}", e))
                        })?,
                ),
            }),
        })
        .with_id(
            format!("/previews/{}", namespace)
                .try_into()
                .map_err(|e| EventsError::Build(format!("Invalid subject id: {}", e)))?,
        )
        .with_source(
            EVENT_SOURCE
                .try_into()
                .map_err(|e| EventsError::Build(format!("Invalid subject source: {}", e)))?,
        ),
    )
    .with_id(
        uuid::Uuid::new_v4()
            .to_string()
            .try_into()
            .map_err(|e| EventsError::Build(format!("Invalid event id: {}", e)))?,
    )
    .with_source(
        EVENT_SOURCE
            .try_into()
            .map_err(|e| EventsError::Build(format!("Invalid event source: {}", e)))?,
    );

    cdevent
        .try_into()
        .map_err(|e| EventsError::Build(format!("Failed to convert to CloudEvent: {}", e)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Tests can use unwrap/expect for brevity
#[path = "cdevents_test.rs"]
mod tests;
