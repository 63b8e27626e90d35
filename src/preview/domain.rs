//! Domain provisioning for preview environments
//!
//! The domain API mints a routable hostname bound to an in-cluster endpoint.
//! When it does not return a usable domain, a deterministic hostname is
//! computed locally so the report always has a URL. That hostname may not
//! route; the outcome carries a warning saying so.

use crate::changes::ServiceId;
use crate::config::DomainSettings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_DNS_LABEL_LEN: usize = 63;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("domain API HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("domain API returned status {0}")]
    Status(u16),

    #[error("domain API rejected the request: {0}")]
    Rejected(String),
}

/// Body of `POST /api/domains/generate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainRequest {
    pub service_name: String,
    pub namespace: String,
    pub internal_service: String,
    pub port: i32,
    pub use_zero_trust: bool,
    pub pull_request_id: u64,
    pub branch: String,
}

/// A domain minted by the API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainGrant {
    pub full_domain: String,
    pub url: String,
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    success: bool,
    domain: Option<DomainPayload>,
}

#[derive(Debug, Deserialize)]
struct DomainPayload {
    full_domain: Option<String>,
    url: Option<String>,
    id: Option<Value>,
}

#[async_trait]
pub trait DomainProvisioner: Send + Sync {
    async fn generate(&self, request: &DomainRequest) -> Result<DomainGrant, DomainError>;

    /// Delete a domain record; callers treat failures as best effort
    async fn release(&self, domain_id: &str) -> Result<(), DomainError>;
}

/// HTTP client for the domain-generation API
pub struct HttpDomainProvisioner {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpDomainProvisioner {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_settings(settings: &DomainSettings) -> Result<Self, DomainError> {
        Self::new(settings.api_url.clone(), settings.api_token.clone())
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl DomainProvisioner for HttpDomainProvisioner {
    async fn generate(&self, request: &DomainRequest) -> Result<DomainGrant, DomainError> {
        let url = format!("{}/api/domains/generate", self.base_url);
        let response = self
            .authorize(self.client.post(&url))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DomainError::Status(status.as_u16()));
        }

        let body: GenerateResponse = response.json().await?;
        grant_from_response(body)
    }

    async fn release(&self, domain_id: &str) -> Result<(), DomainError> {
        let url = format!("{}/api/domains/{}", self.base_url, domain_id);
        let response = self.authorize(self.client.delete(&url)).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DomainError::Status(status.as_u16()));
        }
        Ok(())
    }
}

fn grant_from_response(body: GenerateResponse) -> Result<DomainGrant, DomainError> {
    if !body.success {
        return Err(DomainError::Rejected("success=false".to_string()));
    }
    let payload = body
        .domain
        .ok_or_else(|| DomainError::Rejected("response has no domain".to_string()))?;
    let full_domain = payload
        .full_domain
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| DomainError::Rejected("response has an empty domain".to_string()))?;

    let url = payload
        .url
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| format!("https://{full_domain}"));
    let id = match payload.id {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };

    Ok(DomainGrant {
        full_domain,
        url,
        id,
    })
}

/// Deterministic hostname used when the domain API gives nothing usable
///
/// `pr-<id>-<category>-<name>.<suffix>`, no randomness. The first label is
/// cut to the 63-character DNS limit.
pub fn fallback_hostname(pr_number: u64, service: &ServiceId, suffix: &str) -> String {
    let mut label: String = format!("pr-{}-{}", pr_number, service.slug())
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    label.truncate(MAX_DNS_LABEL_LEN);
    format!("{}.{}", label.trim_end_matches('-'), suffix.trim_start_matches('.'))
}

/// The domain a preview ends up with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainBinding {
    pub domain: String,
    pub url: String,
    /// Empty for fallback hostnames
    pub id: String,
    /// Why the API result was not used
    pub fallback_reason: Option<String>,
}

impl DomainBinding {
    pub fn is_fallback(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

/// Request a domain, falling back to a local hostname unless `strict`
///
/// The API is called exactly once; there is no retry.
pub async fn bind_domain(
    provisioner: &dyn DomainProvisioner,
    request: &DomainRequest,
    service: &ServiceId,
    settings: &DomainSettings,
) -> Result<DomainBinding, DomainError> {
    match provisioner.generate(request).await {
        Ok(grant) => {
            info!(
                service = %service,
                domain = %grant.full_domain,
                domain_id = %grant.id,
                "Domain generated"
            );
            Ok(DomainBinding {
                domain: grant.full_domain,
                url: grant.url,
                id: grant.id,
                fallback_reason: None,
            })
        }
        Err(e) if settings.strict => Err(e),
        Err(e) => {
            let domain = fallback_hostname(request.pull_request_id, service, &settings.suffix);
            warn!(
                service = %service,
                error = %e,
                fallback = %domain,
                "Domain API unavailable, using fallback hostname"
            );
            Ok(DomainBinding {
                url: format!("https://{domain}"),
                domain,
                id: String::new(),
                fallback_reason: Some(e.to_string()),
            })
        }
    }
}

#[cfg(test)]
#[path = "domain_test.rs"]
mod tests;
