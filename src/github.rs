//! Pull-request comments through the GitHub REST API

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "homelab-preview";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("GitHub HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GitHub returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid repository {0}, expected owner/name")]
    InvalidRepository(String),
}

#[derive(Serialize)]
struct CommentBody<'a> {
    body: &'a str,
}

/// The comment GitHub created
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedComment {
    pub id: u64,
    #[serde(default)]
    pub html_url: String,
}

pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    repository: String,
    token: String,
}

impl GitHubClient {
    /// `repository` is `owner/name`
    pub fn new(
        api_url: impl Into<String>,
        repository: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, GitHubError> {
        let repository = repository.into();
        match repository.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {}
            _ => return Err(GitHubError::InvalidRepository(repository)),
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            repository,
            token: token.into(),
        })
    }

    /// Post a new comment on a pull request
    pub async fn post_comment(&self, pr_number: u64, body: &str) -> Result<CreatedComment, GitHubError> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments",
            self.api_url, self.repository, pr_number
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&CommentBody { body })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GitHubError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let comment: CreatedComment = response.json().await?;
        info!(
            pr = pr_number,
            comment_id = comment.id,
            url = %comment.html_url,
            "Posted pull request comment"
        );
        Ok(comment)
    }
}

#[cfg(test)]
#[path = "github_test.rs"]
mod tests;
