#![allow(clippy::unwrap_used)]

use super::*;
use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
struct Received {
    path: (String, String, u64),
    body: Value,
    auth: Option<String>,
    agent: Option<String>,
}

async fn start_github(status: StatusCode) -> (String, Arc<Mutex<Vec<Received>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let received = received.clone();
        move |Path(path): Path<(String, String, u64)>, headers: HeaderMap, Json(body): Json<Value>| {
            let received = received.clone();
            async move {
                let header = |name: &str| {
                    headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                };
                received.lock().unwrap().push(Received {
                    path,
                    body,
                    auth: header("authorization"),
                    agent: header("user-agent"),
                });
                (
                    status,
                    Json(json!({"id": 99, "html_url": "https://github.com/o/r/pull/5#issuecomment-99"})),
                )
            }
        }
    };

    let app = Router::new().route("/repos/{owner}/{repo}/issues/{pr}/comments", post(handler));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), received)
}

#[tokio::test]
async fn test_post_comment() {
    let (url, received) = start_github(StatusCode::CREATED).await;
    let client = GitHubClient::new(url, "homelab/infra", "secret").unwrap();

    let comment = client.post_comment(5, "## Preview").await.unwrap();

    assert_eq!(comment.id, 99);
    assert_eq!(comment.html_url, "https://github.com/o/r/pull/5#issuecomment-99");
    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(
        received[0].path,
        ("homelab".to_string(), "infra".to_string(), 5)
    );
    assert_eq!(received[0].body, json!({"body": "## Preview"}));
    assert_eq!(received[0].auth.as_deref(), Some("Bearer secret"));
    assert_eq!(received[0].agent.as_deref(), Some("homelab-preview"));
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let (url, _) = start_github(StatusCode::FORBIDDEN).await;
    let client = GitHubClient::new(url, "homelab/infra", "secret").unwrap();

    match client.post_comment(5, "x").await {
        Err(GitHubError::Status { status, .. }) => assert_eq!(status, 403),
        other => panic!("expected status error, got {other:?}"),
    }
}

#[test]
fn test_repository_must_be_owner_and_name() {
    assert!(GitHubClient::new(DEFAULT_API_URL, "infra", "t").is_err());
    assert!(GitHubClient::new(DEFAULT_API_URL, "a/b/c", "t").is_err());
    assert!(GitHubClient::new(DEFAULT_API_URL, "a/b", "t").is_ok());
}
