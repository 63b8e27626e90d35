use super::ChangeError;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

/// List files changed between two revisions
///
/// Runs `git diff --name-only --diff-filter=d <base> <head>` inside `repo`.
/// Deleted files are excluded so that removed services are not redeployed.
pub async fn changed_paths(repo: &Path, base: &str, head: &str) -> Result<Vec<PathBuf>, ChangeError> {
    let output = Command::new("git")
        .args(["diff", "--name-only", "--diff-filter=d", base, head])
        .current_dir(repo)
        .output()
        .await
        .map_err(|e| ChangeError::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ChangeError::Git(format!(
            "git diff {base} {head} failed: {}",
            stderr.trim()
        )));
    }

    let paths: Vec<PathBuf> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(PathBuf::from)
        .collect();

    info!(base, head, files = paths.len(), "Collected changed files");
    Ok(paths)
}
