#![allow(clippy::unwrap_used)]

use super::*;
use clap::CommandFactory;

#[test]
fn test_cli_definition_is_valid() {
    Cli::command().debug_assert();
}

#[test]
fn test_deploy_with_explicit_services() {
    let cli = Cli::try_parse_from([
        "homelab-preview",
        "deploy",
        "--pr",
        "42",
        "--branch",
        "feature/draw",
        "--service",
        "tools/excalidraw",
        "--service",
        "media/jellyfin",
        "--strict-domains",
        "--readiness-interval",
        "1",
    ])
    .unwrap();

    let Command::Deploy(args) = cli.command else {
        panic!("expected deploy");
    };
    assert_eq!(args.pr, 42);
    assert!(args.base.is_none());
    assert_eq!(args.output, PathBuf::from("preview-run.json"));

    let config = args.config();
    assert!(config.domains.strict);
    assert!(config.domains.use_zero_trust);
    assert_eq!(config.readiness_interval, Duration::from_secs(1));
    assert_eq!(config.readiness_attempts, 12);
    assert_eq!(config.layout.overlay, "preview");

    let services = explicit_services(&args.services).unwrap();
    assert_eq!(
        services,
        vec![
            ServiceId::new("media", "jellyfin"),
            ServiceId::new("tools", "excalidraw")
        ]
    );
}

#[test]
fn test_deploy_needs_a_range_or_services() {
    let result = Cli::try_parse_from(["homelab-preview", "deploy", "--pr", "1", "--branch", "b"]);
    assert!(result.is_err());

    let result = Cli::try_parse_from([
        "homelab-preview",
        "deploy",
        "--pr",
        "1",
        "--branch",
        "b",
        "--base",
        "origin/main",
        "--service",
        "tools/x",
    ]);
    assert!(result.is_err(), "--base and --service are exclusive");
}

#[test]
fn test_explicit_services_reject_malformed_ids() {
    assert!(explicit_services(&["excalidraw".to_string()]).is_err());
    assert_eq!(
        explicit_services(&["tools/a".to_string(), "tools/a".to_string()])
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn test_report_comment_requires_pr() {
    let result = Cli::try_parse_from(["homelab-preview", "report", "--comment"]);
    // PREVIEW_PR_NUMBER may be set by CI; only assert when it is not
    if std::env::var("PREVIEW_PR_NUMBER").is_err() {
        assert!(result.is_err());
    }

    let cli = Cli::try_parse_from(["homelab-preview", "report", "--input", "run.json"]).unwrap();
    let Command::Report(args) = cli.command else {
        panic!("expected report");
    };
    assert_eq!(args.input, PathBuf::from("run.json"));
    assert!(!args.comment);
}

#[test]
fn test_cleanup_args() {
    let cli = Cli::try_parse_from([
        "homelab-preview",
        "cleanup",
        "--pr",
        "7",
        "--domain-api-url",
        "https://domains.example.com",
    ])
    .unwrap();

    match cli.command {
        Command::Cleanup { pr, domains, .. } => {
            assert_eq!(pr, 7);
            assert_eq!(domains.domain_api_url, "https://domains.example.com");
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[tokio::test]
async fn test_report_writes_missing_notice_without_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let args = ReportArgs {
        input: dir.path().join("absent.json"),
        comment: false,
        pr: None,
        run_url: None,
        repository: None,
        github_token: None,
        github_api_url: DEFAULT_API_URL.to_string(),
    };

    assert!(report(args).await.is_ok());
}
