#![allow(clippy::unwrap_used)] // Tests can use unwrap for brevity

use super::*;
use std::path::Path;

const DEPLOYMENT: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: excalidraw
  namespace: tools
spec:
  replicas: 1
"#;

const SERVICE: &str = r#"
apiVersion: v1
kind: Service
metadata:
  name: excalidraw
spec:
  ports:
  - port: 8080
"#;

fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

#[test]
fn test_resolve_prefers_overlay() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "base/deployment.yaml", DEPLOYMENT);
    write_file(dir.path(), "overlays/preview/kustomization.yaml", "resources: [../../base]\n");

    let source = ManifestSource::resolve(dir.path(), "preview");
    assert_eq!(
        source,
        ManifestSource::Overlay(dir.path().join("overlays/preview"))
    );
}

#[test]
fn test_resolve_falls_back_to_base() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "base/deployment.yaml", DEPLOYMENT);
    // Overlay for another environment does not count
    write_file(dir.path(), "overlays/prod/kustomization.yaml", "resources: []\n");

    let source = ManifestSource::resolve(dir.path(), "preview");
    assert_eq!(source, ManifestSource::Base(dir.path().join("base")));
}

#[test]
fn test_resolve_missing_when_nothing_usable() {
    let dir = tempfile::tempdir().unwrap();
    assert!(ManifestSource::resolve(dir.path(), "preview").is_missing());

    // Base directory with only a kustomization file is not a manifest set
    write_file(dir.path(), "base/kustomization.yaml", "resources: []\n");
    assert!(ManifestSource::resolve(dir.path(), "preview").is_missing());
}

#[test]
fn test_parse_documents_skips_empty_documents() {
    let text = format!("---\n{DEPLOYMENT}\n---\n\n---\n{SERVICE}");
    let docs = parse_documents("test", &text).unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[1]["kind"], "Service");
}

#[test]
fn test_parse_documents_reports_yaml_errors() {
    let err = parse_documents("broken.yaml", "kind: [unclosed").unwrap_err();
    assert!(matches!(err, ManifestError::Parse { .. }));
    assert_eq!(err.failure_kind(), FailureKind::ManifestParseError);
}

#[test]
fn test_sanitize_strips_namespace_and_drops_namespace_objects() {
    let text = format!(
        "{DEPLOYMENT}\n---\napiVersion: v1\nkind: Namespace\nmetadata:\n  name: tools\n"
    );
    let objects = sanitize("test", parse_documents("test", &text).unwrap()).unwrap();

    assert_eq!(objects.len(), 1);
    let deployment = &objects[0];
    assert_eq!(deployment.kind, "Deployment");
    assert_eq!(deployment.name, "excalidraw");
    assert!(deployment.body["metadata"].get("namespace").is_none());
    assert_eq!(deployment.group_version(), ("apps", "v1"));
}

#[test]
fn test_sanitize_rejects_missing_fields() {
    let docs = parse_documents("x", "apiVersion: v1\nkind: ConfigMap\nmetadata: {}\n").unwrap();
    let err = sanitize("x", docs).unwrap_err();
    assert!(matches!(err, ManifestError::Invalid { .. }));
    assert_eq!(err.failure_kind(), FailureKind::ValidationFailed);

    let docs = parse_documents("x", "- a\n- b\n").unwrap();
    assert!(sanitize("x", docs).is_err());
}

#[test]
fn test_core_group_version() {
    let objects = sanitize("x", parse_documents("x", SERVICE).unwrap()).unwrap();
    assert_eq!(objects[0].group_version(), ("", "v1"));
}

#[tokio::test]
async fn test_load_base_creates_one_unit_per_file() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "base/a-deployment.yaml", DEPLOYMENT);
    write_file(dir.path(), "base/b-service.yml", SERVICE);
    write_file(dir.path(), "base/kustomization.yaml", "resources: []\n");
    write_file(dir.path(), "base/notes.txt", "ignored");

    let source = ManifestSource::resolve(dir.path(), "preview");
    let bundle = load_manifests(&source, "kustomize").await.unwrap();

    assert_eq!(bundle.units.len(), 2);
    assert!(bundle.units[0].origin.ends_with("a-deployment.yaml"));
    assert!(bundle.units[1].origin.ends_with("b-service.yml"));
    assert!(bundle.rendered.is_none());
    assert_eq!(bundle.fallback_texts().len(), 1);
    assert!(bundle.fallback_texts()[0].contains("kind: Service"));
}

#[tokio::test]
async fn test_load_reports_render_failure() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "overlays/preview/kustomization.yaml", "resources: []\n");

    let source = ManifestSource::resolve(dir.path(), "preview");
    let err = load_manifests(&source, "/nonexistent/kustomize")
        .await
        .unwrap_err();

    assert!(matches!(err, ManifestError::Render { .. }));
    assert_eq!(err.failure_kind(), FailureKind::ManifestParseError);
}

#[cfg(unix)]
#[tokio::test]
async fn test_load_overlay_uses_rendered_output() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "base/deployment.yaml", DEPLOYMENT);
    write_file(dir.path(), "overlays/preview/kustomization.yaml", "resources: []\n");
    write_file(
        dir.path(),
        "overlays/preview/rendered.yaml",
        &format!("{DEPLOYMENT}\n---\n{SERVICE}"),
    );

    // Stand-in for `kustomize build <dir>`
    let script = dir.path().join("fake-kustomize");
    std::fs::write(&script, "#!/bin/sh\ncat \"$2/rendered.yaml\"\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let source = ManifestSource::resolve(dir.path(), "preview");
    let bundle = load_manifests(&source, script.to_str().unwrap())
        .await
        .unwrap();

    assert_eq!(bundle.units.len(), 1, "Overlay is applied as one unit");
    assert_eq!(bundle.objects().count(), 2);
    assert!(bundle
        .objects()
        .all(|o| o.body["metadata"].get("namespace").is_none()));

    let texts = bundle.fallback_texts();
    assert_eq!(texts.len(), 2, "Rendered text first, then base text");
    assert!(texts[0].contains("kind: Service"));
    assert!(!texts[1].contains("kind: Service"));
}

#[test]
fn test_resolve_file_prefers_yaml_then_yml() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "uptime-kuma.yml", DEPLOYMENT);

    assert_eq!(
        ManifestSource::resolve_file(dir.path(), "uptime-kuma"),
        ManifestSource::File(dir.path().join("uptime-kuma.yml"))
    );

    write_file(dir.path(), "uptime-kuma.yaml", DEPLOYMENT);
    assert_eq!(
        ManifestSource::resolve_file(dir.path(), "uptime-kuma"),
        ManifestSource::File(dir.path().join("uptime-kuma.yaml"))
    );
    assert!(ManifestSource::resolve_file(dir.path(), "gatus").is_missing());
}

#[tokio::test]
async fn test_load_single_file_is_one_unit() {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "uptime-kuma.yaml",
        &format!("{DEPLOYMENT}\n---\n{SERVICE}"),
    );

    let source = ManifestSource::resolve_file(dir.path(), "uptime-kuma");
    let bundle = load_manifests(&source, "kustomize").await.unwrap();

    assert_eq!(bundle.units.len(), 1);
    assert_eq!(bundle.objects().count(), 2);
    assert!(bundle.rendered.is_none());
    let texts = bundle.fallback_texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("kind: Service"));
}
