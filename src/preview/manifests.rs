//! Manifest discovery, rendering and parsing
//!
//! A service ships either a kustomize overlay (`overlays/<overlay>`) or a
//! plain base directory (`base/*.yaml`). The overlay wins when both exist.
//! Community references are a single flat `<name>.yaml` file.
//! Hardcoded namespaces are stripped so the target namespace is injected at
//! apply time.

use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::FailureKind;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("no overlay or base manifests under {0}")]
    Missing(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("kustomize build failed for {path}: {message}")]
    Render { path: String, message: String },

    #[error("failed to parse {origin}: {message}")]
    Parse { origin: String, message: String },

    #[error("invalid manifest in {origin}: {message}")]
    Invalid { origin: String, message: String },
}

impl ManifestError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ManifestError::Missing(_) => FailureKind::ManifestMissing,
            ManifestError::Invalid { .. } => FailureKind::ValidationFailed,
            ManifestError::Io { .. } | ManifestError::Render { .. } | ManifestError::Parse { .. } => {
                FailureKind::ManifestParseError
            }
        }
    }
}

/// Where a service's manifests come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    /// Kustomize overlay directory
    Overlay(PathBuf),
    /// Directory of plain manifests applied file by file
    Base(PathBuf),
    /// Single manifest file applied as one unit
    File(PathBuf),
    Missing,
}

impl ManifestSource {
    /// Prefer `<dir>/overlays/<overlay>` over `<dir>/base`
    pub fn resolve(service_dir: &Path, overlay: &str) -> Self {
        let overlay_dir = service_dir.join("overlays").join(overlay);
        if has_kustomization(&overlay_dir) {
            return ManifestSource::Overlay(overlay_dir);
        }

        let base_dir = service_dir.join("base");
        match list_manifest_files(&base_dir) {
            Ok(files) if !files.is_empty() => ManifestSource::Base(base_dir),
            _ => ManifestSource::Missing,
        }
    }

    /// `<dir>/<name>.yaml`, then `<dir>/<name>.yml`
    pub fn resolve_file(dir: &Path, name: &str) -> Self {
        ["yaml", "yml"]
            .iter()
            .map(|ext| dir.join(format!("{name}.{ext}")))
            .find(|path| path.is_file())
            .map_or(ManifestSource::Missing, ManifestSource::File)
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, ManifestSource::Missing)
    }
}

/// A parsed, namespace-free Kubernetes object ready for apply
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestObject {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub body: Value,
}

impl ManifestObject {
    /// `(group, version)` from `apiVersion`; core group is empty
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version.as_str()),
        }
    }
}

/// Objects applied together; one per base file, a single one for an overlay or file
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestUnit {
    pub origin: String,
    pub objects: Vec<ManifestObject>,
}

/// Everything loaded for one service
#[derive(Debug, Clone)]
pub struct ManifestBundle {
    pub source: ManifestSource,
    pub units: Vec<ManifestUnit>,
    /// Rendered overlay output, when the source is an overlay
    pub rendered: Option<String>,
    /// Raw base manifest text, when a base directory exists
    pub base_text: Option<String>,
}

impl ManifestBundle {
    pub fn objects(&self) -> impl Iterator<Item = &ManifestObject> {
        self.units.iter().flat_map(|u| u.objects.iter())
    }

    /// Manifest texts for static Service lookup, most specific first
    pub fn fallback_texts(&self) -> Vec<&str> {
        self.rendered
            .iter()
            .chain(self.base_text.iter())
            .map(String::as_str)
            .collect()
    }
}

/// Load, render and sanitize a service's manifests
pub async fn load_manifests(
    source: &ManifestSource,
    kustomize_bin: &str,
) -> Result<ManifestBundle, ManifestError> {
    match source {
        ManifestSource::Missing => Err(ManifestError::Missing("service directory".to_string())),
        ManifestSource::Overlay(dir) => {
            let rendered = render_overlay(kustomize_bin, dir).await?;
            let origin = dir.display().to_string();
            let objects = sanitize(&origin, parse_documents(&origin, &rendered)?)?;

            // Raw base text is a secondary source for Service lookup
            let base_text = dir
                .parent()
                .and_then(Path::parent)
                .map(|service_dir| service_dir.join("base"))
                .and_then(|base| read_base_text(&base).ok())
                .filter(|t| !t.trim().is_empty());

            Ok(ManifestBundle {
                source: source.clone(),
                units: vec![ManifestUnit { origin, objects }],
                rendered: Some(rendered),
                base_text,
            })
        }
        ManifestSource::Base(dir) => {
            let mut units = Vec::new();
            let mut texts = Vec::new();
            for path in list_manifest_files(dir)? {
                let origin = path.display().to_string();
                let raw = read_file(&path)?;
                let objects = sanitize(&origin, parse_documents(&origin, &raw)?)?;
                if objects.is_empty() {
                    debug!(file = %origin, "Skipping manifest file without objects");
                    continue;
                }
                texts.push(raw);
                units.push(ManifestUnit { origin, objects });
            }

            Ok(ManifestBundle {
                source: source.clone(),
                units,
                rendered: None,
                base_text: Some(texts.join("\n---\n")),
            })
        }
        ManifestSource::File(path) => {
            let origin = path.display().to_string();
            let raw = read_file(path)?;
            let objects = sanitize(&origin, parse_documents(&origin, &raw)?)?;
            let units = if objects.is_empty() {
                Vec::new()
            } else {
                vec![ManifestUnit { origin, objects }]
            };

            Ok(ManifestBundle {
                source: source.clone(),
                units,
                rendered: None,
                base_text: Some(raw),
            })
        }
    }
}

/// Run `kustomize build <dir>` and return the rendered YAML
pub async fn render_overlay(kustomize_bin: &str, dir: &Path) -> Result<String, ManifestError> {
    info!(path = %dir.display(), "Running kustomize build");

    let output = Command::new(kustomize_bin)
        .arg("build")
        .arg(dir)
        .output()
        .await
        .map_err(|e| ManifestError::Render {
            path: dir.display().to_string(),
            message: format!("failed to execute {kustomize_bin}: {e}"),
        })?;

    if !output.status.success() {
        return Err(ManifestError::Render {
            path: dir.display().to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    String::from_utf8(output.stdout).map_err(|e| ManifestError::Render {
        path: dir.display().to_string(),
        message: format!("output is not UTF-8: {e}"),
    })
}

/// Split multi-document YAML into JSON values, skipping empty documents
pub fn parse_documents(origin: &str, text: &str) -> Result<Vec<Value>, ManifestError> {
    let mut docs = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| ManifestError::Parse {
            origin: origin.to_string(),
            message: e.to_string(),
        })?;
        if value.is_null() {
            continue;
        }
        let json = serde_json::to_value(&value).map_err(|e| ManifestError::Parse {
            origin: origin.to_string(),
            message: e.to_string(),
        })?;
        docs.push(json);
    }
    Ok(docs)
}

/// Check required fields, drop Namespace objects and strip `metadata.namespace`
pub fn sanitize(origin: &str, docs: Vec<Value>) -> Result<Vec<ManifestObject>, ManifestError> {
    let invalid = |message: String| ManifestError::Invalid {
        origin: origin.to_string(),
        message,
    };

    let mut objects = Vec::with_capacity(docs.len());
    for (index, mut body) in docs.into_iter().enumerate() {
        if !body.is_object() {
            return Err(invalid(format!("document {index} is not a mapping")));
        }
        let api_version = string_field(&body, &["apiVersion"])
            .ok_or_else(|| invalid(format!("document {index} has no apiVersion")))?;
        let kind = string_field(&body, &["kind"])
            .ok_or_else(|| invalid(format!("document {index} has no kind")))?;
        let name = string_field(&body, &["metadata", "name"])
            .ok_or_else(|| invalid(format!("{kind} (document {index}) has no metadata.name")))?;

        if kind == "Namespace" && api_version == "v1" {
            warn!(origin, namespace = %name, "Dropping Namespace object from preview manifests");
            continue;
        }

        if let Some(metadata) = body.get_mut("metadata").and_then(Value::as_object_mut) {
            if metadata.remove("namespace").is_some() {
                debug!(origin, kind = %kind, name = %name, "Stripped hardcoded namespace");
            }
        }

        objects.push(ManifestObject {
            api_version,
            kind,
            name,
            body,
        });
    }
    Ok(objects)
}

fn string_field(body: &Value, path: &[&str]) -> Option<String> {
    let mut current = body;
    for key in path {
        current = current.get(*key)?;
    }
    current
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn has_kustomization(dir: &Path) -> bool {
    ["kustomization.yaml", "kustomization.yml", "Kustomization"]
        .iter()
        .any(|f| dir.join(f).is_file())
}

/// Sorted `*.yaml`/`*.yml` files in `dir`, excluding kustomization files
pub fn list_manifest_files(dir: &Path) -> Result<Vec<PathBuf>, ManifestError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ManifestError::Io {
        path: dir.display().to_string(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml")
        })
        .filter(|p| {
            p.file_stem()
                .is_some_and(|stem| stem != "kustomization")
        })
        .collect();
    files.sort();
    Ok(files)
}

fn read_file(path: &Path) -> Result<String, ManifestError> {
    std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn read_base_text(dir: &Path) -> Result<String, ManifestError> {
    let texts = list_manifest_files(dir)?
        .iter()
        .map(|p| read_file(p))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(texts.join("\n---\n"))
}

#[cfg(test)]
#[path = "manifests_test.rs"]
mod tests;
