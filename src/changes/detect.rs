use super::{ServiceId, COMMUNITY_CATEGORY};
use crate::config::RepoLayout;
use std::collections::BTreeSet;
use std::path::{Component, Path};
use tracing::debug;

/// Map changed file paths to a sorted, deduplicated list of services
///
/// Paths are repository-relative, as printed by `git diff --name-only`.
/// - Under the services root, the first two directories below the root name
///   the service; files directly in a category directory are ignored.
/// - Directly under the community root, the file stem names the service.
///
/// An empty result means nothing to deploy; it is not an error.
pub fn detect_services<I, P>(paths: I, layout: &RepoLayout) -> Vec<ServiceId>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut services = BTreeSet::new();

    for path in paths {
        let segments = normal_segments(path.as_ref());
        if segments.iter().any(|s| s.starts_with('.')) {
            continue;
        }

        match segments.as_slice() {
            [root, category, name, _, ..] if *root == layout.services_root => {
                services.insert(ServiceId::new(*category, *name));
            }
            [root, file] if *root == layout.community_root => {
                if let Some(stem) = Path::new(file).file_stem().and_then(|s| s.to_str()) {
                    services.insert(ServiceId::new(COMMUNITY_CATEGORY, stem));
                }
            }
            _ => {
                debug!(path = %path.as_ref().display(), "Path outside service roots");
            }
        }
    }

    services.into_iter().collect()
}

fn normal_segments(path: &Path) -> Vec<&str> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect()
}
