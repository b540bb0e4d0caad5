//! Dependency Gate: decides whether a named artifact needs rebuilding by
//! comparing stored fingerprints against the current filesystem state.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::model::{Artifact, ArtifactDependency, StoreDocument};
use crate::store::get_latest_artifact;

/// The outcome of `should_rebuild`: whether to rebuild, and a one-line reason
/// suitable for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildDecision {
    pub rebuild: bool,
    pub reason: String,
}

impl RebuildDecision {
    fn rebuild(reason: impl Into<String>) -> Self {
        Self { rebuild: true, reason: reason.into() }
    }

    fn skip() -> Self {
        Self { rebuild: false, reason: String::new() }
    }
}

const MANIFEST_CANDIDATES: &[&str] = &["go.mod", "Cargo.toml", "package.json"];

/// The 8-step decision: force flag, missing fingerprint, missing inputs, missing
/// artifact, source mtimes newer than the build, manifest mtimes newer than the build,
/// changed input set, or changed command — any one of them triggers a rebuild.
pub fn should_rebuild(name: &str, store: &StoreDocument, force: bool) -> RebuildDecision {
    if force {
        return RebuildDecision::rebuild("force flag set");
    }

    let artifact = match get_latest_artifact(store, name) {
        Some(a) => a,
        None => return RebuildDecision::rebuild("no previous build"),
    };

    match fs::metadata(&artifact.location) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return RebuildDecision::rebuild("artifact file missing");
        }
        Err(e) => {
            return RebuildDecision::rebuild(format!("cannot access artifact file: {e}"));
        }
    }

    if artifact.dependencies.is_empty() {
        return RebuildDecision::rebuild("dependencies not tracked");
    }

    if artifact.dependency_detector_engine.is_empty() {
        return RebuildDecision::rebuild("dependency detector not configured");
    }

    if let Some(decision) = check_file_dependencies(artifact) {
        return decision;
    }

    warn_if_external_package_untracked(artifact);

    RebuildDecision::skip()
}

fn check_file_dependencies(artifact: &Artifact) -> Option<RebuildDecision> {
    for dep in &artifact.dependencies {
        let ArtifactDependency::File { file_path, timestamp } = dep else {
            continue;
        };

        let metadata = match fs::metadata(file_path) {
            Ok(m) => m,
            Err(_) => return Some(RebuildDecision::rebuild(format!("dependency file {file_path} missing"))),
        };

        let stored: DateTime<Utc> = match DateTime::parse_from_rfc3339(timestamp) {
            Ok(t) => t.with_timezone(&Utc),
            Err(_) => {
                return Some(RebuildDecision::rebuild(format!(
                    "dependency {file_path} timestamp parse error"
                )));
            }
        };

        let mtime = match metadata.modified() {
            Ok(t) => DateTime::<Utc>::from(t),
            Err(_) => {
                return Some(RebuildDecision::rebuild(format!(
                    "dependency {file_path} timestamp parse error"
                )));
            }
        };

        if stored != mtime {
            return Some(RebuildDecision::rebuild(format!("dependency {file_path} modified")));
        }
    }
    None
}

/// Step 7: external packages are never re-detected; freshness is implied by
/// tracking the project manifest as a file dependency. Logs a warning (does not
/// trigger a rebuild) if no tracked file dependency looks like a manifest.
fn warn_if_external_package_untracked(artifact: &Artifact) {
    let has_external = artifact
        .dependencies
        .iter()
        .any(|d| matches!(d, ArtifactDependency::ExternalPackage { .. }));
    if !has_external {
        return;
    }

    let has_manifest_file_dep = artifact.dependencies.iter().any(|d| {
        d.file_path()
            .map(|p| MANIFEST_CANDIDATES.iter().any(|m| Path::new(p).ends_with(m)))
            .unwrap_or(false)
    });

    if !has_manifest_file_dep {
        tracing::warn!(
            artifact = %artifact.name,
            "externalPackage dependencies present with no tracked project manifest file dependency"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::add_or_update_artifact;
    use std::fs::File;
    use std::io;
    use std::time::SystemTime;

    fn rfc3339(t: SystemTime) -> String {
        DateTime::<Utc>::from(t).to_rfc3339()
    }

    fn touch(path: &Path) -> io::Result<SystemTime> {
        File::create(path)?;
        Ok(fs::metadata(path)?.modified()?)
    }

    #[test]
    fn forces_rebuild_when_force_flag_set() {
        let store = StoreDocument::default();
        let decision = should_rebuild("app", &store, true);
        assert!(decision.rebuild);
        assert_eq!(decision.reason, "force flag set");
    }

    #[test]
    fn rebuilds_when_no_prior_artifact() {
        let store = StoreDocument::default();
        let decision = should_rebuild("app", &store, false);
        assert!(decision.rebuild);
        assert_eq!(decision.reason, "no previous build");
    }

    #[test]
    fn skips_when_everything_matches() {
        let dir = tempfile::tempdir().unwrap();
        let bin_path = dir.path().join("app");
        let dep_path = dir.path().join("main.go");
        File::create(&bin_path).unwrap();
        let dep_mtime = touch(&dep_path).unwrap();

        let mut store = StoreDocument::default();
        add_or_update_artifact(
            &mut store,
            Artifact {
                name: "app".into(),
                artifact_type: "binary".into(),
                location: bin_path.to_string_lossy().to_string(),
                timestamp: Utc::now().to_rfc3339(),
                version: "v1".into(),
                dependencies: vec![ArtifactDependency::File {
                    file_path: dep_path.to_string_lossy().to_string(),
                    timestamp: rfc3339(dep_mtime),
                }],
                dependency_detector_engine: "go://go-dependency-detector".into(),
                dependency_detector_spec: serde_json::Value::Null,
            },
        );

        let decision = should_rebuild("app", &store, false);
        assert!(!decision.rebuild);
    }

    #[test]
    fn rebuilds_when_dependency_file_modified() {
        let dir = tempfile::tempdir().unwrap();
        let bin_path = dir.path().join("app");
        let dep_path = dir.path().join("main.go");
        File::create(&bin_path).unwrap();
        touch(&dep_path).unwrap();

        let mut store = StoreDocument::default();
        add_or_update_artifact(
            &mut store,
            Artifact {
                name: "app".into(),
                artifact_type: "binary".into(),
                location: bin_path.to_string_lossy().to_string(),
                timestamp: Utc::now().to_rfc3339(),
                version: "v1".into(),
                dependencies: vec![ArtifactDependency::File {
                    file_path: dep_path.to_string_lossy().to_string(),
                    timestamp: "2020-01-01T00:00:00Z".into(),
                }],
                dependency_detector_engine: "go://go-dependency-detector".into(),
                dependency_detector_spec: serde_json::Value::Null,
            },
        );

        let decision = should_rebuild("app", &store, false);
        assert!(decision.rebuild);
        assert!(decision.reason.contains("modified"));
    }

    #[test]
    fn rebuilds_when_artifact_location_missing() {
        let mut store = StoreDocument::default();
        add_or_update_artifact(
            &mut store,
            Artifact {
                name: "app".into(),
                artifact_type: "binary".into(),
                location: "/nonexistent/path/app".into(),
                timestamp: Utc::now().to_rfc3339(),
                version: "v1".into(),
                dependencies: vec![ArtifactDependency::ExternalPackage {
                    external_package: "x".into(),
                }],
                dependency_detector_engine: "go://go-dependency-detector".into(),
                dependency_detector_spec: serde_json::Value::Null,
            },
        );
        let decision = should_rebuild("app", &store, false);
        assert!(decision.rebuild);
        assert_eq!(decision.reason, "artifact file missing");
    }

    #[test]
    fn rebuilds_when_dependencies_not_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let bin_path = dir.path().join("app");
        File::create(&bin_path).unwrap();

        let mut store = StoreDocument::default();
        add_or_update_artifact(
            &mut store,
            Artifact {
                name: "app".into(),
                artifact_type: "binary".into(),
                location: bin_path.to_string_lossy().to_string(),
                timestamp: Utc::now().to_rfc3339(),
                version: "v1".into(),
                dependencies: Vec::new(),
                dependency_detector_engine: "go://go-dependency-detector".into(),
                dependency_detector_spec: serde_json::Value::Null,
            },
        );
        let decision = should_rebuild("app", &store, false);
        assert!(decision.rebuild);
        assert_eq!(decision.reason, "dependencies not tracked");
    }
}
