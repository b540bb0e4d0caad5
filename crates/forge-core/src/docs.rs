//! Docs Aggregator.
//!
//! `docs list [engine|all]` and `docs get <name>` enumerate documentation pages
//! published by engines, in one of two discovery modes selected by
//! `FORGE_RUN_LOCAL_ENABLED`: a local `docs/<engine>/*.md` tree, or a
//! live `docs-list`/`docs-get` round-trip through the Engine Transport. This is
//! a read path with no store side effect, so per-engine failures are
//! aggregated rather than aborting the whole enumeration (mirroring the
//! Config Validator's discipline, not the Build Orchestrator's).

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::engine::resolver::{self, ResolvedEngine};
use crate::engine::transport;
use crate::error::Result;
use crate::spec::ProjectSpec;

pub const LOCAL_ENABLED_VAR: &str = "FORGE_RUN_LOCAL_ENABLED";

/// One enumerated doc page, not yet fetched.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, JsonSchema)]
pub struct DocSummary {
    pub engine: String,
    pub name: String,
}

/// A fetched doc page's full body.
#[derive(Clone, Debug, Serialize, JsonSchema)]
pub struct DocPage {
    pub engine: String,
    pub name: String,
    pub body: String,
}

/// A non-fatal per-engine failure recorded during `docs list`.
#[derive(Clone, Debug, Serialize, JsonSchema)]
pub struct DocsError {
    pub engine: String,
    pub message: String,
}

#[derive(Default, Debug)]
pub struct DocsListResult {
    pub pages: Vec<DocSummary>,
    pub errors: Vec<DocsError>,
}

/// Returns `true` when `FORGE_RUN_LOCAL_ENABLED=true` selects local-tree discovery.
pub fn local_mode_enabled() -> bool {
    std::env::var(LOCAL_ENABLED_VAR)
        .map(|v| v == "true")
        .unwrap_or(false)
}

/// Returns every engine name referenced by the project, in the same first-occurrence
/// dedup order as the Config Validator's reference collector, but keyed by the
/// resolved engine's short name rather than the full URI.
fn referenced_engine_names(project: &ProjectSpec) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut names = Vec::new();

    let mut push = |uri: &str, seen: &mut BTreeSet<String>, names: &mut Vec<String>| {
        let (normalized, warning) = resolver::normalize_uri(uri);
        if let Some(message) = warning {
            tracing::warn!(%message, "deprecated engine uri rewritten");
        }
        let name = engine_short_name(&normalized);
        if seen.insert(name.clone()) {
            names.push(name);
        }
    };

    for build in &project.build {
        push(&build.engine, &mut seen, &mut names);
    }
    for test in &project.test {
        push(&test.runner, &mut seen, &mut names);
        if let Some(testenv) = &test.testenv {
            if !testenv.is_empty() && testenv != "noop" {
                push(testenv, &mut seen, &mut names);
            }
        }
    }
    names
}

/// Derives a short, directory-safe name for an engine URI: the last path segment
/// of its tail, same rule as the Engine Resolver's `go://` collapse.
fn engine_short_name(uri: &str) -> String {
    match uri.split_once("://") {
        Some((_, tail)) => tail.rsplit('/').next().unwrap_or(tail).to_string(),
        None => uri.to_string(),
    }
}

fn docs_root(spec_dir: &Path) -> std::path::PathBuf {
    spec_dir.join("docs")
}

fn list_docs_local(project: &ProjectSpec, spec_dir: &Path, filter: Option<&str>) -> DocsListResult {
    let mut result = DocsListResult::default();
    let root = docs_root(spec_dir);

    for engine in referenced_engine_names(project) {
        if let Some(filter) = filter {
            if filter != engine {
                continue;
            }
        }
        let engine_dir = root.join(&engine);
        let entries = match fs::read_dir(&engine_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                result.errors.push(DocsError { engine: engine.clone(), message: e.to_string() });
                continue;
            }
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                result.pages.push(DocSummary { engine: engine.clone(), name: stem.to_string() });
            }
        }
    }
    result.pages.sort();
    result
}

fn get_doc_local(project: &ProjectSpec, spec_dir: &Path, name: &str) -> Result<DocPage> {
    let root = docs_root(spec_dir);
    let (engine_filter, page_name) = match name.split_once('/') {
        Some((engine, page)) => (Some(engine.to_string()), page.to_string()),
        None => (None, name.to_string()),
    };

    for engine in referenced_engine_names(project) {
        if let Some(filter) = &engine_filter {
            if *filter != engine {
                continue;
            }
        }
        let path = root.join(&engine).join(format!("{page_name}.md"));
        if let Ok(body) = fs::read_to_string(&path) {
            return Ok(DocPage { engine, name: page_name, body });
        }
    }

    Err(crate::error::ForgeError::NotFound(format!("doc page `{name}` not found")))
}

#[derive(Debug, Deserialize, Default)]
struct DocsListPayload {
    #[serde(default)]
    pages: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DocsGetPayload {
    #[serde(default)]
    body: String,
}

fn list_docs_via_engines(project: &ProjectSpec, filter: Option<&str>, forge_version: &str) -> DocsListResult {
    let mut result = DocsListResult::default();

    for engine_uri in engine_uris_for_docs(project) {
        let name = engine_short_name(&engine_uri);
        if let Some(filter) = filter {
            if filter != name {
                continue;
            }
        }

        let resolved = match resolver::resolve(&engine_uri, project, forge_version) {
            Ok(ResolvedEngine::Single(cmd)) => cmd,
            Ok(ResolvedEngine::Pipeline(_)) => {
                result.errors.push(DocsError {
                    engine: name,
                    message: "multi-stage builders do not publish docs directly".into(),
                });
                continue;
            }
            Err(e) => {
                result.errors.push(DocsError { engine: name, message: e.to_string() });
                continue;
            }
        };

        let outcome = match transport::call_tool(&resolved, Path::new("."), "docs-list", serde_json::json!({})) {
            Ok(o) => o,
            Err(e) => {
                result.errors.push(DocsError { engine: name, message: e.to_string() });
                continue;
            }
        };
        if outcome.is_error {
            result.errors.push(DocsError { engine: name, message: outcome.text_blocks.join("\n") });
            continue;
        }

        let payload: DocsListPayload = match outcome.payload().and_then(|p| {
            serde_json::from_value(p).map_err(|e| crate::error::ForgeError::Engine(e.to_string()))
        }) {
            Ok(p) => p,
            Err(e) => {
                result.errors.push(DocsError { engine: name, message: e.to_string() });
                continue;
            }
        };

        for page in payload.pages {
            result.pages.push(DocSummary { engine: name.clone(), name: page });
        }
    }

    result.pages.sort();
    result
}

fn get_doc_via_engines(project: &ProjectSpec, name: &str, forge_version: &str) -> Result<DocPage> {
    let (engine_filter, page_name) = match name.split_once('/') {
        Some((engine, page)) => (Some(engine.to_string()), page.to_string()),
        None => (None, name.to_string()),
    };

    for engine_uri in engine_uris_for_docs(project) {
        let engine_name = engine_short_name(&engine_uri);
        if let Some(filter) = &engine_filter {
            if *filter != engine_name {
                continue;
            }
        }
        let resolved = match resolver::resolve(&engine_uri, project, forge_version)? {
            ResolvedEngine::Single(cmd) => cmd,
            ResolvedEngine::Pipeline(_) => continue,
        };
        let arguments = serde_json::json!({ "name": page_name });
        let outcome = match transport::call_tool(&resolved, Path::new("."), "docs-get", arguments) {
            Ok(o) if !o.is_error => o,
            _ => continue,
        };
        if let Ok(payload) = outcome.payload() {
            if let Ok(parsed) = serde_json::from_value::<DocsGetPayload>(payload) {
                return Ok(DocPage { engine: engine_name, name: page_name, body: parsed.body });
            }
        }
    }

    Err(crate::error::ForgeError::NotFound(format!("doc page `{name}` not found")))
}

fn engine_uris_for_docs(project: &ProjectSpec) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut uris = Vec::new();
    for build in &project.build {
        if seen.insert(build.engine.clone()) {
            uris.push(build.engine.clone());
        }
    }
    for test in &project.test {
        if seen.insert(test.runner.clone()) {
            uris.push(test.runner.clone());
        }
        if let Some(testenv) = &test.testenv {
            if !testenv.is_empty() && testenv != "noop" && seen.insert(testenv.clone()) {
                uris.push(testenv.clone());
            }
        }
    }
    uris
}

/// `docs list [engine|all]`: `filter=None` lists every engine's docs (`all`);
/// `Some(name)` restricts to one engine's docs.
pub fn list_docs(project: &ProjectSpec, spec_dir: &Path, filter: Option<&str>, forge_version: &str) -> DocsListResult {
    if local_mode_enabled() {
        list_docs_local(project, spec_dir, filter)
    } else {
        list_docs_via_engines(project, filter, forge_version)
    }
}

/// `docs get <name>`: `name` may be bare (searched across every referenced
/// engine, first match wins) or namespaced as `engine/name`.
pub fn get_doc(project: &ProjectSpec, spec_dir: &Path, name: &str, forge_version: &str) -> Result<DocPage> {
    if local_mode_enabled() {
        get_doc_local(project, spec_dir, name)
    } else {
        get_doc_via_engines(project, name, forge_version)
    }
}
