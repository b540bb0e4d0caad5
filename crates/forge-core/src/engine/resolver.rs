//! Engine Resolver: turns a `scheme://tail` URI into a runnable command, or
//! flags a multi-stage `Builder` pipeline for the caller to dispatch separately.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::error::{ForgeError, Result};
use crate::spec::{BuilderStage, EngineConfig, ProjectSpec};
use crate::validation::parse_engine_uri;

/// The Go module path resolved `go://` URIs are run from.
pub const FORGE_GO_MODULE: &str = "github.com/alexandremahdhaoui/forge/cmd";

/// A fully resolved, directly-spawnable command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub env_file: Option<String>,
    pub work_dir: Option<String>,
}

impl ResolvedCommand {
    fn simple(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: BTreeMap::new(),
            env_file: None,
            work_dir: None,
        }
    }
}

/// The result of resolving a URI: either a single command, or a multi-stage pipeline
/// the caller must dispatch through the Build Orchestrator's multi-engine path.
#[derive(Clone, Debug)]
pub enum ResolvedEngine {
    Single(ResolvedCommand),
    Pipeline(Vec<BuilderStage>),
}

fn deprecated_alias_table() -> &'static [(&'static str, &'static str)] {
    static TABLE: OnceLock<Vec<(&'static str, &'static str)>> = OnceLock::new();
    TABLE
        .get_or_init(|| {
            vec![
                ("go://build-container", "go://container-build"),
                ("go://test-kind", "go://testenv-kind"),
            ]
        })
        .as_slice()
}

/// Rewrites a URI through the fixed deprecated-alias table, returning the normalized
/// URI and an optional human-readable deprecation warning. Both the build path and
/// the config-validate path must route through this single helper.
pub fn normalize_uri(uri: &str) -> (String, Option<String>) {
    for (old, new) in deprecated_alias_table() {
        if uri == *old {
            return (
                new.to_string(),
                Some(format!("engine uri `{old}` is deprecated; use `{new}`")),
            );
        }
    }
    (uri.to_string(), None)
}

/// Resolves `uri` against the project spec's declared engines and the forge binary's
/// own version tag.
pub fn resolve(uri: &str, spec: &ProjectSpec, forge_version: &str) -> Result<ResolvedEngine> {
    let (uri, warning) = normalize_uri(uri);
    if let Some(message) = warning {
        tracing::warn!(%message, "deprecated engine uri rewritten");
    }
    let (scheme, tail) = parse_engine_uri(&uri).map_err(ForgeError::Engine)?;

    match scheme {
        "go" => Ok(ResolvedEngine::Single(resolve_go(tail, forge_version))),
        "alias" => resolve_alias(tail, spec, forge_version),
        "shell" => Ok(ResolvedEngine::Single(resolve_shell(tail))),
        other => Err(ForgeError::Engine(format!("unknown engine scheme `{other}`"))),
    }
}

fn resolve_go(tail: &str, forge_version: &str) -> ResolvedCommand {
    let name = tail.rsplit('/').next().unwrap_or(tail);
    ResolvedCommand::simple(
        "go",
        vec![
            "run".to_string(),
            format!("{FORGE_GO_MODULE}/{name}@{forge_version}"),
        ],
    )
}

fn resolve_shell(tail: &str) -> ResolvedCommand {
    ResolvedCommand::simple("sh", vec!["-c".to_string(), tail.to_string()])
}

fn resolve_alias(name: &str, spec: &ProjectSpec, forge_version: &str) -> Result<ResolvedEngine> {
    let engine = spec
        .engines
        .get(name)
        .ok_or_else(|| ForgeError::Engine(format!("unknown engine alias `{name}`")))?;

    match engine {
        EngineConfig::Uri(uri) => resolve(uri, spec, forge_version),
        EngineConfig::Builder { stages } if stages.len() == 1 => {
            Ok(ResolvedEngine::Single(stage_to_command(&stages[0])))
        }
        EngineConfig::Builder { stages } => Ok(ResolvedEngine::Pipeline(stages.clone())),
    }
}

fn stage_to_command(stage: &BuilderStage) -> ResolvedCommand {
    ResolvedCommand {
        command: stage.command.clone(),
        args: stage.args.clone(),
        env: stage.env.clone(),
        env_file: stage.env_file.clone(),
        work_dir: stage.work_dir.clone(),
    }
}
