//! Build Orchestrator: single-engine and multi-engine pipeline paths.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use uuid::Uuid;

use crate::dependency_gate::should_rebuild;
use crate::engine::resolver::{self, ResolvedEngine};
use crate::engine::transport::{self, ToolCallOutcome};
use crate::error::{ForgeError, Result};
use crate::model::{Artifact, StoreDocument};
use crate::spec::{BuildSpec, BuilderStage, ProjectSpec};
use crate::store::{self, add_or_update_artifact};

/// The three scratch directories a build run operates in.
#[derive(Clone, Debug)]
pub struct ScratchPaths {
    pub tmp_dir: PathBuf,
    pub build_dir: PathBuf,
    pub root_dir: PathBuf,
}

const MAX_RETAINED_RUNS: usize = 10;

/// Creates a fresh `<root>/.forge/tmp/<run-id>/{tmp,build,root}` scratch tree and
/// garbage-collects all but the 10 most recent runs, best-effort.
pub fn prepare_scratch(root: &Path) -> Result<ScratchPaths> {
    let runs_dir = root.join(".forge").join("tmp");
    fs::create_dir_all(&runs_dir)?;

    let run_id = Uuid::new_v4().to_string();
    let run_dir = runs_dir.join(&run_id);
    let tmp_dir = run_dir.join("tmp");
    let build_dir = run_dir.join("build");
    let root_scratch_dir = run_dir.join("root");
    fs::create_dir_all(&tmp_dir)?;
    fs::create_dir_all(&build_dir)?;
    fs::create_dir_all(&root_scratch_dir)?;

    gc_old_runs(&runs_dir, &run_id);

    Ok(ScratchPaths {
        tmp_dir,
        build_dir,
        root_dir: root_scratch_dir,
    })
}

fn gc_old_runs(runs_dir: &Path, current_run_id: &str) {
    let Ok(entries) = fs::read_dir(runs_dir) else { return };
    let mut runs: Vec<_> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name() != current_run_id.as_str())
        .filter_map(|e| e.metadata().ok().and_then(|m| m.modified().ok()).map(|m| (e.path(), m)))
        .collect();
    runs.sort_by_key(|(_, modified)| *modified);
    if runs.len() + 1 <= MAX_RETAINED_RUNS {
        return;
    }
    let to_remove = runs.len() + 1 - MAX_RETAINED_RUNS;
    for (path, _) in runs.into_iter().take(to_remove) {
        let _ = fs::remove_dir_all(path);
    }
}

#[derive(Debug, Default)]
pub struct BuildRunResult {
    pub artifacts: Vec<Artifact>,
    pub skipped: Vec<(String, String)>,
}

/// Runs `build [name]`: consults the Dependency Gate per spec, groups the remaining
/// specs by engine, dispatches single- or multi-engine calls, and ends in exactly
/// one `WriteStore`.
pub fn run_build(
    project: &ProjectSpec,
    store_path: &Path,
    filter: Option<&str>,
    force: bool,
    root_dir: &Path,
    forge_version: &str,
) -> Result<BuildRunResult> {
    let store = store::read_or_create_store(store_path)?;

    let mut to_build = Vec::new();
    let mut result = BuildRunResult::default();
    for build_spec in &project.build {
        if let Some(name) = filter {
            if build_spec.name != name {
                continue;
            }
        }
        let decision = should_rebuild(&build_spec.name, &store, force);
        if decision.rebuild {
            to_build.push(build_spec);
        } else {
            tracing::info!(artifact = %build_spec.name, "up to date, skipping");
            result.skipped.push((build_spec.name.clone(), decision.reason));
        }
    }

    if to_build.is_empty() {
        return Ok(result);
    }

    let scratch = prepare_scratch(root_dir)?;

    let mut groups: BTreeMap<String, Vec<&BuildSpec>> = BTreeMap::new();
    for spec in to_build {
        groups.entry(spec.engine.clone()).or_default().push(spec);
    }

    let mut new_artifacts = Vec::new();
    for (engine_uri, specs) in groups {
        let resolved = resolver::resolve(&engine_uri, project, forge_version)?;
        let artifacts = match resolved {
            ResolvedEngine::Pipeline(stages) => run_pipeline(&stages, &specs, &scratch, force)?,
            ResolvedEngine::Single(cmd) => {
                if specs.len() == 1 {
                    let arguments = build_arguments(specs[0], &scratch, force);
                    let outcome = transport::call_tool(&cmd, &scratch.root_dir, "build", arguments)?;
                    reject_call_error(&outcome, "build")?;
                    transport::parse_artifacts(&outcome.payload()?)?
                } else {
                    let batch_specs: Vec<_> = specs.iter().map(|s| build_arguments(s, &scratch, force)).collect();
                    let arguments = serde_json::json!({ "specs": batch_specs });
                    let outcome = transport::call_tool(&cmd, &scratch.root_dir, "buildBatch", arguments)?;
                    reject_call_error(&outcome, "buildBatch")?;
                    transport::parse_artifacts(&outcome.payload()?)?
                }
            }
        };
        new_artifacts.extend(artifacts);
    }

    let mut store = store;
    for artifact in &new_artifacts {
        add_or_update_artifact(&mut store, artifact.clone());
    }
    store::write_store(store_path, store)?;

    result.artifacts = new_artifacts;
    Ok(result)
}

fn reject_call_error(outcome: &ToolCallOutcome, tool: &str) -> Result<()> {
    if outcome.is_error {
        let diagnostic = outcome.text_blocks.join("\n");
        return Err(ForgeError::Engine(format!("`{tool}` reported an error: {diagnostic}")));
    }
    Ok(())
}

fn build_arguments(spec: &BuildSpec, scratch: &ScratchPaths, force: bool) -> serde_json::Value {
    serde_json::json!({
        "name": spec.name,
        "src": spec.src,
        "dest": spec.dest,
        "engine": spec.engine,
        "spec": spec.spec,
        "tmpDir": scratch.tmp_dir.to_string_lossy(),
        "buildDir": scratch.build_dir.to_string_lossy(),
        "rootDir": scratch.root_dir.to_string_lossy(),
        "force": force,
    })
}

/// Runs a `Builder` pipeline: each stage receives the specs plus the
/// previous stage's output directory; only the final stage's artifacts are
/// store-bound (see the pipeline-semantics note in DESIGN.md).
fn run_pipeline(
    stages: &[BuilderStage],
    specs: &[&BuildSpec],
    scratch: &ScratchPaths,
    force: bool,
) -> Result<Vec<Artifact>> {
    let mut previous_output_dir = scratch.build_dir.clone();
    let mut artifacts = Vec::new();

    for (i, stage) in stages.iter().enumerate() {
        let stage_scratch = ScratchPaths {
            tmp_dir: scratch.tmp_dir.clone(),
            build_dir: previous_output_dir.clone(),
            root_dir: scratch.root_dir.clone(),
        };
        let cmd = crate::engine::resolver::ResolvedCommand {
            command: stage.command.clone(),
            args: stage.args.clone(),
            env: stage.env.clone(),
            env_file: stage.env_file.clone(),
            work_dir: stage.work_dir.clone(),
        };

        let batch_specs: Vec<_> = specs.iter().map(|s| build_arguments(s, &stage_scratch, force)).collect();
        let (tool, arguments) = if specs.len() == 1 {
            ("build", batch_specs.into_iter().next().unwrap())
        } else {
            ("buildBatch", serde_json::json!({ "specs": batch_specs }))
        };

        let outcome = transport::call_tool(&cmd, &stage_scratch.root_dir, tool, arguments)?;
        reject_call_error(&outcome, tool)?;
        artifacts = transport::parse_artifacts(&outcome.payload()?)?;

        previous_output_dir = artifacts
            .first()
            .map(|a| PathBuf::from(&a.location).parent().map(Path::to_path_buf).unwrap_or_else(|| previous_output_dir.clone()))
            .unwrap_or(previous_output_dir);

        tracing::debug!(stage = i, command = %stage.command, "pipeline stage complete");
    }

    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_scratch_creates_three_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = prepare_scratch(dir.path()).unwrap();
        assert!(scratch.tmp_dir.exists());
        assert!(scratch.build_dir.exists());
        assert!(scratch.root_dir.exists());
    }

    #[test]
    fn gc_keeps_at_most_ten_runs() {
        let dir = tempfile::tempdir().unwrap();
        for _ in 0..15 {
            prepare_scratch(dir.path()).unwrap();
        }
        let runs_dir = dir.path().join(".forge").join("tmp");
        let count = fs::read_dir(&runs_dir).unwrap().count();
        assert!(count <= MAX_RETAINED_RUNS, "expected at most {MAX_RETAINED_RUNS} runs, got {count}");
    }

    #[test]
    fn empty_build_list_skips_store_write() {
        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("store.yaml");
        let project = ProjectSpec {
            name: "demo".into(),
            artifact_store_path: None,
            engines: BTreeMap::new(),
            build: Vec::new(),
            test: Vec::new(),
        };
        let result = run_build(&project, &store_path, None, false, dir.path(), "v1").unwrap();
        assert!(result.artifacts.is_empty());
        assert!(!store_path.exists());
    }
}
