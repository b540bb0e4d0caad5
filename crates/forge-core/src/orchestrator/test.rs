//! Test Orchestrator: `testRun` and fail-fast `testAll`.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use serde::Deserialize;

use crate::engine::resolver::{self, ResolvedEngine};
use crate::engine::transport;
use crate::error::{ForgeError, Result};
use crate::model::{Coverage, TestReport, TestReportStatus, TestStats};
use crate::orchestrator::build::run_build;
use crate::orchestrator::testenv::{create_testenv, delete_testenv};
use crate::spec::ProjectSpec;
use crate::store::{self, add_or_update_test_report, get_test_environment};

#[derive(Debug, Deserialize)]
struct RunnerOutput {
    status: TestReportStatus,
    #[serde(default, rename = "startTime")]
    start_time: Option<chrono::DateTime<Utc>>,
    #[serde(default)]
    duration: f64,
    #[serde(default, rename = "testStats")]
    test_stats: TestStats,
    #[serde(default)]
    coverage: Coverage,
    #[serde(default, rename = "artifactFiles")]
    artifact_files: Vec<String>,
    #[serde(default, rename = "outputPath")]
    output_path: Option<String>,
    #[serde(default, rename = "errorMessage")]
    error_message: Option<String>,
}

/// Runs a single test stage. If `test_id` is absent, creates a managed environment
/// first via the Testenv Orchestrator. Returns the persisted `TestReport` whether
/// the tests passed or failed — only execution errors become call-level errors.
pub fn test_run(
    project: &ProjectSpec,
    store_path: &Path,
    stage: &str,
    test_id: Option<&str>,
    root_dir: &Path,
    forge_version: &str,
) -> Result<TestReport> {
    let test_spec = project
        .find_test(stage)
        .ok_or_else(|| ForgeError::NotFound(format!("no test stage named `{stage}`")))?;

    let environment_id = match test_id {
        Some(id) => id.to_string(),
        None => {
            if test_spec.has_no_testenv() {
                String::new()
            } else {
                let env = create_testenv(project, store_path, test_spec, root_dir, forge_version, &BTreeMap::new())?;
                env.id
            }
        }
    };

    let filtered_env = if environment_id.is_empty() {
        BTreeMap::new()
    } else {
        let store = store::read_or_create_store(store_path)?;
        let env = get_test_environment(&store, &environment_id)
            .ok_or_else(|| ForgeError::NotFound(format!("test environment {environment_id} not found")))?;
        match &test_spec.env_propagation {
            Some(propagation) => propagation.filter(&env.env),
            None => env.env.clone(),
        }
    };

    let resolved = resolver::resolve(&test_spec.runner, project, forge_version)?;
    let cmd = match resolved {
        ResolvedEngine::Single(cmd) => cmd,
        ResolvedEngine::Pipeline(_) => {
            return Err(ForgeError::Engine(format!(
                "test runner `{}` must resolve to a single command, not a multi-stage builder",
                test_spec.runner
            )));
        }
    };

    let arguments = serde_json::json!({
        "stage": stage,
        "id": environment_id,
        "rootDir": root_dir.to_string_lossy(),
        "env": filtered_env,
        "spec": test_spec.spec,
    });

    let outcome = transport::call_tool(&cmd, root_dir, "run", arguments)?;
    if outcome.is_error {
        return Err(ForgeError::Engine(format!(
            "test runner for stage `{stage}` failed: {}",
            outcome.text_blocks.join("\n")
        )));
    }

    let parsed: RunnerOutput = serde_json::from_value(outcome.payload()?)
        .map_err(|e| ForgeError::Engine(format!("invalid test runner payload for stage `{stage}`: {e}")))?;

    let now = Utc::now();
    let report = TestReport {
        id: uuid::Uuid::new_v4().to_string(),
        stage: stage.to_string(),
        status: parsed.status,
        start_time: parsed.start_time.unwrap_or(now),
        duration: parsed.duration,
        test_stats: parsed.test_stats,
        coverage: parsed.coverage,
        artifact_files: parsed.artifact_files,
        output_path: parsed.output_path,
        error_message: parsed.error_message,
        created_at: now,
        updated_at: now,
    };

    let mut store = store::read_or_create_store(store_path)?;
    add_or_update_test_report(&mut store, report.clone());
    store::write_store(store_path, store)?;

    Ok(report)
}

/// `test-all`: build everything, then run every declared stage in order,
/// stopping at the first failure.
#[derive(Debug)]
pub struct TestAllResult {
    pub build_artifacts: Vec<crate::model::Artifact>,
    pub test_reports: Vec<TestReport>,
    pub stopped_early: bool,
}

pub fn test_all(project: &ProjectSpec, store_path: &Path, root_dir: &Path, forge_version: &str) -> Result<TestAllResult> {
    let build_result = run_build(project, store_path, None, false, root_dir, forge_version)?;

    let mut reports = Vec::new();
    let mut stopped_early = false;

    for test_spec in &project.test {
        let report = test_run(project, store_path, &test_spec.name, None, root_dir, forge_version)?;
        let passed = report.status == TestReportStatus::Passed;
        reports.push(report);

        if let Some(latest_env_id) = latest_environment_id_for(store_path, &test_spec.name)? {
            let _ = delete_testenv(project, store_path, test_spec, &latest_env_id, forge_version);
        }

        if !passed {
            stopped_early = true;
            break;
        }
    }

    Ok(TestAllResult {
        build_artifacts: build_result.artifacts,
        test_reports: reports,
        stopped_early,
    })
}

fn latest_environment_id_for(store_path: &Path, stage: &str) -> Result<Option<String>> {
    let store = store::read_or_create_store(store_path)?;
    Ok(store::list_test_environments(&store, Some(stage))
        .into_iter()
        .max_by_key(|e| e.created_at)
        .map(|e| e.id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{BuildSpec, TestSpec};

    fn project_with_stages(names: &[&str]) -> ProjectSpec {
        ProjectSpec {
            name: "demo".into(),
            artifact_store_path: None,
            engines: BTreeMap::new(),
            build: vec![BuildSpec {
                name: "app".into(),
                src: "./cmd/app".into(),
                dest: None,
                engine: "shell://true".into(),
                spec: serde_json::Value::Null,
            }],
            test: names
                .iter()
                .map(|n| TestSpec {
                    name: n.to_string(),
                    testenv: None,
                    runner: "shell://true".into(),
                    spec: serde_json::Value::Null,
                    env_propagation: None,
                })
                .collect(),
        }
    }

    #[test]
    fn unknown_stage_errors() {
        let project = project_with_stages(&["unit"]);
        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("store.yaml");
        let err = test_run(&project, &store_path, "missing", None, dir.path(), "v1").unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
