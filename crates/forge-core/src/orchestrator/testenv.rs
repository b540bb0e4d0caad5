//! Testenv Orchestrator: a serial sub-engine chain that builds up a single
//! `TestEnvironment`, merging each sub-engine's env contribution by priority.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use uuid::Uuid;

use crate::engine::resolver::{self, ResolvedCommand, ResolvedEngine};
use crate::engine::transport;
use crate::error::{ForgeError, Result};
use crate::model::{TestEnvironment, TestEnvironmentStatus};
use crate::port_allocator::PortAllocator;
use crate::spec::{EnvPropagation, ProjectSpec, TestSpec};
use crate::store::{self, add_or_update_test_environment, atomic_delete_test_environment};
use crate::template::{expand_tree, TemplateContext};

/// `nil` priority maps to this value (lowest precedence); an explicit `0` is highest.
pub const DEFAULT_ENV_PRIORITY: i64 = 65536;

#[derive(Debug, Deserialize, Default)]
struct EngineEnvContribution {
    value: String,
    #[serde(default)]
    priority: Option<i64>,
    #[serde(default)]
    disabled: bool,
}

#[derive(Debug, Deserialize, Default)]
struct SubEngineUpdate {
    #[serde(default)]
    files: BTreeMap<String, String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default, rename = "managedResources")]
    managed_resources: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, EngineEnvContribution>,
}

/// Tracks the effective priority behind each currently-merged env var so later
/// sub-engines can be compared against it without persisting priorities.
struct EnvMergeState {
    priorities: BTreeMap<String, i64>,
}

impl EnvMergeState {
    fn new() -> Self {
        Self { priorities: BTreeMap::new() }
    }

    /// Applies the priority-resolution merge rule for a single contributed variable.
    fn merge(&mut self, env: &mut BTreeMap<String, String>, var: &str, contribution: &EngineEnvContribution, priority_override: Option<i64>) {
        if contribution.disabled {
            return;
        }
        let effective_priority = priority_override.unwrap_or_else(|| contribution.priority.unwrap_or(DEFAULT_ENV_PRIORITY));

        match self.priorities.get(var) {
            None => {
                env.insert(var.to_string(), contribution.value.clone());
                self.priorities.insert(var.to_string(), effective_priority);
            }
            Some(&stored_priority) if effective_priority <= stored_priority => {
                env.insert(var.to_string(), contribution.value.clone());
                self.priorities.insert(var.to_string(), effective_priority);
            }
            Some(_) => {}
        }
    }
}

fn resolved_command_for(stage: &resolver::ResolvedCommand) -> ResolvedCommand {
    stage.clone()
}

/// Creates a managed test environment for `test_spec`, driving every sub-engine of
/// its resolved `testenv` builder in declared order. On any sub-engine failure,
/// best-effort `delete` is run on every sub-engine already created and the
/// environment is left `partially_deleted` in the store.
pub fn create_testenv(
    project: &ProjectSpec,
    store_path: &Path,
    test_spec: &TestSpec,
    root_dir: &Path,
    forge_version: &str,
    priority_overrides: &BTreeMap<String, i64>,
) -> Result<TestEnvironment> {
    let testenv_uri = test_spec
        .testenv
        .as_deref()
        .filter(|u| !u.is_empty() && *u != "noop")
        .ok_or_else(|| ForgeError::Engine("create_testenv called with no testenv declared".into()))?;

    let stages = resolve_testenv_stages(testenv_uri, project, forge_version)?;

    let id = Uuid::new_v4().to_string();
    let tmp_dir = format!("/tmp/forge-test-{}-{}/", test_spec.name, id);
    let mut environment = TestEnvironment::new(id, test_spec.name.clone(), tmp_dir.clone());
    let mut store = store::read_or_create_store(store_path)?;
    add_or_update_test_environment(&mut store, environment.clone());
    store::write_store(store_path, store)?;

    let propagation = test_spec.env_propagation.clone().unwrap_or_default();
    let mut merge_state = EnvMergeState::new();
    let mut created_stages: Vec<ResolvedCommand> = Vec::new();
    let mut allocator = PortAllocator::open(default_port_allocator_path(root_dir))?;

    for stage in &stages {
        match run_create_stage(stage, &environment, &mut allocator, &propagation) {
            Ok(update) => {
                apply_update(&mut environment, update, priority_overrides, &mut merge_state);
                environment.touch();
                created_stages.push(stage.clone());
                persist(store_path, &environment)?;
            }
            Err(err) => {
                teardown_best_effort(&created_stages, &environment);
                environment.status = TestEnvironmentStatus::PartiallyDeleted;
                environment.touch();
                let _ = persist(store_path, &environment);
                allocator.close()?;
                return Err(err);
            }
        }
    }

    allocator.close()?;
    Ok(environment)
}

fn default_port_allocator_path(root_dir: &Path) -> std::path::PathBuf {
    root_dir.join(".forge").join("port-allocations.yaml")
}

fn resolve_testenv_stages(testenv_uri: &str, project: &ProjectSpec, forge_version: &str) -> Result<Vec<ResolvedCommand>> {
    let resolved = resolver::resolve(testenv_uri, project, forge_version)?;
    Ok(match resolved {
        ResolvedEngine::Single(cmd) => vec![cmd],
        ResolvedEngine::Pipeline(stages) => stages
            .into_iter()
            .map(|s| ResolvedCommand {
                command: s.command,
                args: s.args,
                env: s.env,
                env_file: s.env_file,
                work_dir: s.work_dir,
            })
            .collect(),
    })
}

/// Tears down and removes a managed test environment: runs each testenv sub-engine's
/// `delete` tool best-effort (mirroring `create_testenv`'s failure-rollback path),
/// then atomically removes the store entry. Idempotent — a missing environment or an
/// undeclared/`noop` testenv skips straight to the store deletion.
pub fn delete_testenv(
    project: &ProjectSpec,
    store_path: &Path,
    test_spec: &TestSpec,
    environment_id: &str,
    forge_version: &str,
) -> Result<()> {
    let store = store::read_or_create_store(store_path)?;
    let Some(environment) = store::get_test_environment(&store, environment_id).cloned() else {
        return atomic_delete_test_environment(store_path, environment_id);
    };

    if let Some(testenv_uri) = test_spec.testenv.as_deref().filter(|u| !u.is_empty() && *u != "noop") {
        match resolve_testenv_stages(testenv_uri, project, forge_version) {
            Ok(stages) => teardown_best_effort(&stages, &environment),
            Err(err) => tracing::warn!(error = %err, "could not resolve testenv for teardown"),
        }
    }

    atomic_delete_test_environment(store_path, environment_id)
}

fn run_create_stage(
    stage: &ResolvedCommand,
    environment: &TestEnvironment,
    allocator: &mut PortAllocator,
    propagation: &EnvPropagation,
) -> Result<SubEngineUpdate> {
    let mut ctx = TemplateContext { env: &environment.env, allocator: Some(allocator) };
    let arguments = serde_json::json!({
        "id": environment.id,
        "stage": environment.name,
        "tmpDir": environment.tmp_dir,
        "env": environment.env,
    });
    let expanded = expand_tree(&arguments, &mut ctx)?;

    let cmd = resolved_command_for(stage);
    let outcome = transport::call_tool(&cmd, Path::new("."), "create", expanded)?;
    if outcome.is_error {
        return Err(ForgeError::Engine(format!(
            "testenv sub-engine `{}` create failed: {}",
            stage.command,
            outcome.text_blocks.join("\n")
        )));
    }

    let mut update: SubEngineUpdate = serde_json::from_value(outcome.payload()?)
        .map_err(|e| ForgeError::Engine(format!("invalid sub-engine create payload: {e}")))?;
    update.env = apply_propagation_filter(update.env, propagation);
    Ok(update)
}

fn apply_propagation_filter(
    env: BTreeMap<String, EngineEnvContribution>,
    propagation: &EnvPropagation,
) -> BTreeMap<String, EngineEnvContribution> {
    if let Some(whitelist) = &propagation.whitelist {
        return env.into_iter().filter(|(k, _)| whitelist.iter().any(|w| w == k)).collect();
    }
    if let Some(blacklist) = &propagation.blacklist {
        return env.into_iter().filter(|(k, _)| !blacklist.iter().any(|b| b == k)).collect();
    }
    env
}

fn apply_update(
    environment: &mut TestEnvironment,
    update: SubEngineUpdate,
    priority_overrides: &BTreeMap<String, i64>,
    merge_state: &mut EnvMergeState,
) {
    environment.files.extend(update.files);
    environment.metadata.extend(update.metadata);
    environment.managed_resources.extend(update.managed_resources);

    for (var, contribution) in &update.env {
        let override_priority = priority_overrides.get(var).copied();
        merge_state.merge(&mut environment.env, var, contribution, override_priority);
    }
}

fn persist(store_path: &Path, environment: &TestEnvironment) -> Result<()> {
    let mut store = store::read_or_create_store(store_path)?;
    add_or_update_test_environment(&mut store, environment.clone());
    store::write_store(store_path, store)?;
    Ok(())
}

fn teardown_best_effort(created_stages: &[ResolvedCommand], environment: &TestEnvironment) {
    for stage in created_stages {
        let arguments = serde_json::json!({
            "id": environment.id,
            "stage": environment.name,
            "tmpDir": environment.tmp_dir,
        });
        if let Err(err) = transport::call_tool(stage, Path::new("."), "delete", arguments) {
            tracing::warn!(command = %stage.command, error = %err, "best-effort teardown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_contribution_wins_on_collision() {
        let mut env = BTreeMap::new();
        let mut state = EnvMergeState::new();
        state.merge(
            &mut env,
            "KUBECONFIG",
            &EngineEnvContribution { value: "/a".into(), priority: Some(100), disabled: false },
            None,
        );
        state.merge(
            &mut env,
            "KUBECONFIG",
            &EngineEnvContribution { value: "/b".into(), priority: Some(0), disabled: false },
            None,
        );
        assert_eq!(env.get("KUBECONFIG"), Some(&"/b".to_string()));
    }

    #[test]
    fn lower_priority_contribution_does_not_override() {
        let mut env = BTreeMap::new();
        let mut state = EnvMergeState::new();
        state.merge(
            &mut env,
            "KUBECONFIG",
            &EngineEnvContribution { value: "/a".into(), priority: Some(0), disabled: false },
            None,
        );
        state.merge(
            &mut env,
            "KUBECONFIG",
            &EngineEnvContribution { value: "/b".into(), priority: Some(100), disabled: false },
            None,
        );
        assert_eq!(env.get("KUBECONFIG"), Some(&"/a".to_string()));
    }

    #[test]
    fn nil_priority_defaults_to_lowest_precedence() {
        let mut env = BTreeMap::new();
        let mut state = EnvMergeState::new();
        state.merge(
            &mut env,
            "X",
            &EngineEnvContribution { value: "default".into(), priority: None, disabled: false },
            None,
        );
        state.merge(
            &mut env,
            "X",
            &EngineEnvContribution { value: "explicit".into(), priority: Some(1000), disabled: false },
            None,
        );
        assert_eq!(env.get("X"), Some(&"explicit".to_string()));
    }

    #[test]
    fn disabled_contribution_is_ignored() {
        let mut env = BTreeMap::new();
        let mut state = EnvMergeState::new();
        state.merge(
            &mut env,
            "X",
            &EngineEnvContribution { value: "should-not-appear".into(), priority: Some(0), disabled: true },
            None,
        );
        assert!(env.get("X").is_none());
    }

    #[test]
    fn apply_update_keeps_priority_across_stages() {
        let mut environment = TestEnvironment::new("env-1".to_string(), "stage", "/tmp/x".to_string());
        let overrides = BTreeMap::new();
        let mut merge_state = EnvMergeState::new();

        let mut first_env = BTreeMap::new();
        first_env.insert(
            "KUBECONFIG".to_string(),
            EngineEnvContribution { value: "/a".into(), priority: Some(0), disabled: false },
        );
        apply_update(
            &mut environment,
            SubEngineUpdate { env: first_env, ..Default::default() },
            &overrides,
            &mut merge_state,
        );
        assert_eq!(environment.env.get("KUBECONFIG"), Some(&"/a".to_string()));

        let mut second_env = BTreeMap::new();
        second_env.insert(
            "KUBECONFIG".to_string(),
            EngineEnvContribution { value: "/b".into(), priority: None, disabled: false },
        );
        apply_update(
            &mut environment,
            SubEngineUpdate { env: second_env, ..Default::default() },
            &overrides,
            &mut merge_state,
        );

        assert_eq!(environment.env.get("KUBECONFIG"), Some(&"/a".to_string()));
    }

    #[test]
    fn priority_override_takes_precedence_over_contributor_default() {
        let mut env = BTreeMap::new();
        let mut state = EnvMergeState::new();
        state.merge(
            &mut env,
            "X",
            &EngineEnvContribution { value: "first".into(), priority: Some(0), disabled: false },
            None,
        );
        state.merge(
            &mut env,
            "X",
            &EngineEnvContribution { value: "second".into(), priority: Some(500), disabled: false },
            Some(-1),
        );
        assert_eq!(env.get("X"), Some(&"second".to_string()));
    }
}
