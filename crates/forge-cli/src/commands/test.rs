use std::collections::BTreeMap;

use forge_core::orchestrator::test::test_run as run_test_stage;
use forge_core::orchestrator::testenv::{create_testenv, delete_testenv};
use forge_core::store;
use forge_core::ForgeError;

use crate::commands::CommandResult;
use crate::context::CliSession;
use crate::error::CliError;

/// `test run <stage> [testID]`.
pub fn run(session: &CliSession, stage: &str, test_id: Option<&str>) -> Result<CommandResult, CliError> {
    let report = run_test_stage(
        &session.project,
        &session.store_path,
        stage,
        test_id,
        &session.root_dir,
        &session.forge_version,
    )?;
    Ok(CommandResult::TestRun { report })
}

/// `test list <stage>`.
pub fn list(session: &CliSession, stage: &str) -> Result<CommandResult, CliError> {
    let doc = store::read_or_create_store(&session.store_path)?;
    let reports = store::list_test_reports(&doc, Some(stage))
        .into_iter()
        .cloned()
        .collect();
    Ok(CommandResult::TestList { reports })
}

/// `test get <stage> <id>`.
pub fn get(session: &CliSession, stage: &str, id: &str) -> Result<CommandResult, CliError> {
    let doc = store::read_or_create_store(&session.store_path)?;
    let report = store::get_test_report(&doc, id)
        .filter(|r| r.stage == stage)
        .cloned()
        .ok_or_else(|| ForgeError::NotFound(format!("test report `{id}` for stage `{stage}`")))?;
    Ok(CommandResult::TestGet { report })
}

/// `test delete <stage> <id>`.
pub fn delete(session: &CliSession, stage: &str, id: &str) -> Result<CommandResult, CliError> {
    let doc = store::read_or_create_store(&session.store_path)?;
    store::get_test_report(&doc, id)
        .filter(|r| r.stage == stage)
        .ok_or_else(|| ForgeError::NotFound(format!("test report `{id}` for stage `{stage}`")))?;
    store::atomic_delete_test_report(&session.store_path, id)?;
    Ok(CommandResult::TestDeleted { id: id.to_string() })
}

/// `test create-env <stage>`.
pub fn create_env(session: &CliSession, stage: &str) -> Result<CommandResult, CliError> {
    let test_spec = session
        .project
        .find_test(stage)
        .ok_or_else(|| ForgeError::NotFound(format!("no test stage named `{stage}`")))?;
    let environment = create_testenv(
        &session.project,
        &session.store_path,
        test_spec,
        &session.root_dir,
        &session.forge_version,
        &BTreeMap::new(),
    )?;
    Ok(CommandResult::TestEnvCreated { id: environment.id })
}

/// `test list-env <stage>`.
pub fn list_env(session: &CliSession, stage: &str) -> Result<CommandResult, CliError> {
    let doc = store::read_or_create_store(&session.store_path)?;
    let environments = store::list_test_environments(&doc, Some(stage))
        .into_iter()
        .cloned()
        .collect();
    Ok(CommandResult::TestEnvList { environments })
}

/// `test get-env <stage> <id>`.
pub fn get_env(session: &CliSession, stage: &str, id: &str) -> Result<CommandResult, CliError> {
    let doc = store::read_or_create_store(&session.store_path)?;
    let environment = store::get_test_environment(&doc, id)
        .filter(|e| e.name == stage)
        .cloned()
        .ok_or_else(|| ForgeError::NotFound(format!("test environment `{id}` for stage `{stage}`")))?;
    Ok(CommandResult::TestEnvGet { environment })
}

/// `test delete-env <stage> <id>`.
pub fn delete_env(session: &CliSession, stage: &str, id: &str) -> Result<CommandResult, CliError> {
    let doc = store::read_or_create_store(&session.store_path)?;
    store::get_test_environment(&doc, id)
        .filter(|e| e.name == stage)
        .ok_or_else(|| ForgeError::NotFound(format!("test environment `{id}` for stage `{stage}`")))?;
    let test_spec = session
        .project
        .find_test(stage)
        .ok_or_else(|| ForgeError::NotFound(format!("no test stage named `{stage}`")))?;
    delete_testenv(&session.project, &session.store_path, test_spec, id, &session.forge_version)?;
    Ok(CommandResult::TestEnvDeleted { id: id.to_string() })
}
