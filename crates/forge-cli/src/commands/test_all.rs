use forge_core::orchestrator::test::test_all as run_test_all;

use crate::commands::CommandResult;
use crate::context::CliSession;
use crate::error::CliError;

/// `test-all`: build everything, then run every declared stage, fail-fast.
pub fn run(session: &CliSession) -> Result<CommandResult, CliError> {
    let result = run_test_all(
        &session.project,
        &session.store_path,
        &session.root_dir,
        &session.forge_version,
    )?;
    Ok(CommandResult::TestAll {
        build_artifacts: result.build_artifacts,
        test_reports: result.test_reports,
        stopped_early: result.stopped_early,
    })
}
