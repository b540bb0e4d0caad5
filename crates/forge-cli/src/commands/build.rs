use forge_core::orchestrator::build::run_build;

use crate::commands::{CommandResult, SkippedArtifact};
use crate::context::CliSession;
use crate::error::CliError;

/// `build [name] [--force]`.
pub fn run(session: &CliSession, name: Option<&str>, force: bool) -> Result<CommandResult, CliError> {
    let result = run_build(
        &session.project,
        &session.store_path,
        name,
        force,
        &session.root_dir,
        &session.forge_version,
    )?;

    Ok(CommandResult::Build {
        artifacts: result.artifacts,
        skipped: result
            .skipped
            .into_iter()
            .map(|(name, reason)| SkippedArtifact { name, reason })
            .collect(),
    })
}
