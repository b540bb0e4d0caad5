use forge_core::config_validate::validate_config;

use crate::commands::CommandResult;
use crate::context::CliSession;
use crate::error::CliError;

/// `config validate [--config-path P]`.
pub fn validate(session: &CliSession) -> Result<CommandResult, CliError> {
    let result = validate_config(&session.project, &session.config_path, &session.forge_version)?;
    Ok(CommandResult::ConfigValidate { result })
}
