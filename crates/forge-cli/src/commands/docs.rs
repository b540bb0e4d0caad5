use forge_core::docs::{get_doc, list_docs};

use crate::commands::{CommandResult, DocsErrorEntry};
use crate::context::CliSession;
use crate::error::CliError;

/// `docs list [engine|all]`.
pub fn list(session: &CliSession, engine: Option<&str>) -> Result<CommandResult, CliError> {
    let filter = engine.filter(|e| *e != "all");
    let result = list_docs(&session.project, &session.root_dir, filter, &session.forge_version);
    Ok(CommandResult::DocsList {
        pages: result.pages,
        errors: result.errors.into_iter().map(DocsErrorEntry::from).collect(),
    })
}

/// `docs get <name>`.
pub fn get(session: &CliSession, name: &str) -> Result<CommandResult, CliError> {
    let page = get_doc(&session.project, &session.root_dir, name, &session.forge_version)?;
    Ok(CommandResult::DocsGet { page })
}
