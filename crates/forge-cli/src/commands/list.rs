use crate::commands::CommandResult;
use crate::context::CliSession;
use crate::error::CliError;

/// `list [build|test]`: enumerates declared targets/stages straight from the Project
/// Spec; unlike every other read command this never touches the artifact store.
pub fn run(session: &CliSession, filter: Option<&str>) -> Result<CommandResult, CliError> {
    let want_build = matches!(filter, None | Some("build"));
    let want_test = matches!(filter, None | Some("test"));

    let build = if want_build {
        session.project.build.iter().map(|b| b.name.clone()).collect()
    } else {
        Vec::new()
    };
    let test = if want_test {
        session.project.test.iter().map(|t| t.name.clone()).collect()
    } else {
        Vec::new()
    };

    Ok(CommandResult::List { build, test })
}
