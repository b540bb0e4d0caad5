use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::commands::{self, CommandResult};
use crate::context::CliSession;
use crate::error::{CliError, ExitStatus};
use crate::formatter::{emit_result, OutputFormat};
use crate::util::Verbosity;

const NAME: &str = "forge";

pub fn run() -> ExitCode {
    init_tracing();
    match run_cli(std::env::args()) {
        Ok(code) => code,
        Err(err) => {
            err.print();
            err.exit_code()
        }
    }
}

/// Parses arguments, bootstraps the `CliSession`, and dispatches to the command that
/// owns each verb.
pub fn run_cli<I, S>(args: I) -> Result<ExitCode, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString> + Clone,
{
    let command = build_cli();
    let matches = command.try_get_matches_from(args)?;

    let verbosity = Verbosity { verbose: matches.get_flag("verbose") };
    if verbosity.verbose {
        raise_log_level();
    }

    let format: OutputFormat = matches
        .get_one::<String>("format")
        .map(|s| s.parse())
        .transpose()
        .map_err(|e: String| CliError::new(e, ExitStatus::Usage))?
        .unwrap_or(OutputFormat::Table);

    let config_path = matches
        .get_one::<String>("config-path")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./forge.yaml"));

    let project_override = matches.get_one::<String>("project").cloned();

    if matches.get_flag("mcp") {
        return run_mcp(config_path, project_override);
    }

    let session = CliSession::bootstrap(config_path, project_override, verbosity)?;
    let result = dispatch(&session, &matches)?;
    emit_result(result, format)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn raise_log_level() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .try_init();
}

fn run_mcp(config_path: PathBuf, project_override: Option<String>) -> Result<ExitCode, CliError> {
    let verbosity = Verbosity { verbose: false };
    let session = CliSession::bootstrap(config_path, project_override, verbosity)?;
    forge_mcp::run_stdio_server(session.project, session.store_path, session.root_dir, session.forge_version)
        .map_err(|e| CliError::new(e.to_string(), ExitStatus::Software))?;
    Ok(ExitCode::from(ExitStatus::Ok.code()))
}

/// Defines the root `clap::Command` tree, including global flags and the
/// `build | test | test-all | list | config | docs` subcommand surface.
fn build_cli() -> Command {
    Command::new(NAME)
        .about("Forge build-and-test orchestrator")
        .arg(
            Arg::new("format")
                .short('o')
                .long("format")
                .value_name("json|yaml|table")
                .help("Output format for read commands."),
        )
        .arg(
            Arg::new("config-path")
                .long("config-path")
                .value_name("PATH")
                .help("Path to the project spec file. Defaults to ./forge.yaml."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Raise the tracing filter to debug for this invocation."),
        )
        .arg(
            Arg::new("project")
                .long("project")
                .value_name("NAME")
                .help("Override the project spec's declared name."),
        )
        .arg(
            Arg::new("mcp")
                .long("mcp")
                .action(ArgAction::SetTrue)
                .help("Start an MCP server exposing the same operations as tools."),
        )
        .subcommand(
            Command::new("build")
                .about("Build all or one declared artifact.")
                .arg(Arg::new("name").help("Build only this artifact."))
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Rebuild even if the Dependency Gate would skip."),
                ),
        )
        .subcommand(
            Command::new("test")
                .about("Test stage and test environment operations.")
                .subcommand_required(true)
                .subcommand(
                    Command::new("run")
                        .arg(Arg::new("stage").required(true))
                        .arg(Arg::new("test_id")),
                )
                .subcommand(Command::new("list").arg(Arg::new("stage").required(true)))
                .subcommand(
                    Command::new("get")
                        .arg(Arg::new("stage").required(true))
                        .arg(Arg::new("id").required(true)),
                )
                .subcommand(
                    Command::new("delete")
                        .arg(Arg::new("stage").required(true))
                        .arg(Arg::new("id").required(true)),
                )
                .subcommand(Command::new("create-env").arg(Arg::new("stage").required(true)))
                .subcommand(Command::new("list-env").arg(Arg::new("stage").required(true)))
                .subcommand(
                    Command::new("get-env")
                        .arg(Arg::new("stage").required(true))
                        .arg(Arg::new("id").required(true)),
                )
                .subcommand(
                    Command::new("delete-env")
                        .arg(Arg::new("stage").required(true))
                        .arg(Arg::new("id").required(true)),
                ),
        )
        .subcommand(Command::new("test-all").about("Build everything then run every stage, fail-fast."))
        .subcommand(
            Command::new("list")
                .about("Enumerate declared build/test targets from the project spec.")
                .arg(Arg::new("filter").help("Restrict to build or test.")),
        )
        .subcommand(
            Command::new("config")
                .subcommand_required(true)
                .subcommand(Command::new("validate").about("Fan `config-validate` out to every referenced engine.")),
        )
        .subcommand(
            Command::new("docs")
                .subcommand_required(true)
                .subcommand(Command::new("list").arg(Arg::new("engine")))
                .subcommand(Command::new("get").arg(Arg::new("name").required(true))),
        )
}

fn dispatch(session: &CliSession, matches: &ArgMatches) -> Result<CommandResult, CliError> {
    match matches.subcommand() {
        Some(("build", sub)) => {
            let name = sub.get_one::<String>("name").map(String::as_str);
            let force = sub.get_flag("force");
            Ok(commands::build::run(session, name, force)?)
        }
        Some(("test", sub)) => dispatch_test(session, sub),
        Some(("test-all", _)) => Ok(commands::test_all::run(session)?),
        Some(("list", sub)) => {
            let filter = sub.get_one::<String>("filter").map(String::as_str);
            Ok(commands::list::run(session, filter)?)
        }
        Some(("config", sub)) => match sub.subcommand() {
            Some(("validate", _)) => Ok(commands::config::validate(session)?),
            _ => Err(CliError::new("missing config subcommand", ExitStatus::Usage)),
        },
        Some(("docs", sub)) => match sub.subcommand() {
            Some(("list", inner)) => {
                let engine = inner.get_one::<String>("engine").map(String::as_str);
                Ok(commands::docs::list(session, engine)?)
            }
            Some(("get", inner)) => {
                let name = inner.get_one::<String>("name").expect("required");
                Ok(commands::docs::get(session, name)?)
            }
            _ => Err(CliError::new("missing docs subcommand", ExitStatus::Usage)),
        },
        _ => Err(CliError::new("missing command", ExitStatus::Usage)),
    }
}

fn dispatch_test(session: &CliSession, matches: &ArgMatches) -> Result<CommandResult, CliError> {
    match matches.subcommand() {
        Some(("run", sub)) => {
            let stage = sub.get_one::<String>("stage").expect("required");
            let test_id = sub.get_one::<String>("test_id").map(String::as_str);
            Ok(commands::test::run(session, stage, test_id)?)
        }
        Some(("list", sub)) => {
            let stage = sub.get_one::<String>("stage").expect("required");
            Ok(commands::test::list(session, stage)?)
        }
        Some(("get", sub)) => {
            let stage = sub.get_one::<String>("stage").expect("required");
            let id = sub.get_one::<String>("id").expect("required");
            Ok(commands::test::get(session, stage, id)?)
        }
        Some(("delete", sub)) => {
            let stage = sub.get_one::<String>("stage").expect("required");
            let id = sub.get_one::<String>("id").expect("required");
            Ok(commands::test::delete(session, stage, id)?)
        }
        Some(("create-env", sub)) => {
            let stage = sub.get_one::<String>("stage").expect("required");
            Ok(commands::test::create_env(session, stage)?)
        }
        Some(("list-env", sub)) => {
            let stage = sub.get_one::<String>("stage").expect("required");
            Ok(commands::test::list_env(session, stage)?)
        }
        Some(("get-env", sub)) => {
            let stage = sub.get_one::<String>("stage").expect("required");
            let id = sub.get_one::<String>("id").expect("required");
            Ok(commands::test::get_env(session, stage, id)?)
        }
        Some(("delete-env", sub)) => {
            let stage = sub.get_one::<String>("stage").expect("required");
            let id = sub.get_one::<String>("id").expect("required");
            Ok(commands::test::delete_env(session, stage, id)?)
        }
        _ => Err(CliError::new("missing test subcommand", ExitStatus::Usage)),
    }
}
