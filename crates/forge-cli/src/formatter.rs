use std::process::ExitCode;

use comfy_table::Table;

use crate::commands::CommandResult;
use crate::error::CliError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "yaml" => Ok(OutputFormat::Yaml),
            other => Err(format!("unknown output format `{other}` (expected json, yaml, or table)")),
        }
    }
}

/// Renders a `CommandResult` in the requested format and converts its outcome into a
/// deterministic exit code.
pub fn emit_result(result: CommandResult, format: OutputFormat) -> Result<ExitCode, CliError> {
    match format {
        OutputFormat::Table => print_table(&result),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&result)?),
    }
    Ok(ExitCode::from(result.exit_status().code()))
}

fn print_table(result: &CommandResult) {
    match result {
        CommandResult::Build { artifacts, skipped } => {
            let mut table = Table::new();
            table.set_header(vec!["name", "type", "version", "location"]);
            for artifact in artifacts {
                table.add_row(vec![
                    artifact.name.clone(),
                    artifact.artifact_type.clone(),
                    artifact.version.clone(),
                    artifact.location.clone(),
                ]);
            }
            println!("{table}");
            if !skipped.is_empty() {
                println!("skipped ({}):", skipped.len());
                for s in skipped {
                    println!("  {} — {}", s.name, s.reason);
                }
            }
        }
        CommandResult::TestRun { report } | CommandResult::TestGet { report } => {
            print_report(report);
        }
        CommandResult::TestList { reports } => {
            let mut table = Table::new();
            table.set_header(vec!["id", "stage", "status", "passed", "failed", "total"]);
            for report in reports {
                table.add_row(vec![
                    report.id.clone(),
                    report.stage.clone(),
                    format!("{:?}", report.status),
                    report.test_stats.passed.to_string(),
                    report.test_stats.failed.to_string(),
                    report.test_stats.total.to_string(),
                ]);
            }
            println!("{table}");
        }
        CommandResult::TestDeleted { id } => println!("deleted test report {id}"),
        CommandResult::TestEnvCreated { id } => println!("{id}"),
        CommandResult::TestEnvList { environments } => {
            let mut table = Table::new();
            table.set_header(vec!["id", "stage", "status", "created_at"]);
            for env in environments {
                table.add_row(vec![
                    env.id.clone(),
                    env.name.clone(),
                    format!("{:?}", env.status),
                    env.created_at.to_rfc3339(),
                ]);
            }
            println!("{table}");
        }
        CommandResult::TestEnvGet { environment } => print_environment(environment),
        CommandResult::TestEnvDeleted { id } => println!("deleted test environment {id}"),
        CommandResult::TestAll { build_artifacts, test_reports, stopped_early } => {
            println!("built {} artifact(s)", build_artifacts.len());
            for report in test_reports {
                println!("  [{:?}] {}", report.status, report.stage);
            }
            if *stopped_early {
                println!("stopped early after first failure");
            }
        }
        CommandResult::List { build, test } => {
            println!("build ({}):", build.len());
            for name in build {
                println!("  - {name}");
            }
            println!("test ({}):", test.len());
            for name in test {
                println!("  - {name}");
            }
        }
        CommandResult::ConfigValidate { result } => {
            println!("valid: {}", result.valid);
            for issue in &result.errors {
                println!("  [ERROR] {} ({}/{}): {}", issue.engine, issue.spec_type, issue.spec_name, issue.message);
            }
            for issue in &result.warnings {
                println!("  [WARN]  {} ({}/{}): {}", issue.engine, issue.spec_type, issue.spec_name, issue.message);
            }
        }
        CommandResult::DocsList { pages, errors } => {
            let mut table = Table::new();
            table.set_header(vec!["engine", "name"]);
            for page in pages {
                table.add_row(vec![page.engine.clone(), page.name.clone()]);
            }
            println!("{table}");
            for err in errors {
                println!("  [ERROR] {}: {}", err.engine, err.message);
            }
        }
        CommandResult::DocsGet { page } => {
            println!("# {} ({})\n{}", page.name, page.engine, page.body);
        }
    }
}

fn print_report(report: &forge_core::TestReport) {
    println!("report {} — stage {} — {:?}", report.id, report.stage, report.status);
    println!(
        "  passed={} failed={} skipped={} total={}",
        report.test_stats.passed, report.test_stats.failed, report.test_stats.skipped, report.test_stats.total
    );
    if let Some(msg) = &report.error_message {
        println!("  error: {msg}");
    }
}

fn print_environment(env: &forge_core::TestEnvironment) {
    println!("environment {} — stage {} — {:?}", env.id, env.name, env.status);
    println!("  tmp_dir: {}", env.tmp_dir);
    if !env.managed_resources.is_empty() {
        println!("  managed resources: {}", env.managed_resources.join(", "));
    }
}
