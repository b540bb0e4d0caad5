use serde::Serialize;

use forge_core::config_validate::ConfigValidationResult;
use forge_core::docs::{DocPage, DocSummary, DocsError};
use forge_core::{Artifact, TestEnvironment, TestReport, TestReportStatus};

use crate::error::ExitStatus;

pub mod build;
pub mod config;
pub mod docs;
pub mod list;
pub mod test;
pub mod test_all;

/// Every shape a command can hand back to the formatter, tagged so JSON/YAML output
/// stays self-describing.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandResult {
    Build {
        artifacts: Vec<Artifact>,
        skipped: Vec<SkippedArtifact>,
    },
    TestRun {
        report: TestReport,
    },
    TestList {
        reports: Vec<TestReport>,
    },
    TestGet {
        report: TestReport,
    },
    TestDeleted {
        id: String,
    },
    TestEnvCreated {
        id: String,
    },
    TestEnvList {
        environments: Vec<TestEnvironment>,
    },
    TestEnvGet {
        environment: TestEnvironment,
    },
    TestEnvDeleted {
        id: String,
    },
    TestAll {
        build_artifacts: Vec<Artifact>,
        test_reports: Vec<TestReport>,
        stopped_early: bool,
    },
    List {
        build: Vec<String>,
        test: Vec<String>,
    },
    ConfigValidate {
        result: ConfigValidationResult,
    },
    DocsList {
        pages: Vec<DocSummary>,
        errors: Vec<DocsErrorEntry>,
    },
    DocsGet {
        page: DocPage,
    },
}

#[derive(Debug, Serialize)]
pub struct SkippedArtifact {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct DocsErrorEntry {
    pub engine: String,
    pub message: String,
}

impl From<DocsError> for DocsErrorEntry {
    fn from(err: DocsError) -> Self {
        Self { engine: err.engine, message: err.message }
    }
}

impl CommandResult {
    /// Maps each result shape to an exit status. Command-level
    /// failures (engine errors, missing specs) already surface as `CliError` before a
    /// `CommandResult` exists; this only covers "successful call, unsuccessful outcome"
    /// cases such as a failed test run or an invalid config.
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            CommandResult::TestRun { report } | CommandResult::TestGet { report } => {
                status_for_report(report)
            }
            CommandResult::TestAll { stopped_early, .. } => {
                if *stopped_early {
                    ExitStatus::Data
                } else {
                    ExitStatus::Ok
                }
            }
            CommandResult::ConfigValidate { result } => {
                if result.valid {
                    ExitStatus::Ok
                } else {
                    ExitStatus::Data
                }
            }
            CommandResult::DocsList { errors, .. } => {
                if errors.is_empty() {
                    ExitStatus::Ok
                } else {
                    ExitStatus::Software
                }
            }
            _ => ExitStatus::Ok,
        }
    }
}

fn status_for_report(report: &TestReport) -> ExitStatus {
    match report.status {
        TestReportStatus::Passed => ExitStatus::Ok,
        TestReportStatus::Failed => ExitStatus::Data,
    }
}
