//! MCP tool surface: one tool per command-router verb, each a thin
//! wrapper over the same `forge-core` entry points `forge-cli`'s commands call —
//! neither front-end owns any orchestration logic of its own.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::{Json, Parameters};
use rmcp::{tool, tool_router};

use forge_core::config_validate::{validate_config, ConfigValidationResult};
use forge_core::docs::{get_doc, list_docs, DocPage, DocSummary, DocsError};
use forge_core::orchestrator::build::run_build;
use forge_core::orchestrator::test::{test_all as run_test_all, test_run as run_test_stage};
use forge_core::orchestrator::testenv::{create_testenv, delete_testenv};
use forge_core::{store, Artifact, ForgeError, TestEnvironment, TestReport};

use crate::error::{to_mcp_error, McpError};
use crate::server::ForgeMcpServer;

pub(crate) fn build_tool_router() -> ToolRouter<ForgeMcpServer> {
    ForgeMcpServer::tool_router()
}

/// `build [name] [--force]`.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct BuildArgs {
    /// Build only this artifact; omit to build every declared `BuildSpec`.
    #[serde(default)]
    pub name: Option<String>,
    /// Rebuild even if the Dependency Gate would otherwise skip.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct SkippedArtifact {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct BuildResult {
    pub artifacts: Vec<Artifact>,
    pub skipped: Vec<SkippedArtifact>,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct StageArgs {
    pub stage: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct TestRunArgs {
    pub stage: String,
    /// Existing test environment id; omit to create one via the Testenv Orchestrator.
    #[serde(default, rename = "testId")]
    pub test_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct StageIdArgs {
    pub stage: String,
    pub id: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct DeletedResult {
    pub id: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct CreatedEnvResult {
    pub id: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct TestAllResult {
    #[serde(rename = "buildArtifacts")]
    pub build_artifacts: Vec<Artifact>,
    #[serde(rename = "testReports")]
    pub test_reports: Vec<TestReport>,
    #[serde(rename = "stoppedEarly")]
    pub stopped_early: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct ListArgs {
    /// Restrict the enumeration to `build` or `test`; omit for both.
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ListResult {
    pub build: Vec<String>,
    pub test: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct DocsListArgs {
    /// Restrict to one engine's docs; omit or pass `"all"` for every engine.
    #[serde(default)]
    pub engine: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct DocsListResult {
    pub pages: Vec<DocSummary>,
    pub errors: Vec<DocsError>,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct DocsGetArgs {
    pub name: String,
}

#[tool_router]
impl ForgeMcpServer {
    #[tool(
        name = "build",
        description = "Build all or one declared artifact, honoring the Dependency Gate unless `force` is set."
    )]
    pub(crate) async fn build(&self, Parameters(args): Parameters<BuildArgs>) -> Result<Json<BuildResult>, McpError> {
        let result = run_build(
            &self.project,
            &self.store_path,
            args.name.as_deref(),
            args.force,
            &self.root_dir,
            &self.forge_version,
        )
        .map_err(to_mcp_error)?;

        Ok(Json(BuildResult {
            artifacts: result.artifacts,
            skipped: result
                .skipped
                .into_iter()
                .map(|(name, reason)| SkippedArtifact { name, reason })
                .collect(),
        }))
    }

    #[tool(
        name = "test_run",
        description = "Run a declared test stage, creating a managed test environment first unless `testId` is given."
    )]
    pub(crate) async fn test_run(
        &self,
        Parameters(args): Parameters<TestRunArgs>,
    ) -> Result<Json<TestReport>, McpError> {
        let report = run_test_stage(
            &self.project,
            &self.store_path,
            &args.stage,
            args.test_id.as_deref(),
            &self.root_dir,
            &self.forge_version,
        )
        .map_err(to_mcp_error)?;
        Ok(Json(report))
    }

    #[tool(name = "test_list", description = "List persisted test reports for a stage.")]
    pub(crate) async fn test_list(
        &self,
        Parameters(args): Parameters<StageArgs>,
    ) -> Result<Json<Vec<TestReport>>, McpError> {
        let doc = store::read_or_create_store(self.store_path.as_path()).map_err(to_mcp_error)?;
        let reports = store::list_test_reports(&doc, Some(&args.stage)).into_iter().cloned().collect();
        Ok(Json(reports))
    }

    #[tool(name = "test_get", description = "Fetch one persisted test report by stage and id.")]
    pub(crate) async fn test_get(
        &self,
        Parameters(args): Parameters<StageIdArgs>,
    ) -> Result<Json<TestReport>, McpError> {
        let doc = store::read_or_create_store(self.store_path.as_path()).map_err(to_mcp_error)?;
        let report = store::get_test_report(&doc, &args.id)
            .filter(|r| r.stage == args.stage)
            .cloned()
            .ok_or_else(|| to_mcp_error(ForgeError::NotFound(format!("test report `{}` for stage `{}`", args.id, args.stage))))?;
        Ok(Json(report))
    }

    #[tool(name = "test_delete", description = "Atomically delete a persisted test report.")]
    pub(crate) async fn test_delete(
        &self,
        Parameters(args): Parameters<StageIdArgs>,
    ) -> Result<Json<DeletedResult>, McpError> {
        let doc = store::read_or_create_store(self.store_path.as_path()).map_err(to_mcp_error)?;
        store::get_test_report(&doc, &args.id)
            .filter(|r| r.stage == args.stage)
            .ok_or_else(|| to_mcp_error(ForgeError::NotFound(format!("test report `{}` for stage `{}`", args.id, args.stage))))?;
        store::atomic_delete_test_report(self.store_path.as_path(), &args.id).map_err(to_mcp_error)?;
        Ok(Json(DeletedResult { id: args.id }))
    }

    #[tool(
        name = "test_create_env",
        description = "Create a managed test environment for a stage via the Testenv Orchestrator."
    )]
    pub(crate) async fn test_create_env(
        &self,
        Parameters(args): Parameters<StageArgs>,
    ) -> Result<Json<CreatedEnvResult>, McpError> {
        let test_spec = self
            .project
            .find_test(&args.stage)
            .ok_or_else(|| to_mcp_error(ForgeError::NotFound(format!("no test stage named `{}`", args.stage))))?;
        let environment = create_testenv(
            &self.project,
            &self.store_path,
            test_spec,
            &self.root_dir,
            &self.forge_version,
            &BTreeMap::new(),
        )
        .map_err(to_mcp_error)?;
        Ok(Json(CreatedEnvResult { id: environment.id }))
    }

    #[tool(name = "test_list_env", description = "List managed test environments for a stage.")]
    pub(crate) async fn test_list_env(
        &self,
        Parameters(args): Parameters<StageArgs>,
    ) -> Result<Json<Vec<TestEnvironment>>, McpError> {
        let doc = store::read_or_create_store(self.store_path.as_path()).map_err(to_mcp_error)?;
        let environments = store::list_test_environments(&doc, Some(&args.stage)).into_iter().cloned().collect();
        Ok(Json(environments))
    }

    #[tool(name = "test_get_env", description = "Fetch one managed test environment by stage and id.")]
    pub(crate) async fn test_get_env(
        &self,
        Parameters(args): Parameters<StageIdArgs>,
    ) -> Result<Json<TestEnvironment>, McpError> {
        let doc = store::read_or_create_store(self.store_path.as_path()).map_err(to_mcp_error)?;
        let environment = store::get_test_environment(&doc, &args.id)
            .filter(|e| e.name == args.stage)
            .cloned()
            .ok_or_else(|| {
                to_mcp_error(ForgeError::NotFound(format!(
                    "test environment `{}` for stage `{}`",
                    args.id, args.stage
                )))
            })?;
        Ok(Json(environment))
    }

    #[tool(
        name = "test_delete_env",
        description = "Atomically delete a managed test environment and its managed resources."
    )]
    pub(crate) async fn test_delete_env(
        &self,
        Parameters(args): Parameters<StageIdArgs>,
    ) -> Result<Json<DeletedResult>, McpError> {
        let doc = store::read_or_create_store(self.store_path.as_path()).map_err(to_mcp_error)?;
        store::get_test_environment(&doc, &args.id)
            .filter(|e| e.name == args.stage)
            .ok_or_else(|| {
                to_mcp_error(ForgeError::NotFound(format!(
                    "test environment `{}` for stage `{}`",
                    args.id, args.stage
                )))
            })?;
        let test_spec = self
            .project
            .find_test(&args.stage)
            .ok_or_else(|| to_mcp_error(ForgeError::NotFound(format!("no test stage named `{}`", args.stage))))?;
        delete_testenv(&self.project, &self.store_path, test_spec, &args.id, &self.forge_version).map_err(to_mcp_error)?;
        Ok(Json(DeletedResult { id: args.id }))
    }

    #[tool(
        name = "test_all",
        description = "Build everything, then run every declared test stage in order, stopping at the first failure."
    )]
    pub(crate) async fn test_all(&self) -> Result<Json<TestAllResult>, McpError> {
        let result = run_test_all(&self.project, &self.store_path, &self.root_dir, &self.forge_version)
            .map_err(to_mcp_error)?;
        Ok(Json(TestAllResult {
            build_artifacts: result.build_artifacts,
            test_reports: result.test_reports,
            stopped_early: result.stopped_early,
        }))
    }

    #[tool(name = "list", description = "Enumerate declared build/test targets straight from the project spec.")]
    pub(crate) async fn list(&self, Parameters(args): Parameters<ListArgs>) -> Result<Json<ListResult>, McpError> {
        let want_build = matches!(args.filter.as_deref(), None | Some("build"));
        let want_test = matches!(args.filter.as_deref(), None | Some("test"));
        Ok(Json(ListResult {
            build: if want_build { self.project.build.iter().map(|b| b.name.clone()).collect() } else { Vec::new() },
            test: if want_test { self.project.test.iter().map(|t| t.name.clone()).collect() } else { Vec::new() },
        }))
    }

    #[tool(
        name = "config_validate",
        description = "Fan out `config-validate` to every referenced engine and aggregate the results."
    )]
    pub(crate) async fn config_validate(&self) -> Result<Json<ConfigValidationResult>, McpError> {
        let config_path = self.root_dir.join("forge.yaml");
        let result = validate_config(&self.project, &config_path, &self.forge_version).map_err(to_mcp_error)?;
        Ok(Json(result))
    }

    #[tool(name = "docs_list", description = "Enumerate documentation pages published by referenced engines.")]
    pub(crate) async fn docs_list(
        &self,
        Parameters(args): Parameters<DocsListArgs>,
    ) -> Result<Json<DocsListResult>, McpError> {
        let filter = args.engine.filter(|e| e != "all");
        let result = list_docs(&self.project, &self.root_dir, filter.as_deref(), &self.forge_version);
        Ok(Json(DocsListResult { pages: result.pages, errors: result.errors }))
    }

    #[tool(name = "docs_get", description = "Fetch one documentation page's full body.")]
    pub(crate) async fn docs_get(&self, Parameters(args): Parameters<DocsGetArgs>) -> Result<Json<DocPage>, McpError> {
        let page = get_doc(&self.project, &self.root_dir, &args.name, &self.forge_version).map_err(to_mcp_error)?;
        Ok(Json(page))
    }
}
