//! The MCP server object: bundles the loaded `ProjectSpec` and the paths every tool
//! call needs, mirroring `forge_cli::context::CliSession`. Every tool call re-reads
//! and re-locks the artifact store itself — the server holds no store state of its
//! own, exactly like the CLI, so a long-lived MCP session observes the same
//! lazy-rebuild and merge-write semantics as a fresh `forge` invocation would.

use std::path::PathBuf;
use std::sync::Arc;

use rmcp::ServerHandler;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo};
use rmcp::tool_handler;

use forge_core::ProjectSpec;

use crate::tools;

#[derive(Clone)]
pub struct ForgeMcpServer {
    pub(crate) project: Arc<ProjectSpec>,
    pub(crate) store_path: Arc<PathBuf>,
    pub(crate) root_dir: Arc<PathBuf>,
    pub(crate) forge_version: Arc<String>,
    tool_router: ToolRouter<Self>,
}

impl ForgeMcpServer {
    pub fn new(project: ProjectSpec, store_path: PathBuf, root_dir: PathBuf, forge_version: String) -> Self {
        Self {
            project: Arc::new(project),
            store_path: Arc::new(store_path),
            root_dir: Arc::new(root_dir),
            forge_version: Arc::new(forge_version),
            tool_router: tools::build_tool_router(),
        }
    }
}

#[tool_handler]
impl ServerHandler for ForgeMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "forge".into(),
                version: (*self.forge_version).clone(),
                ..Default::default()
            },
            instructions: Some(
                "Forge build-and-test orchestrator: build, test run/list/get/delete, \
test create-env/list-env/get-env/delete-env, test-all, list, config validate, and \
docs list/get — the same operations exposed by the `forge` CLI."
                    .to_string(),
            ),
        }
    }
}
