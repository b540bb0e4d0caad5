//! MCP front-end over `forge-core`: exposes the same
//! build/test/list/config/docs operations as `forge-cli`'s subcommand tree, as MCP
//! tools served over stdio. Neither front-end owns orchestration logic of its own —
//! both are thin callers into `forge-core`.

mod error;
mod server;
mod tools;

use std::path::PathBuf;

use rmcp::ServiceExt;
use rmcp::transport::io::stdio;

use forge_core::ProjectSpec;

pub use error::{to_mcp_error, ForgeMcpError, McpError};
pub use server::ForgeMcpServer;

/// Builds a `ForgeMcpServer` over `project` and serves it on stdio until the peer
/// disconnects. Blocks the calling thread on a dedicated Tokio runtime, mirroring how
/// `forge-cli` blocks on every other subcommand.
pub fn run_stdio_server(
    project: ProjectSpec,
    store_path: PathBuf,
    root_dir: PathBuf,
    forge_version: String,
) -> Result<(), ForgeMcpError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(ForgeMcpError::Io)?;

    runtime.block_on(async move {
        let server = ForgeMcpServer::new(project, store_path, root_dir, forge_version);
        tracing::info!("starting MCP server on stdio");
        let running = server
            .serve(stdio())
            .await
            .map_err(|e| ForgeMcpError::Transport(e.to_string()))?;
        running.waiting().await.map_err(|e| ForgeMcpError::Transport(e.to_string()))?;
        tracing::info!("MCP peer disconnected");
        Ok(())
    })
}
