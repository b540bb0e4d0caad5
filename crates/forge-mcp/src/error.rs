use std::fmt;

use rmcp::model::ErrorData;

pub type McpError = ErrorData;

pub fn to_mcp_error(err: forge_core::ForgeError) -> McpError {
    ErrorData::internal_error(err.to_string(), None)
}

pub fn invalid_params(message: impl Into<String>) -> McpError {
    ErrorData::invalid_params(message.into(), None)
}

/// Top-level error surfaced by `run_stdio_server`, before any individual tool call
/// runs — transport/runtime setup only.
#[derive(Debug)]
pub enum ForgeMcpError {
    Io(std::io::Error),
    Transport(String),
}

impl From<std::io::Error> for ForgeMcpError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl fmt::Display for ForgeMcpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForgeMcpError::Io(err) => write!(f, "io error: {err}"),
            ForgeMcpError::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl std::error::Error for ForgeMcpError {}
