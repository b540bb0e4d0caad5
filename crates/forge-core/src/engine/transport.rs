//! Engine Transport: a one-shot JSON-RPC 2.0 exchange over a freshly-spawned
//! subprocess's stdio, using the LSP-style `Content-Length:` framing and MCP
//! tool-call semantics. Every call spawns and tears down its own subprocess — no
//! persistent engine connections.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::engine::resolver::ResolvedCommand;
use crate::error::{ForgeError, Result};
use crate::model::Artifact;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<JsonValue>,
    error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ToolCallResult {
    #[serde(default)]
    content: Vec<ToolContent>,
    #[serde(default, rename = "isError")]
    is_error: bool,
    #[serde(default, rename = "structuredContent")]
    structured_content: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ToolContent {
    Text { text: String },
    #[serde(other)]
    Other,
}

/// The outcome of a single `tools/call`, before artifact decoding.
pub struct ToolCallOutcome {
    pub is_error: bool,
    pub text_blocks: Vec<String>,
    pub structured_content: Option<JsonValue>,
}

impl ToolCallOutcome {
    /// The value consumers decode: `structuredContent` if present, otherwise the
    /// first text block parsed as JSON.
    pub fn payload(&self) -> Result<JsonValue> {
        if let Some(structured) = &self.structured_content {
            return Ok(structured.clone());
        }
        let first = self
            .text_blocks
            .first()
            .ok_or_else(|| ForgeError::Engine("tool call returned no content".into()))?;
        serde_json::from_str(first)
            .map_err(|e| ForgeError::Engine(format!("tool call returned non-JSON text content: {e}")))
    }
}

/// Loads `KEY=VALUE` lines from an env file, ignoring blank lines and `#` comments.
pub fn load_env_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let raw = std::fs::read_to_string(path)?;
    let mut out = BTreeMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            out.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    Ok(out)
}

/// Spawns the resolved command and performs `initialize` followed by a single
/// `tools/call`, returning the parsed outcome. `cwd` is used unless the resolved
/// command carries its own `work_dir` (an alias `Builder` sub-spec override).
pub fn call_tool(
    resolved: &ResolvedCommand,
    cwd: &Path,
    tool_name: &str,
    arguments: JsonValue,
) -> Result<ToolCallOutcome> {
    let mut command = Command::new(&resolved.command);
    command.args(&resolved.args);
    command.current_dir(resolved.work_dir.as_deref().map(Path::new).unwrap_or(cwd));

    if let Some(env_file) = &resolved.env_file {
        for (k, v) in load_env_file(Path::new(env_file))? {
            command.env(k, v);
        }
    }
    for (k, v) in &resolved.env {
        command.env(k, v);
    }

    command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::inherit());

    let mut child = command
        .spawn()
        .map_err(|e| ForgeError::Engine(format!("failed to spawn `{}`: {e}", resolved.command)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| ForgeError::Engine("missing child stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ForgeError::Engine("missing child stdout".into()))?;

    let outcome = run_exchange(stdin, stdout, tool_name, arguments, &mut child);
    let _ = child.kill();
    let _ = child.wait();
    outcome
}

fn run_exchange(
    mut stdin: ChildStdin,
    stdout: ChildStdout,
    tool_name: &str,
    arguments: JsonValue,
    child: &mut Child,
) -> Result<ToolCallOutcome> {
    let mut reader = BufReader::new(stdout);

    send_request(&mut stdin, 1, "initialize", Some(serde_json::json!({})))?;
    let _ = read_response(&mut reader)?;

    let params = serde_json::json!({ "name": tool_name, "arguments": arguments });
    send_request(&mut stdin, 2, "tools/call", Some(params))?;
    let response = read_response(&mut reader)?;

    if let Some(error) = response.error {
        return Err(ForgeError::Engine(format!(
            "engine `{}` tool `{tool_name}` failed: {}",
            child.id(),
            error.message
        )));
    }

    let result = response
        .result
        .ok_or_else(|| ForgeError::Engine(format!("tool `{tool_name}` returned no result")))?;
    let parsed: ToolCallResult = serde_json::from_value(result)
        .map_err(|e| ForgeError::Engine(format!("invalid tools/call payload for {tool_name}: {e}")))?;

    let text_blocks = parsed
        .content
        .into_iter()
        .filter_map(|c| match c {
            ToolContent::Text { text } => Some(text),
            ToolContent::Other => None,
        })
        .collect();

    Ok(ToolCallOutcome {
        is_error: parsed.is_error,
        text_blocks,
        structured_content: parsed.structured_content,
    })
}

fn send_request(stdin: &mut ChildStdin, id: u64, method: &str, params: Option<JsonValue>) -> Result<()> {
    let request = JsonRpcRequest { jsonrpc: "2.0", id, method, params };
    let payload = serde_json::to_vec(&request)?;
    let header = format!("Content-Length: {}\r\n\r\n", payload.len());
    stdin
        .write_all(header.as_bytes())
        .and_then(|_| stdin.write_all(&payload))
        .and_then(|_| stdin.flush())
        .map_err(|e| ForgeError::Engine(format!("stdio write failed: {e}")))
}

fn read_response(reader: &mut BufReader<ChildStdout>) -> Result<JsonRpcResponse> {
    let mut content_length: Option<usize> = None;
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader
            .read_line(&mut line)
            .map_err(|e| ForgeError::Engine(format!("stdio read failed: {e}")))?;
        if bytes == 0 {
            return Err(ForgeError::Engine("engine closed stdio unexpectedly".into()));
        }
        if line.trim().is_empty() {
            break;
        }
        if let Some(value) = line.strip_prefix("Content-Length:") {
            content_length = Some(
                value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| ForgeError::Engine("invalid Content-Length header".into()))?,
            );
        }
    }
    let len = content_length.ok_or_else(|| ForgeError::Engine("missing Content-Length header".into()))?;
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .map_err(|e| ForgeError::Engine(format!("stdio read failed: {e}")))?;
    serde_json::from_slice(&buf).map_err(|e| ForgeError::Engine(format!("invalid json-rpc response: {e}")))
}

#[derive(Debug, Deserialize)]
struct BatchResult {
    artifacts: Vec<Artifact>,
}

/// Decodes a tool-call payload into one or more `Artifact`s, trying in order:
/// `BatchResult{artifacts:[...]}`, a single `Artifact` (requires non-empty `name`),
/// then a bare sequence of `Artifact`. The first successful decode wins.
pub fn parse_artifacts(payload: &JsonValue) -> Result<Vec<Artifact>> {
    if let Ok(batch) = serde_json::from_value::<BatchResult>(payload.clone()) {
        return Ok(batch.artifacts);
    }
    if let Ok(single) = serde_json::from_value::<Artifact>(payload.clone()) {
        if !single.name.is_empty() {
            return Ok(vec![single]);
        }
    }
    if let Ok(seq) = serde_json::from_value::<Vec<Artifact>>(payload.clone()) {
        return Ok(seq);
    }
    Err(ForgeError::Engine(format!(
        "unparseable artifact payload: {payload}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_batch_result_first() {
        let payload = serde_json::json!({
            "artifacts": [
                {"name": "app", "type": "binary", "location": "/bin/app", "timestamp": "t", "version": "v1"}
            ]
        });
        let artifacts = parse_artifacts(&payload).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].name, "app");
    }

    #[test]
    fn parses_single_artifact_with_non_empty_name() {
        let payload = serde_json::json!({
            "name": "app", "type": "binary", "location": "/bin/app", "timestamp": "t", "version": "v1"
        });
        let artifacts = parse_artifacts(&payload).unwrap();
        assert_eq!(artifacts.len(), 1);
    }

    #[test]
    fn parses_bare_sequence() {
        let payload = serde_json::json!([
            {"name": "a", "type": "binary", "location": "/bin/a", "timestamp": "t", "version": "v1"},
            {"name": "b", "type": "binary", "location": "/bin/b", "timestamp": "t", "version": "v1"}
        ]);
        let artifacts = parse_artifacts(&payload).unwrap();
        assert_eq!(artifacts.len(), 2);
    }

    #[test]
    fn unparseable_payload_errors() {
        let payload = serde_json::json!({"unrelated": true});
        assert!(parse_artifacts(&payload).is_err());
    }

    #[test]
    fn load_env_file_skips_comments_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "# comment\n\nFOO=bar\nBAZ=qux\n").unwrap();
        let env = load_env_file(&path).unwrap();
        assert_eq!(env.get("FOO"), Some(&"bar".to_string()));
        assert_eq!(env.get("BAZ"), Some(&"qux".to_string()));
        assert_eq!(env.len(), 2);
    }
}
