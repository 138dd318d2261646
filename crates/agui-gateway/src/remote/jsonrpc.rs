// JSON-RPC 2.0 wire types for remote tool servers
//
// Methods: `tools/list` (no params) and `tools/call` ({name, arguments}).
// Responses arrive either as a JSON body or as a `text/event-stream` whose
// `data:` lines carry the envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::RemoteToolError;

pub const METHOD_LIST_TOOLS: &str = "tools/list";
pub const METHOD_CALL_TOOL: &str = "tools/call";

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a> {
	pub jsonrpc: &'static str,
	pub id: u64,
	pub method: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub params: Option<Value>,
}

impl<'a> JsonRpcRequest<'a> {
	pub fn new(id: u64, method: &'a str, params: Option<Value>) -> Self {
		Self {
			jsonrpc: "2.0",
			id,
			method,
			params,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
	#[serde(default)]
	pub id: Option<Value>,
	#[serde(default)]
	pub result: Option<Value>,
	#[serde(default)]
	pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
	pub code: i64,
	pub message: String,
}

impl JsonRpcResponse {
	pub fn into_result(self) -> Result<Value, RemoteToolError> {
		if let Some(err) = self.error {
			return Err(RemoteToolError::Rpc {
				code: err.code,
				message: err.message,
			});
		}
		self
			.result
			.ok_or_else(|| RemoteToolError::invalid_response("response has neither result nor error"))
	}
}

/// A tool as listed by `tools/list`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTool {
	pub name: String,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub input_schema: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
	#[serde(default)]
	pub tools: Vec<RemoteTool>,
}

/// Pick the JSON-RPC envelope out of an SSE body: the first `data:` payload that parses
pub fn parse_sse_body(body: &str) -> Result<JsonRpcResponse, RemoteToolError> {
	body
		.lines()
		.filter_map(|line| line.strip_prefix("data:"))
		.map(str::trim)
		.filter(|data| !data.is_empty())
		.find_map(|data| serde_json::from_str::<JsonRpcResponse>(data).ok())
		.ok_or_else(|| RemoteToolError::invalid_response("event stream carried no JSON-RPC response"))
}

/// Turn a `tools/call` result into the value handed back to the agent.
///
/// The first text content block is parsed as JSON; text that is not JSON is
/// wrapped as `{"text": ...}`. A result flagged `isError` becomes an error.
pub fn extract_tool_output(result: Value) -> Result<Value, RemoteToolError> {
	let first_text = result
		.get("content")
		.and_then(Value::as_array)
		.and_then(|blocks| {
			blocks
				.iter()
				.find(|b| b.get("type").and_then(Value::as_str) == Some("text"))
		})
		.and_then(|b| b.get("text"))
		.and_then(Value::as_str)
		.map(str::to_string);

	if result.get("isError").and_then(Value::as_bool) == Some(true) {
		return Err(RemoteToolError::ToolFailed(
			first_text.unwrap_or_else(|| "tool returned isError without text".to_string()),
		));
	}

	Ok(match first_text {
		Some(text) => serde_json::from_str(&text).unwrap_or_else(|_| serde_json::json!({ "text": text })),
		None => result,
	})
}
