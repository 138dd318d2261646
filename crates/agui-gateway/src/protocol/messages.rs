// Conversation messages and connection frames

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AgentInfo;
use crate::tools::ToolDefinition;

use super::events::ProtocolEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	Developer,
	System,
	#[default]
	Assistant,
	User,
	Tool,
}

/// Provider-agnostic conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
	pub id: String,
	pub role: Role,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tool_calls: Vec<MessageToolCall>,
	/// Set on `tool` messages: the call this message answers
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageToolCall {
	pub id: String,
	#[serde(rename = "type", default = "function_type")]
	pub call_type: String,
	pub function: FunctionCall,
}

fn function_type() -> String {
	"function".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
	pub name: String,
	/// JSON-encoded arguments object
	pub arguments: String,
}

impl Message {
	fn text(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			role,
			content: Some(content.into()),
			tool_calls: Vec::new(),
			tool_call_id: None,
		}
	}

	pub fn user(id: impl Into<String>, content: impl Into<String>) -> Self {
		Self::text(id, Role::User, content)
	}

	pub fn assistant(id: impl Into<String>, content: impl Into<String>) -> Self {
		Self::text(id, Role::Assistant, content)
	}

	pub fn system(id: impl Into<String>, content: impl Into<String>) -> Self {
		Self::text(id, Role::System, content)
	}

	/// Assistant message requesting a single tool call
	pub fn tool_request(id: impl Into<String>, call_id: impl Into<String>, name: impl Into<String>, args: &Value) -> Self {
		Self {
			id: id.into(),
			role: Role::Assistant,
			content: None,
			tool_calls: vec![MessageToolCall {
				id: call_id.into(),
				call_type: function_type(),
				function: FunctionCall {
					name: name.into(),
					arguments: args.to_string(),
				},
			}],
			tool_call_id: None,
		}
	}

	/// Tool message carrying a call's result
	pub fn tool_response(id: impl Into<String>, call_id: impl Into<String>, result: &Value) -> Self {
		let content = match result {
			Value::String(s) => s.clone(),
			other => other.to_string(),
		};
		Self {
			id: id.into(),
			role: Role::Tool,
			content: Some(content),
			tool_calls: Vec::new(),
			tool_call_id: Some(call_id.into()),
		}
	}

	pub fn is_user(&self) -> bool {
		self.role == Role::User
	}
}

/// Inbound `{type, data}` envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextItem {
	pub description: String,
	pub value: String,
}

/// `run_agent` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAgentInput {
	pub thread_id: String,
	pub run_id: String,
	#[serde(default)]
	pub messages: Vec<Message>,
	#[serde(default)]
	pub tools: Vec<ToolDefinition>,
	#[serde(default)]
	pub state: Value,
	#[serde(default)]
	pub context: Vec<ContextItem>,
	#[serde(default)]
	pub forwarded_props: ForwardedProps,
}

/// Caller-supplied properties that are not part of the run itself
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardedProps {
	/// Selects a registered agent other than the default
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub agent: Option<String>,
	/// Endpoint URL pattern (exact or glob) to extra headers for remote tool servers
	#[serde(default, skip_serializing_if = "IndexMap::is_empty")]
	pub remote_tool_headers: IndexMap<String, HashMap<String, String>>,
	#[serde(flatten)]
	pub extra: serde_json::Map<String, Value>,
}

/// `tool_result` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultInput {
	pub tool_call_id: String,
	#[serde(default)]
	pub content: Value,
}

/// `abort_run` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortRunInput {
	pub run_id: String,
}

/// Outbound `{type, data}` envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
	#[serde(rename = "type")]
	pub kind: String,
	pub data: Value,
}

impl OutboundMessage {
	pub fn new(kind: impl Into<String>, data: Value) -> Self {
		Self {
			kind: kind.into(),
			data,
		}
	}

	pub fn agents(agents: &[AgentInfo], default_agent: Option<&str>) -> Self {
		Self::new(
			super::AGENTS,
			serde_json::json!({
				"agents": agents,
				"defaultAgent": default_agent,
			}),
		)
	}

	pub fn event(event: &ProtocolEvent) -> Self {
		// ProtocolEvent only contains string keys and JSON values
		let data = serde_json::to_value(event).unwrap_or(Value::Null);
		Self::new(super::EVENT, data)
	}

	/// Decode the carried protocol event, if this is an `event` envelope
	pub fn as_event(&self) -> Option<ProtocolEvent> {
		if self.kind != super::EVENT {
			return None;
		}
		serde_json::from_value(self.data.clone()).ok()
	}
}
