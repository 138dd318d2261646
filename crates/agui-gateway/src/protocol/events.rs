// Protocol events
//
// The closed set of events a run emits. Serialized as a flat object with a
// SCREAMING_SNAKE_CASE `type` tag and a millisecond `timestamp`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::messages::{Message, Role};

/// One event plus its emission time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolEvent {
	#[serde(flatten)]
	pub kind: EventKind,
	/// Milliseconds since the unix epoch
	pub timestamp: u64,
}

impl ProtocolEvent {
	pub fn new(kind: EventKind) -> Self {
		Self {
			kind,
			timestamp: now_millis(),
		}
	}

	pub fn name(&self) -> &'static str {
		self.kind.name()
	}
}

impl From<EventKind> for ProtocolEvent {
	fn from(kind: EventKind) -> Self {
		Self::new(kind)
	}
}

pub fn now_millis() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_millis() as u64)
		.unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
	// Lifecycle
	#[serde(rename_all = "camelCase")]
	RunStarted { thread_id: String, run_id: String },
	#[serde(rename_all = "camelCase")]
	RunFinished {
		thread_id: String,
		run_id: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		result: Option<Value>,
	},
	#[serde(rename_all = "camelCase")]
	RunError {
		message: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		code: Option<String>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		run_id: Option<String>,
	},
	#[serde(rename_all = "camelCase")]
	StepStarted { step_name: String },
	#[serde(rename_all = "camelCase")]
	StepFinished { step_name: String },

	// Text
	#[serde(rename_all = "camelCase")]
	TextMessageStart { message_id: String, role: Role },
	#[serde(rename_all = "camelCase")]
	TextMessageContent { message_id: String, delta: String },
	#[serde(rename_all = "camelCase")]
	TextMessageEnd { message_id: String },

	// Tool calls
	#[serde(rename_all = "camelCase")]
	ToolCallStart {
		tool_call_id: String,
		tool_call_name: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		parent_message_id: Option<String>,
	},
	#[serde(rename_all = "camelCase")]
	ToolCallArgs { tool_call_id: String, delta: String },
	#[serde(rename_all = "camelCase")]
	ToolCallEnd { tool_call_id: String },

	// Snapshots
	StateSnapshot { snapshot: Value },
	MessagesSnapshot { messages: Vec<Message> },

	// Extension
	Custom { name: String, value: Value },
	Raw {
		event: Value,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		source: Option<String>,
	},
}

impl EventKind {
	pub fn name(&self) -> &'static str {
		match self {
			EventKind::RunStarted { .. } => "RUN_STARTED",
			EventKind::RunFinished { .. } => "RUN_FINISHED",
			EventKind::RunError { .. } => "RUN_ERROR",
			EventKind::StepStarted { .. } => "STEP_STARTED",
			EventKind::StepFinished { .. } => "STEP_FINISHED",
			EventKind::TextMessageStart { .. } => "TEXT_MESSAGE_START",
			EventKind::TextMessageContent { .. } => "TEXT_MESSAGE_CONTENT",
			EventKind::TextMessageEnd { .. } => "TEXT_MESSAGE_END",
			EventKind::ToolCallStart { .. } => "TOOL_CALL_START",
			EventKind::ToolCallArgs { .. } => "TOOL_CALL_ARGS",
			EventKind::ToolCallEnd { .. } => "TOOL_CALL_END",
			EventKind::StateSnapshot { .. } => "STATE_SNAPSHOT",
			EventKind::MessagesSnapshot { .. } => "MESSAGES_SNAPSHOT",
			EventKind::Custom { .. } => "CUSTOM",
			EventKind::Raw { .. } => "RAW",
		}
	}

	/// True for RUN_FINISHED and RUN_ERROR
	pub fn is_terminal(&self) -> bool {
		matches!(self, EventKind::RunFinished { .. } | EventKind::RunError { .. })
	}

	pub fn is_text(&self) -> bool {
		matches!(
			self,
			EventKind::TextMessageStart { .. }
				| EventKind::TextMessageContent { .. }
				| EventKind::TextMessageEnd { .. }
		)
	}

	pub fn is_tool_call(&self) -> bool {
		matches!(
			self,
			EventKind::ToolCallStart { .. } | EventKind::ToolCallArgs { .. } | EventKind::ToolCallEnd { .. }
		)
	}

	pub fn run_error(code: impl Into<String>, message: impl Into<String>, run_id: Option<String>) -> Self {
		EventKind::RunError {
			message: message.into(),
			code: Some(code.into()),
			run_id,
		}
	}
}
