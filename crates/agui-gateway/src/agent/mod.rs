// Agents
//
// An agent turns one run's input into streamed text and tool calls through a
// `RunContext`. The gateway owns the run lifecycle events; the agent reports how
// the run went in its `AgentOutcome`.

mod echo;
#[cfg(any(test, feature = "testing"))]
mod scripted;

pub use echo::EchoAgent;
#[cfg(any(test, feature = "testing"))]
pub use scripted::{ScriptedAgent, ScriptedTurn};

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::error::AdmissionError;
use crate::protocol::{ContextItem, ForwardedProps, Message};
use crate::run::RunContext;
use crate::tools::ToolDefinition;

/// What an agent receives for one run
#[derive(Debug, Clone, Default)]
pub struct AgentInput {
	pub thread_id: String,
	pub run_id: String,
	/// Full conversation history, ending with the current turn
	pub messages: Vec<Message>,
	pub tools: Vec<ToolDefinition>,
	pub state: Value,
	pub context: Vec<ContextItem>,
	pub system_prompt: Option<String>,
	pub forwarded_props: ForwardedProps,
}

impl AgentInput {
	pub fn last_user_message(&self) -> Option<&str> {
		self
			.messages
			.iter()
			.rev()
			.find(|m| m.is_user())
			.and_then(|m| m.content.as_deref())
	}
}

/// Coded failure categories sent to clients instead of free text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentErrorCode {
	/// The upstream model provider is overloaded
	Overloaded,
	/// The upstream model provider rate limited the request
	RateLimited,
	#[default]
	Unknown,
}

impl AgentErrorCode {
	pub fn as_str(&self) -> &'static str {
		match self {
			AgentErrorCode::Overloaded => "overloaded_error",
			AgentErrorCode::RateLimited => "rate_limit_error",
			AgentErrorCode::Unknown => "unknown_error",
		}
	}

	/// Classify an upstream failure from its HTTP status and message
	pub fn classify(status: Option<u16>, message: &str) -> Self {
		let message = message.to_ascii_lowercase();
		match status {
			Some(529) | Some(503) => AgentErrorCode::Overloaded,
			Some(429) => AgentErrorCode::RateLimited,
			_ if message.contains("overloaded") => AgentErrorCode::Overloaded,
			_ if message.contains("rate limit") || message.contains("rate_limit") => AgentErrorCode::RateLimited,
			_ => AgentErrorCode::Unknown,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentError {
	pub code: AgentErrorCode,
	/// Logged, never sent to the client
	pub detail: String,
}

impl AgentError {
	pub fn new(code: AgentErrorCode, detail: impl Into<String>) -> Self {
		Self {
			code,
			detail: detail.into(),
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct AgentOutcome {
	pub success: bool,
	pub error: Option<AgentError>,
	/// History to keep for the next turn on this thread
	pub conversation_history: Vec<Message>,
	/// Carried on RUN_FINISHED
	pub result: Option<Value>,
}

impl AgentOutcome {
	pub fn completed(conversation_history: Vec<Message>) -> Self {
		Self {
			success: true,
			error: None,
			conversation_history,
			result: None,
		}
	}

	pub fn failed(error: AgentError) -> Self {
		Self {
			success: false,
			error: Some(error),
			conversation_history: Vec::new(),
			result: None,
		}
	}

	pub fn with_result(mut self, result: Value) -> Self {
		self.result = Some(result);
		self
	}
}

#[async_trait]
pub trait Agent: Send + Sync {
	async fn run(&self, input: AgentInput, run: &mut RunContext) -> AgentOutcome;
}

/// Directory entry sent to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
	pub id: String,
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub annotation: Option<String>,
}

impl AgentInfo {
	pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			name: name.into(),
			annotation: None,
		}
	}

	pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
		self.annotation = Some(annotation.into());
		self
	}
}

/// Agents available to clients, in registration order
#[derive(Clone, Default)]
pub struct AgentRegistry {
	agents: IndexMap<String, (AgentInfo, Arc<dyn Agent>)>,
	default_agent: Option<String>,
}

impl std::fmt::Debug for AgentRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AgentRegistry")
			.field("agents", &self.agents.keys().collect::<Vec<_>>())
			.field("default_agent", &self.default_agent)
			.finish()
	}
}

impl AgentRegistry {
	pub fn register(&mut self, info: AgentInfo, agent: Arc<dyn Agent>) {
		let id = info.id.clone();
		if self.agents.insert(id.clone(), (info, agent)).is_some() {
			tracing::warn!(target: "gateway", agent = %id, "agent registered twice, keeping the last one");
		}
	}

	/// Set the default agent. Without one, the first registered agent is the default.
	pub fn set_default(&mut self, id: impl Into<String>) {
		self.default_agent = Some(id.into());
	}

	pub fn default_id(&self) -> Option<&str> {
		self
			.default_agent
			.as_deref()
			.filter(|id| self.agents.contains_key(*id))
			.or_else(|| self.agents.keys().next().map(String::as_str))
	}

	pub fn is_empty(&self) -> bool {
		self.agents.is_empty()
	}

	pub fn ids(&self) -> Vec<String> {
		self.agents.keys().cloned().collect()
	}

	pub fn directory(&self) -> Vec<AgentInfo> {
		self.agents.values().map(|(info, _)| info.clone()).collect()
	}

	/// The requested agent, or the default when none is requested
	pub fn resolve(&self, requested: Option<&str>) -> Result<(AgentInfo, Arc<dyn Agent>), AdmissionError> {
		let id = match requested {
			Some(id) => id,
			None => self.default_id().ok_or(AdmissionError::NoAgents)?,
		};
		self
			.agents
			.get(id)
			.map(|(info, agent)| (info.clone(), agent.clone()))
			.ok_or_else(|| AdmissionError::UnknownAgent {
				requested: id.to_string(),
				available: self.ids(),
			})
	}
}
