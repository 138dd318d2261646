//! Plugin pipeline
//!
//! Two independent chains wrap the gateway without owning any of its state:
//!
//! * [`RunPlugin`]s hook into one agent run. Every hook returns an optional
//!   replacement; `None` leaves the value unchanged. Hooks execute in registration
//!   order and each plugin sees the previous plugin's output.
//! * [`ConnectionPlugin`]s claim inbound message types and observe connection
//!   lifecycle. A claimed type shadows any built-in handler of the same name.

mod feedback;
mod trace_store;

pub use feedback::{FEEDBACK, FEEDBACK_ACK, FEEDBACK_CONFIG, FeedbackPlugin};
pub use trace_store::{RunTraceStore, TraceStoreConfig};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::coordinator::PendingToolCall;
use crate::emitter::Outbound;
use crate::protocol::{Message, OutboundMessage};
use crate::session::SharedSession;
use crate::tools::ToolDefinition;

/// Per-run context threaded through every run hook
#[derive(Debug, Clone, Default)]
pub struct PluginContext {
	pub run_id: String,
	pub thread_id: String,
	pub agent_id: String,
	pub client_id: String,
	/// Scratch space shared by plugins within this run only
	pub store: HashMap<String, Value>,
}

impl PluginContext {
	pub fn new(
		run_id: impl Into<String>,
		thread_id: impl Into<String>,
		agent_id: impl Into<String>,
		client_id: impl Into<String>,
	) -> Self {
		Self {
			run_id: run_id.into(),
			thread_id: thread_id.into(),
			agent_id: agent_id.into(),
			client_id: client_id.into(),
			store: HashMap::new(),
		}
	}
}

/// What the agent is about to receive
#[derive(Debug, Clone, PartialEq)]
pub struct UserTurn {
	pub messages: Vec<Message>,
	pub system_prompt: Option<String>,
	pub tools: Vec<ToolDefinition>,
}

/// The finished result of a successful run
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunResult {
	pub conversation_history: Vec<Message>,
	/// Carried on RUN_FINISHED
	pub result: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallDecision {
	Continue,
	Replace(PendingToolCall),
	/// Cancel the call and skip the remaining plugins
	Skip,
}

#[async_trait]
pub trait RunPlugin: Send + Sync {
	fn name(&self) -> &str;

	async fn on_user_message(&self, _ctx: &mut PluginContext, _turn: &UserTurn) -> Option<UserTurn> {
		None
	}

	async fn on_agent_response(&self, _ctx: &mut PluginContext, _result: &RunResult) -> Option<RunResult> {
		None
	}

	async fn on_text_chunk(&self, _ctx: &mut PluginContext, _chunk: &str) -> Option<String> {
		None
	}

	async fn on_before_tool_call(&self, _ctx: &mut PluginContext, _call: &PendingToolCall) -> ToolCallDecision {
		ToolCallDecision::Continue
	}

	async fn on_after_tool_call(
		&self,
		_ctx: &mut PluginContext,
		_call: &PendingToolCall,
		_result: &Value,
	) -> Option<Value> {
		None
	}
}

/// Ordered chain of run plugins
#[derive(Clone, Default)]
pub struct RunPipeline {
	plugins: Vec<Arc<dyn RunPlugin>>,
}

impl std::fmt::Debug for RunPipeline {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_list()
			.entries(self.plugins.iter().map(|p| p.name().to_string()))
			.finish()
	}
}

impl RunPipeline {
	pub fn new(plugins: Vec<Arc<dyn RunPlugin>>) -> Self {
		Self { plugins }
	}

	pub fn push(&mut self, plugin: Arc<dyn RunPlugin>) {
		self.plugins.push(plugin);
	}

	pub fn is_empty(&self) -> bool {
		self.plugins.is_empty()
	}

	pub async fn user_message(&self, ctx: &mut PluginContext, mut turn: UserTurn) -> UserTurn {
		for plugin in &self.plugins {
			if let Some(next) = plugin.on_user_message(ctx, &turn).await {
				debug!(target: "plugins", plugin = plugin.name(), run_id = %ctx.run_id, "user turn rewritten");
				turn = next;
			}
		}
		turn
	}

	pub async fn agent_response(&self, ctx: &mut PluginContext, mut result: RunResult) -> RunResult {
		for plugin in &self.plugins {
			if let Some(next) = plugin.on_agent_response(ctx, &result).await {
				result = next;
			}
		}
		result
	}

	pub async fn text_chunk(&self, ctx: &mut PluginContext, mut chunk: String) -> String {
		for plugin in &self.plugins {
			if let Some(next) = plugin.on_text_chunk(ctx, &chunk).await {
				chunk = next;
			}
		}
		chunk
	}

	/// The call to execute, or None if a plugin skipped it
	pub async fn before_tool_call(&self, ctx: &mut PluginContext, mut call: PendingToolCall) -> Option<PendingToolCall> {
		for plugin in &self.plugins {
			match plugin.on_before_tool_call(ctx, &call).await {
				ToolCallDecision::Continue => {},
				ToolCallDecision::Replace(next) => call = next,
				ToolCallDecision::Skip => {
					debug!(target: "plugins", plugin = plugin.name(), call_id = %call.call_id, tool = %call.name, "tool call skipped");
					return None;
				},
			}
		}
		Some(call)
	}

	pub async fn after_tool_call(&self, ctx: &mut PluginContext, call: &PendingToolCall, mut result: Value) -> Value {
		for plugin in &self.plugins {
			if let Some(next) = plugin.on_after_tool_call(ctx, call, &result).await {
				result = next;
			}
		}
		result
	}
}

/// A plugin's view of one live connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
	pub client_id: String,
	pub caller_address: String,
	outbound: Outbound,
	session: SharedSession,
}

impl ConnectionHandle {
	pub fn new(session: SharedSession, outbound: Outbound) -> Self {
		let (client_id, caller_address) = {
			let s = session.lock();
			(s.client_id.clone(), s.caller_address.clone())
		};
		Self {
			client_id,
			caller_address,
			outbound,
			session,
		}
	}

	/// Send a top-level message to the client. Returns false once the connection closed.
	pub fn send(&self, message: OutboundMessage) -> bool {
		self.outbound.send(message)
	}

	pub fn thread_id(&self) -> String {
		self.session.lock().thread_id.clone()
	}

	pub fn current_run_id(&self) -> Option<String> {
		self.session.lock().current_run_id.clone()
	}
}

#[async_trait]
pub trait ConnectionPlugin: Send + Sync {
	fn name(&self) -> &str;

	/// Message types this plugin handles. Called once when the gateway is built.
	fn register_handlers(&self) -> Vec<String> {
		Vec::new()
	}

	async fn handle(&self, _conn: &ConnectionHandle, _kind: &str, _data: Value) -> anyhow::Result<()> {
		Ok(())
	}

	async fn on_connect(&self, _conn: &ConnectionHandle) {}

	async fn on_disconnect(&self, _conn: &ConnectionHandle) {}

	/// Flush on shutdown
	async fn close(&self) -> anyhow::Result<()> {
		Ok(())
	}
}

/// Connection plugins plus the message type table they claimed
#[derive(Clone, Default)]
pub struct ConnectionPipeline {
	plugins: Vec<Arc<dyn ConnectionPlugin>>,
	handlers: HashMap<String, usize>,
}

impl std::fmt::Debug for ConnectionPipeline {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ConnectionPipeline")
			.field("plugins", &self.plugins.iter().map(|p| p.name().to_string()).collect::<Vec<_>>())
			.field("handlers", &self.handlers.keys().collect::<Vec<_>>())
			.finish()
	}
}

impl ConnectionPipeline {
	pub fn new(plugins: Vec<Arc<dyn ConnectionPlugin>>) -> Self {
		let mut handlers = HashMap::new();
		for (idx, plugin) in plugins.iter().enumerate() {
			for kind in plugin.register_handlers() {
				if let Some(&owner) = handlers.get(&kind) {
					let owner: &Arc<dyn ConnectionPlugin> = &plugins[owner];
					warn!(target: "plugins", kind = %kind, plugin = plugin.name(), owner = owner.name(), "message type already claimed, keeping the first handler");
					continue;
				}
				debug!(target: "plugins", kind = %kind, plugin = plugin.name(), "registered message handler");
				handlers.insert(kind, idx);
			}
		}
		Self { plugins, handlers }
	}

	pub fn plugins(&self) -> &[Arc<dyn ConnectionPlugin>] {
		&self.plugins
	}

	/// The plugin that claimed `kind`, if any
	pub fn handler_for(&self, kind: &str) -> Option<&Arc<dyn ConnectionPlugin>> {
		self.handlers.get(kind).and_then(|&idx| self.plugins.get(idx))
	}

	pub async fn on_connect(&self, conn: &ConnectionHandle) {
		for plugin in &self.plugins {
			plugin.on_connect(conn).await;
		}
	}

	pub async fn on_disconnect(&self, conn: &ConnectionHandle) {
		for plugin in &self.plugins {
			plugin.on_disconnect(conn).await;
		}
	}

	/// Run every close hook. Failures are logged and do not stop the others.
	pub async fn close(&self) {
		for plugin in &self.plugins {
			if let Err(e) = plugin.close().await {
				warn!(target: "plugins", plugin = plugin.name(), error = %e, "plugin close failed");
			}
		}
	}
}
