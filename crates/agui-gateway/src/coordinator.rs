// Tool-Call Coordinator
//
// Brokers the round trip of a single tool invocation. The call is announced with
// TOOL_CALL_START, its arguments streamed as TOOL_CALL_ARGS and closed with
// TOOL_CALL_END, then the result comes from one of three executors:
// - client: a single-use resolver waits for the matching `tool_result` frame
// - local: the tool runs in-process, bounded by the local tool timeout
// - remote: the remote tool registry is called directly, bounded by the endpoint timeout
//
// Client waits are unbounded. They end when the result arrives, or with
// `ToolCallError::Abandoned` when the issuing run is aborted or the connection closes.
// A call made by a run that is no longer the session's current run is never registered.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::emitter::EventEmitter;
use crate::protocol::EventKind;
use crate::remote::{RemoteToolError, RemoteToolRegistry};
use crate::session::SharedSession;
use crate::tools::{LocalToolSet, RemoteToolRef, ToolDefinition, ToolOrigin};

#[derive(Error, Debug)]
pub enum ToolCallError {
	#[error("tool call was abandoned")]
	Abandoned,

	#[error("tool call id '{0}' is already pending")]
	DuplicateCallId(String),

	#[error("connection closed")]
	ConnectionClosed,

	#[error("unknown local tool '{0}'")]
	UnknownLocalTool(String),

	#[error("local tool failed: {0}")]
	Local(String),

	#[error("local tool timed out after {0:?}")]
	Timeout(Duration),

	#[error(transparent)]
	Remote(#[from] RemoteToolError),
}

/// Where a tool call is executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolExecutor {
	Client,
	Local,
	Remote(RemoteToolRef),
}

impl ToolExecutor {
	/// Executor owning `name` in a run's tool list. Undeclared names go to the client.
	pub fn for_tool(tools: &[ToolDefinition], name: &str) -> Self {
		match tools.iter().find(|t| t.name == name).map(|t| &t.origin) {
			Some(ToolOrigin::Local) => ToolExecutor::Local,
			Some(ToolOrigin::Remote(r)) => ToolExecutor::Remote(r.clone()),
			Some(ToolOrigin::Client) | None => ToolExecutor::Client,
		}
	}

	fn label(&self) -> &'static str {
		match self {
			ToolExecutor::Client => "client",
			ToolExecutor::Local => "local",
			ToolExecutor::Remote(_) => "remote",
		}
	}
}

/// A tool call about to be executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingToolCall {
	pub call_id: String,
	pub name: String,
	pub args: Value,
}

impl PendingToolCall {
	pub fn new(call_id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
		Self {
			call_id: call_id.into(),
			name: name.into(),
			args,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct ToolCallCoordinator {
	remote: Arc<RemoteToolRegistry>,
	local: Arc<LocalToolSet>,
}

impl ToolCallCoordinator {
	pub fn new(remote: Arc<RemoteToolRegistry>, local: Arc<LocalToolSet>) -> Self {
		Self { remote, local }
	}

	pub fn remote(&self) -> &Arc<RemoteToolRegistry> {
		&self.remote
	}

	pub fn local(&self) -> &Arc<LocalToolSet> {
		&self.local
	}

	/// Announce a call with TOOL_CALL_START
	pub fn start(&self, emitter: &EventEmitter, call_id: &str, name: &str, parent_message_id: Option<String>) {
		emitter.emit(EventKind::ToolCallStart {
			tool_call_id: call_id.to_string(),
			tool_call_name: name.to_string(),
			parent_message_id,
		});
	}

	/// Stream one fragment of the call's JSON arguments
	pub fn args(&self, emitter: &EventEmitter, call_id: &str, delta: &str) {
		emitter.emit(EventKind::ToolCallArgs {
			tool_call_id: call_id.to_string(),
			delta: delta.to_string(),
		});
	}

	/// Emit the complete arguments when nothing was streamed, so every call carries
	/// exactly one argument payload at minimum
	fn ensure_args(&self, emitter: &EventEmitter, call_id: &str, args: &Value, args_streamed: bool) {
		if args_streamed {
			return;
		}
		let payload = match args {
			Value::Null => "{}".to_string(),
			other => other.to_string(),
		};
		self.args(emitter, call_id, &payload);
	}

	fn end(&self, emitter: &EventEmitter, call_id: &str) {
		emitter.emit(EventKind::ToolCallEnd {
			tool_call_id: call_id.to_string(),
		});
	}

	/// Close a started call that will not be executed
	pub fn close_unexecuted(&self, emitter: &EventEmitter, call_id: &str, args: &Value, args_streamed: bool) {
		self.ensure_args(emitter, call_id, args, args_streamed);
		self.end(emitter, call_id);
	}

	/// Run a complete tool call: START, ARGS, END, then wait for the executor's result
	pub async fn request_tool_call(
		&self,
		session: &SharedSession,
		emitter: &EventEmitter,
		cancellation: &CancellationToken,
		call: &PendingToolCall,
		executor: ToolExecutor,
	) -> Result<Value, ToolCallError> {
		self.start(emitter, &call.call_id, &call.name, None);
		self
			.complete(session, emitter, cancellation, call, false, executor)
			.await
	}

	/// Finish a call whose TOOL_CALL_START was already emitted.
	/// `cancellation` belongs to the run that issued the call.
	pub async fn complete(
		&self,
		session: &SharedSession,
		emitter: &EventEmitter,
		cancellation: &CancellationToken,
		call: &PendingToolCall,
		args_streamed: bool,
		executor: ToolExecutor,
	) -> Result<Value, ToolCallError> {
		self.ensure_args(emitter, &call.call_id, &call.args, args_streamed);
		debug!(target: "coordinator", run_id = ?emitter.run_id(), call_id = %call.call_id, tool = %call.name, executor = executor.label(), "dispatching tool call");

		match executor {
			ToolExecutor::Client => self.await_client(session, emitter, cancellation, call).await,
			ToolExecutor::Local => {
				self.end(emitter, &call.call_id);
				self.invoke_local(call).await
			},
			ToolExecutor::Remote(tool) => {
				self.end(emitter, &call.call_id);
				let routing = session.lock().header_routing.clone();
				let result = self
					.remote
					.invoke_tool(&tool, call.args.clone(), &routing)
					.await;
				if let Err(e) = &result {
					warn!(target: "coordinator", call_id = %call.call_id, tool = %call.name, error = %e, "remote tool call failed");
				}
				Ok(result?)
			},
		}
	}

	async fn await_client(
		&self,
		session: &SharedSession,
		emitter: &EventEmitter,
		cancellation: &CancellationToken,
		call: &PendingToolCall,
	) -> Result<Value, ToolCallError> {
		// The resolver must exist before END reaches the client, or a fast reply could miss it
		let registered = {
			let mut session = session.lock();
			let run_id = emitter
				.run_id()
				.map(str::to_string)
				.or_else(|| session.current_run_id.clone())
				.unwrap_or_default();
			if session.is_closed() {
				Err(ToolCallError::ConnectionClosed)
			} else if cancellation.is_cancelled() || session.current_run_id.as_deref() != Some(run_id.as_str()) {
				// Aborts only release waits of the current run, so a late call would never be released
				debug!(target: "coordinator", run_id = %run_id, call_id = %call.call_id, "tool call from an inactive run");
				Err(ToolCallError::Abandoned)
			} else {
				session
					.pending_tool_calls
					.register(&call.call_id, &run_id)
					.map(|rx| (rx, run_id))
					.ok_or_else(|| ToolCallError::DuplicateCallId(call.call_id.clone()))
			}
		};
		self.end(emitter, &call.call_id);
		let (rx, run_id) = registered?;

		tokio::select! {
			result = rx => result.map_err(|_| ToolCallError::Abandoned),
			_ = cancellation.cancelled() => {
				session.lock().pending_tool_calls.abandon_run(&run_id);
				debug!(target: "coordinator", call_id = %call.call_id, "client tool call abandoned");
				Err(ToolCallError::Abandoned)
			},
		}
	}

	async fn invoke_local(&self, call: &PendingToolCall) -> Result<Value, ToolCallError> {
		let tool = self
			.local
			.get(&call.name)
			.cloned()
			.ok_or_else(|| ToolCallError::UnknownLocalTool(call.name.clone()))?;
		let timeout = self.local.timeout();
		match tokio::time::timeout(timeout, tool.call(call.args.clone())).await {
			Ok(Ok(value)) => Ok(value),
			Ok(Err(e)) => {
				warn!(target: "coordinator", call_id = %call.call_id, tool = %call.name, error = %e, "local tool failed");
				Err(ToolCallError::Local(e.to_string()))
			},
			Err(_) => Err(ToolCallError::Timeout(timeout)),
		}
	}
}
