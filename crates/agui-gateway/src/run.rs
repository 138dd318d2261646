// Agent runs
//
// `RunDriver` owns the lifecycle events of an admitted run: RUN_STARTED, the two
// snapshots, and the single concluding RUN_FINISHED or RUN_ERROR. Between them the
// agent drives a `RunContext` to stream steps, text and tool calls. The run-scoped
// plugin hooks are applied here so agents never see them.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentInput, AgentOutcome};
use crate::coordinator::{PendingToolCall, ToolCallCoordinator, ToolCallError, ToolExecutor};
use crate::emitter::{EventEmitter, Outbound};
use crate::plugins::{PluginContext, RunPipeline, RunResult, UserTurn};
use crate::protocol::{EventKind, Message, Role};
use crate::session::SharedSession;
use crate::tools::ToolDefinition;

pub const RUN_ABORTED: &str = "run_aborted";
pub const EMPTY_RESPONSE: &str = "empty_response";

/// Result of a tool call requested through a [`RunContext`]
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
	Completed(Value),
	/// A plugin cancelled the call before it was executed
	Skipped,
}

impl ToolOutcome {
	pub fn value(&self) -> Option<&Value> {
		match self {
			ToolOutcome::Completed(v) => Some(v),
			ToolOutcome::Skipped => None,
		}
	}
}

struct OpenText {
	message_id: String,
	buffer: String,
}

/// A started tool call whose stream has not been finished
struct OpenCall {
	call_id: String,
	args_streamed: bool,
}

/// An agent's handle on its in-flight run
pub struct RunContext {
	run_id: String,
	thread_id: String,
	tools: Vec<ToolDefinition>,
	cancellation: CancellationToken,
	session: SharedSession,
	emitter: EventEmitter,
	coordinator: Arc<ToolCallCoordinator>,
	pipeline: Arc<RunPipeline>,
	plugin_ctx: PluginContext,
	open_step: Option<String>,
	open_text: Option<OpenText>,
	open_call: Option<OpenCall>,
}

impl RunContext {
	pub fn run_id(&self) -> &str {
		&self.run_id
	}

	pub fn thread_id(&self) -> &str {
		&self.thread_id
	}

	/// Merged client, local and remote tools available to this run
	pub fn tools(&self) -> &[ToolDefinition] {
		&self.tools
	}

	/// Cancelled when the run is aborted or the connection closes
	pub fn cancellation(&self) -> &CancellationToken {
		&self.cancellation
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancellation.is_cancelled()
	}

	/// Plugin scratch space of this run
	pub fn plugin_store(&mut self) -> &mut HashMap<String, Value> {
		&mut self.plugin_ctx.store
	}

	/// Open a step. A step that is still open is finished first.
	pub fn start_step(&mut self, name: impl Into<String>) {
		self.finish_step();
		let step_name = name.into();
		self.emitter.emit(EventKind::StepStarted {
			step_name: step_name.clone(),
		});
		self.open_step = Some(step_name);
	}

	pub fn finish_step(&mut self) {
		self.end_text();
		if let Some(step_name) = self.open_step.take() {
			self.emitter.emit(EventKind::StepFinished { step_name });
		}
	}

	/// Stream a text delta, opening a new assistant message if none is open.
	/// Deltas that plugins rewrite to nothing are dropped.
	pub async fn text(&mut self, delta: impl Into<String>) {
		let delta = self
			.pipeline
			.text_chunk(&mut self.plugin_ctx, delta.into())
			.await;
		if delta.is_empty() {
			return;
		}
		if self.open_text.is_none() {
			let message_id = format!("msg_{}", uuid::Uuid::new_v4().simple());
			self.emitter.emit(EventKind::TextMessageStart {
				message_id: message_id.clone(),
				role: Role::Assistant,
			});
			self.open_text = Some(OpenText {
				message_id,
				buffer: String::new(),
			});
		}
		if let Some(open) = &mut self.open_text {
			open.buffer.push_str(&delta);
			self.emitter.emit(EventKind::TextMessageContent {
				message_id: open.message_id.clone(),
				delta,
			});
		}
	}

	/// Close the open text message and return it as a history entry
	pub fn end_text(&mut self) -> Option<Message> {
		let open = self.open_text.take()?;
		self.emitter.emit(EventKind::TextMessageEnd {
			message_id: open.message_id.clone(),
		});
		Some(Message::assistant(open.message_id, open.buffer))
	}

	/// Start a tool call whose arguments will be streamed. A previous stream that was
	/// dropped without `finish` is closed first.
	pub fn tool_call(&mut self, call_id: impl Into<String>, name: impl Into<String>) -> ToolCallStream<'_> {
		self.close_dropped_call();
		let call_id = call_id.into();
		let name = name.into();
		let parent = self.open_text.as_ref().map(|t| t.message_id.clone());
		self
			.coordinator
			.start(&self.emitter, &call_id, &name, parent);
		self.open_call = Some(OpenCall {
			call_id: call_id.clone(),
			args_streamed: false,
		});
		ToolCallStream {
			run: self,
			call_id,
			name,
		}
	}

	fn close_dropped_call(&mut self) {
		if let Some(open) = self.open_call.take() {
			debug!(target: "gateway", run_id = %self.run_id, call_id = %open.call_id, "closing unfinished tool call");
			self
				.coordinator
				.close_unexecuted(&self.emitter, &open.call_id, &Value::Null, open.args_streamed);
		}
	}

	/// Request a tool call with complete arguments and wait for its result
	pub async fn call_tool(&mut self, name: impl Into<String>, args: Value) -> Result<ToolOutcome, ToolCallError> {
		let call_id = format!("call_{}", uuid::Uuid::new_v4().simple());
		self.tool_call(call_id, name).finish(args).await
	}

	pub fn emit_custom(&self, name: impl Into<String>, value: Value) {
		self.emitter.emit(EventKind::Custom {
			name: name.into(),
			value,
		});
	}

	pub fn emit_raw(&self, event: Value, source: Option<String>) {
		self.emitter.emit(EventKind::Raw { event, source });
	}

	/// Close whatever the agent left open
	fn close_open(&mut self) {
		self.close_dropped_call();
		self.end_text();
		self.finish_step();
	}
}

/// A started tool call. Stream arguments with [`args`](Self::args), then [`finish`](Self::finish).
pub struct ToolCallStream<'a> {
	run: &'a mut RunContext,
	call_id: String,
	name: String,
}

impl ToolCallStream<'_> {
	pub fn call_id(&self) -> &str {
		&self.call_id
	}

	pub fn args(&mut self, delta: &str) {
		self
			.run
			.coordinator
			.args(&self.run.emitter, &self.call_id, delta);
		if let Some(open) = &mut self.run.open_call {
			open.args_streamed = true;
		}
	}

	/// Close the call and wait for its result.
	///
	/// Plugins may rewrite the call or skip it. A rewritten call keeps the id that
	/// was already announced to the client.
	pub async fn finish(self, args: Value) -> Result<ToolOutcome, ToolCallError> {
		let ToolCallStream { run, call_id, name } = self;
		let streamed = run.open_call.take().is_some_and(|open| open.args_streamed);
		let pipeline = run.pipeline.clone();
		let requested = PendingToolCall::new(call_id.clone(), name, args);

		let Some(mut call) = pipeline
			.before_tool_call(&mut run.plugin_ctx, requested.clone())
			.await
		else {
			run
				.coordinator
				.close_unexecuted(&run.emitter, &call_id, &requested.args, streamed);
			return Ok(ToolOutcome::Skipped);
		};
		call.call_id = call_id;

		let executor = ToolExecutor::for_tool(&run.tools, &call.name);
		let result = run
			.coordinator
			.complete(&run.session, &run.emitter, &run.cancellation, &call, streamed, executor)
			.await?;
		let result = pipeline
			.after_tool_call(&mut run.plugin_ctx, &call, result)
			.await;
		Ok(ToolOutcome::Completed(result))
	}
}

/// A run that passed admission
pub struct AdmittedRun {
	pub agent_id: String,
	pub agent: Arc<dyn Agent>,
	pub input: AgentInput,
	pub cancellation: CancellationToken,
}

/// Shared collaborators of every run on one connection
#[derive(Clone)]
pub struct RunDriver {
	pub session: SharedSession,
	pub outbound: Outbound,
	pub coordinator: Arc<ToolCallCoordinator>,
	pub pipeline: Arc<RunPipeline>,
}

impl RunDriver {
	pub async fn drive(self, run: AdmittedRun) {
		let AdmittedRun {
			agent_id,
			agent,
			mut input,
			cancellation,
		} = run;
		let run_id = input.run_id.clone();
		let thread_id = input.thread_id.clone();
		let client_id = self.session.lock().client_id.clone();
		let emitter = EventEmitter::new(self.outbound.clone(), Some(run_id.clone()));

		info!(target: "gateway", client_id = %client_id, run_id = %run_id, agent = %agent_id, "run started");
		emitter.emit(EventKind::RunStarted {
			thread_id: thread_id.clone(),
			run_id: run_id.clone(),
		});
		emitter.emit(EventKind::MessagesSnapshot {
			messages: input.messages.clone(),
		});
		emitter.emit(EventKind::StateSnapshot {
			snapshot: input.state.clone(),
		});

		let mut plugin_ctx = PluginContext::new(&run_id, &thread_id, &agent_id, &client_id);
		let turn = self
			.pipeline
			.user_message(
				&mut plugin_ctx,
				UserTurn {
					messages: std::mem::take(&mut input.messages),
					system_prompt: input.system_prompt.take(),
					tools: std::mem::take(&mut input.tools),
				},
			)
			.await;
		input.messages = turn.messages;
		input.system_prompt = turn.system_prompt;
		input.tools = turn.tools;

		let mut ctx = RunContext {
			run_id: run_id.clone(),
			thread_id: thread_id.clone(),
			tools: input.tools.clone(),
			cancellation: cancellation.clone(),
			session: self.session.clone(),
			emitter: emitter.clone(),
			coordinator: self.coordinator.clone(),
			pipeline: self.pipeline.clone(),
			plugin_ctx,
			open_step: None,
			open_text: None,
			open_call: None,
		};
		let outcome = agent.run(input, &mut ctx).await;
		ctx.close_open();
		let mut plugin_ctx = ctx.plugin_ctx;

		let terminal = self
			.conclude(&emitter, &mut plugin_ctx, &cancellation, &thread_id, outcome)
			.await;
		self.session.lock().finish_run(&run_id);
		if let Some(terminal) = terminal {
			emitter.emit(terminal);
		}
	}

	/// Pick the concluding event. History is only stored for a successful run.
	async fn conclude(
		&self,
		emitter: &EventEmitter,
		plugin_ctx: &mut PluginContext,
		cancellation: &CancellationToken,
		thread_id: &str,
		outcome: AgentOutcome,
	) -> Option<EventKind> {
		let run_id = plugin_ctx.run_id.clone();
		if cancellation.is_cancelled() {
			if self.session.lock().is_closed() {
				debug!(target: "gateway", run_id = %run_id, "run ended after disconnect");
				return None;
			}
			info!(target: "gateway", run_id = %run_id, "run aborted");
			return Some(EventKind::run_error(RUN_ABORTED, "Run was aborted", Some(run_id)));
		}

		if !outcome.success {
			let error = outcome.error.unwrap_or_default();
			warn!(target: "gateway", run_id = %run_id, code = error.code.as_str(), detail = %error.detail, "agent run failed");
			let code = error.code.as_str();
			return Some(EventKind::run_error(code, code, Some(run_id)));
		}

		if !emitter.produced_output() {
			warn!(target: "gateway", run_id = %run_id, "agent produced an empty response");
			return Some(EventKind::run_error(
				EMPTY_RESPONSE,
				"The agent produced neither text nor a tool call",
				Some(run_id),
			));
		}

		let result = self
			.pipeline
			.agent_response(
				plugin_ctx,
				RunResult {
					conversation_history: outcome.conversation_history,
					result: outcome.result,
				},
			)
			.await;
		{
			let mut session = self.session.lock();
			if session.thread_id == thread_id && !result.conversation_history.is_empty() {
				session.conversation_history = result.conversation_history;
			}
		}
		info!(target: "gateway", run_id = %run_id, "run finished");
		Some(EventKind::RunFinished {
			thread_id: thread_id.to_string(),
			run_id,
			result: result.result,
		})
	}
}
