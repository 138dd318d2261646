use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{Agent, AgentError, AgentErrorCode, AgentInput, AgentOutcome};
use crate::protocol::Message;
use crate::run::{RunContext, ToolOutcome};

/// One step of a scripted run
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedTurn {
	/// Stream text word by word
	Text(String),
	/// Call a tool. With `stream_args` the JSON arguments are streamed in two fragments.
	ToolCall {
		name: String,
		args: Value,
		stream_args: bool,
	},
	/// Open a named step
	Step(String),
	/// Fail the run with a coded error
	Fail(AgentErrorCode),
	/// Block until the run is cancelled
	WaitForCancel,
}

impl ScriptedTurn {
	pub fn text(text: impl Into<String>) -> Self {
		ScriptedTurn::Text(text.into())
	}

	pub fn tool(name: impl Into<String>, args: Value) -> Self {
		ScriptedTurn::ToolCall {
			name: name.into(),
			args,
			stream_args: false,
		}
	}

	pub fn streamed_tool(name: impl Into<String>, args: Value) -> Self {
		ScriptedTurn::ToolCall {
			name: name.into(),
			args,
			stream_args: true,
		}
	}
}

/// Plays back the same script on every run and records what it was given
#[derive(Debug, Clone, Default)]
pub struct ScriptedAgent {
	script: Vec<ScriptedTurn>,
	inputs: Arc<Mutex<Vec<AgentInput>>>,
	tool_results: Arc<Mutex<Vec<Result<ToolOutcome, String>>>>,
}

impl ScriptedAgent {
	pub fn new(script: Vec<ScriptedTurn>) -> Self {
		Self {
			script,
			..Default::default()
		}
	}

	/// Inputs of every run so far
	pub fn inputs(&self) -> Vec<AgentInput> {
		self.inputs.lock().clone()
	}

	/// Tool call results of every run so far; errors as their display text
	pub fn tool_results(&self) -> Vec<Result<ToolOutcome, String>> {
		self.tool_results.lock().clone()
	}
}

#[async_trait]
impl Agent for ScriptedAgent {
	async fn run(&self, input: AgentInput, run: &mut RunContext) -> AgentOutcome {
		self.inputs.lock().push(input.clone());
		let mut history = input.messages;

		for (idx, turn) in self.script.iter().enumerate() {
			if run.is_cancelled() {
				break;
			}
			match turn {
				ScriptedTurn::Text(text) => {
					for (i, word) in text.split(' ').enumerate() {
						let delta = if i == 0 { word.to_string() } else { format!(" {word}") };
						run.text(delta).await;
					}
					if let Some(message) = run.end_text() {
						history.push(message);
					}
				},
				ScriptedTurn::ToolCall { name, args, stream_args } => {
					let call_id = format!("call_{}_{idx}", run.run_id());
					let mut call = run.tool_call(&call_id, name);
					if *stream_args {
						let encoded = args.to_string();
						let mut mid = encoded.len() / 2;
						while !encoded.is_char_boundary(mid) {
							mid -= 1;
						}
						let (head, tail) = encoded.split_at(mid);
						call.args(head);
						call.args(tail);
					}
					let outcome = call.finish(args.clone()).await;
					if let Ok(ToolOutcome::Completed(result)) = &outcome {
						history.push(Message::tool_request(format!("{call_id}_req"), &call_id, name, args));
						history.push(Message::tool_response(format!("{call_id}_res"), &call_id, result));
					}
					self.tool_results.lock().push(outcome.map_err(|e| e.to_string()));
				},
				ScriptedTurn::Step(name) => run.start_step(name),
				ScriptedTurn::Fail(code) => return AgentOutcome::failed(AgentError::new(*code, "scripted failure")),
				ScriptedTurn::WaitForCancel => run.cancellation().cancelled().await,
			}
		}
		AgentOutcome::completed(history)
	}
}
