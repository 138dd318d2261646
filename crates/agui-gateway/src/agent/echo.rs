use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Agent, AgentInput, AgentOutcome};
use crate::coordinator::ToolCallError;
use crate::protocol::Message;
use crate::run::{RunContext, ToolOutcome};

/// Demo agent: repeats the last user message word by word.
///
/// A message of the form `/tool <name> <json args>` calls that tool instead and
/// reports its result.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoAgent;

fn parse_tool_command(text: &str) -> Option<(&str, Value)> {
	let rest = text.strip_prefix("/tool ")?.trim();
	let (name, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
	if name.is_empty() {
		return None;
	}
	let args = serde_json::from_str(args.trim()).unwrap_or_else(|_| json!({}));
	Some((name, args))
}

fn new_id(prefix: &str) -> String {
	format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

impl EchoAgent {
	async fn stream_words(run: &mut RunContext, text: &str) {
		for (i, word) in text.split(' ').enumerate() {
			if run.is_cancelled() {
				break;
			}
			let delta = if i == 0 { word.to_string() } else { format!(" {word}") };
			run.text(delta).await;
		}
	}
}

#[async_trait]
impl Agent for EchoAgent {
	async fn run(&self, input: AgentInput, run: &mut RunContext) -> AgentOutcome {
		let mut history = input.messages.clone();
		let Some(text) = input.last_user_message().map(str::to_string) else {
			return AgentOutcome::completed(history);
		};

		run.start_step("reply");
		if let Some((name, args)) = parse_tool_command(&text) {
			let call_id = new_id("call");
			let reply = match run.tool_call(&call_id, name).finish(args.clone()).await {
				Ok(ToolOutcome::Completed(result)) => {
					history.push(Message::tool_request(new_id("msg"), &call_id, name, &args));
					history.push(Message::tool_response(new_id("msg"), &call_id, &result));
					format!("Tool {name} returned {result}")
				},
				Ok(ToolOutcome::Skipped) => format!("Tool {name} was skipped"),
				Err(ToolCallError::Abandoned) => return AgentOutcome::completed(history),
				Err(e) => format!("Tool {name} failed: {e}"),
			};
			Self::stream_words(run, &reply).await;
		} else {
			Self::stream_words(run, &format!("You said: {text}")).await;
		}

		if let Some(message) = run.end_text() {
			history.push(message);
		}
		run.finish_step();
		AgentOutcome::completed(history)
	}
}
