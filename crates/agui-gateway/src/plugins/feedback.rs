// Feedback plugin
//
// Tags every run with a trace id and remembers it once the run finishes, so a
// later `feedback` message about that run can be tied back to its trace.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::{ConnectionHandle, ConnectionPlugin, PluginContext, RunPlugin, RunResult, RunTraceStore, UserTurn};
use crate::protocol::OutboundMessage;

pub const FEEDBACK: &str = "feedback";
pub const FEEDBACK_CONFIG: &str = "feedback_config";
pub const FEEDBACK_ACK: &str = "feedback_ack";

const TRACE_ID_KEY: &str = "trace_id";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedbackInput {
	run_id: String,
	/// Free-form rating, usually a thumbs up/down or a score
	#[serde(default)]
	rating: Value,
	#[serde(default)]
	comment: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FeedbackPlugin {
	traces: Arc<RunTraceStore>,
}

impl FeedbackPlugin {
	pub fn new(traces: Arc<RunTraceStore>) -> Self {
		Self { traces }
	}

	pub fn traces(&self) -> &Arc<RunTraceStore> {
		&self.traces
	}
}

#[async_trait]
impl RunPlugin for FeedbackPlugin {
	fn name(&self) -> &str {
		FEEDBACK
	}

	async fn on_user_message(&self, ctx: &mut PluginContext, _turn: &UserTurn) -> Option<UserTurn> {
		ctx
			.store
			.entry(TRACE_ID_KEY.to_string())
			.or_insert_with(|| Value::String(uuid::Uuid::new_v4().simple().to_string()));
		None
	}

	async fn on_agent_response(&self, ctx: &mut PluginContext, _result: &RunResult) -> Option<RunResult> {
		if let Some(trace_id) = ctx.store.get(TRACE_ID_KEY).and_then(Value::as_str) {
			self.traces.insert(ctx.run_id.clone(), trace_id);
		}
		None
	}
}

#[async_trait]
impl ConnectionPlugin for FeedbackPlugin {
	fn name(&self) -> &str {
		FEEDBACK
	}

	fn register_handlers(&self) -> Vec<String> {
		vec![FEEDBACK.to_string()]
	}

	async fn handle(&self, conn: &ConnectionHandle, _kind: &str, data: Value) -> anyhow::Result<()> {
		let input: FeedbackInput = serde_json::from_value(data)?;
		let trace_id = self.traces.take(&input.run_id);
		info!(
			target: "plugins",
			client_id = %conn.client_id,
			run_id = %input.run_id,
			trace_id = ?trace_id,
			rating = %input.rating,
			comment = ?input.comment,
			"received feedback"
		);
		conn.send(OutboundMessage::new(
			FEEDBACK_ACK,
			json!({
				"runId": input.run_id,
				"accepted": trace_id.is_some(),
			}),
		));
		Ok(())
	}

	async fn on_connect(&self, conn: &ConnectionHandle) {
		conn.send(OutboundMessage::new(FEEDBACK_CONFIG, json!({"enabled": true})));
	}

	async fn close(&self) -> anyhow::Result<()> {
		info!(target: "plugins", pending = self.traces.len(), "feedback plugin closed");
		Ok(())
	}
}
