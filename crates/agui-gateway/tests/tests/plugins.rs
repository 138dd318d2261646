// Connection plugins and the feedback plugin over a live connection

use std::sync::Arc;
use std::time::Duration;

use agui_gateway::agent::ScriptedTurn;
use agui_gateway::plugins::{ConnectionHandle, ConnectionPlugin, FeedbackPlugin};
use agui_gateway::protocol::{EventKind, OutboundMessage};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::common::*;

#[tokio::test]
async fn test_feedback_round_trip() -> anyhow::Result<()> {
	let (builder, _agent) = scripted_builder(vec![ScriptedTurn::text("rated answer")]);
	let feedback = Arc::new(FeedbackPlugin::default());
	let gateway = builder.plugin(feedback.clone()).build();

	let mut client = connect(&gateway).await;
	let config = client.next_message().await.expect("feedback config");
	assert_eq!(config.kind, "feedback_config");
	assert_eq!(config.data, json!({"enabled": true}));

	client.run_agent(user_turn("t1", "r1", "m1", "hi")).await;
	client.run_events().await;
	assert_eq!(feedback.traces().len(), 1);

	client
		.send("feedback", json!({"runId": "r1", "rating": "up", "comment": "great"}))
		.await;
	let ack = client.next_message().await.expect("ack");
	assert_eq!(ack.kind, "feedback_ack");
	assert_eq!(ack.data, json!({"runId": "r1", "accepted": true}));

	// The trace is consumed by the first submission
	client.send("feedback", json!({"runId": "r1", "rating": "down"})).await;
	let ack = client.next_message().await.expect("ack");
	assert_eq!(ack.data["accepted"], false);
	assert!(feedback.traces().is_empty());
	Ok(())
}

#[tokio::test]
async fn test_failed_runs_have_no_trace() -> anyhow::Result<()> {
	let (builder, _agent) = scripted_builder(Vec::new());
	let feedback = Arc::new(FeedbackPlugin::default());
	let gateway = builder.plugin(feedback.clone()).build();
	let mut client = connect(&gateway).await;
	client.drain();

	client.run_agent(user_turn("t1", "r1", "m1", "hi")).await;
	let events = client.run_events().await;
	assert_eq!(events.last().and_then(run_error_code), Some("empty_response"));
	assert!(feedback.traces().is_empty());
	Ok(())
}

/// Records every frame it claims and every lifecycle callback
#[derive(Default)]
struct Recorder {
	seen: Mutex<Vec<String>>,
}

#[async_trait]
impl ConnectionPlugin for Recorder {
	fn name(&self) -> &str {
		"recorder"
	}

	fn register_handlers(&self) -> Vec<String> {
		vec!["ping".to_string(), "abort_run".to_string()]
	}

	async fn handle(&self, conn: &ConnectionHandle, kind: &str, data: Value) -> anyhow::Result<()> {
		self.seen.lock().push(kind.to_string());
		if kind == "ping" {
			conn.send(OutboundMessage::new("pong", data));
		}
		Ok(())
	}

	async fn on_connect(&self, _conn: &ConnectionHandle) {
		self.seen.lock().push("connect".to_string());
	}

	async fn on_disconnect(&self, _conn: &ConnectionHandle) {
		self.seen.lock().push("disconnect".to_string());
	}
}

#[tokio::test]
async fn test_plugin_handlers_take_priority() -> anyhow::Result<()> {
	let (builder, _agent) = scripted_builder(vec![ScriptedTurn::WaitForCancel]);
	let recorder = Arc::new(Recorder::default());
	let gateway = builder.connection_plugin(recorder.clone()).build();
	let mut client = connect(&gateway).await;

	client.send("ping", json!({"n": 1})).await;
	let pong = client.next_message().await.expect("pong");
	assert_eq!(pong.kind, "pong");
	assert_eq!(pong.data, json!({"n": 1}));

	client.run_agent(user_turn("t1", "r1", "m1", "wait")).await;
	client
		.events_until(|k| matches!(k, EventKind::StateSnapshot { .. }))
		.await;

	// The plugin claimed abort_run, so the built-in abort never happens
	client.send("abort_run", json!({"runId": "r1"})).await;
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert!(client.drain().is_empty());
	assert_eq!(
		client.connection.session().lock().current_run_id.as_deref(),
		Some("r1")
	);

	client.connection.close().await;
	client.connection.close().await;
	assert_eq!(
		*recorder.seen.lock(),
		vec!["connect", "ping", "abort_run", "disconnect"]
	);
	Ok(())
}
