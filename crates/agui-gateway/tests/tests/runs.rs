// Run lifecycle over a live connection

use std::sync::Arc;
use std::time::Duration;

use agui_gateway::agent::{Agent, AgentInfo, AgentInput, AgentOutcome, ScriptedTurn};
use agui_gateway::protocol::{EventKind, validate_run};
use agui_gateway::run::RunContext;
use agui_gateway::{Gateway, ToolOutcome};
use assert_matches::assert_matches;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use crate::common::*;

#[tokio::test]
async fn test_echo_run_event_order() -> anyhow::Result<()> {
	let gateway = echo_gateway();
	let mut client = connect(&gateway).await;

	client.run_agent(user_turn("t1", "r1", "m1", "hello there")).await;
	let events = client.run_events().await;

	let names = event_names(&events);
	assert_eq!(names[..3], ["RUN_STARTED", "MESSAGES_SNAPSHOT", "STATE_SNAPSHOT"]);
	assert_eq!(names.last(), Some(&"RUN_FINISHED"));
	validate_run(&events)?;
	assert_eq!(text(&events), "You said: hello there");
	Ok(())
}

#[tokio::test]
async fn test_history_accumulates_within_a_thread() -> anyhow::Result<()> {
	let (builder, agent) = scripted_builder(vec![ScriptedTurn::text("ok")]);
	let gateway = builder.build();
	let mut client = connect(&gateway).await;

	client.run_agent(user_turn("t1", "r1", "m1", "first")).await;
	client.run_events().await;
	client.run_agent(user_turn("t1", "r2", "m2", "second")).await;
	let events = client.run_events().await;
	assert_eq!(event_names(&events).last(), Some(&"RUN_FINISHED"));

	let inputs = agent.inputs();
	let ids: Vec<_> = inputs[1].messages.iter().map(|m| m.id.as_str()).collect();
	assert_eq!(ids.len(), 3);
	assert_eq!(ids[0], "m1");
	assert_eq!(ids[2], "m2");
	assert!(!inputs[1].messages[1].is_user());
	Ok(())
}

#[tokio::test]
async fn test_thread_change_resets_history() -> anyhow::Result<()> {
	let (builder, agent) = scripted_builder(vec![ScriptedTurn::text("ok")]);
	let gateway = builder.build();
	let mut client = connect(&gateway).await;

	client.run_agent(user_turn("t1", "r1", "m1", "first")).await;
	client.run_events().await;
	client.run_agent(user_turn("t2", "r2", "m2", "elsewhere")).await;
	client.run_events().await;

	let inputs = agent.inputs();
	assert_eq!(inputs[1].thread_id, "t2");
	assert_eq!(inputs[1].messages.len(), 1);
	assert_eq!(inputs[1].messages[0].id, "m2");
	assert_eq!(client.connection.session().lock().thread_id, "t2");
	Ok(())
}

#[tokio::test]
async fn test_client_tool_round_trip() -> anyhow::Result<()> {
	let (builder, agent) = scripted_builder(vec![
		ScriptedTurn::tool("confirm", json!({"question": "proceed?"})),
		ScriptedTurn::text("done"),
	]);
	let gateway = builder.build();
	let mut client = connect(&gateway).await;

	let mut turn = user_turn("t1", "r1", "m1", "go");
	turn["tools"] = json!([{"name": "confirm", "description": "Ask the user"}]);
	client.run_agent(turn).await;

	let head = client
		.events_until(|k| matches!(k, EventKind::ToolCallEnd { .. }))
		.await;
	let call_id = tool_call_id(&head).expect("tool call announced");
	assert_matches!(
		&head.last().map(|e| &e.kind),
		Some(EventKind::ToolCallEnd { .. })
	);

	client
		.send("tool_result", json!({"toolCallId": call_id, "content": {"confirmed": true}}))
		.await;
	let tail = client.run_events().await;
	assert_eq!(event_names(&tail).last(), Some(&"RUN_FINISHED"));
	assert_eq!(text(&tail), "done");
	assert_eq!(
		agent.tool_results(),
		vec![Ok(ToolOutcome::Completed(json!({"confirmed": true})))]
	);

	let mut all = head;
	all.extend(tail);
	validate_run(&all)?;
	Ok(())
}

#[tokio::test]
async fn test_unanswered_tool_call_waits_for_abort() -> anyhow::Result<()> {
	let (builder, agent) = scripted_builder(vec![
		ScriptedTurn::tool("confirm", json!({})),
		ScriptedTurn::text("unreachable"),
	]);
	let gateway = builder.build();
	let mut client = connect(&gateway).await;

	client.run_agent(user_turn("t1", "r1", "m1", "go")).await;
	client
		.events_until(|k| matches!(k, EventKind::ToolCallEnd { .. }))
		.await;

	tokio::time::sleep(Duration::from_millis(50)).await;
	assert!(client.drain().is_empty());
	assert_eq!(
		client.connection.session().lock().current_run_id.as_deref(),
		Some("r1")
	);

	client.send("abort_run", json!({"runId": "r1"})).await;
	let tail = client.run_events().await;
	assert_eq!(tail.last().and_then(run_error_code), Some("run_aborted"));
	assert!(text(&tail).is_empty());
	assert_eq!(agent.tool_results().len(), 1);
	assert!(agent.tool_results()[0].is_err());
	Ok(())
}

#[tokio::test]
async fn test_second_run_is_rejected_while_one_is_in_flight() -> anyhow::Result<()> {
	let (builder, _agent) = scripted_builder(vec![ScriptedTurn::WaitForCancel]);
	let gateway = builder.build();
	let mut client = connect(&gateway).await;

	client.run_agent(user_turn("t1", "r1", "m1", "wait")).await;
	client
		.events_until(|k| matches!(k, EventKind::StateSnapshot { .. }))
		.await;

	client.run_agent(user_turn("t1", "r2", "m2", "again")).await;
	let rejection = client.next_event().await.expect("rejection");
	assert_matches!(
		&rejection.kind,
		EventKind::RunError { code: Some(code), run_id: Some(run_id), .. }
			if code == "run_in_progress" && run_id == "r2"
	);

	client.send("abort_run", json!({"runId": "r1"})).await;
	let end = client.run_events().await;
	assert_matches!(
		&end.last().map(|e| &e.kind),
		Some(EventKind::RunError { code: Some(code), run_id: Some(run_id), .. })
			if code == "run_aborted" && run_id == "r1"
	);
	Ok(())
}

#[tokio::test]
async fn test_unknown_agent_is_a_single_error() -> anyhow::Result<()> {
	let (builder, agent) = scripted_builder(vec![ScriptedTurn::text("ok")]);
	let gateway = builder.build();
	let mut client = connect(&gateway).await;

	let mut turn = user_turn("t1", "r1", "m1", "hi");
	turn["forwardedProps"] = json!({"agent": "claude"});
	client.run_agent(turn).await;

	let event = client.next_event().await.expect("rejection");
	match &event.kind {
		EventKind::RunError { message, code, .. } => {
			assert_eq!(code.as_deref(), Some("unknown_agent"));
			assert!(message.contains("claude"));
			assert!(message.contains("scripted"));
		},
		other => panic!("expected RUN_ERROR, got {other:?}"),
	}

	tokio::time::sleep(Duration::from_millis(50)).await;
	assert!(client.drain().is_empty());
	assert!(agent.inputs().is_empty());
	Ok(())
}

#[tokio::test]
async fn test_agent_failure_keeps_connection_usable() -> anyhow::Result<()> {
	let (builder, _agent) = scripted_builder(vec![ScriptedTurn::Fail(
		agui_gateway::agent::AgentErrorCode::RateLimited,
	)]);
	let gateway = builder.build();
	let mut client = connect(&gateway).await;

	client.run_agent(user_turn("t1", "r1", "m1", "hi")).await;
	let events = client.run_events().await;
	assert_eq!(events.last().and_then(run_error_code), Some("rate_limit_error"));

	// The failed run released the connection for the next one
	client.run_agent(user_turn("t1", "r2", "m2", "hi")).await;
	let events = client.run_events().await;
	assert_eq!(events.first().map(|e| e.name()), Some("RUN_STARTED"));
	Ok(())
}

#[tokio::test]
async fn test_bad_frames_are_ignored() -> anyhow::Result<()> {
	let gateway = echo_gateway();
	let mut client = connect(&gateway).await;

	client.connection.handle_text("not json").await;
	client.send("teleport", json!({})).await;
	client.send("run_agent", json!({"threadId": 7})).await;
	client.send("tool_result", json!({"toolCallId": "nobody", "content": 1})).await;
	assert!(client.drain().is_empty());

	client.run_agent(user_turn("t1", "r1", "m1", "still here")).await;
	let events = client.run_events().await;
	assert_eq!(event_names(&events).last(), Some(&"RUN_FINISHED"));
	Ok(())
}

#[tokio::test]
async fn test_disconnect_mid_run_sends_nothing_more() -> anyhow::Result<()> {
	let (builder, _agent) = scripted_builder(vec![ScriptedTurn::WaitForCancel]);
	let gateway = builder.build();
	let mut client = connect(&gateway).await;

	client.run_agent(user_turn("t1", "r1", "m1", "wait")).await;
	client
		.events_until(|k| matches!(k, EventKind::StateSnapshot { .. }))
		.await;

	client.connection.close().await;
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert!(client.drain().is_empty());
	let session = client.connection.session().lock();
	assert!(session.is_closed());
	assert!(session.current_run_id.is_none());
	Ok(())
}

/// Keeps going after its first run is aborted and then asks the client for a tool.
/// Later runs wait for cancellation.
#[derive(Default)]
struct IgnoresAbort {
	late_results: Mutex<Vec<String>>,
}

#[async_trait]
impl Agent for IgnoresAbort {
	async fn run(&self, input: AgentInput, run: &mut RunContext) -> AgentOutcome {
		run.cancellation().cancelled().await;
		if run.run_id() == "r1" {
			tokio::time::sleep(Duration::from_millis(50)).await;
			let outcome = run.call_tool("confirm", json!({})).await;
			self
				.late_results
				.lock()
				.push(outcome.map(|_| String::new()).unwrap_or_else(|e| e.to_string()));
		}
		AgentOutcome::completed(input.messages)
	}
}

#[tokio::test]
async fn test_late_tool_call_from_aborted_run_is_released() -> anyhow::Result<()> {
	let agent = Arc::new(IgnoresAbort::default());
	let gateway = Gateway::builder()
		.agent(AgentInfo::new("stubborn", "Stubborn"), agent.clone())
		.rate_limit(unlimited())
		.build();
	let mut client = connect(&gateway).await;

	client.run_agent(user_turn("t1", "r1", "m1", "wait")).await;
	client
		.events_until(|k| matches!(k, EventKind::StateSnapshot { .. }))
		.await;
	client.send("abort_run", json!({"runId": "r1"})).await;
	client.run_agent(user_turn("t1", "r2", "m2", "next")).await;

	let events = client
		.events_until(|k| matches!(k, EventKind::RunError { run_id: Some(id), .. } if id == "r1"))
		.await;
	assert_eq!(events.last().and_then(run_error_code), Some("run_aborted"));
	assert!(event_names(&events).contains(&"TOOL_CALL_END"));
	assert_eq!(agent.late_results.lock().as_slice(), ["tool call was abandoned"]);
	{
		let session = client.connection.session().lock();
		assert!(session.pending_tool_calls.is_empty());
		assert_eq!(session.current_run_id.as_deref(), Some("r2"));
	}

	client.send("abort_run", json!({"runId": "r2"})).await;
	let end = client.run_events().await;
	assert_eq!(end.last().and_then(run_error_code), Some("run_aborted"));
	Ok(())
}
