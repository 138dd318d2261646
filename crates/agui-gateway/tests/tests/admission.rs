// Admission control: rate limiting per caller address

use std::sync::Arc;
use std::time::Duration;

use agui_gateway::agent::{AgentInfo, EchoAgent};
use agui_gateway::protocol::EventKind;
use agui_gateway::ratelimit::RateLimitConfig;
use agui_gateway::testing::TestClient;
use agui_gateway::Gateway;

use crate::common::*;

fn limited_gateway() -> Arc<Gateway> {
	Gateway::builder()
		.agent(AgentInfo::new("echo", "Echo"), Arc::new(EchoAgent))
		.rate_limit(RateLimitConfig {
			max_requests: 2,
			window: Duration::from_millis(1000),
			..Default::default()
		})
		.build()
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_window() -> anyhow::Result<()> {
	let gateway = limited_gateway();
	let mut client = connect(&gateway).await;

	for run in ["r1", "r2"] {
		client.run_agent(user_turn("t1", run, &format!("m_{run}"), "hi")).await;
		let events = client.run_events().await;
		assert_eq!(event_names(&events).last(), Some(&"RUN_FINISHED"));
	}

	client.run_agent(user_turn("t1", "r3", "m_r3", "hi")).await;
	let events = client.run_events().await;
	assert_eq!(events.len(), 1);
	match &events[0].kind {
		EventKind::RunError { message, code, .. } => {
			assert_eq!(code.as_deref(), Some("rate_limited"));
			assert!(message.contains("Retry after 1s"), "{message}");
		},
		other => panic!("expected RUN_ERROR, got {other:?}"),
	}

	tokio::time::sleep(Duration::from_millis(1001)).await;
	client.run_agent(user_turn("t1", "r4", "m_r4", "hi")).await;
	let events = client.run_events().await;
	assert_eq!(event_names(&events).last(), Some(&"RUN_FINISHED"));
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_limit_is_per_caller_address() -> anyhow::Result<()> {
	let gateway = limited_gateway();
	let mut first = connect(&gateway).await;
	// A second connection from the same address shares the budget
	let mut same_caller = TestClient::connect(&gateway, CALLER).await;
	same_caller.drain();
	let mut other = TestClient::connect(&gateway, "203.0.113.99").await;
	other.drain();

	first.run_agent(user_turn("t1", "r1", "m1", "hi")).await;
	first.run_events().await;
	same_caller.run_agent(user_turn("t1", "r1", "m1", "hi")).await;
	same_caller.run_events().await;

	first.run_agent(user_turn("t1", "r2", "m2", "hi")).await;
	let events = first.run_events().await;
	assert_eq!(events.last().and_then(run_error_code), Some("rate_limited"));

	other.run_agent(user_turn("t1", "r1", "m1", "hi")).await;
	let events = other.run_events().await;
	assert_eq!(event_names(&events).last(), Some(&"RUN_FINISHED"));
	Ok(())
}

#[tokio::test]
async fn test_rejected_run_leaves_no_state() -> anyhow::Result<()> {
	let gateway = Gateway::builder()
		.agent(AgentInfo::new("echo", "Echo"), Arc::new(EchoAgent))
		.rate_limit(RateLimitConfig {
			max_requests: 1,
			window: Duration::from_secs(60),
			..Default::default()
		})
		.build();
	let mut client = connect(&gateway).await;

	client.run_agent(user_turn("t1", "r1", "m1", "hi")).await;
	client.run_events().await;
	client.run_agent(user_turn("t2", "r2", "m2", "other thread")).await;
	let events = client.run_events().await;
	assert_eq!(events.last().and_then(run_error_code), Some("rate_limited"));

	let session = client.connection.session().lock();
	assert_eq!(session.thread_id, "t1");
	assert!(session.current_run_id.is_none());
	assert!(!session.conversation_history.iter().any(|m| m.id == "m2"));
	Ok(())
}
