// Shared fixtures for gateway integration tests

use std::sync::Arc;

use agui_gateway::agent::{AgentInfo, EchoAgent, ScriptedAgent, ScriptedTurn};
use agui_gateway::protocol::{EventKind, ProtocolEvent};
use agui_gateway::ratelimit::RateLimitConfig;
use agui_gateway::testing::TestClient;
use agui_gateway::{Gateway, GatewayBuilder};

pub use agui_gateway::testing::{event_names, user_turn};

pub const CALLER: &str = "198.51.100.10";

pub fn unlimited() -> RateLimitConfig {
	RateLimitConfig {
		max_requests: 0,
		..Default::default()
	}
}

/// Builder with one scripted agent registered as "scripted" and no rate limit
pub fn scripted_builder(script: Vec<ScriptedTurn>) -> (GatewayBuilder, ScriptedAgent) {
	let agent = ScriptedAgent::new(script);
	let builder = Gateway::builder()
		.agent(AgentInfo::new("scripted", "Scripted"), Arc::new(agent.clone()))
		.rate_limit(unlimited());
	(builder, agent)
}

pub fn echo_gateway() -> Arc<Gateway> {
	Gateway::builder()
		.agent(AgentInfo::new("echo", "Echo"), Arc::new(EchoAgent))
		.rate_limit(unlimited())
		.build()
}

/// Connect and consume the agent directory frame
pub async fn connect(gateway: &Arc<Gateway>) -> TestClient {
	let mut client = TestClient::connect(gateway, CALLER).await;
	let directory = client.next_message().await;
	assert_eq!(directory.map(|m| m.kind).as_deref(), Some("agents"));
	client
}

pub fn run_error_code(event: &ProtocolEvent) -> Option<&str> {
	match &event.kind {
		EventKind::RunError { code, .. } => code.as_deref(),
		_ => None,
	}
}

pub fn tool_call_id(events: &[ProtocolEvent]) -> Option<String> {
	events.iter().find_map(|e| match &e.kind {
		EventKind::ToolCallEnd { tool_call_id } => Some(tool_call_id.clone()),
		_ => None,
	})
}

pub fn text(events: &[ProtocolEvent]) -> String {
	events
		.iter()
		.filter_map(|e| match &e.kind {
			EventKind::TextMessageContent { delta, .. } => Some(delta.as_str()),
			_ => None,
		})
		.collect()
}
