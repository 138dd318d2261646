// Tool sources inside a run: client, local and remote

use std::sync::Arc;
use std::time::Duration;

use agui_gateway::ToolOutcome;
use agui_gateway::agent::ScriptedTurn;
use agui_gateway::protocol::{EventKind, validate_run};
use agui_gateway::remote::RemoteEndpointConfig;
use agui_gateway::tools::{FnTool, LocalTool, ToolDefinition};
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::*;

fn rpc_result(result: Value) -> ResponseTemplate {
	ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": result}))
}

fn lookup_tool() -> Arc<dyn LocalTool> {
	Arc::new(FnTool::new(
		ToolDefinition::new("lookup", "Look up a record").with_parameters(json!({
			"type": "object",
			"properties": {"id": {"type": "integer"}}
		})),
		|args: Value| async move { Ok::<_, anyhow::Error>(json!({"record": args["id"], "status": "active"})) },
	))
}

#[tokio::test]
async fn test_local_tool_runs_in_process() -> anyhow::Result<()> {
	let (builder, agent) = scripted_builder(vec![
		ScriptedTurn::tool("lookup", json!({"id": 7})),
		ScriptedTurn::text("found it"),
	]);
	let gateway = builder.local_tool(lookup_tool()).build();
	let mut client = connect(&gateway).await;

	client.run_agent(user_turn("t1", "r1", "m1", "find 7")).await;
	let events = client.run_events().await;
	validate_run(&events)?;
	assert_eq!(event_names(&events).last(), Some(&"RUN_FINISHED"));
	assert!(event_names(&events).contains(&"TOOL_CALL_END"));
	assert_eq!(
		agent.tool_results(),
		vec![Ok(ToolOutcome::Completed(json!({"record": 7, "status": "active"})))]
	);
	assert!(client.connection.session().lock().pending_tool_calls.is_empty());
	Ok(())
}

#[tokio::test]
async fn test_remote_tools_are_discovered_and_invoked() -> anyhow::Result<()> {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(body_partial_json(json!({"method": "tools/list"})))
		.and(header("authorization", "Bearer caller-token"))
		.respond_with(rpc_result(json!({"tools": [
			{"name": "add", "description": "Add two numbers", "inputSchema": {"type": "object"}},
		]})))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.and(body_partial_json(json!({
			"method": "tools/call",
			"params": {"name": "add", "arguments": {"a": 2, "b": 3}}
		})))
		.and(header("authorization", "Bearer caller-token"))
		.respond_with(rpc_result(json!({"content": [{"type": "text", "text": "{\"sum\": 5}"}]})))
		.expect(2)
		.mount(&server)
		.await;

	let (builder, agent) = scripted_builder(vec![
		ScriptedTurn::tool("math_add", json!({"a": 2, "b": 3})),
		ScriptedTurn::text("five"),
	]);
	let gateway = builder
		.local_tool(lookup_tool())
		.remote_tools(vec![
			RemoteEndpointConfig::new(server.uri())
				.with_namespace("math")
				.with_timeout(Duration::from_secs(5)),
		])
		.build();
	let mut client = connect(&gateway).await;

	let forwarded = json!({
		"remoteToolHeaders": {"http://127.0.0.1:*": {"authorization": "Bearer caller-token"}}
	});
	let mut turn = user_turn("t1", "r1", "m1", "2 + 3");
	turn["tools"] = json!([{"name": "confirm"}]);
	turn["forwardedProps"] = forwarded.clone();
	client.run_agent(turn).await;
	let events = client.run_events().await;
	assert_eq!(event_names(&events).last(), Some(&"RUN_FINISHED"));

	let offered: Vec<_> = agent.inputs()[0].tools.iter().map(|t| t.name.clone()).collect();
	assert_eq!(offered, vec!["confirm", "lookup", "math_add"]);
	assert_eq!(
		agent.tool_results(),
		vec![Ok(ToolOutcome::Completed(json!({"sum": 5})))]
	);

	// Same headers on the next turn: discovery is served from the session cache
	let mut turn = user_turn("t1", "r2", "m2", "again");
	turn["forwardedProps"] = forwarded;
	client.run_agent(turn).await;
	client.run_events().await;
	assert_eq!(agent.inputs()[1].tools.len(), 2);
	Ok(())
}

#[tokio::test]
async fn test_unreachable_remote_endpoint_does_not_fail_the_run() -> anyhow::Result<()> {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(502))
		.mount(&server)
		.await;

	let (builder, agent) = scripted_builder(vec![ScriptedTurn::text("no tools needed")]);
	let gateway = builder
		.remote_tools(vec![RemoteEndpointConfig::new(server.uri())])
		.build();
	let mut client = connect(&gateway).await;

	client.run_agent(user_turn("t1", "r1", "m1", "hi")).await;
	let events = client.run_events().await;
	assert_eq!(event_names(&events).last(), Some(&"RUN_FINISHED"));
	assert!(agent.inputs()[0].tools.is_empty());
	Ok(())
}

#[tokio::test]
async fn test_failing_local_tool_reports_error_to_agent() -> anyhow::Result<()> {
	let (builder, agent) = scripted_builder(vec![
		ScriptedTurn::tool("explode", json!({})),
		ScriptedTurn::text("recovered"),
	]);
	let gateway = builder
		.local_tool(Arc::new(FnTool::new(ToolDefinition::new("explode", ""), |_args: Value| async {
			Err::<Value, _>(anyhow::anyhow!("kaboom"))
		})))
		.build();
	let mut client = connect(&gateway).await;

	client.run_agent(user_turn("t1", "r1", "m1", "go")).await;
	let events = client.run_events().await;
	assert_eq!(event_names(&events).last(), Some(&"RUN_FINISHED"));
	let results = agent.tool_results();
	assert!(matches!(&results[..], [Err(e)] if e.contains("kaboom")));
	assert!(
		events
			.iter()
			.any(|e| matches!(&e.kind, EventKind::ToolCallStart { tool_call_name, .. } if tool_call_name == "explode"))
	);
	Ok(())
}
