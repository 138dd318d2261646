// Tool definitions and in-process tool execution
//
// A run's tool list merges three sources:
// - tools declared by the client in `run_agent` (executed by the browser)
// - local tools registered on the gateway (executed in-process)
// - remote tools discovered from configured JSON-RPC tool servers

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::remote::EndpointId;

/// A named, schema-described action an agent can request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
	pub name: String,
	#[serde(default)]
	pub description: String,
	/// JSON schema describing the arguments object
	#[serde(default = "empty_object_schema")]
	pub parameters: Value,
	/// Forces the agent to ask the user before calling the tool
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub confirmation_required: bool,
	/// Where the tool executes. Never sent over the wire.
	#[serde(skip)]
	pub origin: ToolOrigin,
}

fn empty_object_schema() -> Value {
	serde_json::json!({"type": "object", "properties": {}})
}

/// Executor that owns a tool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolOrigin {
	/// Declared by the client; executed in the browser
	#[default]
	Client,
	/// Registered on the gateway; executed in-process
	Local,
	/// Discovered from a remote tool server
	Remote(RemoteToolRef),
}

/// Lookup-only association between a discovered tool and the endpoint it came from.
///
/// The endpoint is referenced by index into the registry's endpoint table, so tool
/// lists can be cloned and dropped independently of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteToolRef {
	pub endpoint: EndpointId,
	/// Tool name on the remote server, before namespacing
	pub original_name: String,
}

impl ToolDefinition {
	pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			description: description.into(),
			parameters: empty_object_schema(),
			confirmation_required: false,
			origin: ToolOrigin::Client,
		}
	}

	pub fn with_parameters(mut self, parameters: Value) -> Self {
		self.parameters = parameters;
		self
	}

	pub fn with_confirmation(mut self) -> Self {
		self.confirmation_required = true;
		self
	}

	pub fn with_origin(mut self, origin: ToolOrigin) -> Self {
		self.origin = origin;
		self
	}

	pub fn is_remote(&self) -> bool {
		matches!(self.origin, ToolOrigin::Remote(_))
	}

	pub fn remote_ref(&self) -> Option<&RemoteToolRef> {
		match &self.origin {
			ToolOrigin::Remote(r) => Some(r),
			_ => None,
		}
	}
}

/// Merge tool lists in priority order. The first definition of a name wins.
pub fn merge_tools<I>(sources: I) -> Vec<ToolDefinition>
where
	I: IntoIterator<Item = Vec<ToolDefinition>>,
{
	let mut merged: IndexMap<String, ToolDefinition> = IndexMap::new();
	for tool in sources.into_iter().flatten() {
		if merged.contains_key(&tool.name) {
			tracing::debug!(target: "gateway", tool = %tool.name, "dropping shadowed tool definition");
			continue;
		}
		merged.insert(tool.name.clone(), tool);
	}
	merged.into_values().collect()
}

/// A tool executed inside the gateway process
#[async_trait]
pub trait LocalTool: Send + Sync {
	fn definition(&self) -> ToolDefinition;

	async fn call(&self, args: Value) -> anyhow::Result<Value>;
}

/// Adapter turning an async closure into a [`LocalTool`]
pub struct FnTool<F> {
	definition: ToolDefinition,
	f: F,
}

impl<F, Fut> FnTool<F>
where
	F: Fn(Value) -> Fut + Send + Sync,
	Fut: Future<Output = anyhow::Result<Value>> + Send,
{
	pub fn new(definition: ToolDefinition, f: F) -> Self {
		Self { definition, f }
	}
}

#[async_trait]
impl<F, Fut> LocalTool for FnTool<F>
where
	F: Fn(Value) -> Fut + Send + Sync,
	Fut: Future<Output = anyhow::Result<Value>> + Send,
{
	fn definition(&self) -> ToolDefinition {
		self.definition.clone()
	}

	async fn call(&self, args: Value) -> anyhow::Result<Value> {
		(self.f)(args).await
	}
}

/// Local tools registered on the gateway, keyed by name
#[derive(Clone)]
pub struct LocalToolSet {
	tools: IndexMap<String, Arc<dyn LocalTool>>,
	timeout: Duration,
}

impl Default for LocalToolSet {
	fn default() -> Self {
		Self::new(Duration::from_secs(30))
	}
}

impl std::fmt::Debug for LocalToolSet {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LocalToolSet")
			.field("tools", &self.tools.keys().collect::<Vec<_>>())
			.field("timeout", &self.timeout)
			.finish()
	}
}

impl LocalToolSet {
	pub fn new(timeout: Duration) -> Self {
		Self {
			tools: IndexMap::new(),
			timeout,
		}
	}

	pub fn register(&mut self, tool: Arc<dyn LocalTool>) {
		let name = tool.definition().name;
		if self.tools.insert(name.clone(), tool).is_some() {
			tracing::warn!(target: "gateway", tool = %name, "local tool registered twice, keeping the last one");
		}
	}

	pub fn get(&self, name: &str) -> Option<&Arc<dyn LocalTool>> {
		self.tools.get(name)
	}

	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	pub fn is_empty(&self) -> bool {
		self.tools.is_empty()
	}

	/// Definitions of every local tool, tagged with [`ToolOrigin::Local`]
	pub fn definitions(&self) -> Vec<ToolDefinition> {
		self
			.tools
			.values()
			.map(|t| t.definition().with_origin(ToolOrigin::Local))
			.collect()
	}
}
