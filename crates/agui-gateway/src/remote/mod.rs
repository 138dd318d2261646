// Remote Tool Registry
//
// Treats every configured tool server as an independent tool source:
// - discovery over JSON-RPC `tools/list`, isolated per endpoint (a failing endpoint
//   contributes no tools but never fails the others)
// - optional namespacing of discovered names (`{namespace}_{name}`)
// - invocation over JSON-RPC `tools/call` with a bounded timeout
// - per-session caching keyed by a hash of the caller's header routing and bounded
//   by each endpoint's TTL

mod error;
pub mod jsonrpc;

pub use error::RemoteToolError;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use itertools::Itertools;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::serde_dur;
use crate::patterns::HeaderRouting;
use crate::session::SharedSession;
use crate::tools::{RemoteToolRef, ToolDefinition, ToolOrigin};

use self::jsonrpc::{JsonRpcRequest, JsonRpcResponse, ListToolsResult};

const NAMESPACE_DELIMITER: &str = "_";

/// Configuration for one remote tool server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RemoteEndpointConfig {
	pub url: String,
	/// Static headers sent with every request to this endpoint
	#[serde(default)]
	pub headers: HashMap<String, String>,
	#[serde(default = "default_timeout", with = "serde_dur")]
	pub timeout: Duration,
	/// Prefix applied to every discovered tool name
	#[serde(default)]
	pub namespace: Option<String>,
	/// How long a session may reuse discovered tools. Zero caches for the session lifetime.
	#[serde(default, with = "serde_dur")]
	pub tools_cache_ttl: Duration,
}

fn default_timeout() -> Duration {
	Duration::from_secs(10)
}

impl RemoteEndpointConfig {
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			headers: HashMap::new(),
			timeout: default_timeout(),
			namespace: None,
			tools_cache_ttl: Duration::ZERO,
		}
	}

	pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
		self.namespace = Some(namespace.into());
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
		self.tools_cache_ttl = ttl;
		self
	}

	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.insert(name.into(), value.into());
		self
	}

	fn tool_name(&self, original: &str) -> String {
		match &self.namespace {
			Some(ns) => format!("{ns}{NAMESPACE_DELIMITER}{original}"),
			None => original.to_string(),
		}
	}
}

/// Index of an endpoint in the registry's endpoint table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointId(pub usize);

impl fmt::Display for EndpointId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Per-session cache of discovered tools
#[derive(Debug, Default, Clone)]
pub struct RemoteToolsCache {
	tools: BTreeMap<EndpointId, Vec<ToolDefinition>>,
	/// Hash of the header routing used for the last fetch
	key: Option<String>,
	timestamp: Option<Instant>,
}

impl RemoteToolsCache {
	/// Valid iff the header hash matches the last fetch and no endpoint with a
	/// nonzero TTL has aged out
	pub fn is_valid<'a>(
		&self,
		key: &str,
		now: Instant,
		endpoints: impl IntoIterator<Item = &'a RemoteEndpointConfig>,
	) -> bool {
		let (Some(cached_key), Some(timestamp)) = (&self.key, self.timestamp) else {
			return false;
		};
		if cached_key != key {
			return false;
		}
		let age = now.saturating_duration_since(timestamp);
		endpoints
			.into_iter()
			.all(|e| e.tools_cache_ttl.is_zero() || age < e.tools_cache_ttl)
	}

	pub fn replace(&mut self, key: String, now: Instant, tools: BTreeMap<EndpointId, Vec<ToolDefinition>>) {
		self.tools = tools;
		self.key = Some(key);
		self.timestamp = Some(now);
	}

	pub fn clear(&mut self) {
		*self = Self::default();
	}

	pub fn key(&self) -> Option<&str> {
		self.key.as_deref()
	}

	pub fn timestamp(&self) -> Option<Instant> {
		self.timestamp
	}

	pub fn tools_for(&self, endpoint: EndpointId) -> Option<&[ToolDefinition]> {
		self.tools.get(&endpoint).map(Vec::as_slice)
	}

	/// Every cached tool, in endpoint order
	pub fn merged(&self) -> Vec<ToolDefinition> {
		self.tools.values().flatten().cloned().collect_vec()
	}
}

/// Stable hash over the caller's header routing, independent of declaration order
pub fn header_hash(routing: &HeaderRouting) -> String {
	let sorted: BTreeMap<&str, BTreeMap<&str, &str>> = routing
		.entries()
		.iter()
		.map(|(pattern, headers)| {
			(
				pattern.as_str(),
				headers.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect(),
			)
		})
		.collect();
	// Maps of strings always serialize
	let canonical = serde_json::to_vec(&sorted).unwrap_or_default();
	hex::encode(Sha256::digest(&canonical))
}

#[derive(Debug)]
pub struct RemoteToolRegistry {
	endpoints: Vec<RemoteEndpointConfig>,
	client: reqwest::Client,
	request_ids: AtomicU64,
}

impl Default for RemoteToolRegistry {
	fn default() -> Self {
		Self::new(Vec::new())
	}
}

impl RemoteToolRegistry {
	pub fn new(endpoints: Vec<RemoteEndpointConfig>) -> Self {
		Self::with_client(endpoints, reqwest::Client::new())
	}

	pub fn with_client(endpoints: Vec<RemoteEndpointConfig>, client: reqwest::Client) -> Self {
		Self {
			endpoints,
			client,
			request_ids: AtomicU64::new(1),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.endpoints.is_empty()
	}

	pub fn endpoints(&self) -> &[RemoteEndpointConfig] {
		&self.endpoints
	}

	pub fn endpoint(&self, id: EndpointId) -> Option<&RemoteEndpointConfig> {
		self.endpoints.get(id.0)
	}

	fn endpoint_ids(&self) -> impl Iterator<Item = EndpointId> + '_ {
		(0..self.endpoints.len()).map(EndpointId)
	}

	/// Static endpoint headers overlaid with the caller's routed headers
	fn request_headers(endpoint: &RemoteEndpointConfig, routing: &HeaderRouting) -> HeaderMap {
		let mut headers = HeaderMap::new();
		let routed = routing.resolve(&endpoint.url);
		for (name, value) in endpoint.headers.iter().chain(routed.into_iter().flatten()) {
			match (
				HeaderName::from_bytes(name.as_bytes()),
				HeaderValue::from_str(value),
			) {
				(Ok(name), Ok(value)) => {
					headers.insert(name, value);
				},
				_ => {
					warn!(target: "remote_tools", endpoint = %endpoint.url, header = %name, "skipping invalid header");
				},
			}
		}
		headers
	}

	async fn rpc(
		&self,
		id: EndpointId,
		method: &str,
		params: Option<Value>,
		routing: &HeaderRouting,
	) -> Result<Value, RemoteToolError> {
		let endpoint = self
			.endpoint(id)
			.ok_or(RemoteToolError::UnknownEndpoint(id.0))?;
		let request_id = self.request_ids.fetch_add(1, Ordering::Relaxed);
		let body = JsonRpcRequest::new(request_id, method, params);
		let headers = Self::request_headers(endpoint, routing);

		let call = async {
			let resp = self
				.client
				.post(&endpoint.url)
				.headers(headers)
				.header(ACCEPT, "application/json, text/event-stream")
				.json(&body)
				.send()
				.await
				.map_err(|e| RemoteToolError::Transport(e.to_string()))?;

			let status = resp.status();
			if !status.is_success() {
				return Err(RemoteToolError::Http {
					status: status.as_u16(),
				});
			}
			let is_event_stream = resp
				.headers()
				.get(CONTENT_TYPE)
				.and_then(|v| v.to_str().ok())
				.is_some_and(|v| v.starts_with("text/event-stream"));
			let text = resp
				.text()
				.await
				.map_err(|e| RemoteToolError::Transport(e.to_string()))?;

			let envelope: JsonRpcResponse = if is_event_stream {
				jsonrpc::parse_sse_body(&text)?
			} else {
				serde_json::from_str(&text)?
			};
			envelope.into_result()
		};

		tokio::time::timeout(endpoint.timeout, call)
			.await
			.map_err(|_| RemoteToolError::Timeout(endpoint.timeout))?
	}

	/// Discover one endpoint's tools, surfacing failures
	pub async fn try_discover(
		&self,
		id: EndpointId,
		routing: &HeaderRouting,
	) -> Result<Vec<ToolDefinition>, RemoteToolError> {
		let result = self
			.rpc(id, jsonrpc::METHOD_LIST_TOOLS, None, routing)
			.await?;
		let listed: ListToolsResult = serde_json::from_value(result)?;
		let endpoint = self
			.endpoint(id)
			.ok_or(RemoteToolError::UnknownEndpoint(id.0))?;

		Ok(listed
			.tools
			.into_iter()
			.map(|tool| {
				let mut def = ToolDefinition::new(
					endpoint.tool_name(&tool.name),
					tool.description.unwrap_or_default(),
				)
				.with_origin(ToolOrigin::Remote(RemoteToolRef {
					endpoint: id,
					original_name: tool.name,
				}));
				if let Some(schema) = tool.input_schema {
					def.parameters = schema;
				}
				def
			})
			.collect_vec())
	}

	/// Discover one endpoint's tools. Any failure is logged and yields an empty list.
	pub async fn discover(&self, id: EndpointId, routing: &HeaderRouting) -> Vec<ToolDefinition> {
		match self.try_discover(id, routing).await {
			Ok(tools) => {
				debug!(
					target: "remote_tools",
					endpoint = %id,
					tools = %tools.iter().map(|t| t.name.as_str()).join(", "),
					"discovered tools"
				);
				tools
			},
			Err(e) => {
				let url = self.endpoint(id).map(|e| e.url.as_str()).unwrap_or_default();
				warn!(target: "remote_tools", endpoint = %id, url, error = %e, "tool discovery failed");
				Vec::new()
			},
		}
	}

	/// Call `original_name` on an endpoint
	pub async fn invoke(
		&self,
		id: EndpointId,
		original_name: &str,
		args: Value,
		routing: &HeaderRouting,
	) -> Result<Value, RemoteToolError> {
		debug!(target: "remote_tools", endpoint = %id, tool = original_name, "invoking remote tool");
		let params = serde_json::json!({
			"name": original_name,
			"arguments": args,
		});
		let result = self
			.rpc(id, jsonrpc::METHOD_CALL_TOOL, Some(params), routing)
			.await?;
		jsonrpc::extract_tool_output(result)
	}

	pub async fn invoke_tool(
		&self,
		tool: &RemoteToolRef,
		args: Value,
		routing: &HeaderRouting,
	) -> Result<Value, RemoteToolError> {
		self
			.invoke(tool.endpoint, &tool.original_name, args, routing)
			.await
	}

	/// Remote tools for a session, served from its cache when still valid.
	///
	/// On a miss every endpoint is queried in parallel and the cache is replaced.
	pub async fn fetch_all_for_session(
		&self,
		session: &SharedSession,
		routing: &HeaderRouting,
	) -> Vec<ToolDefinition> {
		if self.is_empty() {
			return Vec::new();
		}

		let key = header_hash(routing);
		{
			let session = session.lock();
			if session
				.remote_tools
				.is_valid(&key, Instant::now(), &self.endpoints)
			{
				return session.remote_tools.merged();
			}
		}

		let fetched = join_all(self.endpoint_ids().map(|id| async move {
			let tools = self.discover(id, routing).await;
			(id, tools)
		}))
		.await;
		let tools: BTreeMap<_, _> = fetched.into_iter().collect();
		let total: usize = tools.values().map(Vec::len).sum();
		info!(target: "remote_tools", endpoints = tools.len(), tools = total, "refreshed remote tools");

		let mut session = session.lock();
		session.remote_tools.replace(key, Instant::now(), tools);
		session.remote_tools.merged()
	}
}
