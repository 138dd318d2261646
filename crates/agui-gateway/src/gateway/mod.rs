// Connection Gateway
//
// Composes the agent registry, rate limiter, tool sources and plugin chains, and
// hands out one `Connection` per accepted transport connection. Everything here is
// shared by all connections and read-mostly; per-connection state lives in the
// connection's session.

mod connection;

pub use connection::Connection;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::agent::{Agent, AgentInfo, AgentRegistry};
use crate::config::Config;
use crate::coordinator::ToolCallCoordinator;
use crate::plugins::{ConnectionPipeline, ConnectionPlugin, RunPipeline, RunPlugin};
use crate::protocol::OutboundMessage;
use crate::ratelimit::{RateLimitConfig, RateLimiter};
use crate::remote::{RemoteEndpointConfig, RemoteToolRegistry};
use crate::tools::{LocalTool, LocalToolSet};

#[derive(Debug)]
pub struct Gateway {
	agents: AgentRegistry,
	rate_limiter: Arc<RateLimiter>,
	coordinator: Arc<ToolCallCoordinator>,
	run_plugins: Arc<RunPipeline>,
	connection_plugins: ConnectionPipeline,
}

impl Gateway {
	pub fn builder() -> GatewayBuilder {
		GatewayBuilder::default()
	}

	pub fn agents(&self) -> &AgentRegistry {
		&self.agents
	}

	pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
		&self.rate_limiter
	}

	pub fn coordinator(&self) -> &Arc<ToolCallCoordinator> {
		&self.coordinator
	}

	pub fn connection_plugins(&self) -> &ConnectionPipeline {
		&self.connection_plugins
	}

	/// Accept a connection from `caller_address`. Outbound frames for the client
	/// arrive on the returned receiver.
	pub async fn connect(
		self: &Arc<Self>,
		caller_address: impl Into<String>,
	) -> (Connection, mpsc::UnboundedReceiver<OutboundMessage>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let connection = Connection::open(self.clone(), caller_address.into(), tx).await;
		(connection, rx)
	}

	/// Start the rate limiter's periodic sweep
	pub fn spawn_background_tasks(&self) -> Option<JoinHandle<()>> {
		self.rate_limiter.clone().spawn_sweeper()
	}

	/// Flush plugins on shutdown
	pub async fn shutdown(&self) {
		info!(target: "gateway", "closing plugins");
		self.connection_plugins.close().await;
	}
}

pub struct GatewayBuilder {
	agents: AgentRegistry,
	rate_limit: RateLimitConfig,
	remote_tools: Vec<RemoteEndpointConfig>,
	http_client: Option<reqwest::Client>,
	local_tools: LocalToolSet,
	run_plugins: Vec<Arc<dyn RunPlugin>>,
	connection_plugins: Vec<Arc<dyn ConnectionPlugin>>,
}

impl Default for GatewayBuilder {
	fn default() -> Self {
		Self {
			agents: AgentRegistry::default(),
			rate_limit: RateLimitConfig::default(),
			remote_tools: Vec::new(),
			http_client: None,
			local_tools: LocalToolSet::default(),
			run_plugins: Vec::new(),
			connection_plugins: Vec::new(),
		}
	}
}

impl GatewayBuilder {
	/// Apply the gateway-level parts of a config file
	pub fn from_config(config: &Config) -> Self {
		let mut builder = Self {
			rate_limit: config.rate_limit.clone(),
			remote_tools: config.remote_tools.clone(),
			local_tools: LocalToolSet::new(config.local_tool_timeout),
			..Default::default()
		};
		if let Some(default_agent) = &config.default_agent {
			builder.agents.set_default(default_agent.clone());
		}
		builder
	}

	pub fn agent(mut self, info: AgentInfo, agent: Arc<dyn Agent>) -> Self {
		self.agents.register(info, agent);
		self
	}

	pub fn default_agent(mut self, id: impl Into<String>) -> Self {
		self.agents.set_default(id);
		self
	}

	pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
		self.rate_limit = config;
		self
	}

	pub fn remote_tools(mut self, endpoints: Vec<RemoteEndpointConfig>) -> Self {
		self.remote_tools = endpoints;
		self
	}

	pub fn http_client(mut self, client: reqwest::Client) -> Self {
		self.http_client = Some(client);
		self
	}

	pub fn local_tool(mut self, tool: Arc<dyn LocalTool>) -> Self {
		self.local_tools.register(tool);
		self
	}

	pub fn run_plugin(mut self, plugin: Arc<dyn RunPlugin>) -> Self {
		self.run_plugins.push(plugin);
		self
	}

	pub fn connection_plugin(mut self, plugin: Arc<dyn ConnectionPlugin>) -> Self {
		self.connection_plugins.push(plugin);
		self
	}

	/// Register a plugin on both chains
	pub fn plugin<P>(self, plugin: Arc<P>) -> Self
	where
		P: RunPlugin + ConnectionPlugin + 'static,
	{
		self
			.run_plugin(plugin.clone())
			.connection_plugin(plugin)
	}

	pub fn build(self) -> Arc<Gateway> {
		let remote = match self.http_client {
			Some(client) => RemoteToolRegistry::with_client(self.remote_tools, client),
			None => RemoteToolRegistry::new(self.remote_tools),
		};
		info!(
			target: "gateway",
			agents = ?self.agents.ids(),
			remote_endpoints = remote.endpoints().len(),
			run_plugins = self.run_plugins.len(),
			connection_plugins = self.connection_plugins.len(),
			"gateway built"
		);
		Arc::new(Gateway {
			agents: self.agents,
			rate_limiter: Arc::new(RateLimiter::new(&self.rate_limit)),
			coordinator: Arc::new(ToolCallCoordinator::new(
				Arc::new(remote),
				Arc::new(self.local_tools),
			)),
			run_plugins: Arc::new(RunPipeline::new(self.run_plugins)),
			connection_plugins: ConnectionPipeline::new(self.connection_plugins),
		})
	}
}
