use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::Gateway;
use crate::agent::AgentInput;
use crate::emitter::{EventEmitter, Outbound};
use crate::error::{AdmissionError, ProtocolError};
use crate::patterns::HeaderRouting;
use crate::plugins::ConnectionHandle;
use crate::protocol::{
	ABORT_RUN, AbortRunInput, InboundFrame, OutboundMessage, RUN_AGENT, RunAgentInput, TOOL_RESULT, ToolResultInput,
};
use crate::run::{AdmittedRun, RunDriver};
use crate::session::{Session, SharedSession};
use crate::tools::merge_tools;

/// One live client connection, independent of its transport.
///
/// Inbound text frames go to [`handle_text`](Self::handle_text); outbound frames
/// are delivered on the channel given to [`Gateway::connect`].
#[derive(Debug)]
pub struct Connection {
	gateway: Arc<Gateway>,
	session: SharedSession,
	outbound: Outbound,
	handle: ConnectionHandle,
}

fn parse_payload<T: DeserializeOwned>(kind: &str, data: Value) -> Result<T, ProtocolError> {
	serde_json::from_value(data).map_err(|e| ProtocolError::invalid_payload(kind, e))
}

impl Connection {
	pub(super) async fn open(
		gateway: Arc<Gateway>,
		caller_address: String,
		tx: mpsc::UnboundedSender<OutboundMessage>,
	) -> Self {
		let client_id = format!("client_{}", uuid::Uuid::new_v4().simple());
		let session = Session::new(client_id.clone(), caller_address.clone()).shared();
		let outbound = Outbound::new(tx);
		let handle = ConnectionHandle::new(session.clone(), outbound.clone());
		info!(target: "gateway", client_id = %client_id, caller = %caller_address, "connection opened");

		outbound.send(OutboundMessage::agents(
			&gateway.agents.directory(),
			gateway.agents.default_id(),
		));
		gateway.connection_plugins.on_connect(&handle).await;

		Self {
			gateway,
			session,
			outbound,
			handle,
		}
	}

	pub fn client_id(&self) -> &str {
		&self.handle.client_id
	}

	pub fn session(&self) -> &SharedSession {
		&self.session
	}

	/// Read inbound frames until the stream ends, then close
	pub async fn serve<S>(self, inbound: S)
	where
		S: Stream<Item = String> + Send,
	{
		let mut inbound = std::pin::pin!(inbound);
		while let Some(text) = inbound.next().await {
			self.handle_text(&text).await;
		}
		self.close().await;
	}

	/// Route one raw inbound frame. Protocol errors are logged and ignored.
	pub async fn handle_text(&self, text: &str) {
		let result = match serde_json::from_str::<InboundFrame>(text) {
			Ok(frame) => self.handle_frame(frame).await,
			Err(e) => Err(ProtocolError::Malformed(e)),
		};
		if let Err(e) = result {
			warn!(target: "gateway", client_id = %self.handle.client_id, error = %e, "ignoring inbound frame");
		}
	}

	/// Route one frame by its type. Plugin handlers take priority over built-ins.
	pub async fn handle_frame(&self, frame: InboundFrame) -> Result<(), ProtocolError> {
		let InboundFrame { kind, data } = frame;
		if let Some(plugin) = self.gateway.connection_plugins.handler_for(&kind) {
			debug!(target: "gateway", client_id = %self.handle.client_id, kind = %kind, plugin = plugin.name(), "dispatching to plugin");
			return plugin
				.handle(&self.handle, &kind, data)
				.await
				.map_err(|source| ProtocolError::Handler { kind, source });
		}

		match kind.as_str() {
			RUN_AGENT => {
				self.run_agent(parse_payload(&kind, data)?);
				Ok(())
			},
			TOOL_RESULT => {
				self.tool_result(parse_payload(&kind, data)?);
				Ok(())
			},
			ABORT_RUN => {
				self.abort_run(parse_payload(&kind, data)?);
				Ok(())
			},
			_ => Err(ProtocolError::UnknownType(kind)),
		}
	}

	fn reject(&self, run_id: &str, error: AdmissionError) {
		warn!(target: "gateway", client_id = %self.handle.client_id, run_id, code = error.code(), error = %error, "run rejected");
		let emitter = EventEmitter::new(self.outbound.clone(), Some(run_id.to_string()));
		emitter.emit(error.to_event(Some(run_id.to_string())));
	}

	/// Admit a run and spawn it. Rejections produce a single RUN_ERROR.
	fn run_agent(&self, input: RunAgentInput) {
		let run_id = input.run_id.clone();
		let caller = self.handle.caller_address.clone();

		let decision = self.gateway.rate_limiter.check_limit(&caller);
		if !decision.allowed {
			let retry_after = decision.retry_after.unwrap_or_default();
			return self.reject(&run_id, AdmissionError::RateLimited { retry_after });
		}

		let (agent_info, agent) = match self
			.gateway
			.agents
			.resolve(input.forwarded_props.agent.as_deref())
		{
			Ok(found) => found,
			Err(e) => return self.reject(&run_id, e),
		};

		let routing = HeaderRouting::from(input.forwarded_props.remote_tool_headers.clone());
		let cancellation = {
			let mut session = self.session.lock();
			match session.begin_run(&run_id) {
				Ok(token) => {
					session.switch_thread(&input.thread_id);
					session.absorb_turn(&input.messages);
					session.state = input.state.clone();
					session.header_routing = routing.clone();
					token
				},
				Err(e) => {
					drop(session);
					return self.reject(&run_id, e);
				},
			}
		};

		let driver = RunDriver {
			session: self.session.clone(),
			outbound: self.outbound.clone(),
			coordinator: self.gateway.coordinator.clone(),
			pipeline: self.gateway.run_plugins.clone(),
		};
		tokio::spawn(async move {
			let coordinator = driver.coordinator.clone();
			let remote = coordinator
				.remote()
				.fetch_all_for_session(&driver.session, &routing)
				.await;
			let tools = merge_tools([input.tools, coordinator.local().definitions(), remote]);
			let messages = {
				let mut session = driver.session.lock();
				session.tools = tools.clone();
				session.conversation_history.clone()
			};

			let agent_input = AgentInput {
				thread_id: input.thread_id,
				run_id: input.run_id,
				messages,
				tools,
				state: input.state,
				context: input.context,
				system_prompt: None,
				forwarded_props: input.forwarded_props,
			};
			driver
				.drive(AdmittedRun {
					agent_id: agent_info.id,
					agent,
					input: agent_input,
					cancellation,
				})
				.await;
		});
	}

	fn tool_result(&self, input: ToolResultInput) {
		let resolved = self
			.session
			.lock()
			.pending_tool_calls
			.resolve(&input.tool_call_id, input.content);
		if resolved {
			debug!(target: "gateway", client_id = %self.handle.client_id, call_id = %input.tool_call_id, "tool result delivered");
		} else {
			warn!(target: "gateway", client_id = %self.handle.client_id, call_id = %input.tool_call_id, "tool result for unknown or finished call");
		}
	}

	fn abort_run(&self, input: AbortRunInput) {
		match self.session.lock().abort_run(&input.run_id) {
			Some(abandoned) => {
				info!(target: "gateway", client_id = %self.handle.client_id, run_id = %input.run_id, abandoned, "run abort requested");
			},
			None => {
				debug!(target: "gateway", client_id = %self.handle.client_id, run_id = %input.run_id, "abort for a run that is not in flight");
			},
		}
	}

	/// Notify plugins and release the session. Calling it again is a no-op.
	pub async fn close(&self) {
		{
			let mut session = self.session.lock();
			if session.is_closed() {
				return;
			}
			session.close();
		}
		self.gateway.connection_plugins.on_disconnect(&self.handle).await;
		info!(target: "gateway", client_id = %self.handle.client_id, "connection closed");
	}
}
