// Long-polling transport
//
// Carries the same `{type, data}` frames as the WebSocket transport over plain
// HTTP. Clients that stop polling are closed after the idle timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{AppState, CallerAddress};
use crate::config::serde_dur;
use crate::gateway::{Connection, Gateway};
use crate::protocol::OutboundMessage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LongPollConfig {
	/// How long a poll waits for the first outbound frame
	#[serde(with = "serde_dur")]
	pub poll_timeout: Duration,
	/// Connections not polled for this long are closed
	#[serde(with = "serde_dur")]
	pub idle_timeout: Duration,
}

impl Default for LongPollConfig {
	fn default() -> Self {
		Self {
			poll_timeout: Duration::from_secs(25),
			idle_timeout: Duration::from_secs(120),
		}
	}
}

#[derive(Debug)]
struct PollConnection {
	connection: Connection,
	outbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<OutboundMessage>>,
	last_seen: parking_lot::Mutex<Instant>,
}

impl PollConnection {
	fn touch(&self) {
		*self.last_seen.lock() = Instant::now();
	}
}

#[derive(Debug, Default)]
pub struct LongPollRegistry {
	config: LongPollConfig,
	connections: parking_lot::Mutex<HashMap<String, Arc<PollConnection>>>,
}

impl LongPollRegistry {
	pub fn new(config: LongPollConfig) -> Self {
		Self {
			config,
			connections: Default::default(),
		}
	}

	pub fn len(&self) -> usize {
		self.connections.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn get(&self, id: &str) -> Option<Arc<PollConnection>> {
		let conn = self.connections.lock().get(id).cloned()?;
		conn.touch();
		Some(conn)
	}

	/// Open a connection and return its id
	pub async fn open(&self, gateway: &Arc<Gateway>, caller_address: String) -> String {
		let (connection, rx) = gateway.connect(caller_address).await;
		let id = uuid::Uuid::new_v4().simple().to_string();
		debug!(target: "gateway", connection_id = %id, client_id = connection.client_id(), "long-poll connection opened");
		self.connections.lock().insert(
			id.clone(),
			Arc::new(PollConnection {
				connection,
				outbound: tokio::sync::Mutex::new(rx),
				last_seen: parking_lot::Mutex::new(Instant::now()),
			}),
		);
		id
	}

	/// Deliver one inbound frame. Returns false for an unknown connection.
	pub async fn send(&self, id: &str, frame: &str) -> bool {
		let Some(conn) = self.get(id) else {
			return false;
		};
		conn.connection.handle_text(frame).await;
		true
	}

	/// Wait up to the poll timeout for outbound frames, then drain what is queued.
	/// Returns None for an unknown connection.
	pub async fn poll(&self, id: &str) -> Option<Vec<OutboundMessage>> {
		let conn = self.get(id)?;
		let mut messages = Vec::new();
		{
			let mut rx = conn.outbound.lock().await;
			if let Ok(Some(first)) = tokio::time::timeout(self.config.poll_timeout, rx.recv()).await {
				messages.push(first);
				while let Ok(next) = rx.try_recv() {
					messages.push(next);
				}
			}
		}
		conn.touch();
		Some(messages)
	}

	/// Close a connection. Returns false if it was unknown.
	pub async fn close(&self, id: &str) -> bool {
		let Some(conn) = self.connections.lock().remove(id) else {
			return false;
		};
		conn.connection.close().await;
		true
	}

	/// Close every connection idle for longer than the idle timeout
	pub async fn reap_idle(&self) -> usize {
		let now = Instant::now();
		let idle: Vec<Arc<PollConnection>> = {
			let mut connections = self.connections.lock();
			let ids: Vec<String> = connections
				.iter()
				.filter(|(_, c)| now.saturating_duration_since(*c.last_seen.lock()) >= self.config.idle_timeout)
				.map(|(id, _)| id.clone())
				.collect();
			ids.iter().filter_map(|id| connections.remove(id)).collect()
		};
		for conn in &idle {
			conn.connection.close().await;
		}
		if !idle.is_empty() {
			info!(target: "gateway", closed = idle.len(), "closed idle long-poll connections");
		}
		idle.len()
	}

	pub fn spawn_reaper(self: Arc<Self>) -> Option<JoinHandle<()>> {
		let period = self.config.idle_timeout / 2;
		if period.is_zero() {
			return None;
		}
		Some(tokio::spawn(async move {
			let mut ticker = tokio::time::interval(period);
			ticker.tick().await;
			loop {
				ticker.tick().await;
				self.reap_idle().await;
			}
		}))
	}
}

pub(super) async fn connect(State(state): State<AppState>, CallerAddress(caller): CallerAddress) -> Json<serde_json::Value> {
	let id = state.polls.open(&state.gateway, caller).await;
	Json(json!({"connectionId": id}))
}

pub(super) async fn send(State(state): State<AppState>, Path(id): Path<String>, body: String) -> StatusCode {
	if state.polls.send(&id, &body).await {
		StatusCode::ACCEPTED
	} else {
		StatusCode::NOT_FOUND
	}
}

pub(super) async fn poll(State(state): State<AppState>, Path(id): Path<String>) -> Response {
	match state.polls.poll(&id).await {
		Some(messages) => Json(json!({"messages": messages})).into_response(),
		None => StatusCode::NOT_FOUND.into_response(),
	}
}

pub(super) async fn close(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
	if state.polls.close(&id).await {
		StatusCode::NO_CONTENT
	} else {
		StatusCode::NOT_FOUND
	}
}
