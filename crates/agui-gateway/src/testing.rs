// Test support: drive a connection through channels instead of a socket

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::gateway::{Connection, Gateway};
use crate::protocol::{EventKind, OutboundMessage, ProtocolEvent, RUN_AGENT};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestClient {
	pub connection: Connection,
	rx: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl TestClient {
	pub async fn connect(gateway: &Arc<Gateway>, caller_address: &str) -> Self {
		let (connection, rx) = gateway.connect(caller_address).await;
		Self { connection, rx }
	}

	pub async fn send(&self, kind: &str, data: Value) {
		let frame = json!({"type": kind, "data": data});
		self.connection.handle_text(&frame.to_string()).await;
	}

	pub async fn run_agent(&self, data: Value) {
		self.send(RUN_AGENT, data).await;
	}

	/// Next outbound frame, or None if nothing arrives in time
	pub async fn next_message(&mut self) -> Option<OutboundMessage> {
		tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
			.await
			.ok()
			.flatten()
	}

	/// Next protocol event, skipping other frames
	pub async fn next_event(&mut self) -> Option<ProtocolEvent> {
		loop {
			let message = self.next_message().await?;
			if let Some(event) = message.as_event() {
				return Some(event);
			}
		}
	}

	/// Events up to and including the next matching one
	pub async fn events_until(&mut self, mut done: impl FnMut(&EventKind) -> bool) -> Vec<ProtocolEvent> {
		let mut events = Vec::new();
		while let Some(event) = self.next_event().await {
			let finished = done(&event.kind);
			events.push(event);
			if finished {
				break;
			}
		}
		events
	}

	/// Events up to and including the next RUN_FINISHED or RUN_ERROR
	pub async fn run_events(&mut self) -> Vec<ProtocolEvent> {
		self.events_until(EventKind::is_terminal).await
	}

	/// Frames already queued, without waiting
	pub fn drain(&mut self) -> Vec<OutboundMessage> {
		std::iter::from_fn(|| self.rx.try_recv().ok()).collect()
	}
}

/// `run_agent` payload with a single user message
pub fn user_turn(thread_id: &str, run_id: &str, message_id: &str, text: &str) -> Value {
	json!({
		"threadId": thread_id,
		"runId": run_id,
		"messages": [{"id": message_id, "role": "user", "content": text}],
	})
}

pub fn event_names(events: &[ProtocolEvent]) -> Vec<&'static str> {
	events.iter().map(ProtocolEvent::name).collect()
}
