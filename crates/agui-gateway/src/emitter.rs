// Outbound delivery
//
// `Outbound` forwards frames to the connection's writer. Delivery to a closed
// connection is skipped silently. `EventEmitter` wraps it for one run and checks
// every event against the run sequencing rules.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::protocol::{EventKind, OutboundMessage, ProtocolEvent, SequenceValidator};

#[derive(Debug, Clone)]
pub struct Outbound {
	tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl Outbound {
	pub fn new(tx: mpsc::UnboundedSender<OutboundMessage>) -> Self {
		Self { tx }
	}

	/// Queue a frame. Returns false if the connection is already closed.
	pub fn send(&self, message: OutboundMessage) -> bool {
		match self.tx.send(message) {
			Ok(()) => true,
			Err(e) => {
				trace!(target: "gateway", kind = %e.0.kind, "dropping frame for closed connection");
				false
			},
		}
	}

	pub fn is_closed(&self) -> bool {
		self.tx.is_closed()
	}
}

/// Emits one run's protocol events, in order
#[derive(Debug, Clone)]
pub struct EventEmitter {
	outbound: Outbound,
	run_id: Option<String>,
	validator: Arc<Mutex<SequenceValidator>>,
}

impl EventEmitter {
	pub fn new(outbound: Outbound, run_id: Option<String>) -> Self {
		Self {
			outbound,
			run_id,
			validator: Arc::new(Mutex::new(SequenceValidator::new())),
		}
	}

	pub fn run_id(&self) -> Option<&str> {
		self.run_id.as_deref()
	}

	/// Forward one event. Sequencing violations are logged, never dropped.
	pub fn emit(&self, kind: EventKind) {
		if let Err(e) = self.validator.lock().observe(&kind) {
			warn!(target: "gateway", run_id = ?self.run_id, event = kind.name(), error = %e, "event out of sequence");
		}
		let event = ProtocolEvent::new(kind);
		self.outbound.send(OutboundMessage::event(&event));
	}

	/// Whether any text message or tool call was emitted so far
	pub fn produced_output(&self) -> bool {
		self.validator.lock().produced_output()
	}

	pub fn is_concluded(&self) -> bool {
		self.validator.lock().is_closed()
	}

	pub fn outbound(&self) -> &Outbound {
		&self.outbound
	}
}
