// Gateway error taxonomy
//
// Admission errors reject a run before any agent is invoked. Protocol errors are
// logged and ignored; the connection stays open. Tool source, tool execution and
// agent errors live with their subsystems (remote, coordinator, agent).

use std::time::Duration;

use thiserror::Error;

use crate::protocol::EventKind;

/// A run rejected before the agent was invoked
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
	#[error("Rate limit exceeded. Retry after {}s.", retry_after_secs(.retry_after))]
	RateLimited { retry_after: Duration },

	#[error("Unknown agent '{requested}'. Available agents: {}", .available.join(", "))]
	UnknownAgent {
		requested: String,
		available: Vec<String>,
	},

	#[error("No agents are registered")]
	NoAgents,

	#[error("Run '{run_id}' is still in progress on this connection")]
	RunInProgress { run_id: String },
}

fn retry_after_secs(d: &Duration) -> u64 {
	d.as_millis().div_ceil(1000).max(1) as u64
}

impl AdmissionError {
	pub fn code(&self) -> &'static str {
		match self {
			AdmissionError::RateLimited { .. } => "rate_limited",
			AdmissionError::UnknownAgent { .. } | AdmissionError::NoAgents => "unknown_agent",
			AdmissionError::RunInProgress { .. } => "run_in_progress",
		}
	}

	/// The RUN_ERROR event reporting this rejection
	pub fn to_event(&self, run_id: Option<String>) -> EventKind {
		EventKind::run_error(self.code(), self.to_string(), run_id)
	}
}

/// A malformed or unroutable inbound frame
#[derive(Error, Debug)]
pub enum ProtocolError {
	#[error("malformed frame: {0}")]
	Malformed(#[source] serde_json::Error),

	#[error("invalid '{kind}' payload: {source}")]
	InvalidPayload {
		kind: String,
		#[source]
		source: serde_json::Error,
	},

	#[error("no handler for message type '{0}'")]
	UnknownType(String),

	#[error("handler for '{kind}' failed: {source}")]
	Handler {
		kind: String,
		#[source]
		source: anyhow::Error,
	},
}

impl ProtocolError {
	pub fn invalid_payload(kind: impl Into<String>, source: serde_json::Error) -> Self {
		Self::InvalidPayload {
			kind: kind.into(),
			source,
		}
	}
}
