// Remote tool errors

use std::time::Duration;

use thiserror::Error;

/// Errors from a single remote tool endpoint
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteToolError {
	#[error("unknown remote endpoint #{0}")]
	UnknownEndpoint(usize),

	#[error("request failed: {0}")]
	Transport(String),

	#[error("HTTP status {status}")]
	Http { status: u16 },

	#[error("JSON-RPC error {code}: {message}")]
	Rpc { code: i64, message: String },

	#[error("timed out after {0:?}")]
	Timeout(Duration),

	#[error("invalid response: {0}")]
	InvalidResponse(String),

	#[error("tool reported an error: {0}")]
	ToolFailed(String),
}

impl RemoteToolError {
	pub fn invalid_response(message: impl Into<String>) -> Self {
		Self::InvalidResponse(message.into())
	}
}

impl From<serde_json::Error> for RemoteToolError {
	fn from(e: serde_json::Error) -> Self {
		Self::InvalidResponse(e.to_string())
	}
}
