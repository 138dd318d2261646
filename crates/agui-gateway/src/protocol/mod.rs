// Connection protocol
//
// Inbound frames are `{type, data}` objects. Outbound frames use the same envelope:
// an `agents` directory once per connection, an `event` envelope per protocol event,
// and any plugin-defined message types.

mod events;
mod messages;
mod sequence;

pub use events::{EventKind, ProtocolEvent, now_millis};
pub use messages::{
	AbortRunInput, ContextItem, ForwardedProps, FunctionCall, InboundFrame, Message,
	MessageToolCall, OutboundMessage, Role, RunAgentInput, ToolResultInput,
};
pub use sequence::{SequenceError, SequenceValidator, validate_run};

/// Built-in inbound message types
pub const RUN_AGENT: &str = "run_agent";
pub const TOOL_RESULT: &str = "tool_result";
pub const ABORT_RUN: &str = "abort_run";

/// Built-in outbound message types
pub const AGENTS: &str = "agents";
pub const EVENT: &str = "event";
