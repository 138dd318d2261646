// Run sequencing rules
//
// A run opens with RUN_STARTED and closes with exactly one RUN_FINISHED or RUN_ERROR.
// Snapshots come right after RUN_STARTED, before any incremental event. Steps do not
// nest, text messages and tool calls are well-formed triplets, and a run that produced
// neither text nor a tool call cannot finish successfully.

use std::collections::HashMap;

use thiserror::Error;

use super::events::{EventKind, ProtocolEvent};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
	#[error("{0} emitted before RUN_STARTED")]
	NotStarted(&'static str),

	#[error("{0} emitted after the run concluded")]
	AfterTerminal(&'static str),

	#[error("RUN_STARTED emitted twice")]
	DuplicateStart,

	#[error("{0} emitted after incremental events or more than once")]
	MisplacedSnapshot(&'static str),

	#[error("step '{0}' started while step '{1}' is open")]
	NestedStep(String, String),

	#[error("STEP_FINISHED for '{0}' does not match the open step")]
	UnmatchedStep(String),

	#[error("step '{0}' finished with an open text message or tool call")]
	StepNotDrained(String),

	#[error("text message '{0}' started while '{1}' is open")]
	TextAlreadyOpen(String, String),

	#[error("text event for '{0}' does not match the open message")]
	UnmatchedText(String),

	#[error("text message '{0}' ended without content")]
	EmptyTextMessage(String),

	#[error("tool call '{0}' started twice")]
	DuplicateToolCall(String),

	#[error("tool call event for unknown call '{0}'")]
	UnknownToolCall(String),

	#[error("tool call '{0}' ended without any TOOL_CALL_ARGS")]
	MissingToolArgs(String),

	#[error("RUN_FINISHED with open text message, tool call, or step")]
	NotDrained,

	#[error("RUN_FINISHED for a run that produced no text and no tool call")]
	EmptyResponse,

	#[error("run did not conclude with RUN_FINISHED or RUN_ERROR")]
	Unterminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
	#[default]
	NotStarted,
	/// RUN_STARTED seen, no incremental event yet
	Snapshots,
	Running,
	Closed,
}

/// Incremental checker for one run's event stream
#[derive(Debug, Default)]
pub struct SequenceValidator {
	phase: Phase,
	messages_snapshot: bool,
	state_snapshot: bool,
	open_step: Option<String>,
	open_text: Option<(String, usize)>,
	/// Open tool calls and whether ARGS was seen
	open_tools: HashMap<String, bool>,
	produced_output: bool,
}

impl SequenceValidator {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_closed(&self) -> bool {
		self.phase == Phase::Closed
	}

	pub fn produced_output(&self) -> bool {
		self.produced_output
	}

	/// Check one event against the rules and advance the state machine.
	///
	/// The state still advances when an error is returned, so one violation
	/// does not cascade into errors for every following event.
	pub fn observe(&mut self, kind: &EventKind) -> Result<(), SequenceError> {
		let name = kind.name();
		match self.phase {
			Phase::Closed => return Err(SequenceError::AfterTerminal(name)),
			Phase::NotStarted => {
				return match kind {
					EventKind::RunStarted { .. } => {
						self.phase = Phase::Snapshots;
						Ok(())
					},
					// Rejected at admission
					EventKind::RunError { .. } => {
						self.phase = Phase::Closed;
						Ok(())
					},
					_ => Err(SequenceError::NotStarted(name)),
				};
			},
			Phase::Snapshots | Phase::Running => {},
		}

		match kind {
			EventKind::RunStarted { .. } => Err(SequenceError::DuplicateStart),
			EventKind::MessagesSnapshot { .. } => {
				let ok = self.phase == Phase::Snapshots && !self.messages_snapshot;
				self.messages_snapshot = true;
				ok.then_some(()).ok_or(SequenceError::MisplacedSnapshot(name))
			},
			EventKind::StateSnapshot { .. } => {
				let ok = self.phase == Phase::Snapshots && !self.state_snapshot;
				self.state_snapshot = true;
				ok.then_some(()).ok_or(SequenceError::MisplacedSnapshot(name))
			},
			EventKind::Custom { .. } | EventKind::Raw { .. } => Ok(()),
			EventKind::RunError { .. } => {
				self.phase = Phase::Closed;
				Ok(())
			},
			EventKind::RunFinished { .. } => {
				self.phase = Phase::Closed;
				if self.open_step.is_some() || self.open_text.is_some() || !self.open_tools.is_empty() {
					return Err(SequenceError::NotDrained);
				}
				if !self.produced_output {
					return Err(SequenceError::EmptyResponse);
				}
				Ok(())
			},
			incremental => {
				self.phase = Phase::Running;
				self.observe_incremental(incremental)
			},
		}
	}

	fn observe_incremental(&mut self, kind: &EventKind) -> Result<(), SequenceError> {
		match kind {
			EventKind::StepStarted { step_name } => match self.open_step.replace(step_name.clone()) {
				Some(open) => Err(SequenceError::NestedStep(step_name.clone(), open)),
				None => Ok(()),
			},
			EventKind::StepFinished { step_name } => {
				if self.open_step.as_deref() != Some(step_name.as_str()) {
					return Err(SequenceError::UnmatchedStep(step_name.clone()));
				}
				self.open_step = None;
				if self.open_text.is_some() || !self.open_tools.is_empty() {
					return Err(SequenceError::StepNotDrained(step_name.clone()));
				}
				Ok(())
			},
			EventKind::TextMessageStart { message_id, .. } => {
				if let Some((open, _)) = &self.open_text {
					return Err(SequenceError::TextAlreadyOpen(message_id.clone(), open.clone()));
				}
				self.open_text = Some((message_id.clone(), 0));
				self.produced_output = true;
				Ok(())
			},
			EventKind::TextMessageContent { message_id, .. } => match &mut self.open_text {
				Some((open, count)) if open == message_id => {
					*count += 1;
					Ok(())
				},
				_ => Err(SequenceError::UnmatchedText(message_id.clone())),
			},
			EventKind::TextMessageEnd { message_id } => match self.open_text.take() {
				Some((open, count)) if &open == message_id => {
					if count == 0 {
						return Err(SequenceError::EmptyTextMessage(open));
					}
					Ok(())
				},
				other => {
					self.open_text = other;
					Err(SequenceError::UnmatchedText(message_id.clone()))
				},
			},
			EventKind::ToolCallStart { tool_call_id, .. } => {
				if self.open_tools.insert(tool_call_id.clone(), false).is_some() {
					return Err(SequenceError::DuplicateToolCall(tool_call_id.clone()));
				}
				self.produced_output = true;
				Ok(())
			},
			EventKind::ToolCallArgs { tool_call_id, .. } => match self.open_tools.get_mut(tool_call_id) {
				Some(seen) => {
					*seen = true;
					Ok(())
				},
				None => Err(SequenceError::UnknownToolCall(tool_call_id.clone())),
			},
			EventKind::ToolCallEnd { tool_call_id } => match self.open_tools.remove(tool_call_id) {
				Some(true) => Ok(()),
				Some(false) => Err(SequenceError::MissingToolArgs(tool_call_id.clone())),
				None => Err(SequenceError::UnknownToolCall(tool_call_id.clone())),
			},
			_ => Ok(()),
		}
	}
}

/// Validate a complete run's event list
pub fn validate_run(events: &[ProtocolEvent]) -> Result<(), SequenceError> {
	let mut validator = SequenceValidator::new();
	for event in events {
		validator.observe(&event.kind)?;
	}
	if !validator.is_closed() {
		return Err(SequenceError::Unterminated);
	}
	Ok(())
}
