// Session Store
//
// Per-connection state: conversation history, the current run, its tools,
// pending client tool calls and the remote tool cache. One session per live
// connection; it is dropped when the connection closes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::AdmissionError;
use crate::patterns::HeaderRouting;
use crate::protocol::Message;
use crate::remote::RemoteToolsCache;
use crate::tools::ToolDefinition;

/// Sessions are shared between the connection loop and its run task.
/// Locks are only held for synchronous updates, never across an await.
pub type SharedSession = Arc<Mutex<Session>>;

struct PendingEntry {
	run_id: String,
	resolver: oneshot::Sender<Value>,
}

/// Single-use resolvers for client-executed tool calls, keyed by call id
#[derive(Default)]
pub struct PendingToolCalls {
	entries: HashMap<String, PendingEntry>,
}

impl std::fmt::Debug for PendingToolCalls {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_set().entries(self.entries.keys()).finish()
	}
}

impl PendingToolCalls {
	/// Register a resolver for `call_id`. Returns None if one is already pending.
	pub fn register(&mut self, call_id: &str, run_id: &str) -> Option<oneshot::Receiver<Value>> {
		if self.entries.contains_key(call_id) {
			return None;
		}
		let (tx, rx) = oneshot::channel();
		self.entries.insert(
			call_id.to_string(),
			PendingEntry {
				run_id: run_id.to_string(),
				resolver: tx,
			},
		);
		Some(rx)
	}

	/// Fire and remove the resolver for `call_id`. Returns false if none was pending.
	pub fn resolve(&mut self, call_id: &str, result: Value) -> bool {
		let Some(entry) = self.entries.remove(call_id) else {
			return false;
		};
		// The waiter may already be gone if its run task was dropped
		let _ = entry.resolver.send(result);
		true
	}

	/// Drop every resolver belonging to `run_id` without resolving it
	pub fn abandon_run(&mut self, run_id: &str) -> usize {
		let before = self.entries.len();
		self.entries.retain(|_, e| e.run_id != run_id);
		before - self.entries.len()
	}

	pub fn abandon_all(&mut self) -> usize {
		let count = self.entries.len();
		self.entries.clear();
		count
	}

	pub fn contains(&self, call_id: &str) -> bool {
		self.entries.contains_key(call_id)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

#[derive(Debug)]
pub struct Session {
	/// Process-local connection identity
	pub client_id: String,
	/// Address used for rate limiting
	pub caller_address: String,
	pub thread_id: String,
	pub current_run_id: Option<String>,
	/// Merged client, local and remote tools of the current run
	pub tools: Vec<ToolDefinition>,
	/// Opaque application state, round-tripped to the agent
	pub state: Value,
	pub conversation_history: Vec<Message>,
	pub pending_tool_calls: PendingToolCalls,
	/// Cancellation signal of the current run
	pub cancellation_token: CancellationToken,
	pub remote_tools: RemoteToolsCache,
	/// Header routing supplied with the current run, reused for remote invocations
	pub header_routing: HeaderRouting,
	closed: bool,
}

impl Session {
	pub fn new(client_id: impl Into<String>, caller_address: impl Into<String>) -> Self {
		Self {
			client_id: client_id.into(),
			caller_address: caller_address.into(),
			thread_id: uuid::Uuid::new_v4().to_string(),
			current_run_id: None,
			tools: Vec::new(),
			state: Value::Null,
			conversation_history: Vec::new(),
			pending_tool_calls: PendingToolCalls::default(),
			cancellation_token: CancellationToken::new(),
			remote_tools: RemoteToolsCache::default(),
			header_routing: HeaderRouting::default(),
			closed: false,
		}
	}

	pub fn shared(self) -> SharedSession {
		Arc::new(Mutex::new(self))
	}

	pub fn is_closed(&self) -> bool {
		self.closed
	}

	/// Adopt `thread_id`. A change resets the history. Returns true if it changed.
	pub fn switch_thread(&mut self, thread_id: &str) -> bool {
		if self.thread_id == thread_id {
			return false;
		}
		debug!(target: "gateway", client_id = %self.client_id, from = %self.thread_id, to = thread_id, "thread changed, resetting history");
		self.thread_id = thread_id.to_string();
		self.conversation_history.clear();
		true
	}

	/// Append the messages of a new turn that the history does not hold yet.
	///
	/// Clients may resend the whole conversation or just the new messages;
	/// either way only unseen message ids are appended.
	pub fn absorb_turn(&mut self, messages: &[Message]) {
		let known: HashSet<&str> = self
			.conversation_history
			.iter()
			.map(|m| m.id.as_str())
			.collect();
		let fresh: Vec<Message> = messages
			.iter()
			.filter(|m| !known.contains(m.id.as_str()))
			.cloned()
			.collect();
		self.conversation_history.extend(fresh);
	}

	/// Mark `run_id` as the in-flight run and hand out its cancellation token
	pub fn begin_run(&mut self, run_id: &str) -> Result<CancellationToken, AdmissionError> {
		if let Some(current) = &self.current_run_id {
			return Err(AdmissionError::RunInProgress {
				run_id: current.clone(),
			});
		}
		self.current_run_id = Some(run_id.to_string());
		self.cancellation_token = CancellationToken::new();
		Ok(self.cancellation_token.clone())
	}

	/// Clear the in-flight run if it is still `run_id`
	pub fn finish_run(&mut self, run_id: &str) -> bool {
		if self.current_run_id.as_deref() != Some(run_id) {
			return false;
		}
		self.current_run_id = None;
		true
	}

	/// Best-effort abort: signal cancellation and abandon the run's pending tool calls.
	/// Returns the number of abandoned calls, or None if `run_id` is not the current run.
	pub fn abort_run(&mut self, run_id: &str) -> Option<usize> {
		if self.current_run_id.as_deref() != Some(run_id) {
			return None;
		}
		self.cancellation_token.cancel();
		self.current_run_id = None;
		Some(self.pending_tool_calls.abandon_run(run_id))
	}

	/// Release everything on disconnect
	pub fn close(&mut self) {
		self.closed = true;
		self.cancellation_token.cancel();
		self.current_run_id = None;
		let abandoned = self.pending_tool_calls.abandon_all();
		if abandoned > 0 {
			debug!(target: "gateway", client_id = %self.client_id, abandoned, "abandoned pending tool calls on close");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_pending_tool_calls_single_use() {
		let mut pending = PendingToolCalls::default();
		let mut rx = pending.register("call_1", "run_1").unwrap();
		assert!(pending.register("call_1", "run_1").is_none());

		assert!(pending.resolve("call_1", json!({"ok": true})));
		assert!(!pending.contains("call_1"));
		assert_eq!(rx.try_recv().unwrap(), json!({"ok": true}));
		assert!(!pending.resolve("call_1", json!(null)));
	}

	#[test]
	fn test_abandon_run_only_touches_that_run() {
		let mut pending = PendingToolCalls::default();
		let mut a = pending.register("a", "run_1").unwrap();
		let _b = pending.register("b", "run_2").unwrap();
		assert_eq!(pending.abandon_run("run_1"), 1);
		assert_eq!(pending.len(), 1);
		// Abandoned waiters observe a closed channel, never a value
		assert!(matches!(
			a.try_recv(),
			Err(oneshot::error::TryRecvError::Closed)
		));
	}

	#[test]
	fn test_thread_change_resets_history_once() {
		let mut session = Session::new("c1", "127.0.0.1");
		session.switch_thread("t1");
		session.absorb_turn(&[Message::user("m1", "hello")]);
		session.conversation_history.push(Message::assistant("m2", "hi"));
		assert_eq!(session.conversation_history.len(), 2);

		assert!(!session.switch_thread("t1"));
		assert_eq!(session.conversation_history.len(), 2);

		assert!(session.switch_thread("t2"));
		assert!(session.conversation_history.is_empty());
	}

	#[test]
	fn test_absorb_turn_appends_only_unseen() {
		let mut session = Session::new("c1", "127.0.0.1");
		session.absorb_turn(&[Message::user("m1", "one")]);
		session.conversation_history.push(Message::assistant("m2", "reply"));
		session.absorb_turn(&[
			Message::user("m1", "one"),
			Message::assistant("m2", "reply"),
			Message::user("m3", "two"),
		]);
		let ids: Vec<_> = session
			.conversation_history
			.iter()
			.map(|m| m.id.as_str())
			.collect();
		assert_eq!(ids, vec!["m1", "m2", "m3"]);
	}

	#[test]
	fn test_run_lifecycle() {
		let mut session = Session::new("c1", "127.0.0.1");
		let token = session.begin_run("r1").unwrap();
		assert!(matches!(
			session.begin_run("r2"),
			Err(AdmissionError::RunInProgress { .. })
		));

		let _rx = session.pending_tool_calls.register("call_1", "r1").unwrap();
		assert_eq!(session.abort_run("other"), None);
		assert_eq!(session.abort_run("r1"), Some(1));
		assert!(token.is_cancelled());
		assert!(session.current_run_id.is_none());
		assert!(!session.finish_run("r1"));

		let token = session.begin_run("r2").unwrap();
		assert!(!token.is_cancelled());
		assert!(session.finish_run("r2"));
	}

	#[test]
	fn test_close_releases_everything() {
		let mut session = Session::new("c1", "127.0.0.1");
		let token = session.begin_run("r1").unwrap();
		let _rx = session.pending_tool_calls.register("call_1", "r1").unwrap();
		session.close();
		assert!(session.is_closed());
		assert!(token.is_cancelled());
		assert!(session.pending_tool_calls.is_empty());
	}
}
