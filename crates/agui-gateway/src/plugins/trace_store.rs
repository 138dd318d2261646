// Run trace store
//
// Bridges a finished run to feedback that arrives later on the same or another
// connection. Entries are push-once/pop-once and bounded by capacity and age.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::config::serde_dur;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TraceStoreConfig {
	pub capacity: usize,
	#[serde(with = "serde_dur")]
	pub ttl: Duration,
}

impl Default for TraceStoreConfig {
	fn default() -> Self {
		Self {
			capacity: 10_000,
			ttl: Duration::from_secs(3600),
		}
	}
}

#[derive(Debug)]
struct Entry {
	trace_id: String,
	inserted: Instant,
}

#[derive(Debug, Default)]
struct Inner {
	entries: HashMap<String, Entry>,
	/// Insertion order, used to evict the oldest entry at capacity
	order: VecDeque<String>,
}

#[derive(Debug)]
pub struct RunTraceStore {
	capacity: usize,
	ttl: Duration,
	inner: Mutex<Inner>,
}

impl Default for RunTraceStore {
	fn default() -> Self {
		Self::new(&TraceStoreConfig::default())
	}
}

impl RunTraceStore {
	pub fn new(config: &TraceStoreConfig) -> Self {
		Self {
			capacity: config.capacity.max(1),
			ttl: config.ttl,
			inner: Mutex::new(Inner::default()),
		}
	}

	/// Record the trace of `run_id`. A run id already present keeps its first trace.
	pub fn insert(&self, run_id: impl Into<String>, trace_id: impl Into<String>) -> bool {
		let run_id = run_id.into();
		let now = Instant::now();
		let mut inner = self.inner.lock();
		Self::expire(&mut inner, now, self.ttl);
		if inner.entries.contains_key(&run_id) {
			return false;
		}
		while inner.entries.len() >= self.capacity {
			let Some(oldest) = inner.order.pop_front() else {
				break;
			};
			if inner.entries.remove(&oldest).is_some() {
				debug!(target: "plugins", run_id = %oldest, "evicted trace entry at capacity");
			}
		}
		inner.entries.insert(
			run_id.clone(),
			Entry {
				trace_id: trace_id.into(),
				inserted: now,
			},
		);
		inner.order.push_back(run_id);
		true
	}

	/// Remove and return the trace of `run_id`
	pub fn take(&self, run_id: &str) -> Option<String> {
		let now = Instant::now();
		let mut inner = self.inner.lock();
		Self::expire(&mut inner, now, self.ttl);
		let entry = inner.entries.remove(run_id)?;
		inner.order.retain(|id| id != run_id);
		Some(entry.trace_id)
	}

	pub fn len(&self) -> usize {
		self.inner.lock().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn expire(inner: &mut Inner, now: Instant, ttl: Duration) {
		while let Some(oldest) = inner.order.front() {
			let expired = inner
				.entries
				.get(oldest)
				.is_none_or(|e| now.saturating_duration_since(e.inserted) >= ttl);
			if !expired {
				break;
			}
			if let Some(id) = inner.order.pop_front() {
				inner.entries.remove(&id);
			}
		}
	}
}
