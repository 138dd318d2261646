// Caller rate limiting
//
// Sliding-window admission control keyed by caller address. Each address keeps the
// timestamps of its admitted requests inside the trailing window. Timestamps are
// pruned lazily on every check, and a periodic sweep drops addresses whose window
// has emptied so the table stays bounded.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::config::serde_dur;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
	/// Requests admitted per window and address. 0 disables limiting.
	pub max_requests: u32,
	#[serde(rename = "windowMs", with = "serde_dur::millis")]
	pub window: Duration,
	#[serde(rename = "sweepIntervalMs", with = "serde_dur::millis")]
	pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
	fn default() -> Self {
		Self {
			max_requests: 20,
			window: Duration::from_secs(60),
			sweep_interval: Duration::from_secs(60),
		}
	}
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
	pub allowed: bool,
	/// Time until the oldest in-window request leaves the window. Set only when denied.
	pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
	fn allow() -> Self {
		Self {
			allowed: true,
			retry_after: None,
		}
	}

	fn deny(retry_after: Duration) -> Self {
		Self {
			allowed: false,
			retry_after: Some(retry_after),
		}
	}

	pub fn retry_after_ms(&self) -> Option<u64> {
		self.retry_after.map(|d| d.as_millis() as u64)
	}
}

#[derive(Debug)]
pub struct RateLimiter {
	max_requests: u32,
	window: Duration,
	sweep_interval: Duration,
	requests: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
	pub fn new(config: &RateLimitConfig) -> Self {
		Self {
			max_requests: config.max_requests,
			window: config.window,
			sweep_interval: config.sweep_interval,
			requests: Mutex::new(HashMap::new()),
		}
	}

	pub fn is_enabled(&self) -> bool {
		self.max_requests > 0
	}

	/// Check and, when allowed, record one request for `address`
	pub fn check_limit(&self, address: &str) -> RateLimitDecision {
		if !self.is_enabled() {
			return RateLimitDecision::allow();
		}

		let now = Instant::now();
		let mut requests = self.requests.lock();
		let timestamps = requests.entry(address.to_string()).or_default();
		prune(timestamps, now, self.window);

		if timestamps.len() >= self.max_requests as usize {
			let oldest = timestamps.front().copied().unwrap_or(now);
			let retry_after = (oldest + self.window).saturating_duration_since(now);
			debug!(target: "ratelimit", address, retry_after_ms = retry_after.as_millis() as u64, "request denied");
			return RateLimitDecision::deny(retry_after);
		}

		timestamps.push_back(now);
		RateLimitDecision::allow()
	}

	/// Forget everything recorded for `address`
	pub fn remove_address(&self, address: &str) {
		self.requests.lock().remove(address);
	}

	/// Prune every address and drop the ones with no request left in the window.
	/// Returns the number of addresses removed.
	pub fn sweep(&self) -> usize {
		let now = Instant::now();
		let mut requests = self.requests.lock();
		let before = requests.len();
		requests.retain(|_, timestamps| {
			prune(timestamps, now, self.window);
			!timestamps.is_empty()
		});
		before - requests.len()
	}

	/// Number of addresses currently tracked
	pub fn tracked_addresses(&self) -> usize {
		self.requests.lock().len()
	}

	/// Start the periodic sweep. Returns None when limiting is disabled.
	pub fn spawn_sweeper(self: Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
		if !self.is_enabled() || self.sweep_interval.is_zero() {
			return None;
		}
		let interval = self.sweep_interval;
		let limiter = self;
		Some(tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.tick().await;
			loop {
				ticker.tick().await;
				let removed = limiter.sweep();
				if removed > 0 {
					debug!(target: "ratelimit", removed, "swept idle addresses");
				}
			}
		}))
	}
}

fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
	while let Some(&t) = timestamps.front() {
		if now.saturating_duration_since(t) >= window {
			timestamps.pop_front();
		} else {
			break;
		}
	}
}
