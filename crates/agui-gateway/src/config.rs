// Gateway configuration
//
// Loaded from a YAML (or JSON) file. Every field is optional.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::plugins::TraceStoreConfig;
use crate::ratelimit::RateLimitConfig;
use crate::remote::RemoteEndpointConfig;
use crate::server::LongPollConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("failed to read config file: {0}")]
	Io(#[from] std::io::Error),

	#[error("failed to parse config: {0}")]
	Parse(#[from] serde_yaml::Error),

	#[error("invalid duration '{0}'")]
	InvalidDuration(String),

	#[error("invalid config: {0}")]
	Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Config {
	pub bind: SocketAddr,
	pub rate_limit: RateLimitConfig,
	pub remote_tools: Vec<RemoteEndpointConfig>,
	pub long_poll: LongPollConfig,
	/// Use the first X-Forwarded-For entry as the caller address
	pub trust_forwarded_for: bool,
	pub default_agent: Option<String>,
	pub trace_store: TraceStoreConfig,
	#[serde(with = "serde_dur")]
	pub local_tool_timeout: Duration,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
			rate_limit: RateLimitConfig::default(),
			remote_tools: Vec::new(),
			long_poll: LongPollConfig::default(),
			trust_forwarded_for: false,
			default_agent: None,
			trace_store: TraceStoreConfig::default(),
			local_tool_timeout: Duration::from_secs(30),
		}
	}
}

impl Config {
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let content = fs_err::read_to_string(path)?;
		let config = Self::parse(&content)?;
		info!(target: "gateway", path = %path.display(), endpoints = config.remote_tools.len(), "loaded config");
		Ok(config)
	}

	/// Parse YAML or JSON config text
	pub fn parse(content: &str) -> Result<Self, ConfigError> {
		let config: Config = serde_yaml::from_str(content)?;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		for endpoint in &self.remote_tools {
			reqwest::Url::parse(&endpoint.url)
				.map_err(|e| ConfigError::Invalid(format!("remote tool url '{}': {}", endpoint.url, e)))?;
			if endpoint.timeout.is_zero() {
				return Err(ConfigError::Invalid(format!(
					"remote tool '{}' has a zero timeout",
					endpoint.url
				)));
			}
			if let Some(ns) = &endpoint.namespace
				&& ns.is_empty()
			{
				return Err(ConfigError::Invalid(format!(
					"remote tool '{}' has an empty namespace",
					endpoint.url
				)));
			}
		}
		Ok(())
	}
}

/// Parse a duration string like "5m", "30s", "1h", "100ms". A bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
	let s = s.trim();
	if s.is_empty() {
		return Err(ConfigError::InvalidDuration(s.to_string()));
	}

	let (num_str, unit) = if let Some(n) = s.strip_suffix("ms") {
		(n, "ms")
	} else if let Some(n) = s.strip_suffix('s') {
		(n, "s")
	} else if let Some(n) = s.strip_suffix('m') {
		(n, "m")
	} else if let Some(n) = s.strip_suffix('h') {
		(n, "h")
	} else if let Some(n) = s.strip_suffix('d') {
		(n, "d")
	} else {
		(s, "s")
	};

	let num: u64 = num_str
		.trim()
		.parse()
		.map_err(|_| ConfigError::InvalidDuration(s.to_string()))?;

	Ok(match unit {
		"ms" => Duration::from_millis(num),
		"m" => Duration::from_secs(num * 60),
		"h" => Duration::from_secs(num * 60 * 60),
		"d" => Duration::from_secs(num * 60 * 60 * 24),
		_ => Duration::from_secs(num),
	})
}

/// Serde adapters for durations written as "30s" strings or plain numbers.
///
/// The default adapter reads plain numbers as seconds; `millis` reads them as milliseconds.
pub mod serde_dur {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Raw {
		Number(u64),
		Text(String),
	}

	fn decode<'de, D>(deserializer: D, number_unit: fn(u64) -> Duration) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		match Raw::deserialize(deserializer)? {
			Raw::Number(n) => Ok(number_unit(n)),
			Raw::Text(s) => super::parse_duration(&s).map_err(serde::de::Error::custom),
		}
	}

	pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&format!("{}ms", d.as_millis()))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		decode(deserializer, Duration::from_secs)
	}

	pub mod millis {
		use std::time::Duration;

		use serde::{Deserializer, Serializer};

		pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
			serializer.serialize_u64(d.as_millis() as u64)
		}

		pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
			super::decode(deserializer, Duration::from_millis)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_duration() {
		assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
		assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
		assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
		assert_eq!(parse_duration("2d").unwrap(), Duration::from_secs(172800));
		assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
		assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
		assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
	}

	#[test]
	fn test_parse_duration_errors() {
		assert!(parse_duration("").is_err());
		assert!(parse_duration("abc").is_err());
		assert!(parse_duration("-5s").is_err());
	}

	#[test]
	fn test_parse_full_config() {
		let config = Config::parse(
			r#"
bind: 127.0.0.1:9090
rateLimit:
  maxRequests: 2
  windowMs: 1000
remoteTools:
  - url: http://localhost:9000/mcp
    namespace: backend
    timeout: 10s
    toolsCacheTtl: 5m
    headers:
      x-api-key: secret
  - url: http://localhost:9001/mcp
longPoll:
  pollTimeout: 25s
defaultAgent: echo
trustForwardedFor: true
"#,
		)
		.unwrap();

		assert_eq!(config.bind.port(), 9090);
		assert_eq!(config.rate_limit.max_requests, 2);
		assert_eq!(config.rate_limit.window, Duration::from_millis(1000));
		assert_eq!(config.rate_limit.sweep_interval, Duration::from_secs(60));
		assert_eq!(config.remote_tools.len(), 2);
		assert_eq!(config.remote_tools[0].namespace.as_deref(), Some("backend"));
		assert_eq!(config.remote_tools[0].tools_cache_ttl, Duration::from_secs(300));
		assert_eq!(config.remote_tools[0].headers["x-api-key"], "secret");
		assert_eq!(config.remote_tools[1].tools_cache_ttl, Duration::ZERO);
		assert_eq!(config.long_poll.poll_timeout, Duration::from_secs(25));
		assert_eq!(config.default_agent.as_deref(), Some("echo"));
		assert!(config.trust_forwarded_for);
	}

	#[test]
	fn test_config_file_and_validation() -> anyhow::Result<()> {
		let file = tempfile::NamedTempFile::with_suffix(".yaml")?;
		std::fs::write(file.path(), "remoteTools:\n  - url: not a url\n")?;
		assert!(matches!(
			Config::from_file(file.path()),
			Err(ConfigError::Invalid(_))
		));

		std::fs::write(file.path(), "{\"defaultAgent\": \"echo\"}")?;
		let config = Config::from_file(file.path())?;
		assert_eq!(config.default_agent.as_deref(), Some("echo"));
		assert_eq!(config.rate_limit, RateLimitConfig::default());
		Ok(())
	}

	#[test]
	fn test_unknown_field_rejected() {
		assert!(matches!(
			Config::parse("rateLimits: {}"),
			Err(ConfigError::Parse(_))
		));
	}
}
