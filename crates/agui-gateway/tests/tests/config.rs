// Loading the gateway from a config file

use std::io::Write;
use std::time::Duration;

use agui_gateway::config::{Config, ConfigError};
use agui_gateway::GatewayBuilder;
use assert_matches::assert_matches;
use tempfile::NamedTempFile;

#[test]
fn test_load_yaml_config() -> anyhow::Result<()> {
	let mut file = NamedTempFile::new()?;
	write!(
		file,
		r#"
bind: 127.0.0.1:9000
trustForwardedFor: true
defaultAgent: echo
rateLimit:
  maxRequests: 5
  windowMs: 2000
remoteTools:
  - url: https://tools.internal/mcp
    namespace: internal
    timeout: 5s
    toolsCacheTtl: 10m
    headers:
      x-api-key: secret
longPoll:
  pollTimeout: 20s
traceStore:
  capacity: 100
localToolTimeout: 45
"#
	)?;

	let config = Config::from_file(file.path())?;
	assert_eq!(config.bind.port(), 9000);
	assert!(config.trust_forwarded_for);
	assert_eq!(config.default_agent.as_deref(), Some("echo"));
	assert_eq!(config.rate_limit.max_requests, 5);
	assert_eq!(config.rate_limit.window, Duration::from_secs(2));
	assert_eq!(config.remote_tools[0].namespace.as_deref(), Some("internal"));
	assert_eq!(config.remote_tools[0].timeout, Duration::from_secs(5));
	assert_eq!(config.remote_tools[0].tools_cache_ttl, Duration::from_secs(600));
	assert_eq!(config.long_poll.poll_timeout, Duration::from_secs(20));
	assert_eq!(config.trace_store.capacity, 100);
	assert_eq!(config.local_tool_timeout, Duration::from_secs(45));

	let gateway = GatewayBuilder::from_config(&config).build();
	assert!(gateway.rate_limiter().is_enabled());
	assert_eq!(gateway.coordinator().remote().endpoints().len(), 1);
	Ok(())
}

#[test]
fn test_invalid_configs_are_rejected() {
	assert_matches!(
		Config::parse("remoteTools:\n  - url: not a url\n"),
		Err(ConfigError::Invalid(_))
	);
	assert_matches!(
		Config::parse("remoteTools:\n  - url: http://a\n    timeout: 0s\n"),
		Err(ConfigError::Invalid(_))
	);
	assert_matches!(Config::parse("unknownKey: 1\n"), Err(ConfigError::Parse(_)));
	assert_matches!(
		Config::from_file("/definitely/not/here.yaml"),
		Err(ConfigError::Io(_))
	);
}
