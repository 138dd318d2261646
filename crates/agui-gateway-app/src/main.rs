use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use agui_gateway::agent::{AgentInfo, EchoAgent};
use agui_gateway::plugins::{FeedbackPlugin, RunTraceStore};
use agui_gateway::server::{self, AppState};
use agui_gateway::{Config, GatewayBuilder};
use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
	Text,
	Json,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to a YAML or JSON config file
	#[arg(short, long)]
	config: Option<PathBuf>,

	/// Listen address (overrides the config file)
	#[arg(long)]
	bind: Option<SocketAddr>,

	#[arg(long, value_enum, default_value = "text")]
	log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let builder = tracing_subscriber::fmt().with_env_filter(filter);
	match format {
		LogFormat::Text => builder.init(),
		LogFormat::Json => builder.json().init(),
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();
	init_tracing(args.log_format);

	let mut config = match &args.config {
		Some(path) => Config::from_file(path).with_context(|| format!("loading {}", path.display()))?,
		None => Config::default(),
	};
	if let Some(bind) = args.bind {
		config.bind = bind;
	}

	let feedback = Arc::new(FeedbackPlugin::new(Arc::new(RunTraceStore::new(
		&config.trace_store,
	))));
	let gateway = GatewayBuilder::from_config(&config)
		.agent(AgentInfo::new("echo", "Echo"), Arc::new(EchoAgent))
		.plugin(feedback)
		.build();

	let state = AppState::new(gateway.clone(), &config);
	let listener = tokio::net::TcpListener::bind(config.bind)
		.await
		.with_context(|| format!("binding {}", config.bind))?;

	server::serve(listener, state, async {
		match tokio::signal::ctrl_c().await {
			Ok(()) => info!(target: "gateway", "shutdown requested"),
			Err(e) => {
				warn!(target: "gateway", error = %e, "cannot listen for ctrl-c, running until killed");
				std::future::pending::<()>().await;
			},
		}
	})
	.await?;

	gateway.shutdown().await;
	Ok(())
}
