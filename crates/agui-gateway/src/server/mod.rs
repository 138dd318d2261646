// HTTP surface
//
// Routes:
// - GET  /health            liveness probe
// - GET  /ws                WebSocket transport
// - POST /poll/connect      open a long-poll connection
// - POST /poll/{id}/send    deliver one inbound frame
// - GET  /poll/{id}         drain outbound frames, waiting up to the poll timeout
// - POST /poll/{id}/close   close a long-poll connection
//
// Both transports feed the same connection loop and resolve the caller address
// the same way, so rate limiting applies across them.

mod longpoll;
mod websocket;

pub use longpoll::{LongPollConfig, LongPollRegistry};

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::request::Parts;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::gateway::Gateway;

const FORWARDED_FOR: &str = "x-forwarded-for";

#[derive(Debug, Clone)]
pub struct AppState {
	pub gateway: Arc<Gateway>,
	pub polls: Arc<LongPollRegistry>,
	/// Use the first X-Forwarded-For entry as the caller address
	pub trust_forwarded_for: bool,
}

impl AppState {
	pub fn new(gateway: Arc<Gateway>, config: &Config) -> Self {
		Self {
			gateway,
			polls: Arc::new(LongPollRegistry::new(config.long_poll.clone())),
			trust_forwarded_for: config.trust_forwarded_for,
		}
	}
}

/// Address a connection is rate limited under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerAddress(pub String);

impl FromRequestParts<AppState> for CallerAddress {
	type Rejection = Infallible;

	async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
		if state.trust_forwarded_for
			&& let Some(forwarded) = parts
				.headers
				.get(FORWARDED_FOR)
				.and_then(|v| v.to_str().ok())
				.and_then(|v| v.split(',').next())
				.map(str::trim)
				.filter(|v| !v.is_empty())
		{
			return Ok(CallerAddress(forwarded.to_string()));
		}
		let peer = parts
			.extensions
			.get::<ConnectInfo<SocketAddr>>()
			.map(|ConnectInfo(addr)| addr.ip().to_string())
			.unwrap_or_else(|| "unknown".to_string());
		Ok(CallerAddress(peer))
	}
}

async fn health() -> Json<Value> {
	Json(json!({"status": "ok"}))
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/ws", get(websocket::upgrade))
		.route("/poll/connect", post(longpoll::connect))
		.route("/poll/{id}", get(longpoll::poll))
		.route("/poll/{id}/send", post(longpoll::send))
		.route("/poll/{id}/close", post(longpoll::close))
		.layer(TraceLayer::new_for_http())
		.layer(
			CorsLayer::new()
				.allow_origin(Any)
				.allow_methods(Any)
				.allow_headers(Any),
		)
		.with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
	F: Future<Output = ()> + Send + 'static,
{
	let sweeper = state.gateway.spawn_background_tasks();
	let reaper = state.polls.clone().spawn_reaper();
	info!(target: "gateway", addr = ?listener.local_addr().ok(), "listening");

	let result = axum::serve(
		listener,
		router(state).into_make_service_with_connect_info::<SocketAddr>(),
	)
	.with_graceful_shutdown(shutdown)
	.await;

	for task in [sweeper, reaper].into_iter().flatten() {
		task.abort();
	}
	result
}
