use std::future::ready;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::warn;

use super::{AppState, CallerAddress};
use crate::gateway::Gateway;

pub(super) async fn upgrade(
	ws: WebSocketUpgrade,
	State(state): State<AppState>,
	CallerAddress(caller): CallerAddress,
) -> impl IntoResponse {
	ws.on_upgrade(move |socket| handle_socket(socket, state.gateway, caller))
}

async fn handle_socket(socket: WebSocket, gateway: Arc<Gateway>, caller: String) {
	let (mut sender, receiver) = socket.split();
	let (connection, rx) = gateway.connect(caller).await;

	let writer = tokio::spawn(async move {
		let mut outbound = UnboundedReceiverStream::new(rx);
		while let Some(message) = outbound.next().await {
			let text = match serde_json::to_string(&message) {
				Ok(text) => text,
				Err(e) => {
					warn!(target: "gateway", kind = %message.kind, error = %e, "failed to encode outbound frame");
					continue;
				},
			};
			if sender.send(Message::Text(text.into())).await.is_err() {
				break;
			}
		}
	});

	let inbound = receiver
		.take_while(|msg| ready(matches!(msg, Ok(m) if !matches!(m, Message::Close(_)))))
		.filter_map(|msg| {
			ready(match msg {
				Ok(Message::Text(text)) => Some(text.as_str().to_owned()),
				Ok(Message::Binary(bytes)) => String::from_utf8(bytes.to_vec()).ok(),
				_ => None,
			})
		});
	connection.serve(inbound).await;
	writer.abort();
}
