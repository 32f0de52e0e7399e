//! `WS /mcp/ws` — one full-duplex connection, auth once at upgrade, then a
//! read loop that dispatches every text frame and writes back any non-empty
//! response. Notifications arrive on the same outbound queue a response
//! would, so a single task owns the socket's write half for its lifetime.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::dispatch::Identity;
use crate::error::ProxyError;
use crate::jsonrpc::{self, Inbound, Response, RpcError};
use crate::state::AppState;

pub async fn handle(
	State(state): State<Arc<AppState>>,
	auth: Option<TypedHeader<Authorization<Bearer>>>,
	ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ProxyError> {
	let token = super::bearer_token(auth).ok_or(ProxyError::MissingCredential)?;
	let claims = state.identity.verify(&token).await?;
	Ok(ws.on_upgrade(move |socket| run(socket, state, claims.sub, claims.tenant_id)))
}

async fn run(socket: WebSocket, state: Arc<AppState>, user_id: String, tenant_id: Option<String>) {
	let session_id = uuid::Uuid::new_v4().to_string();
	let identity = Identity {
		user_id,
		tenant_id: tenant_id.unwrap_or_else(|| "default".to_string()),
		agent_session_id: Some(session_id.clone()),
	};

	let (mut sink, mut stream) = socket.split();
	let (tx, mut rx) = mpsc::channel::<Value>(64);

	let close = state.sessions.register(session_id.clone()).await;
	let deliver_tx = tx.clone();
	let deliver_close = close.clone();
	state
		.notifications
		.register(
			session_id.clone(),
			Arc::new(move |notification| {
				let Ok(value) = serde_json::to_value(&notification) else {
					return false;
				};
				// A saturated or closed queue means the connection can no longer be
				// trusted to drain notifications; tear the transport down rather
				// than silently going deaf.
				let delivered = deliver_tx.try_send(value).is_ok();
				if !delivered {
					deliver_close.notify_one();
				}
				delivered
			}),
		)
		.await;

	let writer = tokio::spawn(async move {
		while let Some(value) = rx.recv().await {
			let Ok(text) = serde_json::to_string(&value) else {
				continue;
			};
			if sink.send(Message::Text(text.into())).await.is_err() {
				break;
			}
		}
	});

	loop {
		tokio::select! {
			_ = close.notified() => break,
			frame = stream.next() => {
				match frame {
					Some(Ok(Message::Text(text))) => {
						let outgoing = match jsonrpc::parse(text.as_bytes()) {
							Ok(Inbound::Request(request)) => {
								Some(state.dispatcher.handle_request(&identity, request).await)
							},
							Ok(Inbound::Notification(notification)) => {
								state.dispatcher.handle_notification(&notification);
								None
							},
							Err(e) => Some(Response::failure(
								Value::Null,
								RpcError::new(RpcError::PARSE_ERROR, e.to_string()),
							)),
						};
						if let Some(response) = outgoing {
							let Ok(value) = serde_json::to_value(&response) else { continue };
							if tx.send(value).await.is_err() {
								break;
							}
						}
					},
					Some(Ok(Message::Close(_))) | None => break,
					Some(Ok(_)) => continue,
					Some(Err(e)) => {
						tracing::debug!(error = %e, session_id, "websocket read error");
						break;
					},
				}
			}
		}
	}

	writer.abort();
	state.notifications.unregister(&session_id).await;
	state.sessions.unregister(&session_id).await;
}
