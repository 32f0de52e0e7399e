//! `GET /sse` + `POST /message?sessionId=…` — the legacy two-endpoint SSE
//! transport. The GET half owns the stream and the session's lifetime; the
//! POST half only ever looks an existing session up and drops a response
//! onto its queue.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::{OriginalUri, Query, State};
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use futures::Stream;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::dispatch::Identity;
use crate::error::ProxyError;
use crate::jsonrpc::{self, Inbound, Response, RpcError};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct TokenQuery {
	token: Option<String>,
}

#[derive(Deserialize)]
pub struct MessageQuery {
	#[serde(rename = "sessionId")]
	session_id: String,
}

/// Unregisters a session's queue and notification route when its stream is
/// dropped — natural completion, client disconnect, or a sweep-triggered
/// close all end up here.
struct SessionGuard {
	state: Arc<AppState>,
	session_id: String,
}

impl Drop for SessionGuard {
	fn drop(&mut self) {
		let state = self.state.clone();
		let session_id = self.session_id.clone();
		tokio::spawn(async move {
			state.sse_sessions.unregister(&session_id).await;
			state.notifications.unregister(&session_id).await;
			state.sessions.unregister(&session_id).await;
		});
	}
}

/// Wraps an inner stream purely to run `guard`'s cleanup whenever the
/// stream is dropped, for whatever reason.
struct Guarded<S> {
	inner: S,
	guard: Option<SessionGuard>,
}

impl<S: Stream + Unpin> Stream for Guarded<S> {
	type Item = S::Item;

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		Stream::poll_next(Pin::new(&mut self.get_mut().inner), cx)
	}
}

pub async fn handle_get(
	State(state): State<Arc<AppState>>,
	auth: Option<TypedHeader<Authorization<Bearer>>>,
	Query(q): Query<TokenQuery>,
	OriginalUri(uri): OriginalUri,
) -> Result<impl IntoResponse, ProxyError> {
	let token = super::bearer_token(auth).or(q.token).ok_or(ProxyError::MissingCredential)?;
	// Verified here only to reject an invalid token before a session is
	// allocated — `POST /message` re-verifies its own bearer independently,
	// so the claims themselves don't need to outlive this call.
	state.identity.verify(&token).await?;

	let session_id = uuid::Uuid::new_v4().to_string();
	let (tx, rx) = mpsc::channel::<Value>(64);
	state.sse_sessions.register(session_id.clone(), tx.clone()).await;
	let close = state.sessions.register(session_id.clone()).await;

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
				let delivered = tx.try_send(value).is_ok();
				if !delivered {
					deliver_close.notify_one();
				}
				delivered
			}),
		)
		.await;

	let path = uri.path();
	let message_path = match path.strip_suffix("/sse") {
		Some(prefix) => format!("{prefix}/message"),
		None => "/message".to_string(),
	};
	let endpoint = format!("{message_path}?sessionId={session_id}");

	let stream = stream::once(futures::future::ready(
		Ok::<_, std::convert::Infallible>(Event::default().event("endpoint").data(endpoint)),
	))
	.chain(ReceiverStream::new(rx).map(|value| {
		let text = serde_json::to_string(&value).unwrap_or_default();
		Ok(Event::default().event("message").data(text))
	}))
	.take_until(async move { close.notified().await });

	// Boxed so the wrapper below can be `Unpin` without requiring every
	// combinator in the chain above (an async block among them) to be.
	let boxed: Pin<Box<dyn Stream<Item = Result<Event, std::convert::Infallible>> + Send>> = Box::pin(stream);

	let guarded = Guarded {
		inner: boxed,
		guard: Some(SessionGuard {
			state,
			session_id,
		}),
	};

	Ok(Sse::new(guarded).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)).text(":keepalive")))
}

pub async fn handle_post(
	State(state): State<Arc<AppState>>,
	auth: Option<TypedHeader<Authorization<Bearer>>>,
	Query(q): Query<MessageQuery>,
	body: bytes::Bytes,
) -> Result<impl IntoResponse, ProxyError> {
	let token = super::bearer_token(auth).ok_or(ProxyError::MissingCredential)?;
	let claims = state.identity.verify(&token).await?;

	let sender = state.sse_sessions.get(&q.session_id).await.ok_or(ProxyError::UnknownSession)?;

	let identity = Identity {
		user_id: claims.sub,
		tenant_id: claims.tenant_id.unwrap_or_else(|| "default".to_string()),
		agent_session_id: Some(q.session_id.clone()),
	};

	match jsonrpc::parse(&body) {
		Ok(Inbound::Request(request)) => {
			let response = state.dispatcher.handle_request(&identity, request).await;
			let value = serde_json::to_value(&response).map_err(|e| ProxyError::Internal(e.into()))?;
			let _ = sender.send(value).await;
		},
		Ok(Inbound::Notification(notification)) => {
			state.dispatcher.handle_notification(&notification);
		},
		Err(e) => {
			let response = Response::failure(Value::Null, RpcError::new(RpcError::PARSE_ERROR, e.to_string()));
			let value = serde_json::to_value(&response).map_err(|e| ProxyError::Internal(e.into()))?;
			let _ = sender.send(value).await;
		},
	}

	Ok(axum::http::StatusCode::ACCEPTED)
}
