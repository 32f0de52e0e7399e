//! C8 — Agent Transport.
//!
//! Three ingress shapes — single-shot HTTP, bidirectional WebSocket, and a
//! paired SSE/POST pair — all multiplexed into the one dispatcher. This
//! module owns every [`AgentSession`]: a streaming session is registered
//! here and with the notification router the moment its transport opens,
//! and unregistered from both the moment it closes, whichever side closes
//! it first.

mod http;
mod sse;
mod ws;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::routing::{get, post};
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use serde_json::Value;
use tokio::sync::mpsc::Sender;
use tokio::sync::{Notify, RwLock};

use crate::state::AppState;

/// Tracks every live streaming session purely for the stale sweep; delivery
/// itself goes through [`crate::notify::NotificationRouter`], registered
/// separately by whichever of `ws`/`sse` opened the connection.
#[derive(Default)]
pub struct AgentSessionRegistry {
	sessions: RwLock<HashMap<String, SessionHandle>>,
}

struct SessionHandle {
	opened_at: Instant,
	close: Arc<Notify>,
}

impl AgentSessionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a new session and returns the [`Notify`] its owning task
	/// should race against in its read loop — a sweep that decides the
	/// session is stale wakes it so the task can unregister and close.
	pub async fn register(&self, session_id: String) -> Arc<Notify> {
		let close = Arc::new(Notify::new());
		self.sessions.write().await.insert(
			session_id,
			SessionHandle {
				opened_at: Instant::now(),
				close: close.clone(),
			},
		);
		close
	}

	pub async fn unregister(&self, session_id: &str) {
		self.sessions.write().await.remove(session_id);
	}

	async fn sweep_once(&self, max_age: Duration) {
		let stale: Vec<String> = self
			.sessions
			.read()
			.await
			.iter()
			.filter(|(_, h)| h.opened_at.elapsed() > max_age)
			.map(|(id, _)| id.clone())
			.collect();
		for id in stale {
			if let Some(handle) = self.sessions.read().await.get(&id) {
				handle.close.notify_one();
			}
			tracing::info!(session_id = %id, "stale agent session swept");
		}
	}
}

/// Runs until the process exits, closing any streaming session that has
/// outlived `settings.session_max_age()`. The owning transport task is
/// responsible for actually unregistering once it observes the close
/// signal — this loop only flags candidates.
pub async fn run_stale_sweep(state: Arc<AppState>) {
	let max_age = state.settings.session_max_age();
	let mut interval = tokio::time::interval(Duration::from_secs(60).min(max_age / 4).max(Duration::from_secs(1)));
	loop {
		interval.tick().await;
		state.sessions.sweep_once(max_age).await;
	}
}

/// `POST /message?sessionId=…` needs to push the dispatcher's response onto
/// the same outbound queue `GET /sse` is draining; the notification router
/// carries only `notifications/*` shapes, so SSE sessions get this small
/// side table keyed the same way.
#[derive(Default)]
pub struct SseSessions {
	outbound: RwLock<HashMap<String, Sender<Value>>>,
}

impl SseSessions {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn register(&self, session_id: String, sender: Sender<Value>) {
		self.outbound.write().await.insert(session_id, sender);
	}

	pub async fn get(&self, session_id: &str) -> Option<Sender<Value>> {
		self.outbound.read().await.get(session_id).cloned()
	}

	pub async fn unregister(&self, session_id: &str) {
		self.outbound.write().await.remove(session_id);
	}
}

pub fn router(state: Arc<AppState>) -> Router {
	Router::new()
		.route("/mcp", post(http::handle))
		.route("/mcp/ws", get(ws::handle))
		.route("/sse", get(sse::handle_get))
		.route("/message", post(sse::handle_post))
		.route("/health", get(health))
		.with_state(state)
}

async fn health() -> axum::Json<serde_json::Value> {
	axum::Json(serde_json::json!({"status": "ok"}))
}

/// Shared bearer extraction, built on the same typed `Authorization` header
/// the identity layer's own grounding source uses rather than hand-slicing
/// `HeaderMap` strings. `/sse` additionally accepts `?token=` because the
/// browser `EventSource` API cannot set headers — every other ingress
/// requires the header and rejects the query fallback outright.
pub(super) fn bearer_token(header: Option<TypedHeader<Authorization<Bearer>>>) -> Option<String> {
	header.map(|TypedHeader(Authorization(bearer))| bearer.token().to_string())
}
