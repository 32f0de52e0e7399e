//! C7 — Notification Router.
//!
//! Upstream MCP servers may send notifications with no associated request
//! (`notifications/tools/list_changed`, `notifications/resources/updated`,
//! `notifications/message`, ...). This router gets them to the agent session
//! that owns the upstream connection they arrived on, or — when no agent
//! session is known at all — broadcasts to everyone listening.
//!
//! Delivery is best-effort: a `deliver` that fails is taken as proof the
//! transport is dead, and the session is dropped rather than retried.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::jsonrpc::OutboundNotification;

/// A sink a streaming agent transport (WebSocket or SSE) registers for the
/// lifetime of its connection.
pub type Deliver = Arc<dyn Fn(OutboundNotification) -> bool + Send + Sync>;

#[derive(Default)]
pub struct NotificationRouter {
	sessions: RwLock<HashMap<String, Deliver>>,
}

impl NotificationRouter {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn register(&self, session_id: String, deliver: Deliver) {
		self.sessions.write().await.insert(session_id, deliver);
	}

	pub async fn unregister(&self, session_id: &str) {
		self.sessions.write().await.remove(session_id);
	}

	/// Targeted delivery. Unregisters the session if `deliver` reports
	/// failure — the caller never needs to know why the transport died.
	pub async fn send(&self, session_id: &str, notification: OutboundNotification) {
		let deliver = self.sessions.read().await.get(session_id).cloned();
		let Some(deliver) = deliver else {
			tracing::debug!(session_id, "notification dropped: no such agent session");
			return;
		};
		if !deliver(notification) {
			tracing::debug!(session_id, "delivery failed, unregistering session");
			self.sessions.write().await.remove(session_id);
		}
	}

	/// Used only when an upstream session was created without a known
	/// originating agent session (e.g. first use came from a stateless HTTP
	/// POST). Sent to every currently registered streaming session.
	pub async fn broadcast(&self, notification: OutboundNotification) {
		let sessions: Vec<(String, Deliver)> = self
			.sessions
			.read()
			.await
			.iter()
			.map(|(k, v)| (k.clone(), v.clone()))
			.collect();
		let mut dead = Vec::new();
		for (session_id, deliver) in sessions {
			if !deliver(notification.clone()) {
				dead.push(session_id);
			}
		}
		if !dead.is_empty() {
			let mut guard = self.sessions.write().await;
			for session_id in dead {
				guard.remove(&session_id);
			}
		}
	}
}
