//! C6 — Upstream Session Manager.
//!
//! Owns one live MCP client session per `(service, userId)` pair. This is
//! the only component that actually speaks STDIO/HTTP_STREAM/WEBSOCKET MCP —
//! everything above it deals in namespaced tool calls and structured
//! results, never transport details.

mod http_stream;
mod stdio;
mod websocket;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rmcp::ErrorData as McpError;
use rmcp::model::{
	CallToolRequestParams, ClientCapabilities, Implementation, InitializeRequestParams,
	ProtocolVersion,
};
use rmcp::service::{NotificationContext, RequestContext, RoleClient, RunningService};
use rmcp::{ClientHandler, ServiceExt};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::{OnceCell, RwLock};

use crate::config::{Catalog, ServiceDefinition, ServiceIdentity, TransportKind};
use crate::credentials::CredentialInjector;
use crate::jsonrpc::OutboundNotification;
use crate::notify::NotificationRouter;

#[derive(Debug, Error)]
pub enum UpstreamError {
	#[error("failed to start upstream session: {0}")]
	Spawn(#[from] anyhow::Error),
	#[error("upstream call failed: {0}")]
	Call(#[from] rmcp::ServiceError),
	#[error("upstream call timed out")]
	Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
	service: String,
	user_id: String,
}

type McpService = RunningService<RoleClient, NotificationForwarder>;

struct UpstreamSession {
	service: McpService,
	identity: ServiceIdentity,
}

/// Forwards server-initiated notifications (the ones not bound to an
/// in-flight request) to the agent session that owns this upstream
/// connection, or broadcasts if no agent session was known at creation time.
#[derive(Clone)]
pub struct NotificationForwarder {
	router: Arc<NotificationRouter>,
	agent_session_id: Option<String>,
}

impl NotificationForwarder {
	fn new(router: Arc<NotificationRouter>, agent_session_id: Option<String>) -> Self {
		Self {
			router,
			agent_session_id,
		}
	}

	async fn route(&self, method: &str, params: Option<Value>) {
		let notification = OutboundNotification {
			jsonrpc: crate::jsonrpc::JSONRPC_VERSION,
			method: method.to_string(),
			params,
		};
		match &self.agent_session_id {
			Some(id) => self.router.send(id, notification).await,
			None => self.router.broadcast(notification).await,
		}
	}
}

impl ClientHandler for NotificationForwarder {
	async fn on_tool_list_changed(&self, _context: NotificationContext<RoleClient>) {
		self.route("notifications/tools/list_changed", None).await;
	}

	async fn on_resource_list_changed(&self, _context: NotificationContext<RoleClient>) {
		self
			.route("notifications/resources/list_changed", None)
			.await;
	}

	async fn on_prompt_list_changed(&self, _context: NotificationContext<RoleClient>) {
		self
			.route("notifications/prompts/list_changed", None)
			.await;
	}

	async fn on_resource_updated(
		&self,
		params: rmcp::model::ResourceUpdatedNotificationParam,
		_context: NotificationContext<RoleClient>,
	) {
		let params = serde_json::to_value(params).ok();
		self.route("notifications/resources/updated", params).await;
	}

	async fn on_logging_message(
		&self,
		params: rmcp::model::LoggingMessageNotificationParam,
		_context: NotificationContext<RoleClient>,
	) {
		let params = serde_json::to_value(params).ok();
		self.route("notifications/message", params).await;
	}

	async fn on_progress(
		&self,
		_params: rmcp::model::ProgressNotificationParam,
		_context: NotificationContext<RoleClient>,
	) {
		// Bound to an in-flight request; the upstream client library resolves
		// these against the call that's awaiting them, nothing to route here.
	}

	async fn on_cancelled(
		&self,
		_params: rmcp::model::CancelledNotificationParam,
		_context: NotificationContext<RoleClient>,
	) {
	}

	async fn list_roots(
		&self,
		_context: RequestContext<RoleClient>,
	) -> Result<rmcp::model::ListRootsResult, McpError> {
		Ok(rmcp::model::ListRootsResult::new(vec![]))
	}

	fn get_info(&self) -> InitializeRequestParams {
		let client_info = Implementation::new("mcp-gateway".to_string(), env!("CARGO_PKG_VERSION").to_string());
		let mut params = InitializeRequestParams::new(ClientCapabilities::default(), client_info);
		params.protocol_version = ProtocolVersion::V_2024_11_05;
		params
	}
}

/// A namespace-resolved `(service, tool)` pair, handed down from the tool
/// registry. Kept separate from the registry's own type so this module does
/// not need to depend on namespacing rules.
pub struct Resolved<'a> {
	pub service: &'a ServiceDefinition,
	pub tool: &'a str,
}

pub struct UserContext {
	pub user_id: String,
	pub tenant_id: String,
	pub agent_session_id: Option<String>,
}

pub struct UpstreamSessionManager {
	sessions: RwLock<HashMap<SessionKey, Arc<OnceCell<Result<Arc<UpstreamSession>, String>>>>>,
	credentials: Arc<CredentialInjector>,
	notifications: Arc<NotificationRouter>,
	call_timeout: Duration,
}

impl UpstreamSessionManager {
	pub fn new(
		credentials: Arc<CredentialInjector>,
		notifications: Arc<NotificationRouter>,
		call_timeout: Duration,
	) -> Self {
		Self {
			sessions: RwLock::new(HashMap::new()),
			credentials,
			notifications,
			call_timeout,
		}
	}

	async fn cell_for(
		&self,
		key: &SessionKey,
	) -> Arc<OnceCell<Result<Arc<UpstreamSession>, String>>> {
		if let Some(cell) = self.sessions.read().await.get(key) {
			return cell.clone();
		}
		self
			.sessions
			.write()
			.await
			.entry(key.clone())
			.or_insert_with(|| Arc::new(OnceCell::new()))
			.clone()
	}

	/// Returns the live session for `(service, user)`, creating it on first
	/// use. Concurrent first-use races all wait on the same [`OnceCell`] and
	/// observe the same winning session — nobody double-spawns a child
	/// process or double-dials an endpoint. A failed creation evicts its own
	/// cell before returning, so the *next* call gets a fresh `OnceCell` and
	/// actually retries instead of replaying the same cached error forever.
	async fn get_or_create(
		&self,
		resolved: &Resolved<'_>,
		ctx: &UserContext,
	) -> Result<Arc<UpstreamSession>, UpstreamError> {
		let key = SessionKey {
			service: resolved.service.name.clone(),
			user_id: ctx.user_id.clone(),
		};
		let cell = self.cell_for(&key).await;
		let result = cell
			.get_or_init(|| async { self.create(resolved.service, ctx).await.map_err(|e| e.to_string()) })
			.await
			.clone();
		match result {
			Ok(session) => Ok(session),
			Err(e) => {
				self.evict_cell(&key, &cell).await;
				Err(UpstreamError::Spawn(anyhow::anyhow!(e)))
			},
		}
	}

	/// Removes `key`'s map entry iff it still points at `cell` — guards against
	/// racing a concurrent retry that already installed a fresh `OnceCell` out
	/// from under a failed one.
	async fn evict_cell(&self, key: &SessionKey, cell: &Arc<OnceCell<Result<Arc<UpstreamSession>, String>>>) {
		let mut sessions = self.sessions.write().await;
		if sessions.get(key).is_some_and(|existing| Arc::ptr_eq(existing, cell)) {
			sessions.remove(key);
		}
	}

	async fn create(
		&self,
		service: &ServiceDefinition,
		ctx: &UserContext,
	) -> anyhow::Result<Arc<UpstreamSession>> {
		if !service.enabled {
			anyhow::bail!("service '{}' is disabled", service.name);
		}
		let creds = if service.requires_credentials {
			self
				.credentials
				.fetch(&service.name, "connect", &ctx.tenant_id, &ctx.user_id)
				.await
		} else {
			Default::default()
		};
		let handler = NotificationForwarder::new(self.notifications.clone(), ctx.agent_session_id.clone());

		let running = match service.transport {
			TransportKind::Stdio => {
				let transport = stdio::spawn(service, &creds)?;
				handler.serve(transport).await?
			},
			TransportKind::HttpStream => {
				let transport = http_stream::connect(service, &creds)?;
				handler.serve(transport).await?
			},
			TransportKind::Websocket => {
				let transport = websocket::connect(service, &creds).await?;
				handler.serve(transport).await?
			},
		};

		Ok(Arc::new(UpstreamSession {
			service: running,
			identity: service.identity_snapshot(),
		}))
	}

	async fn evict(&self, key: &SessionKey) {
		if let Some(cell) = self.sessions.write().await.remove(key) {
			if let Some(Ok(session)) = Arc::into_inner(cell).and_then(OnceCell::into_inner) {
				if let Ok(session) = Arc::try_unwrap(session) {
					let _ = session.service.cancel().await;
				}
			}
		}
	}

	/// Lists tools directly from the upstream, used by service discovery
	/// tooling rather than the per-agent tool list (which is served from the
	/// catalog, not a live round trip).
	pub async fn discover(
		&self,
		service: &ServiceDefinition,
		ctx: &UserContext,
	) -> Result<Vec<rmcp::model::Tool>, UpstreamError> {
		let resolved = Resolved { service, tool: "" };
		let session = self.get_or_create(&resolved, ctx).await?;
		let result = session
			.service
			.list_tools(None)
			.await
			.map_err(UpstreamError::Call)?;
		Ok(result.tools)
	}

	/// Calls `tool` on `resolved.service` with the unmodified argument
	/// object, converts the MCP result into the outbound JSON-RPC payload,
	/// and evicts the session on any upstream failure so the next call
	/// reconnects from scratch.
	pub async fn forward(
		&self,
		resolved: &Resolved<'_>,
		arguments: Value,
		ctx: &UserContext,
	) -> Result<Value, UpstreamError> {
		let key = SessionKey {
			service: resolved.service.name.clone(),
			user_id: ctx.user_id.clone(),
		};
		let session = self.get_or_create(resolved, ctx).await?;

		let arguments = match arguments {
			Value::Object(map) => Some(map),
			Value::Null => None,
			other => {
				let mut map = serde_json::Map::new();
				map.insert("value".to_string(), other);
				Some(map)
			},
		};

		let mut call_params = CallToolRequestParams::new(resolved.tool.to_string());
		call_params.arguments = arguments;
		let call = session.service.call_tool(call_params);

		let started = Instant::now();
		let outcome = tokio::time::timeout(self.call_timeout, call).await;
		match outcome {
			Ok(Ok(result)) => encode_call_tool_result(
				result,
				resolved.service.name.as_str(),
				resolved.tool,
				started.elapsed(),
			),
			Ok(Err(e)) => {
				// `session` is an `Arc` the compiler would otherwise keep alive to the
				// end of the function; drop it first so `evict` sees a unique owner
				// and actually cancels the service instead of just removing the map
				// entry.
				drop(session);
				self.evict(&key).await;
				Ok(error_result(&e.to_string(), resolved.service.name.as_str(), resolved.tool, started.elapsed()))
			},
			Err(_) => {
				drop(session);
				self.evict(&key).await;
				Err(UpstreamError::Timeout)
			},
		}
	}

	/// Compares every live session's transport identity against the new
	/// catalog and evicts the ones that changed, were disabled, or were
	/// removed outright. Sessions for unchanged services are left alone.
	pub async fn evict_stale(&self, new_catalog: &Catalog) {
		let keys: Vec<SessionKey> = self.sessions.read().await.keys().cloned().collect();
		for key in keys {
			let still_matches = match new_catalog.services.get(&key.service) {
				Some(svc) if svc.enabled => {
					let cell = self.sessions.read().await.get(&key).cloned();
					match cell.and_then(|c| c.get().cloned()) {
						Some(Ok(session)) => session.identity == svc.identity_snapshot(),
						// Still initializing, or failed and awaiting get_or_create's own
						// retry-eviction on next use; leave it for that path.
						_ => true,
					}
				},
				_ => false,
			};
			if !still_matches {
				self.evict(&key).await;
			}
		}
	}

	/// Closes every live session. STDIO children that do not exit promptly
	/// on graceful close are force-killed by `RunningService::cancel`'s
	/// underlying transport drop.
	pub async fn shutdown(&self) {
		let keys: Vec<SessionKey> = self.sessions.read().await.keys().cloned().collect();
		for key in keys {
			self.evict(&key).await;
		}
	}
}

fn context_block(status: &str, service: &str, operation: &str, duration: Duration) -> Value {
	let timestamp = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis() as u64)
		.unwrap_or(0);
	json!({
		"type": "text",
		"text": json!({
			"status": status,
			"service": service,
			"operation": operation,
			"durationMs": duration.as_millis() as u64,
			"timestamp": timestamp,
		}).to_string(),
	})
}

fn encode_call_tool_result(
	result: rmcp::model::CallToolResult,
	service: &str,
	operation: &str,
	duration: Duration,
) -> Result<Value, UpstreamError> {
	let is_error = result.is_error.unwrap_or(false);
	let mut blocks: Vec<Value> = result
		.content
		.iter()
		.map(serde_json::to_value)
		.collect::<Result<_, _>>()
		.map_err(|e| UpstreamError::Spawn(e.into()))?;
	blocks.push(context_block(
		if is_error { "ERROR" } else { "SUCCESS" },
		service,
		operation,
		duration,
	));
	Ok(json!({ "content": blocks, "isError": is_error }))
}

fn error_result(message: &str, service: &str, operation: &str, duration: Duration) -> Value {
	json!({
		"content": [
			{"type": "text", "text": message},
			context_block("ERROR", service, operation, duration),
		],
		"isError": true,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn encode_wraps_content_and_appends_context_block() {
		let result = rmcp::model::CallToolResult::success(vec![rmcp::model::Content::text("hello".to_string())]);
		let encoded = encode_call_tool_result(result, "search", "web", Duration::from_millis(5)).unwrap();
		let content = encoded.get("content").unwrap().as_array().unwrap();
		assert_eq!(content.len(), 2);
		assert_eq!(content[0]["text"], "hello");
		assert_eq!(encoded["isError"], false);
		let context: Value = serde_json::from_str(content[1]["text"].as_str().unwrap()).unwrap();
		assert_eq!(context["status"], "SUCCESS");
		assert_eq!(context["operation"], "web");
	}

	#[test]
	fn error_result_marks_is_error() {
		let v = error_result("boom", "search", "web", Duration::from_millis(1));
		assert_eq!(v["isError"], true);
		assert_eq!(v["content"][0]["text"], "boom");
	}
}
