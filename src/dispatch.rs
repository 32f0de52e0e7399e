//! C9 — Dispatcher.
//!
//! The one place that turns a parsed inbound JSON-RPC message into an
//! outbound one. Every method the proxy understands is matched here;
//! anything else comes back `-32601 Method not found`. `tools/call` is the
//! only method that touches the policy gate or an upstream session — every
//! other method is answered locally.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::jsonrpc::{Notification, Request, Response, RpcError};
use crate::policy::{Decision, PolicyGate};
use crate::registry::ToolRegistry;
use crate::upstream::{Resolved, UpstreamError, UpstreamSessionManager, UserContext};

const INVALID_PARAMS: i64 = -32602;

/// Every `tools/call` failure below the transport line comes back as a
/// normal JSON-RPC *success* envelope carrying an MCP result with
/// `isError: true` — only a malformed request or an unknown method is a
/// genuine JSON-RPC error object. This mirrors how `content` blocks are
/// only meaningful attached to a result the caller can render.
fn tool_error(message: impl Into<String>) -> Value {
	json!({
		"content": [{"type": "text", "text": message.into()}],
		"isError": true,
	})
}

/// Who is calling, threaded through from the verified bearer token. `tenant_id`
/// falls back to `user_id` for tokens that never carry one.
pub struct Identity {
	pub user_id: String,
	pub tenant_id: String,
	pub agent_session_id: Option<String>,
}

#[derive(Deserialize)]
struct CallToolParams {
	name: String,
	#[serde(default)]
	arguments: Value,
}

pub struct Dispatcher {
	registry: Arc<ToolRegistry>,
	policy: Arc<PolicyGate>,
	upstream: Arc<UpstreamSessionManager>,
}

impl Dispatcher {
	pub fn new(registry: Arc<ToolRegistry>, policy: Arc<PolicyGate>, upstream: Arc<UpstreamSessionManager>) -> Self {
		Self {
			registry,
			policy,
			upstream,
		}
	}

	/// Inbound notifications never get a response. `notifications/initialized`
	/// and `notifications/cancelled` are the only ones a conforming agent
	/// sends; neither requires action here since upstream sessions are
	/// established lazily per call rather than mirroring the agent's
	/// handshake, and in-flight cancellation is left to the upstream call's
	/// own timeout.
	pub fn handle_notification(&self, notification: &Notification) {
		tracing::debug!(method = %notification.method, "inbound notification");
	}

	pub async fn handle_request(&self, identity: &Identity, request: Request) -> Response {
		match request.method.as_str() {
			"initialize" => self.initialize(request),
			"ping" => Response::success(request.id, json!({})),
			"tools/list" => self.tools_list(request, identity),
			"tools/call" => self.tools_call(request, identity).await,
			_ => Response::failure(
				request.id,
				RpcError::new(RpcError::METHOD_NOT_FOUND, format!("method not found: {}", request.method)),
			),
		}
	}

	fn initialize(&self, request: Request) -> Response {
		Response::success(
			request.id,
			json!({
				"protocolVersion": "2024-11-05",
				"serverInfo": {
					"name": "mcp-gateway",
					"version": env!("CARGO_PKG_VERSION"),
				},
				"capabilities": {
					"tools": {"listChanged": true},
				},
			}),
		)
	}

	fn tools_list(&self, request: Request, identity: &Identity) -> Response {
		let tools = self.registry.list(&identity.user_id);
		Response::success(request.id, json!({ "tools": tools }))
	}

	async fn tools_call(&self, request: Request, identity: &Identity) -> Response {
		let params: CallToolParams = match serde_json::from_value(request.params.clone()) {
			Ok(p) => p,
			Err(e) => {
				return Response::failure(
					request.id,
					RpcError::new(INVALID_PARAMS, format!("invalid tools/call params: {e}")),
				);
			},
		};

		let Some(resolved) = self.registry.resolve(&params.name) else {
			return Response::success(
				request.id,
				tool_error(format!("Tool '{}' not found or disabled", params.name)),
			);
		};

		let catalog = self.registry.catalog();
		let Some(service) = catalog.services.get(&resolved.service) else {
			return Response::success(
				request.id,
				tool_error(format!("Tool '{}' not found or disabled", params.name)),
			);
		};

		match self.policy.check(&resolved.service, &resolved.tool, &identity.user_id).await {
			Decision::Allowed => {},
			Decision::Denied { reason } => {
				return Response::success(request.id, tool_error(reason));
			},
			Decision::Unavailable => {
				return Response::success(
					request.id,
					tool_error("Policy engine unavailable. Request denied (fail-closed)."),
				);
			},
		}

		let target = Resolved {
			service,
			tool: &resolved.tool,
		};
		let ctx = UserContext {
			user_id: identity.user_id.clone(),
			tenant_id: identity.tenant_id.clone(),
			agent_session_id: identity.agent_session_id.clone(),
		};

		match self.upstream.forward(&target, params.arguments, &ctx).await {
			Ok(result) => Response::success(request.id, result),
			Err(UpstreamError::Timeout) => Response::success(request.id, tool_error("upstream call timed out")),
			Err(e) => Response::success(request.id, tool_error(e.to_string())),
		}
	}
}
