//! Wire types for agent-facing JSON-RPC 2.0 messages.
//!
//! These are hand-rolled rather than borrowed from `rmcp`'s typed request/
//! response enums because the proxy must pass arbitrary `params`/`result`
//! payloads through byte-for-byte (no re-encoding through a narrower schema
//! would preserve that). The upstream-facing side talks `rmcp::model`
//! directly since there we really are an MCP client.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// A parsed inbound message: either a request awaiting a response, or a
/// notification that must never produce one.
#[derive(Debug, Clone)]
pub enum Inbound {
	Request(Request),
	Notification(Notification),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
	#[serde(default)]
	pub jsonrpc: Option<String>,
	pub id: Value,
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
	#[serde(default)]
	pub jsonrpc: Option<String>,
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

/// Raw form used only to decide whether a message is a request or a
/// notification before committing to either shape.
#[derive(Debug, Deserialize)]
struct Envelope {
	#[serde(default)]
	id: Option<Value>,
	#[serde(default)]
	method: Option<String>,
	#[serde(default)]
	params: Value,
	#[serde(default)]
	jsonrpc: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
	#[error("request body is not valid JSON: {0}")]
	Json(#[from] serde_json::Error),
	#[error("message is missing a \"method\" field")]
	MissingMethod,
}

/// Parses a raw JSON-RPC payload, classifying it as a request or a
/// notification per the "no id, or id == null" rule.
pub fn parse(bytes: &[u8]) -> Result<Inbound, ParseError> {
	let env: Envelope = serde_json::from_slice(bytes)?;
	let Some(method) = env.method else {
		return Err(ParseError::MissingMethod);
	};
	match env.id {
		None | Some(Value::Null) => Ok(Inbound::Notification(Notification {
			jsonrpc: env.jsonrpc,
			method,
			params: env.params,
		})),
		Some(id) => Ok(Inbound::Request(Request {
			jsonrpc: env.jsonrpc,
			id,
			method,
			params: env.params,
		})),
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
	pub jsonrpc: &'static str,
	pub id: Value,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<RpcError>,
}

impl Response {
	pub fn success(id: Value, result: Value) -> Self {
		Self {
			jsonrpc: JSONRPC_VERSION,
			id,
			result: Some(result),
			error: None,
		}
	}

	pub fn failure(id: Value, error: RpcError) -> Self {
		Self {
			jsonrpc: JSONRPC_VERSION,
			id,
			result: None,
			error: Some(error),
		}
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
	pub code: i64,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

impl RpcError {
	pub const PARSE_ERROR: i64 = -32700;
	pub const METHOD_NOT_FOUND: i64 = -32601;
	pub const INTERNAL_ERROR: i64 = -32603;

	pub fn new(code: i64, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
			data: None,
		}
	}
}

/// Outbound server-initiated notification, re-serialized verbatim from what
/// the upstream MCP server sent.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundNotification {
	pub jsonrpc: &'static str,
	pub method: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub params: Option<Value>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn request_with_numeric_id_is_a_request() {
		let raw = br#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}}"#;
		match parse(raw).unwrap() {
			Inbound::Request(r) => {
				assert_eq!(r.method, "tools/list");
				assert_eq!(r.id, Value::from(1));
			},
			Inbound::Notification(_) => panic!("expected request"),
		}
	}

	#[test]
	fn missing_id_is_a_notification() {
		let raw = br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
		match parse(raw).unwrap() {
			Inbound::Notification(n) => assert_eq!(n.method, "notifications/initialized"),
			Inbound::Request(_) => panic!("expected notification"),
		}
	}

	#[test]
	fn null_id_is_a_notification() {
		let raw = br#"{"jsonrpc":"2.0","id":null,"method":"notifications/cancelled"}"#;
		assert!(matches!(parse(raw).unwrap(), Inbound::Notification(_)));
	}

	#[test]
	fn missing_method_is_rejected() {
		let raw = br#"{"jsonrpc":"2.0","id":1}"#;
		assert!(matches!(parse(raw), Err(ParseError::MissingMethod)));
	}

	#[test]
	fn arguments_round_trip_with_full_fidelity() {
		let raw = br#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"search.web","arguments":{"n":3.14,"flag":true,"nested":{"arr":[1,2,3]}}}}"#;
		let Inbound::Request(r) = parse(raw).unwrap() else {
			panic!("expected request")
		};
		let args = r.params.get("arguments").cloned().unwrap();
		let expected: Value = serde_json::from_str(
			r#"{"n":3.14,"flag":true,"nested":{"arr":[1,2,3]}}"#,
		)
		.unwrap();
		assert_eq!(args, expected);
	}
}
