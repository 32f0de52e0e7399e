//! Minimal STDIO MCP server used as a stand-in upstream in integration
//! tests. Exposes one tool, `web`, which echoes its arguments back verbatim
//! in `structured_content` so a test can assert argument fidelity through
//! the whole proxy stack, and honors `{"fail": true}` to exercise the
//! upstream-reported-error path without needing a second fixture.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::ErrorData as McpError;
use rmcp::ServiceExt;
use rmcp::handler::server::ServerHandler;
use rmcp::model::{
	CallToolRequestParams, CallToolResult, Content, JsonObject, ListToolsResult,
	PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use serde_json::{Value, json};

#[derive(Clone)]
struct EchoServer {
	tools: Arc<Vec<Tool>>,
}

fn stdio() -> (tokio::io::Stdin, tokio::io::Stdout) {
	(tokio::io::stdin(), tokio::io::stdout())
}

impl EchoServer {
	fn new() -> Self {
		Self {
			tools: Arc::new(vec![Self::web_tool()]),
		}
	}

	fn web_tool() -> Tool {
		let schema: JsonObject = serde_json::from_value(json!({
			"type": "object",
			"properties": {},
			"additionalProperties": true,
		}))
		.expect("web tool schema should deserialize");
		Tool::new(Cow::Borrowed("web"), Cow::Borrowed("Echoes its arguments back"), Arc::new(schema))
	}
}

impl ServerHandler for EchoServer {
	fn get_info(&self) -> ServerInfo {
		ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
	}

	fn list_tools(
		&self,
		_request: Option<PaginatedRequestParams>,
		_context: RequestContext<RoleServer>,
	) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
		let tools = self.tools.clone();
		async move {
			Ok(ListToolsResult {
				tools: (*tools).clone(),
				next_cursor: None,
				meta: None,
			})
		}
	}

	async fn call_tool(
		&self,
		request: CallToolRequestParams,
		_context: RequestContext<RoleServer>,
	) -> Result<CallToolResult, McpError> {
		if request.name.as_ref() != "web" {
			return Err(McpError::invalid_params(format!("unknown tool: {}", request.name), None));
		}

		let arguments = Value::Object(request.arguments.clone().unwrap_or_default());
		if arguments.get("fail").and_then(Value::as_bool).unwrap_or(false) {
			return Ok(CallToolResult::error(vec![Content::text("upstream reported failure".to_string())]));
		}

		Ok(CallToolResult::structured(arguments))
	}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let running = EchoServer::new().serve(stdio()).await?;
	running.waiting().await?;
	Ok(())
}
