//! Streamable HTTP transport factory — MCP's "Streamable HTTP": the client
//! POSTs JSON-RPC requests and the server answers with an SSE-framed body
//! over the same long-lived exchange.

use rmcp::transport::StreamableHttpClientTransport;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;

use crate::config::ServiceDefinition;
use crate::credentials::CredentialMap;

pub fn connect(
	service: &ServiceDefinition,
	credentials: &CredentialMap,
) -> anyhow::Result<StreamableHttpClientTransport<reqwest::Client>> {
	let endpoint = service
		.endpoint
		.as_deref()
		.ok_or_else(|| anyhow::anyhow!("service '{}' has no HTTP_STREAM endpoint", service.name))?;

	let mut headers = http::HeaderMap::new();
	for (key, value) in credentials {
		let name = http::header::HeaderName::try_from(key.as_str())
			.map_err(|e| anyhow::anyhow!("invalid credential header name '{key}': {e}"))?;
		let val = http::header::HeaderValue::from_str(value.expose())
			.map_err(|e| anyhow::anyhow!("invalid credential header value for '{key}': {e}"))?;
		headers.insert(name, val);
	}

	let client = reqwest::Client::builder().default_headers(headers).build()?;
	let config = StreamableHttpClientTransportConfig::with_uri(endpoint.to_string());
	Ok(StreamableHttpClientTransport::with_client(client, config))
}
