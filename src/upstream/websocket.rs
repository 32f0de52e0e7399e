//! WebSocket transport factory — a single full-duplex socket frames JSON-RPC
//! messages both ways. `rmcp` ships client transports for STDIO and
//! Streamable HTTP but not WebSocket, so this wraps `tokio-tungstenite`
//! directly and exposes it as a plain `Sink`/`Stream` pair, which `rmcp`'s
//! `serve_client` accepts for any custom transport.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Sink, Stream};
use rmcp::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::ServiceDefinition;
use crate::credentials::CredentialMap;

pub struct WebSocketTransport {
	inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Stream for WebSocketTransport {
	type Item = ServerJsonRpcMessage;

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		loop {
			return match Pin::new(&mut self.inner).poll_next(cx) {
				Poll::Ready(Some(Ok(Message::Text(text)))) => match serde_json::from_str(&text) {
					Ok(msg) => Poll::Ready(Some(msg)),
					Err(e) => {
						tracing::warn!(error = %e, "dropping malformed upstream websocket frame");
						continue;
					},
				},
				Poll::Ready(Some(Ok(_))) => continue,
				Poll::Ready(Some(Err(e))) => {
					tracing::warn!(error = %e, "upstream websocket error");
					Poll::Ready(None)
				},
				Poll::Ready(None) => Poll::Ready(None),
				Poll::Pending => Poll::Pending,
			};
		}
	}
}

impl Sink<ClientJsonRpcMessage> for WebSocketTransport {
	type Error = std::io::Error;

	fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
		Pin::new(&mut self.inner).poll_ready(cx).map_err(to_io_error)
	}

	fn start_send(mut self: Pin<&mut Self>, item: ClientJsonRpcMessage) -> Result<(), Self::Error> {
		let text = serde_json::to_string(&item).map_err(std::io::Error::other)?;
		Pin::new(&mut self.inner)
			.start_send(Message::Text(text.into()))
			.map_err(to_io_error)
	}

	fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
		Pin::new(&mut self.inner).poll_flush(cx).map_err(to_io_error)
	}

	fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
		Pin::new(&mut self.inner).poll_close(cx).map_err(to_io_error)
	}
}

fn to_io_error(e: tokio_tungstenite::tungstenite::Error) -> std::io::Error {
	std::io::Error::other(e)
}

pub async fn connect(
	service: &ServiceDefinition,
	credentials: &CredentialMap,
) -> anyhow::Result<WebSocketTransport> {
	let endpoint = service
		.endpoint
		.as_deref()
		.ok_or_else(|| anyhow::anyhow!("service '{}' has no WEBSOCKET endpoint", service.name))?;

	let mut request = endpoint.into_client_request()?;
	for (key, value) in credentials {
		let name = http::header::HeaderName::try_from(key.as_str())
			.map_err(|e| anyhow::anyhow!("invalid credential header name '{key}': {e}"))?;
		let val = http::header::HeaderValue::from_str(value.expose())
			.map_err(|e| anyhow::anyhow!("invalid credential header value for '{key}': {e}"))?;
		request.headers_mut().insert(name, val);
	}

	let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
	Ok(WebSocketTransport { inner: stream })
}
