use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Transport-level failures: these happen before a JSON-RPC response can be
/// constructed at all (bad auth, malformed HTTP, unknown session) and are
/// surfaced as plain HTTP status codes.
#[derive(Debug, Error)]
pub enum ProxyError {
	#[error("missing bearer credential")]
	MissingCredential,
	#[error("invalid token signature")]
	InvalidSignature,
	#[error("token issuer mismatch")]
	IssuerMismatch,
	#[error("token expired")]
	Expired,
	#[error("request body is not valid JSON-RPC: {0}")]
	Parse(#[from] crate::jsonrpc::ParseError),
	#[error("unknown session")]
	UnknownSession,
	#[error("session id is required")]
	SessionIdRequired,
	#[error("method not allowed")]
	MethodNotAllowed,
	#[error("internal error: {0}")]
	Internal(#[from] anyhow::Error),
}

impl ProxyError {
	fn status(&self) -> StatusCode {
		match self {
			ProxyError::MissingCredential
			| ProxyError::InvalidSignature
			| ProxyError::IssuerMismatch
			| ProxyError::Expired => StatusCode::UNAUTHORIZED,
			ProxyError::Parse(_) => StatusCode::BAD_REQUEST,
			ProxyError::UnknownSession | ProxyError::SessionIdRequired => StatusCode::NOT_FOUND,
			ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
			ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	fn is_auth_error(&self) -> bool {
		matches!(
			self,
			ProxyError::MissingCredential
				| ProxyError::InvalidSignature
				| ProxyError::IssuerMismatch
				| ProxyError::Expired
		)
	}
}

impl IntoResponse for ProxyError {
	fn into_response(self) -> Response {
		tracing::debug!(error = %self, "request rejected");
		let status = self.status();
		let mut resp = (status, self.to_string()).into_response();
		if self.is_auth_error() {
			resp.headers_mut().insert(
				http::header::WWW_AUTHENTICATE,
				http::HeaderValue::from_static(
					"Bearer resource_metadata=\"/.well-known/oauth-protected-resource\"",
				),
			);
		}
		resp
	}
}
