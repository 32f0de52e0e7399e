//! `POST /mcp` — single request, single response, no session of any kind.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use bytes::Bytes;

use crate::dispatch::Identity;
use crate::error::ProxyError;
use crate::jsonrpc::{self, Inbound, RpcError};
use crate::state::AppState;

pub async fn handle(
	State(state): State<Arc<AppState>>,
	auth: Option<TypedHeader<Authorization<Bearer>>>,
	body: Bytes,
) -> Result<axum::response::Response, ProxyError> {
	let token = super::bearer_token(auth).ok_or(ProxyError::MissingCredential)?;
	let claims = state.identity.verify(&token).await?;

	let inbound = jsonrpc::parse(&body);
	let identity = Identity {
		user_id: claims.sub,
		tenant_id: claims.tenant_id.unwrap_or_else(|| "default".to_string()),
		agent_session_id: None,
	};

	match inbound {
		Ok(Inbound::Request(request)) => {
			let response = state.dispatcher.handle_request(&identity, request).await;
			Ok(Json(response).into_response())
		},
		Ok(Inbound::Notification(notification)) => {
			state.dispatcher.handle_notification(&notification);
			Ok(axum::http::StatusCode::ACCEPTED.into_response())
		},
		Err(e) => {
			let response = jsonrpc::Response::failure(
				serde_json::Value::Null,
				RpcError::new(RpcError::PARSE_ERROR, e.to_string()),
			);
			Ok(Json(response).into_response())
		},
	}
}
