//! Top-level `Router` assembly: the OAuth facade's well-known/auth endpoints
//! plus the three agent transport ingress shapes, sharing one CORS/tracing
//! layer stack.

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::oauth::OAuthFacade;
use crate::state::AppState;
use crate::transport;

pub fn build(state: Arc<AppState>, oauth: Arc<OAuthFacade>) -> Router {
	let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

	Router::new()
		.merge(oauth.router())
		.merge(transport::router(state))
		.layer(TraceLayer::new_for_http())
		.layer(cors)
}
