//! C2 — OAuth Facade.
//!
//! Makes the proxy look like a self-contained authorization server to the
//! agent so it never has to make a cross-origin call to the real identity
//! provider, while all credential handling still happens at the provider.

use std::sync::Arc;

use axum::extract::{OriginalUri, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::settings::Settings;

#[derive(Clone)]
pub struct OAuthFacade {
	settings: Arc<Settings>,
	client: reqwest::Client,
}

impl OAuthFacade {
	pub fn new(settings: Arc<Settings>, client: reqwest::Client) -> Self {
		Self { settings, client }
	}

	pub fn router(self: Arc<Self>) -> Router {
		Router::new()
			.route(
				"/.well-known/oauth-protected-resource",
				get(protected_resource_metadata),
			)
			.route(
				"/.well-known/oauth-protected-resource/{*rest}",
				get(protected_resource_metadata),
			)
			.route(
				"/.well-known/oauth-authorization-server",
				get(authorization_server_metadata),
			)
			.route(
				"/.well-known/oauth-authorization-server/{*rest}",
				get(authorization_server_metadata),
			)
			.route("/authorize", get(authorize))
			.route("/token", post(token))
			.route("/register", post(register))
			.with_state(self)
	}

	/// Reconstructs the externally visible origin. `uri`'s own authority is
	/// almost never set — a standard reverse proxy (nginx, ALB, Traefik)
	/// forwards an origin-form request line (path only) and carries the real
	/// host in `Host`/`X-Forwarded-Host`, and the original scheme in
	/// `X-Forwarded-Proto` since the proxy terminates TLS itself. `uri`'s
	/// authority is only checked as a fallback for direct (non-proxied)
	/// connections.
	fn this_origin(&self, uri: &http::Uri, headers: &HeaderMap) -> String {
		let scheme = headers
			.get("x-forwarded-proto")
			.and_then(|v| v.to_str().ok())
			.or_else(|| uri.scheme_str())
			.unwrap_or("https");
		let authority = headers
			.get("x-forwarded-host")
			.or_else(|| headers.get(http::header::HOST))
			.and_then(|v| v.to_str().ok())
			.map(str::to_string)
			.or_else(|| uri.authority().map(|a| a.to_string()));
		match authority {
			Some(authority) => format!("{scheme}://{authority}"),
			None => "http://localhost".to_string(),
		}
	}
}

#[derive(Serialize)]
struct ProtectedResourceMetadata {
	resource: String,
	authorization_servers: Vec<String>,
	bearer_methods_supported: Vec<&'static str>,
}

async fn protected_resource_metadata(
	State(facade): State<Arc<OAuthFacade>>,
	OriginalUri(uri): OriginalUri,
	headers: HeaderMap,
) -> Json<ProtectedResourceMetadata> {
	let origin = facade.this_origin(&uri, &headers);
	Json(ProtectedResourceMetadata {
		resource: origin.clone(),
		authorization_servers: vec![origin],
		bearer_methods_supported: vec!["header", "query"],
	})
}

#[derive(Serialize)]
struct AuthorizationServerMetadata {
	issuer: String,
	authorization_endpoint: String,
	token_endpoint: String,
	registration_endpoint: String,
	code_challenge_methods_supported: Vec<&'static str>,
	token_endpoint_auth_methods_supported: Vec<&'static str>,
	response_types_supported: Vec<&'static str>,
	grant_types_supported: Vec<&'static str>,
}

async fn authorization_server_metadata(
	State(facade): State<Arc<OAuthFacade>>,
	OriginalUri(uri): OriginalUri,
	headers: HeaderMap,
) -> Json<AuthorizationServerMetadata> {
	let origin = facade.this_origin(&uri, &headers);
	Json(AuthorizationServerMetadata {
		issuer: origin.clone(),
		authorization_endpoint: format!("{origin}/authorize"),
		token_endpoint: format!("{origin}/token"),
		registration_endpoint: format!("{origin}/register"),
		code_challenge_methods_supported: vec!["S256"],
		token_endpoint_auth_methods_supported: vec!["none"],
		response_types_supported: vec!["code"],
		grant_types_supported: vec!["authorization_code", "refresh_token"],
	})
}

/// Redirects the browser to the provider's externally reachable authorize
/// endpoint, preserving the full query string verbatim (PKCE challenge,
/// client_id, redirect_uri, state, ...).
async fn authorize(
	State(facade): State<Arc<OAuthFacade>>,
	OriginalUri(uri): OriginalUri,
) -> impl IntoResponse {
	let target = match uri.query() {
		Some(q) => format!("{}?{q}", facade.settings.external_authorize_endpoint()),
		None => facade.settings.external_authorize_endpoint(),
	};
	Redirect::to(&target)
}

/// Proxies the token exchange to the provider's internally reachable token
/// endpoint and passes the response through verbatim.
async fn token(
	State(facade): State<Arc<OAuthFacade>>,
	body: bytes::Bytes,
) -> impl IntoResponse {
	let upstream = facade
		.client
		.post(facade.settings.internal_token_endpoint())
		.header(
			http::header::CONTENT_TYPE,
			"application/x-www-form-urlencoded",
		)
		.body(body)
		.send()
		.await;

	match upstream {
		Ok(resp) => {
			let status = resp.status();
			let body = resp.bytes().await.unwrap_or_default();
			(
				axum::http::StatusCode::from_u16(status.as_u16())
					.unwrap_or(axum::http::StatusCode::BAD_GATEWAY),
				body,
			)
				.into_response()
		},
		Err(e) => {
			tracing::warn!(error = %e, "token proxy failed");
			axum::http::StatusCode::BAD_GATEWAY.into_response()
		},
	}
}

#[derive(serde::Deserialize, Default)]
struct RegisterRequest {
	#[serde(default)]
	redirect_uris: Vec<String>,
}

#[derive(Serialize)]
struct RegisterResponse {
	client_id: String,
	redirect_uris: Vec<String>,
	grant_types: Vec<&'static str>,
	token_endpoint_auth_method: &'static str,
}

/// Echoes a dynamic client registration response. No state is persisted —
/// the client id is fixed configuration, not something this proxy issues.
async fn register(
	State(facade): State<Arc<OAuthFacade>>,
	body: Option<Json<RegisterRequest>>,
) -> Json<RegisterResponse> {
	let redirect_uris = body.map(|Json(r)| r.redirect_uris).unwrap_or_default();
	Json(RegisterResponse {
		client_id: facade.settings.keycloak_client_id.clone(),
		redirect_uris,
		grant_types: vec!["authorization_code", "refresh_token"],
		token_endpoint_auth_method: "none",
	})
}

#[cfg(test)]
mod tests {
	use clap::Parser;

	use super::*;

	#[test]
	fn origin_is_reconstructed_from_scheme_and_authority() {
		let settings = Arc::new(Settings::parse_from::<_, &str>([]));
		let facade = OAuthFacade::new(settings, reqwest::Client::new());
		let uri: http::Uri = "https://gateway.example.com/authorize?x=1"
			.parse()
			.unwrap();
		assert_eq!(facade.this_origin(&uri, &HeaderMap::new()), "https://gateway.example.com");
	}

	#[test]
	fn origin_behind_reverse_proxy_uses_forwarded_headers() {
		// Origin-form request line: the URI has no authority of its own, the way
		// nginx/ALB/Traefik actually forward HTTP/1.1 requests.
		let settings = Arc::new(Settings::parse_from::<_, &str>([]));
		let facade = OAuthFacade::new(settings, reqwest::Client::new());
		let uri: http::Uri = "/authorize?x=1".parse().unwrap();
		let mut headers = HeaderMap::new();
		headers.insert("x-forwarded-proto", "https".parse().unwrap());
		headers.insert("x-forwarded-host", "gateway.example.com".parse().unwrap());
		assert_eq!(facade.this_origin(&uri, &headers), "https://gateway.example.com");
	}

	#[test]
	fn origin_falls_back_to_host_header_without_forwarded_proto() {
		let settings = Arc::new(Settings::parse_from::<_, &str>([]));
		let facade = OAuthFacade::new(settings, reqwest::Client::new());
		let uri: http::Uri = "/authorize".parse().unwrap();
		let mut headers = HeaderMap::new();
		headers.insert(http::header::HOST, "gateway.internal:8080".parse().unwrap());
		assert_eq!(facade.this_origin(&uri, &headers), "https://gateway.internal:8080");
	}
}
