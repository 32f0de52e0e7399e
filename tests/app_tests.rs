//! End-to-end checks against the assembled router: the transport-level
//! concerns (auth enforcement, well-known metadata, health) that don't
//! require a signed JWT or a live upstream to exercise.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use clap::Parser;
use http_body_util::BodyExt;
use mcp_gateway::app;
use mcp_gateway::config::{Catalog, CatalogFile};
use mcp_gateway::credentials::CredentialInjector;
use mcp_gateway::dispatch::Dispatcher;
use mcp_gateway::identity::IdentityVerifier;
use mcp_gateway::notify::NotificationRouter;
use mcp_gateway::oauth::OAuthFacade;
use mcp_gateway::policy::PolicyGate;
use mcp_gateway::registry::ToolRegistry;
use mcp_gateway::settings::Settings;
use mcp_gateway::state::AppState;
use mcp_gateway::transport::{AgentSessionRegistry, SseSessions};
use mcp_gateway::upstream::UpstreamSessionManager;
use tower::ServiceExt;

fn empty_catalog() -> Catalog {
	Catalog::from_file(CatalogFile::default()).unwrap()
}

fn test_app() -> axum::Router {
	let settings = Arc::new(Settings::parse_from::<_, &str>([]));
	let client = reqwest::Client::new();

	let identity = Arc::new(IdentityVerifier::new(
		client.clone(),
		"http://127.0.0.1:1/jwks".into(),
		settings.issuer(),
	));
	let registry = Arc::new(ToolRegistry::new(empty_catalog()));
	let policy = Arc::new(PolicyGate::new(
		client.clone(),
		"http://127.0.0.1:1/allow".into(),
		Duration::from_millis(50),
	));
	let credentials = Arc::new(CredentialInjector::new(
		client.clone(),
		"http://127.0.0.1:1/credentials".into(),
		Duration::from_secs(60),
	));
	let notifications = Arc::new(NotificationRouter::new());
	let upstream = Arc::new(UpstreamSessionManager::new(
		credentials.clone(),
		notifications.clone(),
		Duration::from_secs(5),
	));
	let dispatcher = Arc::new(Dispatcher::new(registry.clone(), policy.clone(), upstream.clone()));
	let oauth = Arc::new(OAuthFacade::new(settings.clone(), client.clone()));

	let state = Arc::new(AppState {
		settings,
		identity,
		registry,
		policy,
		credentials,
		upstream,
		notifications,
		dispatcher,
		sessions: Arc::new(AgentSessionRegistry::new()),
		sse_sessions: Arc::new(SseSessions::new()),
	});

	app::build(state, oauth)
}

#[tokio::test]
async fn health_reports_ok_without_auth() {
	let app = test_app();
	let resp = app
		.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(resp.status(), StatusCode::OK);
	let body = resp.into_body().collect().await.unwrap().to_bytes();
	let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
	assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn mcp_without_bearer_is_rejected_with_www_authenticate() {
	let app = test_app();
	let resp = app
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/mcp")
				.header("content-type", "application/json")
				.body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
				.unwrap(),
		)
		.await
		.unwrap();
	assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
	assert!(resp.headers().get(http::header::WWW_AUTHENTICATE).is_some());
}

#[tokio::test]
async fn message_without_bearer_is_rejected_even_with_session_id() {
	let app = test_app();
	let resp = app
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/message?sessionId=does-not-matter")
				.body(Body::from("{}"))
				.unwrap(),
		)
		.await
		.unwrap();
	assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sse_without_bearer_or_token_query_is_rejected() {
	let app = test_app();
	let resp = app
		.oneshot(Request::builder().uri("/sse").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn protected_resource_metadata_advertises_header_and_query_bearer_methods() {
	let app = test_app();
	let resp = app
		.oneshot(
			Request::builder()
				.uri("/.well-known/oauth-protected-resource")
				.body(Body::empty())
				.unwrap(),
		)
		.await
		.unwrap();
	assert_eq!(resp.status(), StatusCode::OK);
	let body = resp.into_body().collect().await.unwrap().to_bytes();
	let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
	assert_eq!(json["bearer_methods_supported"], serde_json::json!(["header", "query"]));
}

#[tokio::test]
async fn authorization_server_metadata_exposes_token_and_register_endpoints() {
	let app = test_app();
	let resp = app
		.oneshot(
			Request::builder()
				.uri("/.well-known/oauth-authorization-server")
				.body(Body::empty())
				.unwrap(),
		)
		.await
		.unwrap();
	assert_eq!(resp.status(), StatusCode::OK);
	let body = resp.into_body().collect().await.unwrap().to_bytes();
	let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
	assert!(json["token_endpoint"].as_str().unwrap().ends_with("/token"));
	assert!(json["registration_endpoint"].as_str().unwrap().ends_with("/register"));
}

#[tokio::test]
async fn malformed_body_on_mcp_is_rejected_before_dispatch_is_reached() {
	// No Authorization header at all: the 401 must fire before the body is
	// ever parsed, so a malformed body shouldn't change the outcome.
	let app = test_app();
	let resp = app
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/mcp")
				.body(Body::from("not json"))
				.unwrap(),
		)
		.await
		.unwrap();
	assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}
