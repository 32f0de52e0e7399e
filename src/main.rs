use std::sync::Arc;

use clap::Parser;
use mcp_gateway::config::Catalog;
use mcp_gateway::credentials::CredentialInjector;
use mcp_gateway::dispatch::Dispatcher;
use mcp_gateway::identity::IdentityVerifier;
use mcp_gateway::notify::NotificationRouter;
use mcp_gateway::oauth::OAuthFacade;
use mcp_gateway::policy::PolicyGate;
use mcp_gateway::registry::ToolRegistry;
use mcp_gateway::settings::Settings;
use mcp_gateway::state::AppState;
use mcp_gateway::transport::{self, AgentSessionRegistry, SseSessions};
use mcp_gateway::upstream::UpstreamSessionManager;
use mcp_gateway::app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.json()
		.init();

	let settings = Arc::new(Settings::parse());
	tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting mcp-gateway");

	let catalog = Catalog::load(&settings.config_path)?;
	let client = reqwest::Client::builder().build()?;

	let identity = Arc::new(IdentityVerifier::new(client.clone(), settings.jwks_uri(), settings.issuer()));
	let registry = Arc::new(ToolRegistry::new(catalog));
	let policy = Arc::new(PolicyGate::new(client.clone(), settings.policy_endpoint.clone(), settings.policy_timeout()));
	let credentials = Arc::new(CredentialInjector::new(
		client.clone(),
		settings.credential_endpoint.clone(),
		settings.credential_cache_ttl(),
	));
	let notifications = Arc::new(NotificationRouter::new());
	let upstream = Arc::new(UpstreamSessionManager::new(
		credentials.clone(),
		notifications.clone(),
		settings.upstream_call_timeout(),
	));
	let dispatcher = Arc::new(Dispatcher::new(registry.clone(), policy.clone(), upstream.clone()));
	let oauth = Arc::new(OAuthFacade::new(settings.clone(), client.clone()));

	let state = Arc::new(AppState {
		settings: settings.clone(),
		identity,
		registry,
		policy,
		credentials,
		upstream: upstream.clone(),
		notifications,
		dispatcher,
		sessions: Arc::new(AgentSessionRegistry::new()),
		sse_sessions: Arc::new(SseSessions::new()),
	});

	let sweep = tokio::spawn(transport::run_stale_sweep(state.clone()));

	let listener = tokio::net::TcpListener::bind(settings.bind_addr()?).await?;
	tracing::info!(addr = %listener.local_addr()?, "listening");

	let router = app::build(state, oauth);
	axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

	sweep.abort();
	tracing::info!("draining upstream sessions");
	upstream.shutdown().await;

	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler")
			.recv()
			.await;
	};
	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
	tracing::info!("shutdown signal received");
}
