//! Startup configuration sourced from environment variables. Modeled as one
//! explicit struct with named, defaulted fields rather than a derive-heavy
//! env crate, so every default is visible in one place.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "mcp-gateway", about = "Transparent MCP proxy")]
pub struct Settings {
	/// Listen port.
	#[arg(long, env = "PORT", default_value_t = 8080)]
	pub port: u16,

	/// Listen host.
	#[arg(long, env = "HOST", default_value = "0.0.0.0")]
	pub host: String,

	/// Path to the service catalog (YAML).
	#[arg(long, env = "CONFIG_PATH", default_value = "config.yaml")]
	pub config_path: std::path::PathBuf,

	/// Internal URL of the identity provider (used for JWKS + token proxying).
	#[arg(long, env = "KEYCLOAK_URL", default_value = "http://localhost:8081")]
	pub keycloak_url: String,

	/// Browser-visible URL of the identity provider (used for the `/authorize`
	/// redirect only — never for server-to-server calls).
	#[arg(long, env = "KEYCLOAK_EXTERNAL_URL", default_value = "http://localhost:8081")]
	pub keycloak_external_url: String,

	#[arg(long, env = "KEYCLOAK_REALM", default_value = "mcp")]
	pub keycloak_realm: String,

	/// Expected `iss` claim. Defaults to the conventional Keycloak issuer URL.
	#[arg(long, env = "KEYCLOAK_ISSUER")]
	pub keycloak_issuer: Option<String>,

	/// Public client id echoed back from `/register`.
	#[arg(long, env = "KEYCLOAK_CLIENT_ID", default_value = "mcp-gateway")]
	pub keycloak_client_id: String,

	#[arg(long, env = "POLICY_ENDPOINT", default_value = "http://localhost:9001/v1/allow")]
	pub policy_endpoint: String,

	#[arg(long, env = "CREDENTIAL_ENDPOINT", default_value = "http://localhost:9002/v1/credentials")]
	pub credential_endpoint: String,

	/// TTL for cached credential fetches, in seconds.
	#[arg(long, env = "CREDENTIAL_CACHE_TTL_SECS", default_value_t = 300)]
	pub credential_cache_ttl_secs: u64,

	/// Per-upstream-call deadline, in seconds.
	#[arg(long, env = "UPSTREAM_CALL_TIMEOUT_SECS", default_value_t = 60)]
	pub upstream_call_timeout_secs: u64,

	/// Per-policy-call timeout, in seconds.
	#[arg(long, env = "POLICY_TIMEOUT_SECS", default_value_t = 2)]
	pub policy_timeout_secs: u64,

	/// Max age of an idle streaming agent session before the sweep discards it.
	#[arg(long, env = "SESSION_MAX_AGE_SECS", default_value_t = 3600)]
	pub session_max_age_secs: u64,
}

impl Settings {
	pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
		format!("{}:{}", self.host, self.port)
			.parse()
			.map_err(|e| anyhow::anyhow!("invalid HOST/PORT: {e}"))
	}

	pub fn issuer(&self) -> String {
		self
			.keycloak_issuer
			.clone()
			.unwrap_or_else(|| format!("{}/realms/{}", self.keycloak_url, self.keycloak_realm))
	}

	pub fn jwks_uri(&self) -> String {
		format!(
			"{}/realms/{}/protocol/openid-connect/certs",
			self.keycloak_url, self.keycloak_realm
		)
	}

	pub fn external_authorize_endpoint(&self) -> String {
		format!(
			"{}/realms/{}/protocol/openid-connect/auth",
			self.keycloak_external_url, self.keycloak_realm
		)
	}

	pub fn internal_token_endpoint(&self) -> String {
		format!(
			"{}/realms/{}/protocol/openid-connect/token",
			self.keycloak_url, self.keycloak_realm
		)
	}

	pub fn credential_cache_ttl(&self) -> Duration {
		Duration::from_secs(self.credential_cache_ttl_secs)
	}

	pub fn upstream_call_timeout(&self) -> Duration {
		Duration::from_secs(self.upstream_call_timeout_secs)
	}

	pub fn policy_timeout(&self) -> Duration {
		Duration::from_secs(self.policy_timeout_secs)
	}

	pub fn session_max_age(&self) -> Duration {
		Duration::from_secs(self.session_max_age_secs)
	}
}
