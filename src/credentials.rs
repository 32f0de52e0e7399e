//! C5 — Credential Injector.
//!
//! The only component that speaks to the external credential service. A
//! failure is logged and returns an empty credential set — callers proceed
//! unauthenticated rather than failing the call, so services that declare
//! `requiresCredentials=false` are never blocked by a vault outage.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::RwLock;

/// A credential value whose `Debug` impl redacts the contents, so an
/// accidental `{:?}` in a log line never leaks a secret.
#[derive(Clone)]
pub struct Credential(SecretString);

impl Credential {
	pub fn from_plain(value: impl Into<String>) -> Self {
		Self(SecretString::from(value.into()))
	}

	pub fn expose(&self) -> &str {
		self.0.expose_secret()
	}
}

impl fmt::Debug for Credential {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("Credential(REDACTED)")
	}
}

pub type CredentialMap = HashMap<String, Credential>;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CacheKey {
	service: String,
	tenant_id: String,
	user_id: String,
}

struct CacheEntry {
	value: CredentialMap,
	expires_at: Instant,
}

#[derive(Deserialize)]
struct CredentialResponse(HashMap<String, String>);

pub struct CredentialInjector {
	client: reqwest::Client,
	endpoint: String,
	ttl: Duration,
	cache: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl CredentialInjector {
	pub fn new(client: reqwest::Client, endpoint: String, ttl: Duration) -> Self {
		Self {
			client,
			endpoint,
			ttl,
			cache: RwLock::new(HashMap::new()),
		}
	}

	/// Fetches credentials for `(service, tenant, user)`, using the cache
	/// when a fresh entry exists. Never panics, never raises — on any
	/// failure it logs and returns an empty map.
	pub async fn fetch(&self, service: &str, operation: &str, tenant_id: &str, user_id: &str) -> CredentialMap {
		let key = CacheKey {
			service: service.to_string(),
			tenant_id: tenant_id.to_string(),
			user_id: user_id.to_string(),
		};

		if let Some(entry) = self.cache.read().await.get(&key) {
			if entry.expires_at > Instant::now() {
				return entry.value.clone();
			}
		}

		let span = tracing::info_span!("credential_fetch", service, tenant_id, operation);
		let _enter = span.enter();
		match self.fetch_remote(service, operation, tenant_id, user_id).await {
			Ok(creds) => {
				self.cache.write().await.insert(
					key,
					CacheEntry {
						value: creds.clone(),
						expires_at: Instant::now() + self.ttl,
					},
				);
				creds
			},
			Err(e) => {
				tracing::warn!(error = %e, "credential fetch failed, proceeding without credentials");
				CredentialMap::new()
			},
		}
	}

	async fn fetch_remote(
		&self,
		service: &str,
		operation: &str,
		tenant_id: &str,
		user_id: &str,
	) -> anyhow::Result<CredentialMap> {
		let resp = self
			.client
			.get(&self.endpoint)
			.query(&[
				("service", service),
				("operation", operation),
				("tenantId", tenant_id),
				("userId", user_id),
			])
			.send()
			.await?
			.error_for_status()?;
		let CredentialResponse(fields) = resp.json().await?;
		Ok(
			fields
				.into_iter()
				.map(|(k, v)| (k, Credential(SecretString::from(v))))
				.collect(),
		)
	}
}

#[cfg(test)]
mod tests {
	use wiremock::matchers::{method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	use super::*;

	#[tokio::test]
	async fn fetch_populates_cache_and_returns_fields() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/creds"))
			.respond_with(
				ResponseTemplate::new(200).set_body_json(serde_json::json!({"API_KEY": "secret"})),
			)
			.mount(&server)
			.await;
		let injector = CredentialInjector::new(
			reqwest::Client::new(),
			format!("{}/creds", server.uri()),
			Duration::from_secs(60),
		);
		let creds = injector.fetch("search", "web", "tenant-a", "u@x").await;
		assert_eq!(creds.get("API_KEY").unwrap().expose(), "secret");
	}

	#[tokio::test]
	async fn failure_returns_empty_map() {
		let injector = CredentialInjector::new(
			reqwest::Client::new(),
			"http://127.0.0.1:1/no-such-server".into(),
			Duration::from_secs(60),
		);
		let creds = injector.fetch("search", "web", "tenant-a", "u@x").await;
		assert!(creds.is_empty());
	}

	#[test]
	fn debug_never_leaks_the_secret() {
		let cred = Credential(SecretString::from("super-secret".to_string()));
		assert_eq!(format!("{cred:?}"), "Credential(REDACTED)");
	}
}
