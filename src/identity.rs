//! C1 — Identity Verifier.
//!
//! Validates a bearer token against the external OIDC provider's published
//! JWKS. Keys are cached for 24h and refetched on-demand when a token names
//! an unknown `kid`, rate-limited to at most 10 refetches/minute so a flood
//! of tokens signed by a rotated-out key can't turn into a JWKS hot loop.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, TokenData, Validation, decode, decode_header};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::ProxyError;

const JWKS_TTL: Duration = Duration::from_secs(24 * 3600);
const MAX_REFETCHES_PER_MINUTE: u32 = 10;

#[derive(Clone)]
struct Key {
	decoding: DecodingKey,
	algorithm: Algorithm,
}

#[derive(Default)]
struct KeySet {
	keys: HashMap<String, Key>,
	fetched_at: Option<Instant>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
	pub sub: String,
	pub iss: String,
	#[serde(default)]
	pub tenant_id: Option<String>,
	#[serde(flatten)]
	pub extra: serde_json::Map<String, serde_json::Value>,
}

struct RateLimiter {
	window_start: Instant,
	count: u32,
}

impl RateLimiter {
	fn new() -> Self {
		Self {
			window_start: Instant::now(),
			count: 0,
		}
	}

	fn try_acquire(&mut self) -> bool {
		if self.window_start.elapsed() >= Duration::from_secs(60) {
			self.window_start = Instant::now();
			self.count = 0;
		}
		if self.count >= MAX_REFETCHES_PER_MINUTE {
			return false;
		}
		self.count += 1;
		true
	}
}

pub struct IdentityVerifier {
	client: reqwest::Client,
	jwks_uri: String,
	issuer: String,
	keys: ArcSwap<KeySet>,
	refetch_limiter: Mutex<RateLimiter>,
}

impl IdentityVerifier {
	pub fn new(client: reqwest::Client, jwks_uri: String, issuer: String) -> Self {
		Self {
			client,
			jwks_uri,
			issuer,
			keys: ArcSwap::from_pointee(KeySet::default()),
			refetch_limiter: Mutex::new(RateLimiter::new()),
		}
	}

	/// Validates `token` and returns its subject. Callers decide where the
	/// raw token comes from (Authorization header for most ingress, the
	/// `token` query parameter for `/sse` only).
	pub async fn verify(&self, token: &str) -> Result<Claims, ProxyError> {
		let header = decode_header(token).map_err(|_| ProxyError::InvalidSignature)?;
		let kid = header.kid.ok_or(ProxyError::InvalidSignature)?;

		let mut key = self.find_key(&kid);
		if key.is_none() {
			self.maybe_refresh(&kid).await;
			key = self.find_key(&kid);
		}
		let Key { decoding, algorithm } = key.ok_or(ProxyError::InvalidSignature)?;

		let mut validation = Validation::new(algorithm);
		validation.set_issuer(&[&self.issuer]);
		validation.leeway = 5;

		let data: TokenData<Claims> =
			decode(token, &decoding, &validation).map_err(|e| classify(&e))?;
		if data.claims.iss != self.issuer {
			return Err(ProxyError::IssuerMismatch);
		}
		Ok(data.claims)
	}

	fn find_key(&self, kid: &str) -> Option<Key> {
		let snapshot = self.keys.load();
		let fresh = snapshot
			.fetched_at
			.is_some_and(|t| t.elapsed() < JWKS_TTL);
		if !fresh {
			return None;
		}
		snapshot.keys.get(kid).cloned()
	}

	async fn maybe_refresh(&self, kid: &str) {
		let mut limiter = self.refetch_limiter.lock().await;
		let stale = self
			.keys
			.load()
			.fetched_at
			.is_none_or(|t| t.elapsed() >= JWKS_TTL);
		let has_key = self.keys.load().keys.contains_key(kid);
		if has_key && !stale {
			return;
		}
		if !limiter.try_acquire() {
			tracing::debug!("jwks refetch rate-limited, serving stale keys");
			return;
		}
		drop(limiter);
		if let Err(e) = self.refresh().await {
			tracing::warn!(error = %e, "failed to refresh jwks");
		}
	}

	pub async fn refresh(&self) -> anyhow::Result<()> {
		let jwks: JwkSet = self
			.client
			.get(&self.jwks_uri)
			.send()
			.await?
			.error_for_status()?
			.json()
			.await?;

		let mut keys = HashMap::new();
		for jwk in jwks.keys {
			let Some(kid) = jwk.common.key_id.clone() else {
				continue;
			};
			let decoding = match &jwk.algorithm {
				AlgorithmParameters::RSA(rsa) => {
					DecodingKey::from_rsa_components(&rsa.n, &rsa.e)?
				},
				AlgorithmParameters::EllipticCurve(ec) => {
					DecodingKey::from_ec_components(&ec.x, &ec.y)?
				},
				_ => continue,
			};
			let algorithm = jwk
				.common
				.key_algorithm
				.and_then(|a| Algorithm::from_str(a.to_string().as_str()).ok())
				.unwrap_or(Algorithm::RS256);
			keys.insert(kid, Key { decoding, algorithm });
		}
		self.keys.store(Arc::new(KeySet {
			keys,
			fetched_at: Some(Instant::now()),
		}));
		Ok(())
	}
}

fn classify(e: &jsonwebtoken::errors::Error) -> ProxyError {
	use jsonwebtoken::errors::ErrorKind;
	match e.kind() {
		ErrorKind::ExpiredSignature => ProxyError::Expired,
		ErrorKind::InvalidIssuer => ProxyError::IssuerMismatch,
		_ => ProxyError::InvalidSignature,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn unknown_kid_without_network_is_rejected() {
		let verifier = IdentityVerifier::new(
			reqwest::Client::new(),
			"http://localhost:1/nonexistent".into(),
			"http://issuer".into(),
		);
		let err = verifier.verify("not-a-jwt").await.unwrap_err();
		assert!(matches!(err, ProxyError::InvalidSignature));
	}

	#[test]
	fn rate_limiter_caps_within_window() {
		let mut limiter = RateLimiter::new();
		for _ in 0..MAX_REFETCHES_PER_MINUTE {
			assert!(limiter.try_acquire());
		}
		assert!(!limiter.try_acquire());
	}
}
