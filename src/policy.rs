//! C4 — Policy Gate.
//!
//! One call to the external policy engine per `tools/call`. Any failure to
//! get a definitive answer — transport error, timeout, bad body — is
//! treated as a denial (fail-closed), never as "allow".

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
	Allowed,
	Denied { reason: String },
	Unavailable,
}

#[derive(Debug, Serialize)]
struct PolicyRequest<'a> {
	service: &'a str,
	tool: &'a str,
	#[serde(rename = "userId")]
	user_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct PolicyResponse {
	allowed: bool,
	#[serde(default)]
	reason: String,
}

pub struct PolicyGate {
	client: reqwest::Client,
	endpoint: String,
	timeout: Duration,
}

impl PolicyGate {
	pub fn new(client: reqwest::Client, endpoint: String, timeout: Duration) -> Self {
		Self {
			client,
			endpoint,
			timeout,
		}
	}

	/// Invokes the policy engine with `(service, tool, userId)`. Only called
	/// for `tools/call` — `initialize`, `tools/list`, `ping`, and
	/// `notifications/*` bypass the gate entirely.
	pub async fn check(&self, service: &str, tool: &str, user_id: &str) -> Decision {
		let req = self.client
			.post(&self.endpoint)
			.json(&PolicyRequest { service, tool, user_id })
			.timeout(self.timeout)
			.send();

		let resp = match req.await {
			Ok(r) => r,
			Err(e) => {
				tracing::warn!(error = %e, service, tool, "policy engine unreachable, denying");
				return Decision::Unavailable;
			},
		};

		if !resp.status().is_success() {
			tracing::warn!(status = %resp.status(), "policy engine returned error status, denying");
			return Decision::Unavailable;
		}

		match resp.json::<PolicyResponse>().await {
			Ok(PolicyResponse { allowed: true, .. }) => Decision::Allowed,
			Ok(PolicyResponse { allowed: false, reason }) => Decision::Denied {
				reason: if reason.is_empty() {
					"not permitted".to_string()
				} else {
					reason
				},
			},
			Err(e) => {
				tracing::warn!(error = %e, "policy engine response unparseable, denying");
				Decision::Unavailable
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use wiremock::matchers::{method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	use super::*;

	#[tokio::test]
	async fn allow_decision() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/v1/allow"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"allowed": true})))
			.mount(&server)
			.await;
		let gate = PolicyGate::new(
			reqwest::Client::new(),
			format!("{}/v1/allow", server.uri()),
			Duration::from_secs(2),
		);
		assert_eq!(
			gate.check("search", "web", "u@x").await,
			Decision::Allowed
		);
	}

	#[tokio::test]
	async fn deny_decision_carries_reason() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/v1/allow"))
			.respond_with(ResponseTemplate::new(200).set_body_json(
				serde_json::json!({"allowed": false, "reason": "not permitted"}),
			))
			.mount(&server)
			.await;
		let gate = PolicyGate::new(
			reqwest::Client::new(),
			format!("{}/v1/allow", server.uri()),
			Duration::from_secs(2),
		);
		assert_eq!(
			gate.check("search", "web", "u@x").await,
			Decision::Denied { reason: "not permitted".into() }
		);
	}

	#[tokio::test]
	async fn transport_error_fails_closed() {
		let gate = PolicyGate::new(
			reqwest::Client::new(),
			"http://127.0.0.1:1/no-such-server".into(),
			Duration::from_millis(200),
		);
		assert_eq!(gate.check("search", "web", "u@x").await, Decision::Unavailable);
	}

	#[tokio::test]
	async fn unparseable_body_fails_closed() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/v1/allow"))
			.respond_with(ResponseTemplate::new(200).set_body_string("not json"))
			.mount(&server)
			.await;
		let gate = PolicyGate::new(
			reqwest::Client::new(),
			format!("{}/v1/allow", server.uri()),
			Duration::from_secs(2),
		);
		assert_eq!(gate.check("search", "web", "u@x").await, Decision::Unavailable);
	}
}
