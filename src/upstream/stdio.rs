//! STDIO transport factory.
//!
//! Spawns the configured command as a child process and wires its stdin/
//! stdout as newline-delimited JSON-RPC. Credentials are injected either as
//! `-e KEY=VALUE` pairs spliced after a `docker run` launcher, or as plain
//! process environment variables otherwise — a child's environment does not
//! cross the container boundary, so the two cases need different treatment.

use std::process::Stdio;

use rmcp::transport::TokioChildProcess;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::config::ServiceDefinition;
use crate::credentials::CredentialMap;

/// Splits credential injection into CLI flags (for a `docker run` launcher)
/// versus process environment variables (everything else).
fn build_invocation(service: &ServiceDefinition, credentials: &CredentialMap) -> (Vec<String>, Vec<(String, String)>) {
	let mut args = service.args.clone();
	let mut env_vars = Vec::new();

	let is_docker_run = service.command.as_deref() == Some("docker") && args.first().map(String::as_str) == Some("run");

	if is_docker_run {
		let mut insert_at = 1;
		for (key, value) in credentials {
			args.insert(insert_at, "-e".to_string());
			args.insert(insert_at + 1, format!("{key}={}", value.expose()));
			insert_at += 2;
		}
	} else {
		for (key, value) in credentials {
			env_vars.push((key.clone(), value.expose().to_string()));
		}
	}

	(args, env_vars)
}

pub fn spawn(
	service: &ServiceDefinition,
	credentials: &CredentialMap,
) -> anyhow::Result<TokioChildProcess> {
	let command = service
		.command
		.as_deref()
		.ok_or_else(|| anyhow::anyhow!("service '{}' has no STDIO command", service.name))?;

	let (args, env_vars) = build_invocation(service, credentials);

	let mut cmd = Command::new(command);
	cmd.args(&args).envs(env_vars).stdin(Stdio::piped()).stdout(Stdio::piped());

	let (transport, stderr) = TokioChildProcess::builder(cmd)
		.stderr(Stdio::piped())
		.spawn()
		.map_err(|e| anyhow::anyhow!("failed to spawn '{}': {e}", command))?;

	if let Some(stderr) = stderr {
		let prefix = service.name.clone();
		tokio::spawn(async move {
			let mut lines = BufReader::new(stderr).lines();
			loop {
				match lines.next_line().await {
					Ok(Some(line)) => tracing::info!(service = %prefix, "{line}"),
					Ok(None) => break,
					Err(e) => {
						tracing::warn!(service = %prefix, error = %e, "stderr pipe closed");
						break;
					},
				}
			}
		});
	}

	Ok(transport)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::TransportKind;
	use crate::credentials::Credential;

	fn service(command: &str, args: &[&str]) -> ServiceDefinition {
		ServiceDefinition {
			name: "search".into(),
			display_name: None,
			transport: TransportKind::Stdio,
			enabled: true,
			command: Some(command.to_string()),
			args: args.iter().map(|s| s.to_string()).collect(),
			endpoint: None,
			tools: vec![],
			requires_credentials: true,
		}
	}

	fn credentials(pairs: &[(&str, &str)]) -> CredentialMap {
		pairs
			.iter()
			.map(|(k, v)| (k.to_string(), Credential::from_plain(v.to_string())))
			.collect()
	}

	#[test]
	fn docker_run_splices_env_flags_after_run_token() {
		let svc = service("docker", &["run", "--rm", "myimage"]);
		let creds = credentials(&[("API_KEY", "secret")]);
		let (args, env_vars) = build_invocation(&svc, &creds);
		assert_eq!(args, vec!["run", "-e", "API_KEY=secret", "--rm", "myimage"]);
		assert!(env_vars.is_empty());
	}

	#[test]
	fn non_docker_command_uses_process_environment() {
		let svc = service("echo-mcp", &["--flag"]);
		let creds = credentials(&[("API_KEY", "secret")]);
		let (args, env_vars) = build_invocation(&svc, &creds);
		assert_eq!(args, vec!["--flag"]);
		assert_eq!(env_vars, vec![("API_KEY".to_string(), "secret".to_string())]);
	}

	#[test]
	fn docker_without_run_subcommand_uses_environment() {
		let svc = service("docker", &["exec", "container"]);
		let creds = credentials(&[("API_KEY", "secret")]);
		let (args, env_vars) = build_invocation(&svc, &creds);
		assert_eq!(args, vec!["exec", "container"]);
		assert_eq!(env_vars, vec![("API_KEY".to_string(), "secret".to_string())]);
	}
}
