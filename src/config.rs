//! The service catalog: what upstream MCP services exist, how to reach
//! them, and which of their tools are exposed. This is read once at startup
//! and can be replaced wholesale by [`Config::reload`] — the gateway itself
//! never writes it back out.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportKind {
	Stdio,
	HttpStream,
	Websocket,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolDefinition {
	pub name: String,
	#[serde(default = "default_true")]
	pub enabled: bool,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default = "default_schema")]
	pub input_schema: serde_json::Value,
}

fn default_true() -> bool {
	true
}

fn default_schema() -> serde_json::Value {
	serde_json::json!({"type": "object", "properties": {}, "required": []})
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServiceDefinition {
	pub name: String,
	#[serde(default)]
	pub display_name: Option<String>,
	pub transport: TransportKind,
	#[serde(default = "default_true")]
	pub enabled: bool,
	#[serde(default)]
	pub command: Option<String>,
	#[serde(default)]
	pub args: Vec<String>,
	#[serde(default)]
	pub endpoint: Option<String>,
	#[serde(default)]
	pub tools: Vec<ToolDefinition>,
	#[serde(default)]
	pub requires_credentials: bool,
}

impl ServiceDefinition {
	pub fn display_name(&self) -> &str {
		self.display_name.as_deref().unwrap_or(&self.name)
	}

	/// Validates that the `(transport, command, endpoint)` triple satisfies
	/// the chosen transport's schema.
	pub fn validate(&self) -> anyhow::Result<()> {
		match self.transport {
			TransportKind::Stdio => {
				if self.command.as_deref().unwrap_or("").is_empty() {
					anyhow::bail!("service '{}': STDIO transport requires a command", self.name);
				}
			},
			TransportKind::HttpStream | TransportKind::Websocket => {
				if self.endpoint.as_deref().unwrap_or("").is_empty() {
					anyhow::bail!(
						"service '{}': {:?} transport requires an endpoint",
						self.name,
						self.transport
					);
				}
			},
		}
		Ok(())
	}

	/// The subset of fields used to detect whether a live upstream session
	/// must be evicted after a config reload.
	pub fn identity_snapshot(&self) -> ServiceIdentity {
		ServiceIdentity {
			transport: self.transport,
			command: self.command.clone(),
			args: self.args.clone(),
			endpoint: self.endpoint.clone(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
	pub transport: TransportKind,
	pub command: Option<String>,
	pub args: Vec<String>,
	pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CatalogFile {
	#[serde(default)]
	pub services: Vec<ServiceDefinition>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
	pub services: HashMap<String, ServiceDefinition>,
}

impl Catalog {
	pub fn from_file(file: CatalogFile) -> anyhow::Result<Self> {
		let mut services = HashMap::new();
		for svc in file.services {
			svc.validate()?;
			if services.insert(svc.name.clone(), svc).is_some() {
				anyhow::bail!("duplicate service name in catalog");
			}
		}
		Ok(Self { services })
	}

	pub fn load(path: &Path) -> anyhow::Result<Self> {
		let raw = std::fs::read_to_string(path)
			.map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
		let file: CatalogFile = serde_yaml::from_str(&raw)
			.map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;
		Self::from_file(file)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn stdio_requires_command() {
		let svc = ServiceDefinition {
			name: "x".into(),
			display_name: None,
			transport: TransportKind::Stdio,
			enabled: true,
			command: None,
			args: vec![],
			endpoint: None,
			tools: vec![],
			requires_credentials: false,
		};
		assert!(svc.validate().is_err());
	}

	#[test]
	fn http_stream_requires_endpoint() {
		let svc = ServiceDefinition {
			name: "x".into(),
			display_name: None,
			transport: TransportKind::HttpStream,
			enabled: true,
			command: None,
			args: vec![],
			endpoint: None,
			tools: vec![],
			requires_credentials: false,
		};
		assert!(svc.validate().is_err());
	}

	#[test]
	fn parses_minimal_catalog() {
		let yaml = r#"
services:
  - name: search
    transport: STDIO
    command: echo-mcp
    tools:
      - name: web
"#;
		let file: CatalogFile = serde_yaml::from_str(yaml).unwrap();
		let catalog = Catalog::from_file(file).unwrap();
		let svc = catalog.services.get("search").unwrap();
		assert_eq!(svc.tools[0].name, "web");
		assert!(svc.tools[0].enabled);
	}
}
