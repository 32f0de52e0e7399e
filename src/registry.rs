//! C3 — Tool Registry.
//!
//! Owns the namespaced view of the service catalog: `list` produces the
//! agent-facing tool list, `resolve` maps a namespaced name back to its
//! `(service, tool)` pair. Reloadable via an atomic snapshot swap so readers
//! never block on a write.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::config::Catalog;

#[derive(Debug, Clone, Serialize)]
pub struct NamespacedTool {
	pub name: String,
	pub description: String,
	#[serde(rename = "inputSchema")]
	pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTool {
	pub service: String,
	pub tool: String,
}

pub struct ToolRegistry {
	snapshot: ArcSwap<Catalog>,
}

impl ToolRegistry {
	pub fn new(catalog: Catalog) -> Self {
		Self {
			snapshot: ArcSwap::from_pointee(catalog),
		}
	}

	pub fn reload(&self, catalog: Catalog) {
		self.snapshot.store(Arc::new(catalog));
	}

	pub fn catalog(&self) -> Arc<Catalog> {
		self.snapshot.load_full()
	}

	/// Lists every tool whose service and tool definitions are both enabled,
	/// namespaced as `service.tool`. `_user_id` is threaded through so a
	/// future authorization-aware listing can filter per user without
	/// changing the call shape; today listing does not vary by user.
	pub fn list(&self, _user_id: &str) -> Vec<NamespacedTool> {
		let catalog = self.snapshot.load();
		let mut out = Vec::new();
		for svc in catalog.services.values() {
			if !svc.enabled {
				continue;
			}
			for tool in &svc.tools {
				if !tool.enabled {
					continue;
				}
				out.push(NamespacedTool {
					name: format!("{}.{}", svc.name, tool.name),
					description: format!(
						"[{}] {}",
						svc.display_name(),
						tool.description.as_deref().unwrap_or("")
					)
					.trim()
					.to_string(),
					input_schema: tool.input_schema.clone(),
				});
			}
		}
		out
	}

	/// Resolves a namespaced name iff it is listed under that exact name,
	/// splitting on the first `.` only (service names must not contain `.`,
	/// tool names may).
	pub fn resolve(&self, namespaced: &str) -> Option<ResolvedTool> {
		let (service, tool) = namespaced.split_once('.')?;
		let catalog = self.snapshot.load();
		let svc = catalog.services.get(service)?;
		if !svc.enabled {
			return None;
		}
		let tool_def = svc.tools.iter().find(|t| t.name == tool)?;
		if !tool_def.enabled {
			return None;
		}
		Some(ResolvedTool {
			service: service.to_string(),
			tool: tool.to_string(),
		})
	}
}
