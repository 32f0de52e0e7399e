//! Wires every component into the shared, cloneable handle axum hands to
//! each route. Nothing here owns business logic — it is assembled once in
//! `main` and threaded through as `State<Arc<AppState>>`.

use std::sync::Arc;

use crate::credentials::CredentialInjector;
use crate::dispatch::Dispatcher;
use crate::identity::IdentityVerifier;
use crate::notify::NotificationRouter;
use crate::policy::PolicyGate;
use crate::registry::ToolRegistry;
use crate::settings::Settings;
use crate::transport::{AgentSessionRegistry, SseSessions};
use crate::upstream::UpstreamSessionManager;

pub struct AppState {
	pub settings: Arc<Settings>,
	pub identity: Arc<IdentityVerifier>,
	pub registry: Arc<ToolRegistry>,
	pub policy: Arc<PolicyGate>,
	pub credentials: Arc<CredentialInjector>,
	pub upstream: Arc<UpstreamSessionManager>,
	pub notifications: Arc<NotificationRouter>,
	pub dispatcher: Arc<Dispatcher>,
	pub sessions: Arc<AgentSessionRegistry>,
	pub sse_sessions: Arc<SseSessions>,
}
