//! UpstreamFactory and the per-protocol upstream drivers (spec §2(b),
//! §4.8): the factory inspects a [`ServiceRecord`]'s variant tag and
//! returns a driver implementing the uniform capability set `register` /
//! `shutdown`.
//!
//! Grounded on the reference gateway's `Relay`/`UpstreamGroup` split
//! (`mcp/handler.rs`): one driver instance per backend group, shutdown
//! mirroring the `cancel()` cleanup the agentproxy relay example performs
//! on its child-process-backed targets.

pub mod command;
pub mod factory;
pub mod filesystem;
pub mod graphql;
pub mod grpc;
pub mod http;
pub mod mcp;
pub mod openapi;
pub mod retry;
pub mod sql;
pub mod webrtc;
pub mod websocket;

use std::sync::Arc;

use async_trait::async_trait;

use crate::catalog::Catalog;
use crate::config::{sanitize_name, Authentication, ServiceRecord};
use crate::config::{SecretResolver, SecretValue};
use crate::error::GatewayError;
use crate::net::{SafeDialer, SafeHttpClient};
use crate::pool::PoolManager;

pub use factory::UpstreamFactory;

/// Shared dependencies every driver's `register` needs: catalog to
/// register into, the pool registry, SSRF-checked transports, and the
/// secret resolver. Bundled so the driver trait stays a two-method
/// interface instead of growing a parameter per dependency.
pub struct RegisterContext<'a> {
	pub catalog: &'a Catalog,
	pub pools: &'a PoolManager,
	pub http_client: &'a SafeHttpClient,
	pub dialer: &'a SafeDialer,
	pub secrets: &'a SecretResolver,
}

/// What `register` reports back to the loader for logging/diagnostics.
#[derive(Debug, Clone, Default)]
pub struct RegisterOutcome {
	pub service_id: String,
	pub sanitized_name: String,
	pub tools_registered: usize,
	pub resources_registered: usize,
	pub prompts_registered: usize,
}

/// The uniform capability set every protocol-specific driver implements
/// (spec §4.8).
#[async_trait]
pub trait UpstreamDriver: Send + Sync {
	/// Registers this service's tools/resources/prompts into the catalog
	/// (and its pool, if pool-backed, into the pool registry). When
	/// `is_reload` is true, this is an idempotent re-registration: tools
	/// with identical qualified names are replaced, removed tools are
	/// cleared, and pools whose connection parameters changed are rebuilt.
	async fn register(&self, ctx: &RegisterContext<'_>, record: &ServiceRecord, is_reload: bool) -> Result<RegisterOutcome, GatewayError>;

	/// Releases every background task and connection this driver owns.
	async fn shutdown(&self) -> Result<(), GatewayError>;
}

/// Derives a tool's name per spec §4.8: the explicit `name` if present and
/// sanitizer-accepted, otherwise a slug of `description`, otherwise `opN`.
pub fn derive_tool_name(explicit: &Option<String>, description: &Option<String>, index: usize) -> String {
	if let Some(name) = explicit {
		let sanitized = sanitize_name(name);
		if is_acceptable(&sanitized) {
			return sanitized;
		}
	}
	if let Some(desc) = description {
		let slug = sanitize_name(desc);
		if is_acceptable(&slug) {
			return slug;
		}
	}
	format!("op{index}")
}

fn is_acceptable(sanitized: &str) -> bool {
	!sanitized.is_empty() && sanitized != "_"
}

pub fn qualified_name(sanitized_service: &str, item_name: &str) -> String {
	format!("{sanitized_service}.{item_name}")
}

/// Resolves a [`SecretValue`] map (e.g. a command/MCP service's `env`)
/// into plaintext environment variables. Stops and reports the first
/// resolution failure: an upstream that can't build its environment isn't
/// safe to register with a partially-resolved one.
pub fn resolve_env_map(
	resolver: &SecretResolver,
	env: &std::collections::HashMap<String, SecretValue>,
) -> Result<std::collections::HashMap<String, String>, GatewayError> {
	env
		.iter()
		.map(|(k, v)| resolver.resolve(v).map(|resolved| (k.clone(), resolved)).map_err(GatewayError::from))
		.collect()
}

/// A driver whose `shutdown` has nothing to release (no pool, no spawned
/// task) can delegate here.
pub async fn noop_shutdown() -> Result<(), GatewayError> {
	Ok(())
}

/// Resolves `auth` (if present) and applies it to an in-flight request
/// builder. Shared by the HTTP-family call closures and by Doctor's active
/// auth verification (spec §4.10), so both exercise the same credential
/// materialization path and can never disagree about what "authenticated"
/// means for a given service.
pub fn apply_authentication(
	builder: reqwest::RequestBuilder,
	auth: Option<&Authentication>,
	secrets: &SecretResolver,
) -> Result<reqwest::RequestBuilder, GatewayError> {
	let Some(auth) = auth else { return Ok(builder) };
	let builder = match auth {
		Authentication::Bearer { token } => {
			let token = secrets.resolve(token)?;
			builder.bearer_auth(token)
		},
		Authentication::Basic { username, password } => {
			let username = secrets.resolve(username)?;
			let password = secrets.resolve(password)?;
			builder.basic_auth(username, Some(password))
		},
		Authentication::ApiKey { header, value } => {
			let value = secrets.resolve(value)?;
			builder.header(header, value)
		},
	};
	Ok(builder)
}

pub(crate) type DriverArc = Arc<dyn UpstreamDriver>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn derive_tool_name_prefers_explicit() {
		assert_eq!(derive_tool_name(&Some("My Tool".into()), &None, 0), "my_tool");
	}

	#[test]
	fn derive_tool_name_falls_back_to_description_slug() {
		assert_eq!(derive_tool_name(&None, &Some("Fetch Widgets!".into()), 0), "fetch_widgets_");
	}

	#[test]
	fn derive_tool_name_falls_back_to_index() {
		assert_eq!(derive_tool_name(&None, &None, 3), "op3");
	}

	#[test]
	fn qualified_name_joins_with_dot() {
		assert_eq!(qualified_name("svc", "tool"), "svc.tool");
	}
}
