//! Core of a multi-protocol tool gateway: the Configuration Plane, the
//! Upstream Registry & Lifecycle, the Tool/Prompt/Resource Catalog, and
//! Diagnostics & Safe I/O (spec §2).
//!
//! This crate is the engine; it exposes no caller-facing transport of its
//! own (no HTTP/MCP server loop) — a binary embedding it is responsible for
//! wiring `ConfigStore`/`Catalog`/`UpstreamFactory` together and exposing
//! them over whatever protocol its callers speak.

pub mod catalog;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod lint;
pub mod net;
pub mod pool;
pub mod trace;
pub mod upstream;

pub use catalog::Catalog;
pub use config::{ConfigDocument, ConfigStore, ConfigValidator, ConfigWatcher, SecretResolver};
pub use diagnostics::Doctor;
pub use error::GatewayError;
pub use pool::PoolManager;
pub use upstream::UpstreamFactory;

use tracing_subscriber::{fmt, EnvFilter};

/// Installs `ring` as the process-wide default `rustls` crypto provider.
///
/// `reqwest`'s `rustls-tls` feature and `tokio-tungstenite`'s
/// `rustls-tls-webpki-roots` feature each select a provider independently;
/// without an explicit install the first TLS handshake across either path
/// panics if their defaults disagree. Call once before registering any
/// `https://`/`wss://` upstream. Safe to call more than once.
pub fn install_default_tls_provider() {
	let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Initializes the global `tracing` subscriber from `RUST_LOG`/`MCPANY_LOG`
/// (first one set wins; `info` if neither is), emitting JSON records when
/// `MCPANY_LOG_FORMAT=json`, text otherwise. Ambient logging configuration,
/// not part of the declarative config document — read once, here.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_tracing() {
	let filter = std::env::var("MCPANY_LOG")
		.or_else(|_| std::env::var("RUST_LOG"))
		.unwrap_or_else(|_| "info".to_string());
	let env_filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));

	let json = std::env::var("MCPANY_LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false);

	let subscriber = fmt().with_env_filter(env_filter).with_target(true);
	let result = if json {
		subscriber.json().try_init()
	} else {
		subscriber.try_init()
	};
	if let Err(e) = result {
		// A subscriber is already installed (e.g. a second call, or a test
		// harness that set one up); not an error condition worth surfacing.
		tracing::trace!("tracing subscriber already initialized: {e}");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn init_tracing_is_idempotent() {
		init_tracing();
		init_tracing();
	}

	#[test]
	fn install_default_tls_provider_is_idempotent() {
		install_default_tls_provider();
		install_default_tls_provider();
	}
}
