//! Doctor: per-service reachability and active auth verification (spec
//! §4.10).
//!
//! Checks run in parallel across services (`futures::future::join_all`,
//! the same fan-out idiom the agentproxy relay example uses to gather its
//! per-connection `list_resources` results), each bounded by its own 5 s
//! context timeout so one hung service cannot stall the batch (spec P8).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{redact_dsn, Authentication, ConfigDocument, SecretResolver, ServiceRecord, ServiceVariant};
use crate::error::{AuthError, GatewayError};
use crate::net::{SafeDialer, SafeHttpClient};
use crate::upstream::apply_authentication;

const PER_SERVICE_TIMEOUT: Duration = Duration::from_secs(5);

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type FixFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), GatewayError>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
	Ok,
	Warning,
	Error,
	Skipped,
}

#[derive(Clone)]
pub struct CheckResult {
	pub service: String,
	pub status: CheckStatus,
	pub message: String,
	pub error: Option<String>,
	pub fix: Option<FixFn>,
}

impl std::fmt::Debug for CheckResult {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CheckResult")
			.field("service", &self.service)
			.field("status", &self.status)
			.field("message", &self.message)
			.field("error", &self.error)
			.field("has_fix", &self.fix.is_some())
			.finish()
	}
}

impl CheckResult {
	fn ok(service: &str, message: impl Into<String>) -> Self {
		Self {
			service: service.to_string(),
			status: CheckStatus::Ok,
			message: message.into(),
			error: None,
			fix: None,
		}
	}

	fn warning(service: &str, message: impl Into<String>) -> Self {
		Self {
			service: service.to_string(),
			status: CheckStatus::Warning,
			message: message.into(),
			error: None,
			fix: None,
		}
	}

	fn error(service: &str, message: impl Into<String>, error: impl Into<String>) -> Self {
		Self {
			service: service.to_string(),
			status: CheckStatus::Error,
			message: message.into(),
			error: Some(redact_dsn(&error.into())),
			fix: None,
		}
	}

	fn skipped(service: &str, message: impl Into<String>) -> Self {
		Self {
			service: service.to_string(),
			status: CheckStatus::Skipped,
			message: message.into(),
			error: None,
			fix: None,
		}
	}
}

/// Runs reachability and active-auth checks over every (non-disabled)
/// service in `doc`, in parallel, preserving configuration order in the
/// returned vector.
pub struct Doctor<'a> {
	pub http_client: &'a SafeHttpClient,
	pub dialer: &'a SafeDialer,
	pub secrets: &'a SecretResolver,
}

impl<'a> Doctor<'a> {
	pub async fn run(&self, doc: &ConfigDocument) -> Vec<CheckResult> {
		let checks = doc.upstream_services.iter().filter(|s| !s.disable).map(|record| {
			let fut = self.check_service(record);
			async move {
				match tokio::time::timeout(PER_SERVICE_TIMEOUT, fut).await {
					Ok(result) => result,
					Err(_) => CheckResult::error(&record.name, "diagnostic check timed out", "context deadline exceeded"),
				}
			}
		});
		futures::future::join_all(checks).await
	}

	async fn check_service(&self, record: &ServiceRecord) -> CheckResult {
		let base = match &record.variant {
			ServiceVariant::Http(svc) => self.check_http(&record.name, &svc.base_url, svc.health_check.as_ref(), record.upstream_auth.as_ref()).await,
			ServiceVariant::Graphql(svc) => self.check_http(&record.name, &svc.base_url, svc.health_check.as_ref(), record.upstream_auth.as_ref()).await,
			ServiceVariant::Openapi(svc) => self.check_http(&record.name, &svc.base_url, svc.health_check.as_ref(), record.upstream_auth.as_ref()).await,
			ServiceVariant::Vector(svc) => self.check_http(&record.name, &svc.endpoint, None, record.upstream_auth.as_ref()).await,
			ServiceVariant::Webrtc(svc) => self.check_tcp(&record.name, &svc.signaling_url).await,
			ServiceVariant::Grpc(svc) => self.check_tcp(&record.name, &svc.endpoint).await,
			ServiceVariant::Websocket(svc) => self.check_tcp(&record.name, &svc.url).await,
			ServiceVariant::Sql(svc) => self.check_sql(&record.name, svc).await,
			ServiceVariant::Mcp(svc) => self.check_command(&record.name, &svc.command),
			ServiceVariant::CommandLine(svc) => {
				if svc.local {
					CheckResult::skipped(&record.name, "local command, PATH resolution not applicable")
				} else {
					self.check_command(&record.name, &svc.command)
				}
			},
			ServiceVariant::Filesystem(svc) => self.check_filesystem(&record.name, svc),
		};
		base
	}

	async fn check_http(
		&self,
		service: &str,
		base_url: &str,
		health_check: Option<&crate::config::HealthCheck>,
		auth: Option<&Authentication>,
	) -> CheckResult {
		let (url, method, expected_code) = match health_check {
			Some(hc) => (hc.url.clone(), hc.method.clone(), hc.expected_code),
			None => (base_url.to_string(), "HEAD".to_string(), 200),
		};

		let parsed = match url::Url::parse(&url) {
			Ok(u) => u,
			Err(e) => return CheckResult::error(service, "failed to parse service url", e.to_string()),
		};
		let Some(host) = parsed.host_str() else {
			return CheckResult::error(service, "service url has no host", "missing host");
		};
		let port = parsed.port_or_known_default().unwrap_or(80);

		if let Err(e) = self.dialer.check_destination(host, port).await {
			return CheckResult::error(service, "ssrf policy or dns check failed", e.to_string());
		}

		let http_method = reqwest::Method::from_bytes(method.as_bytes()).unwrap_or(reqwest::Method::HEAD);
		let mut request = self.http_client.inner().request(http_method.clone(), &url);
		request = match apply_authentication(request, auth, self.secrets) {
			Ok(r) => r,
			Err(e) => return CheckResult::error(service, "failed to resolve upstreamAuth credentials", e.to_string()),
		};

		let response = match request.send().await {
			Ok(r) => r,
			Err(e) => return CheckResult::error(service, "transport error contacting service", e.to_string()),
		};

		let status = response.status();
		// A HEAD that the server rejects with 405 is retried as GET, since
		// some services only implement GET (spec §4.10).
		let status = if status.as_u16() == 405 && http_method == reqwest::Method::HEAD {
			match self.http_client.inner().get(&url).send().await {
				Ok(r) => r.status(),
				Err(e) => return CheckResult::error(service, "transport error contacting service", e.to_string()),
			}
		} else {
			status
		};

		if auth.is_some() {
			return interpret_authenticated_status(service, status.as_u16());
		}

		if status.as_u16() == expected_code || status.is_success() {
			CheckResult::ok(service, format!("reachable, {} {}", status.as_u16(), status.as_str()))
		} else {
			CheckResult::warning(service, format!("unexpected status {}", status.as_u16()))
		}
	}

	async fn check_tcp(&self, service: &str, target_url: &str) -> CheckResult {
		let parsed = match url::Url::parse(target_url) {
			Ok(u) => u,
			Err(e) => return CheckResult::error(service, "failed to parse service url", e.to_string()),
		};
		let Some(host) = parsed.host_str() else {
			return CheckResult::error(service, "service url has no host", "missing host");
		};
		let default_port = match parsed.scheme() {
			"https" | "wss" | "grpcs" => 443,
			_ => 80,
		};
		let port = parsed.port_or_known_default().unwrap_or(default_port);

		match self.dialer.connect(host, port).await {
			Ok(_) => CheckResult::ok(service, format!("tcp connect to {host}:{port} succeeded")),
			Err(e) => CheckResult::error(service, "tcp connect failed", e.to_string()),
		}
	}

	async fn check_sql(&self, service: &str, svc: &crate::config::SqlService) -> CheckResult {
		let dsn = match self.secrets.resolve(&svc.dsn) {
			Ok(dsn) => dsn,
			Err(e) => return CheckResult::error(service, "failed to resolve dsn", e.to_string()),
		};

		if dsn.contains("${") {
			return CheckResult::warning(service, "dsn contains an unresolved ${...} placeholder");
		}

		sqlx::any::install_default_drivers();
		match sqlx::any::AnyPoolOptions::new().max_connections(1).connect(&dsn).await {
			Ok(pool) => match sqlx::query("SELECT 1").execute(&pool).await {
				Ok(_) => {
					pool.close().await;
					CheckResult::ok(service, "connected and responded to ping")
				},
				Err(e) => CheckResult::error(service, "ping failed", e.to_string()),
			},
			Err(e) => CheckResult::error(service, "failed to open database connection", e.to_string()),
		}
	}

	fn check_command(&self, service: &str, command: &str) -> CheckResult {
		match which::which(command) {
			Ok(path) => CheckResult::ok(service, format!("resolved to {}", path.display())),
			Err(e) => CheckResult::error(service, format!("command '{command}' is not resolvable on PATH"), e.to_string()),
		}
	}

	fn check_filesystem(&self, service: &str, svc: &crate::config::FilesystemService) -> CheckResult {
		for (name, path) in &svc.root_paths {
			let expanded = shellexpand::tilde(path).into_owned();
			if !std::path::Path::new(&expanded).is_dir() {
				let path_owned = expanded;
				let mut result = CheckResult::error(service, format!("root '{name}' ({path}) does not exist"), "not found");
				result.fix = Some(Arc::new(move || {
					let path = path_owned.clone();
					Box::pin(async move {
						tokio::fs::create_dir_all(&path).await.map_err(|e| GatewayError::Fatal(e.to_string()))
					})
				}));
				return result;
			}
		}
		CheckResult::ok(service, "all declared root paths exist")
	}
}

fn interpret_authenticated_status(service: &str, status: u16) -> CheckResult {
	match status {
		200..=299 => CheckResult::ok(service, format!("authenticated request succeeded ({status})")),
		401 => CheckResult::error(service, AuthError::Rejected.to_string(), "401 unauthorized"),
		400..=499 => CheckResult::warning(service, format!("upstream returned {status}")),
		500..=599 => CheckResult::error(service, format!("upstream returned {status}"), format!("server error {status}")),
		other => CheckResult::warning(service, format!("unexpected status {other}")),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn p_auth_2xx_is_ok() {
		let result = interpret_authenticated_status("svc", 204);
		assert_eq!(result.status, CheckStatus::Ok);
	}

	#[test]
	fn p_auth_401_is_error() {
		let result = interpret_authenticated_status("svc", 401);
		assert_eq!(result.status, CheckStatus::Error);
	}

	#[test]
	fn p_auth_other_4xx_is_warning() {
		let result = interpret_authenticated_status("svc", 403);
		assert_eq!(result.status, CheckStatus::Warning);
	}

	#[test]
	fn p_auth_5xx_is_error() {
		let result = interpret_authenticated_status("svc", 503);
		assert_eq!(result.status, CheckStatus::Error);
	}
}
