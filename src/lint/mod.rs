//! Linter: a pure function over a validated config that flags risky-but-
//! not-fatal patterns (spec §4.11).
//!
//! Grounded on the reference gateway's `RegistryValidator` aggregate-error
//! shape (`mcp/registry/validation.rs`) — one check per concern, all
//! findings collected rather than short-circuited — extended with a
//! [`Severity`] the validator itself doesn't need.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::{Authentication, ConfigDocument, ConfigValidator, Profile, ServiceVariant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
	Info,
	Warning,
	Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LintResult {
	pub severity: Severity,
	pub service_name: String,
	pub path: String,
	pub message: String,
}

impl LintResult {
	fn new(severity: Severity, service_name: impl Into<String>, path: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			severity,
			service_name: service_name.into(),
			path: path.into(),
			message: message.into(),
		}
	}
}

/// Runs every lint check against `doc` under the given validation
/// `profile` and returns every finding (ERROR, WARNING, and INFO) in
/// configuration order. Never mutates `doc`.
pub fn lint(doc: &ConfigDocument, profile: Profile) -> Vec<LintResult> {
	let mut results = Vec::new();

	for err in ConfigValidator::new(profile).validate(doc) {
		results.push(LintResult::new(Severity::Error, err.service_name.clone(), err.path.clone(), err.err.clone()));
	}

	let mut seen_unqualified = std::collections::HashMap::<String, String>::new();

	for svc in &doc.upstream_services {
		if svc.disable {
			continue;
		}
		lint_plaintext_secrets(svc, &mut results);
		lint_insecure_urls(svc, &mut results);
		lint_shell_invocation(svc, &mut results);
		lint_openai_key_shaped_tokens(svc, &mut results);
		lint_cache_ttl_zero(svc, &mut results);
		lint_cross_service_name_collisions(svc, &mut seen_unqualified, &mut results);
	}

	results
}

fn lint_plaintext_secrets(svc: &crate::config::ServiceRecord, results: &mut Vec<LintResult>) {
	let Some(auth) = &svc.upstream_auth else { return };
	let mut check = |path: &str, secret: &crate::config::SecretValue| {
		if secret.plain_text.is_some() {
			results.push(LintResult::new(
				Severity::Warning,
				&svc.name,
				path,
				"secret is configured as plaintext; prefer environmentVariable or filePath",
			));
		}
	};
	match auth {
		Authentication::Bearer { token } => check("upstreamAuth.token", token),
		Authentication::Basic { username, password } => {
			check("upstreamAuth.username", username);
			check("upstreamAuth.password", password);
		},
		Authentication::ApiKey { value, .. } => check("upstreamAuth.value", value),
	}
}

fn is_localhost(host: &str) -> bool {
	host == "localhost" || host == "127.0.0.1" || host == "::1" || host.ends_with(".localhost")
}

fn lint_insecure_urls(svc: &crate::config::ServiceRecord, results: &mut Vec<LintResult>) {
	let mut check = |path: &str, url: &str| {
		let Some(rest) = url.strip_prefix("http://") else { return };
		let host = rest.split(['/', ':']).next().unwrap_or("");
		if !is_localhost(host) {
			results.push(LintResult::new(
				Severity::Warning,
				&svc.name,
				path,
				format!("'{url}' uses insecure http:// on a non-localhost host"),
			));
		}
	};

	match &svc.variant {
		ServiceVariant::Http(s) => check("baseUrl", &s.base_url),
		ServiceVariant::Graphql(s) => check("baseUrl", &s.base_url),
		ServiceVariant::Openapi(s) => check("baseUrl", &s.base_url),
		ServiceVariant::Websocket(s) => check("url", &s.url),
		ServiceVariant::Webrtc(s) => check("signalingUrl", &s.signaling_url),
		ServiceVariant::Vector(s) => check("endpoint", &s.endpoint),
		_ => {},
	}
}

const SHELL_INVOCATION_PATTERNS: &[&str] = &["sh -c", "bash -c", "cmd /c", "powershell -c"];

fn lint_shell_invocation(svc: &crate::config::ServiceRecord, results: &mut Vec<LintResult>) {
	let mut check = |path: &str, text: &str| {
		for pattern in SHELL_INVOCATION_PATTERNS {
			if text.contains(pattern) {
				results.push(LintResult::new(
					Severity::Warning,
					&svc.name,
					path,
					format!("command invokes a shell via '{pattern}'; arguments should be passed directly instead"),
				));
			}
		}
	};

	match &svc.variant {
		ServiceVariant::CommandLine(cmd) => {
			check("command", &cmd.command);
			for call in cmd.calls.values() {
				check("calls.*.args", &call.args.join(" "));
			}
		},
		ServiceVariant::Mcp(mcp) => {
			check("command", &mcp.command);
			check("args", &mcp.args.join(" "));
		},
		_ => {},
	}
}

fn openai_key_pattern() -> &'static Regex {
	static RE: OnceLock<Regex> = OnceLock::new();
	RE.get_or_init(|| Regex::new(r"sk-[A-Za-z0-9]{20,}").expect("static pattern is valid"))
}

fn lint_openai_key_shaped_tokens(svc: &crate::config::ServiceRecord, results: &mut Vec<LintResult>) {
	let mut check = |path: &str, url: &str| {
		if openai_key_pattern().is_match(url) {
			results.push(LintResult::new(
				Severity::Warning,
				&svc.name,
				path,
				"url appears to embed an OpenAI-key-shaped token",
			));
		}
	};

	match &svc.variant {
		ServiceVariant::Http(s) => check("baseUrl", &s.base_url),
		ServiceVariant::Graphql(s) => check("baseUrl", &s.base_url),
		ServiceVariant::Openapi(s) => check("baseUrl", &s.base_url),
		ServiceVariant::Grpc(s) => check("endpoint", &s.endpoint),
		ServiceVariant::Websocket(s) => check("url", &s.url),
		ServiceVariant::Webrtc(s) => check("signalingUrl", &s.signaling_url),
		ServiceVariant::Vector(s) => check("endpoint", &s.endpoint),
		_ => {},
	}
}

fn lint_cache_ttl_zero(svc: &crate::config::ServiceRecord, results: &mut Vec<LintResult>) {
	if svc.cache == Some(std::time::Duration::ZERO) {
		results.push(LintResult::new(
			Severity::Info,
			&svc.name,
			"cache",
			"cache TTL is explicitly zero; every call bypasses the cache",
		));
	}
}

/// Advisory-only tracking of unqualified tool/resource/prompt names across
/// services: the Catalog itself never collides (qualified names are
/// namespaced by service), but operators may want to know when two
/// services expose the same short name (Open Question (a) in spec §9).
fn lint_cross_service_name_collisions(
	svc: &crate::config::ServiceRecord,
	seen: &mut std::collections::HashMap<String, String>,
	results: &mut Vec<LintResult>,
) {
	for item_name in item_names(svc) {
		if let Some(other_service) = seen.get(&item_name) {
			if other_service != &svc.name {
				results.push(LintResult::new(
					Severity::Warning,
					&svc.name,
					"tools",
					format!(
						"item name '{item_name}' is also exposed by service '{other_service}'; qualified names stay distinct but callers may find this confusing"
					),
				));
			}
		} else {
			seen.insert(item_name, svc.name.clone());
		}
	}
}

fn item_names(svc: &crate::config::ServiceRecord) -> Vec<String> {
	let tools: &[crate::config::ToolDefinition] = match &svc.variant {
		ServiceVariant::Http(s) => &s.tools,
		ServiceVariant::Graphql(s) => &s.tools,
		ServiceVariant::Openapi(s) => &s.tools,
		ServiceVariant::Grpc(s) => &s.tools,
		ServiceVariant::Websocket(s) => &s.tools,
		ServiceVariant::Webrtc(s) => &s.tools,
		ServiceVariant::Sql(s) => &s.tools,
		ServiceVariant::Mcp(s) => &s.tools,
		ServiceVariant::CommandLine(s) => &s.tools,
		ServiceVariant::Filesystem(s) => &s.tools,
		ServiceVariant::Vector(s) => &s.tools,
	};
	tools
		.iter()
		.filter(|t| !t.disable)
		.map(|t| t.name.clone().unwrap_or_else(|| t.call_id.clone()))
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::*;
	use std::collections::HashMap;

	fn service(name: &str, variant: ServiceVariant) -> ServiceRecord {
		ServiceRecord {
			name: name.to_string(),
			variant,
			disable: false,
			config_error: None,
			upstream_auth: None,
			cache: None,
			call_policies: vec![],
			id: None,
			sanitized_name: None,
		}
	}

	#[test]
	fn warns_on_plaintext_bearer_token() {
		let mut svc = service("svc", ServiceVariant::Http(HttpService::default()));
		svc.upstream_auth = Some(Authentication::Bearer {
			token: SecretValue::plain("hunter2"),
		});
		let doc = ConfigDocument {
			global_settings: GlobalSettings::default(),
			upstream_services: vec![svc],
		};
		let results = lint(&doc, Profile::Client);
		assert!(results.iter().any(|r| r.severity == Severity::Warning && r.message.contains("plaintext")));
	}

	#[test]
	fn warns_on_insecure_http_non_localhost() {
		let mut http = HttpService::default();
		http.base_url = "http://example.com".into();
		let doc = ConfigDocument {
			global_settings: GlobalSettings::default(),
			upstream_services: vec![service("svc", ServiceVariant::Http(http))],
		};
		let results = lint(&doc, Profile::Client);
		assert!(results
			.iter()
			.any(|r| r.severity == Severity::Warning && r.message.contains("insecure http://")));
	}

	#[test]
	fn does_not_warn_on_localhost_http() {
		let mut http = HttpService::default();
		http.base_url = "http://localhost:8080".into();
		let doc = ConfigDocument {
			global_settings: GlobalSettings::default(),
			upstream_services: vec![service("svc", ServiceVariant::Http(http))],
		};
		let results = lint(&doc, Profile::Client);
		assert!(!results.iter().any(|r| r.message.contains("insecure http://")));
	}

	#[test]
	fn warns_on_shell_invocation_pattern() {
		let cmd = CommandLineService {
			command: "sh -c".into(),
			env: HashMap::new(),
			tools: vec![],
			calls: HashMap::new(),
			local: false,
		};
		let doc = ConfigDocument {
			global_settings: GlobalSettings::default(),
			upstream_services: vec![service("svc", ServiceVariant::CommandLine(cmd))],
		};
		let results = lint(&doc, Profile::Client);
		assert!(results.iter().any(|r| r.message.contains("invokes a shell")));
	}

	#[test]
	fn info_on_cache_ttl_zero() {
		let mut svc = service("svc", ServiceVariant::Http(HttpService::default()));
		svc.cache = Some(std::time::Duration::ZERO);
		let doc = ConfigDocument {
			global_settings: GlobalSettings::default(),
			upstream_services: vec![svc],
		};
		let results = lint(&doc, Profile::Client);
		assert!(results.iter().any(|r| r.severity == Severity::Info && r.path == "cache"));
	}

	#[test]
	fn validator_errors_surface_as_lint_errors() {
		let mut http = HttpService::default();
		http.tools = vec![ToolDefinition {
			name: Some("t".into()),
			description: None,
			call_id: "missing".into(),
			disable: false,
			annotations: ToolAnnotations::default(),
		}];
		let doc = ConfigDocument {
			global_settings: GlobalSettings::default(),
			upstream_services: vec![service("svc", ServiceVariant::Http(http))],
		};
		let results = lint(&doc, Profile::Client);
		assert!(results.iter().any(|r| r.severity == Severity::Error));
	}
}
