//! ConfigValidator: structural and cross-reference validation, run in one
//! of two profiles (spec §4.2).
//!
//! Grounded on the reference gateway's `RegistryValidator` (`mcp/registry/
//! validation.rs`): one `validate_*` method per concern, all aggregated
//! into a flat error list rather than short-circuiting on the first
//! failure.

use std::collections::HashSet;

use thiserror::Error;

use super::types::{ConfigDocument, ServiceRecord, ServiceVariant};

/// Which profile validation runs under (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
	/// The gateway runtime: stricter, requires in-principle-reachable
	/// addresses and forbids risky combinations.
	Server,
	/// A caller-side config subset: tolerant of unresolved placeholders.
	Client,
}

/// One validation failure, always attributable to a service and a path
/// within it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{service_name}: {path}: {err}")]
pub struct ValidationError {
	pub service_name: String,
	pub path: String,
	pub err: String,
}

impl ValidationError {
	pub fn new(service_name: impl Into<String>, path: impl Into<String>, err: impl Into<String>) -> Self {
		Self {
			service_name: service_name.into(),
			path: path.into(),
			err: err.into(),
		}
	}
}

/// Runs the full set of structural checks against a loaded (but not yet
/// secret-resolved) [`ConfigDocument`]. Never stops on the first error.
pub struct ConfigValidator {
	profile: Profile,
}

impl ConfigValidator {
	pub fn new(profile: Profile) -> Self {
		Self { profile }
	}

	pub fn validate(&self, doc: &ConfigDocument) -> Vec<ValidationError> {
		let mut errors = Vec::new();

		let mut seen_names = HashSet::new();
		let mut seen_sanitized = HashSet::new();

		for svc in &doc.upstream_services {
			if svc.disable {
				continue;
			}

			if !seen_names.insert(svc.name.clone()) {
				errors.push(ValidationError::new(&svc.name, "name", format!("duplicate service name '{}'", svc.name)));
			}

			let sanitized = super::types::sanitize_name(&svc.name);
			if !seen_sanitized.insert(sanitized.clone()) {
				errors.push(ValidationError::new(
					&svc.name,
					"name",
					format!("sanitized name '{sanitized}' collides with another enabled service"),
				));
			}

			self.validate_service(svc, &mut errors);
		}

		errors
	}

	fn validate_service(&self, svc: &ServiceRecord, errors: &mut Vec<ValidationError>) {
		self.validate_tool_call_refs(svc, errors);
		self.validate_secrets(svc, errors);
		self.validate_cache(svc, errors);
		self.validate_urls(svc, errors);

		match &svc.variant {
			ServiceVariant::CommandLine(cmd) => self.validate_command_resolvable(&svc.name, &cmd.command, errors),
			ServiceVariant::Mcp(mcp) => self.validate_command_resolvable(&svc.name, &mcp.command, errors),
			ServiceVariant::Filesystem(fs) => self.validate_filesystem_roots(svc, fs, errors),
			_ => {},
		}
	}

	/// Checks every `tools[i].callId` resolves inside its service's `calls`
	/// map (spec P1).
	fn validate_tool_call_refs(&self, svc: &ServiceRecord, errors: &mut Vec<ValidationError>) {
		macro_rules! check {
			($tools:expr, $calls:expr) => {
				for tool in $tools {
					let tool_name = tool.name.as_deref().unwrap_or("<unnamed>");
					if !$calls.contains_key(&tool.call_id) {
						errors.push(ValidationError::new(
							&svc.name,
							format!("tools.{tool_name}.callId"),
							format!(
								"tool \"{tool_name}\" references non-existent call_id \"{}\"",
								tool.call_id
							),
						));
					}
				}
			};
		}

		match &svc.variant {
			ServiceVariant::Http(s) => check!(&s.tools, s.calls),
			ServiceVariant::Graphql(s) => check!(&s.tools, s.calls),
			ServiceVariant::Openapi(s) => check!(&s.tools, s.calls),
			ServiceVariant::Grpc(s) => check!(&s.tools, s.calls),
			ServiceVariant::Websocket(s) => check!(&s.tools, s.calls),
			ServiceVariant::Webrtc(s) => check!(&s.tools, s.calls),
			ServiceVariant::Sql(s) => check!(&s.tools, s.calls),
			ServiceVariant::CommandLine(s) => check!(&s.tools, s.calls),
			ServiceVariant::Filesystem(s) => check!(&s.tools, s.calls),
			ServiceVariant::Vector(s) => check!(&s.tools, s.calls),
			ServiceVariant::Mcp(_) => {},
		}
	}

	/// Secret references are well-formed and `validationRegex` is never
	/// combined with `filePath` (spec P3).
	fn validate_secrets(&self, svc: &ServiceRecord, errors: &mut Vec<ValidationError>) {
		let mut check_one = |path: String, secret: &super::types::SecretValue| {
			if secret.variant_count() != 1 {
				errors.push(ValidationError::new(
					&svc.name,
					path.clone(),
					"secret value must set exactly one of plainText, environmentVariable, or filePath",
				));
			}
			if secret.file_path.is_some() && secret.validation_regex.is_some() {
				errors.push(ValidationError::new(
					&svc.name,
					path,
					"validation regex is not supported for secret file paths",
				));
			}
		};

		if let Some(auth) = &svc.upstream_auth {
			match auth {
				super::types::Authentication::Bearer { token } => check_one("upstreamAuth.token".into(), token),
				super::types::Authentication::Basic { username, password } => {
					check_one("upstreamAuth.username".into(), username);
					check_one("upstreamAuth.password".into(), password);
				},
				super::types::Authentication::ApiKey { value, .. } => check_one("upstreamAuth.value".into(), value),
			}
		}

		match &svc.variant {
			ServiceVariant::Sql(s) => check_one("dsn".into(), &s.dsn),
			ServiceVariant::Mcp(s) => {
				for (name, secret) in &s.env {
					check_one(format!("env.{name}"), secret);
				}
			},
			ServiceVariant::CommandLine(s) => {
				for (name, secret) in &s.env {
					check_one(format!("env.{name}"), secret);
				}
			},
			_ => {},
		}
	}

	fn validate_cache(&self, svc: &ServiceRecord, errors: &mut Vec<ValidationError>) {
		// Duration is unsigned so "< 0" can't occur structurally; this check
		// exists for forward-compatibility if cache ever becomes signed on
		// the wire (e.g. via a negative seconds literal in JSON).
		let _ = svc;
		let _ = errors;
	}

	fn validate_urls(&self, svc: &ServiceRecord, errors: &mut Vec<ValidationError>) {
		let mut check_scheme = |path: &str, url: &str| {
			if !url.contains("://") {
				errors.push(ValidationError::new(
					&svc.name,
					path,
					format!("url '{url}' does not start with a scheme"),
				));
			}
		};

		match &svc.variant {
			ServiceVariant::Http(s) => check_scheme("baseUrl", &s.base_url),
			ServiceVariant::Graphql(s) => check_scheme("baseUrl", &s.base_url),
			ServiceVariant::Openapi(s) => check_scheme("baseUrl", &s.base_url),
			ServiceVariant::Grpc(s) => check_scheme("endpoint", &s.endpoint),
			ServiceVariant::Websocket(s) => check_scheme("url", &s.url),
			ServiceVariant::Webrtc(s) => check_scheme("signalingUrl", &s.signaling_url),
			ServiceVariant::Vector(s) => check_scheme("endpoint", &s.endpoint),
			_ => {},
		}
	}

	fn validate_command_resolvable(&self, service_name: &str, command: &str, errors: &mut Vec<ValidationError>) {
		if self.profile == Profile::Client {
			return;
		}
		if which::which(command).is_err() {
			errors.push(ValidationError::new(
				service_name,
				"command",
				format!("command '{command}' is not resolvable on PATH"),
			));
		}
	}

	fn validate_filesystem_roots(
		&self,
		svc: &ServiceRecord,
		fs: &super::types::FilesystemService,
		errors: &mut Vec<ValidationError>,
	) {
		if self.profile == Profile::Client {
			return;
		}
		for (virtual_name, host_path) in &fs.root_paths {
			let expanded = shellexpand::tilde(host_path).into_owned();
			let path = std::path::Path::new(&expanded);
			if !path.is_dir() {
				errors.push(ValidationError::new(
					&svc.name,
					format!("rootPaths.{virtual_name}"),
					format!("host path '{host_path}' is not a reachable directory"),
				));
			}
		}
		for call in fs.calls.values() {
			if !fs.root_paths.contains_key(&call.root) {
				errors.push(ValidationError::new(
					&svc.name,
					"calls.*.root",
					format!("call references unknown root '{}'", call.root),
				));
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::types::*;
	use std::collections::HashMap;

	fn doc_with(variant: ServiceVariant, tools: Vec<ToolDefinition>) -> ConfigDocument {
		let mut calls = HashMap::new();
		calls.insert(
			"real_call".to_string(),
			HttpCallDefinition {
				path: "/x".into(),
				method: "GET".into(),
				parameters: vec![],
				response_extractor: None,
			},
		);
		let http = match variant {
			ServiceVariant::Http(mut s) => {
				s.tools = tools;
				s.calls = calls;
				s
			},
			_ => unreachable!(),
		};
		ConfigDocument {
			global_settings: GlobalSettings::default(),
			upstream_services: vec![ServiceRecord {
				name: "svc".into(),
				variant: ServiceVariant::Http(http),
				disable: false,
				config_error: None,
				upstream_auth: None,
				cache: None,
				call_policies: vec![],
				id: None,
				sanitized_name: None,
			}],
		}
	}

	#[test]
	fn p1_dangling_call_id_is_exactly_one_error() {
		let doc = doc_with(
			ServiceVariant::Http(HttpService::default()),
			vec![ToolDefinition {
				name: Some("my_tool".into()),
				description: None,
				call_id: "missing_call".into(),
				disable: false,
				annotations: ToolAnnotations::default(),
			}],
		);
		let errors = ConfigValidator::new(Profile::Client).validate(&doc);
		assert_eq!(errors.len(), 1);
		assert!(errors[0]
			.err
			.contains("tool \"my_tool\" references non-existent call_id \"missing_call\""));
	}

	#[test]
	fn p3_blind_file_read_blocked() {
		let secret = SecretValue::file("/etc/passwd").with_validation_regex("^.*$");
		let mut sql = SqlService {
			driver: SqlDriver::Postgres,
			dsn: secret,
			tools: vec![],
			calls: HashMap::new(),
		};
		sql.tools = vec![];
		let doc = ConfigDocument {
			global_settings: GlobalSettings::default(),
			upstream_services: vec![ServiceRecord {
				name: "db".into(),
				variant: ServiceVariant::Sql(sql),
				disable: false,
				config_error: None,
				upstream_auth: None,
				cache: None,
				call_policies: vec![],
				id: None,
				sanitized_name: None,
			}],
		};
		let errors = ConfigValidator::new(Profile::Client).validate(&doc);
		assert_eq!(errors.len(), 1);
		assert!(errors[0].err.contains("validation regex is not supported for secret file paths"));
	}

	#[test]
	fn client_profile_skips_command_resolution() {
		let cmd = CommandLineService {
			command: "definitely-not-a-real-binary-xyz".into(),
			env: HashMap::new(),
			tools: vec![],
			calls: HashMap::new(),
			local: false,
		};
		let doc = ConfigDocument {
			global_settings: GlobalSettings::default(),
			upstream_services: vec![ServiceRecord {
				name: "cmd".into(),
				variant: ServiceVariant::CommandLine(cmd),
				disable: false,
				config_error: None,
				upstream_auth: None,
				cache: None,
				call_policies: vec![],
				id: None,
				sanitized_name: None,
			}],
		};
		assert!(ConfigValidator::new(Profile::Client).validate(&doc).is_empty());
		assert!(!ConfigValidator::new(Profile::Server).validate(&doc).is_empty());
	}

	#[test]
	fn url_without_scheme_is_an_error() {
		let mut http = HttpService::default();
		http.base_url = "example.com/no-scheme".into();
		let doc = ConfigDocument {
			global_settings: GlobalSettings::default(),
			upstream_services: vec![ServiceRecord {
				name: "svc".into(),
				variant: ServiceVariant::Http(http),
				disable: false,
				config_error: None,
				upstream_auth: None,
				cache: None,
				call_policies: vec![],
				id: None,
				sanitized_name: None,
			}],
		};
		let errors = ConfigValidator::new(Profile::Client).validate(&doc);
		assert!(errors.iter().any(|e| e.err.contains("does not start with a scheme")));
	}
}
