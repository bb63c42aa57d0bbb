//! Configuration data model: `ServiceRecord` and its variant shapes,
//! `SecretValue`, and the per-protocol `CallDefinition` bodies.
//!
//! Mirrors the tagged-union-with-`#[serde(flatten)]` dispatch idiom used by
//! the reference gateway's `ToolImplementation` (`Source` vs. `Spec`): a
//! `ServiceRecord` carries exactly one variant and `which_variant()` is the
//! dispatch primitive callers and the validator use instead of checking a
//! pile of `Option` fields.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Root configuration document.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
	#[serde(default)]
	pub global_settings: GlobalSettings,
	#[serde(default)]
	pub upstream_services: Vec<ServiceRecord>,
}

/// `globalSettings` block. See SPEC_FULL §3.2.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
	#[serde(default)]
	pub mcp_listen_address: Option<String>,
	#[serde(default)]
	pub grpc_port: Option<u16>,
	#[serde(default)]
	pub config_paths: Vec<String>,
}

/// A single configured upstream service.
///
/// Carries exactly one of the protocol variants in [`ServiceVariant`]; `id`
/// and `sanitized_name` are computed by the loader, never supplied by the
/// user.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
	pub name: String,

	#[serde(flatten)]
	pub variant: ServiceVariant,

	#[serde(default)]
	pub disable: bool,

	/// Populated by connectivity verification; never set by config authors.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub config_error: Option<String>,

	#[serde(default)]
	pub upstream_auth: Option<Authentication>,

	#[serde(default, with = "duration_secs_option")]
	pub cache: Option<Duration>,

	#[serde(default)]
	pub call_policies: Vec<CallPolicy>,

	/// Computed at load time: `hex(SHA-256(name))`. `None` until computed.
	#[serde(skip)]
	pub id: Option<String>,

	/// Computed at load time: sanitized, collision-checked identifier.
	#[serde(skip)]
	pub sanitized_name: Option<String>,
}

impl ServiceRecord {
	/// Computes and caches `id` and `sanitized_name`. Idempotent: a stable
	/// `name` always yields the same `id`.
	pub fn compute_derived(&mut self) {
		self.id = Some(compute_service_id(&self.name));
		self.sanitized_name = Some(sanitize_name(&self.name));
	}

	pub fn id(&self) -> &str {
		self.id.as_deref().unwrap_or_default()
	}

	pub fn sanitized_name(&self) -> &str {
		self.sanitized_name.as_deref().unwrap_or_default()
	}

	/// Human-readable discriminant of the active variant, used in
	/// diagnostics and lint messages.
	pub fn variant_kind(&self) -> &'static str {
		self.variant.kind()
	}
}

/// `id` = hex(SHA-256(name)).
pub fn compute_service_id(name: &str) -> String {
	let mut hasher = Sha256::new();
	hasher.update(name.as_bytes());
	hex::encode(hasher.finalize())
}

/// Deterministic identifier-safe rewrite of a user-supplied name: lower-cased,
/// non-alphanumerics replaced by `_`, a leading digit gets a `_` prefix, and
/// the result is length-bounded. Collisions across enabled services within a
/// single load are a validation error, not resolved here.
pub fn sanitize_name(name: &str) -> String {
	const MAX_LEN: usize = 64;
	let mut out = String::with_capacity(name.len());
	for ch in name.chars() {
		if ch.is_ascii_alphanumeric() {
			out.push(ch.to_ascii_lowercase());
		} else {
			out.push('_');
		}
	}
	if out.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
		out.insert(0, '_');
	}
	out.truncate(MAX_LEN);
	if out.is_empty() {
		out.push('_');
	}
	out
}

/// Exactly one of these is set per `ServiceRecord`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ServiceVariant {
	Http(HttpService),
	Graphql(GraphqlService),
	Openapi(OpenapiService),
	Grpc(GrpcService),
	Websocket(WebsocketService),
	Webrtc(WebrtcService),
	Sql(SqlService),
	Mcp(McpService),
	CommandLine(CommandLineService),
	Filesystem(FilesystemService),
	Vector(VectorService),
}

impl ServiceVariant {
	pub fn kind(&self) -> &'static str {
		match self {
			ServiceVariant::Http(_) => "http",
			ServiceVariant::Graphql(_) => "graphql",
			ServiceVariant::Openapi(_) => "openapi",
			ServiceVariant::Grpc(_) => "grpc",
			ServiceVariant::Websocket(_) => "websocket",
			ServiceVariant::Webrtc(_) => "webrtc",
			ServiceVariant::Sql(_) => "sql",
			ServiceVariant::Mcp(_) => "mcp",
			ServiceVariant::CommandLine(_) => "commandLine",
			ServiceVariant::Filesystem(_) => "filesystem",
			ServiceVariant::Vector(_) => "vector",
		}
	}

	/// Whether this protocol is pool-backed (spec §4.8).
	pub fn is_pool_backed(&self) -> bool {
		matches!(
			self,
			ServiceVariant::Grpc(_) | ServiceVariant::Websocket(_) | ServiceVariant::Sql(_)
		)
	}
}

// ---------------------------------------------------------------------
// Tool/Resource/Prompt definitions, shared across variants
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub description: Option<String>,
	pub call_id: String,
	#[serde(default)]
	pub disable: bool,
	#[serde(default)]
	pub annotations: ToolAnnotations,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolAnnotations {
	#[serde(default)]
	pub title: Option<String>,
	#[serde(default)]
	pub read_only_hint: bool,
	#[serde(default)]
	pub destructive_hint: bool,
	#[serde(default)]
	pub idempotent_hint: bool,
	#[serde(default)]
	pub open_world_hint: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
	pub name: String,
	#[serde(default)]
	pub description: Option<String>,
	pub call_id: String,
	#[serde(default)]
	pub disable: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PromptDefinition {
	pub name: String,
	#[serde(default)]
	pub description: Option<String>,
	pub call_id: String,
	#[serde(default)]
	pub disable: bool,
}

/// A single parameter in a call's parameter list; drives JSON schema
/// synthesis per spec §3 (`CallDefinition`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
	pub name: String,
	#[serde(rename = "type", default = "default_param_type")]
	pub param_type: String,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default = "default_true")]
	pub required: bool,
	#[serde(default)]
	pub default: Option<serde_json::Value>,
	/// Where this parameter is placed on the wire (path/query/header/body),
	/// meaningful for HTTP-family calls and ignored elsewhere.
	#[serde(default)]
	pub location: ParameterLocation,
}

fn default_param_type() -> String {
	"string".to_string()
}

fn default_true() -> bool {
	true
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParameterLocation {
	#[default]
	Body,
	Path,
	Query,
	Header,
}

impl ParameterSpec {
	/// Synthesizes this parameter's JSON Schema fragment.
	pub fn schema_fragment(&self) -> serde_json::Value {
		let mut obj = serde_json::json!({ "type": self.param_type });
		if let Some(desc) = &self.description {
			obj["description"] = serde_json::Value::String(desc.clone());
		}
		obj
	}
}

/// Computes `{type: object, properties, required}` from a parameter list,
/// per spec §3's `CallDefinition` note.
pub fn synthesize_input_schema(params: &[ParameterSpec]) -> serde_json::Value {
	let mut properties = serde_json::Map::new();
	let mut required = Vec::new();
	for p in params {
		properties.insert(p.name.clone(), p.schema_fragment());
		if p.required {
			required.push(serde_json::Value::String(p.name.clone()));
		}
	}
	serde_json::json!({
		"type": "object",
		"properties": serde_json::Value::Object(properties),
		"required": required,
	})
}

// ---------------------------------------------------------------------
// Per-protocol service + call definitions
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HttpService {
	pub base_url: String,
	#[serde(default)]
	pub tools: Vec<ToolDefinition>,
	#[serde(default)]
	pub resources: Vec<ResourceDefinition>,
	#[serde(default)]
	pub prompts: Vec<PromptDefinition>,
	#[serde(default)]
	pub calls: HashMap<String, HttpCallDefinition>,
	#[serde(default)]
	pub health_check: Option<HealthCheck>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpCallDefinition {
	pub path: String,
	#[serde(default = "default_method")]
	pub method: String,
	#[serde(default)]
	pub parameters: Vec<ParameterSpec>,
	#[serde(default)]
	pub response_extractor: Option<String>,
}

fn default_method() -> String {
	"GET".to_string()
}

pub type GraphqlService = HttpServiceLike<GraphqlCallDefinition>;
pub type OpenapiService = HttpServiceLike<OpenapiCallDefinition>;

/// Shared shape for HTTP-family variants (GraphQL, OpenAPI) that only differ
/// in their call-definition body.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HttpServiceLike<C> {
	pub base_url: String,
	#[serde(default)]
	pub tools: Vec<ToolDefinition>,
	#[serde(default)]
	pub resources: Vec<ResourceDefinition>,
	#[serde(default)]
	pub prompts: Vec<PromptDefinition>,
	#[serde(default)]
	pub calls: HashMap<String, C>,
	#[serde(default)]
	pub health_check: Option<HealthCheck>,
	/// Path to an OpenAPI document; only meaningful for the Openapi variant.
	#[serde(default)]
	pub spec_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlCallDefinition {
	pub query: String,
	#[serde(default)]
	pub parameters: Vec<ParameterSpec>,
	#[serde(default)]
	pub response_extractor: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenapiCallDefinition {
	pub operation_id: String,
	#[serde(default)]
	pub parameters: Vec<ParameterSpec>,
	#[serde(default)]
	pub response_extractor: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GrpcService {
	pub endpoint: String,
	#[serde(default)]
	pub tools: Vec<ToolDefinition>,
	#[serde(default)]
	pub calls: HashMap<String, GrpcCallDefinition>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcCallDefinition {
	pub service: String,
	pub method: String,
	#[serde(default)]
	pub parameters: Vec<ParameterSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WebsocketService {
	pub url: String,
	#[serde(default)]
	pub tools: Vec<ToolDefinition>,
	#[serde(default)]
	pub calls: HashMap<String, WebsocketCallDefinition>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsocketCallDefinition {
	pub message_template: serde_json::Value,
	#[serde(default)]
	pub parameters: Vec<ParameterSpec>,
	#[serde(default)]
	pub correlation_field: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WebrtcService {
	pub signaling_url: String,
	#[serde(default)]
	pub tools: Vec<ToolDefinition>,
	#[serde(default)]
	pub calls: HashMap<String, WebrtcCallDefinition>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebrtcCallDefinition {
	pub data_channel_label: String,
	pub message_template: serde_json::Value,
	#[serde(default)]
	pub parameters: Vec<ParameterSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SqlService {
	pub driver: SqlDriver,
	pub dsn: SecretValue,
	#[serde(default)]
	pub tools: Vec<ToolDefinition>,
	#[serde(default)]
	pub calls: HashMap<String, SqlCallDefinition>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SqlDriver {
	#[default]
	Postgres,
	Mysql,
	Sqlite,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlCallDefinition {
	pub query: String,
	/// Positional parameter order; missing parameters bind SQL NULL.
	#[serde(default)]
	pub parameter_order: Vec<String>,
	#[serde(default)]
	pub parameters: Vec<ParameterSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct McpService {
	pub command: String,
	#[serde(default)]
	pub args: Vec<String>,
	#[serde(default)]
	pub env: HashMap<String, SecretValue>,
	#[serde(default)]
	pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CommandLineService {
	pub command: String,
	#[serde(default)]
	pub env: HashMap<String, SecretValue>,
	#[serde(default)]
	pub tools: Vec<ToolDefinition>,
	#[serde(default)]
	pub calls: HashMap<String, CommandCallDefinition>,
	/// If true, execute in-process rather than via a spawned shell.
	#[serde(default)]
	pub local: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandCallDefinition {
	#[serde(default)]
	pub args: Vec<String>,
	#[serde(default)]
	pub parameters: Vec<ParameterSpec>,
	/// Whether this call declares an `args` input parameter (spec P9).
	#[serde(default)]
	pub allow_args_parameter: bool,
	#[serde(default)]
	pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemService {
	/// virtual root name -> host path.
	pub root_paths: HashMap<String, String>,
	#[serde(default)]
	pub tools: Vec<ToolDefinition>,
	#[serde(default)]
	pub calls: HashMap<String, FilesystemCallDefinition>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemCallDefinition {
	pub operation: FilesystemOperation,
	pub root: String,
	#[serde(default)]
	pub parameters: Vec<ParameterSpec>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilesystemOperation {
	Read,
	List,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VectorService {
	pub endpoint: String,
	#[serde(default)]
	pub tools: Vec<ToolDefinition>,
	#[serde(default)]
	pub calls: HashMap<String, HttpCallDefinition>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
	pub url: String,
	#[serde(default = "default_method")]
	pub method: String,
	#[serde(default = "default_expected_code")]
	pub expected_code: u16,
}

fn default_expected_code() -> u16 {
	200
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Authentication {
	Bearer { token: SecretValue },
	Basic { username: SecretValue, password: SecretValue },
	ApiKey { header: String, value: SecretValue },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallPolicy {
	pub call_id: String,
	#[serde(default)]
	pub timeout_ms: Option<u64>,
	#[serde(default)]
	pub max_retries: Option<u32>,
}

/// Tagged secret reference: exactly one of `plain_text`, `environment_variable`,
/// or `file_path` is set. `validation_regex` + `file_path` together is a
/// validation error (spec P3: blind-file-read prevention).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretValue {
	#[serde(default)]
	pub plain_text: Option<String>,
	#[serde(default)]
	pub environment_variable: Option<String>,
	#[serde(default)]
	pub file_path: Option<String>,
	#[serde(default)]
	pub validation_regex: Option<String>,
}

impl SecretValue {
	pub fn plain(value: impl Into<String>) -> Self {
		Self {
			plain_text: Some(value.into()),
			environment_variable: None,
			file_path: None,
			validation_regex: None,
		}
	}

	pub fn env(name: impl Into<String>) -> Self {
		Self {
			plain_text: None,
			environment_variable: Some(name.into()),
			file_path: None,
			validation_regex: None,
		}
	}

	pub fn file(path: impl Into<String>) -> Self {
		Self {
			plain_text: None,
			environment_variable: None,
			file_path: Some(path.into()),
			validation_regex: None,
		}
	}

	pub fn with_validation_regex(mut self, regex: impl Into<String>) -> Self {
		self.validation_regex = Some(regex.into());
		self
	}

	/// How many of the three variant fields are set. A well-formed
	/// `SecretValue` has exactly one.
	pub fn variant_count(&self) -> usize {
		[
			self.plain_text.is_some(),
			self.environment_variable.is_some(),
			self.file_path.is_some(),
		]
		.into_iter()
		.filter(|b| *b)
		.count()
	}
}

mod duration_secs_option {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serialize, Serializer};

	pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
		value.map(|d| d.as_secs()).serialize(s)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
		let secs: Option<u64> = Option::deserialize(d)?;
		Ok(secs.map(Duration::from_secs))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sanitize_name_lowercases_and_replaces() {
		assert_eq!(sanitize_name("My Service!"), "my_service_");
	}

	#[test]
	fn sanitize_name_prefixes_leading_digit() {
		assert_eq!(sanitize_name("123service"), "_123service");
	}

	#[test]
	fn sanitize_name_truncates_long_names() {
		let long = "a".repeat(200);
		assert_eq!(sanitize_name(&long).len(), 64);
	}

	#[test]
	fn compute_service_id_is_stable() {
		assert_eq!(compute_service_id("svc"), compute_service_id("svc"));
		assert_ne!(compute_service_id("svc"), compute_service_id("svc2"));
	}

	#[test]
	fn secret_value_variant_count() {
		assert_eq!(SecretValue::plain("x").variant_count(), 1);
		let malformed = SecretValue {
			plain_text: Some("x".into()),
			environment_variable: Some("Y".into()),
			file_path: None,
			validation_regex: None,
		};
		assert_eq!(malformed.variant_count(), 2);
	}

	#[test]
	fn synthesize_input_schema_marks_required() {
		let params = vec![
			ParameterSpec {
				name: "a".into(),
				param_type: "string".into(),
				description: None,
				required: true,
				default: None,
				location: ParameterLocation::Body,
			},
			ParameterSpec {
				name: "b".into(),
				param_type: "number".into(),
				description: None,
				required: false,
				default: None,
				location: ParameterLocation::Query,
			},
		];
		let schema = synthesize_input_schema(&params);
		assert_eq!(schema["type"], "object");
		assert_eq!(schema["required"], serde_json::json!(["a"]));
		assert_eq!(schema["properties"]["b"]["type"], "number");
	}
}
