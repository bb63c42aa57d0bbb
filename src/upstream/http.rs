//! HTTP driver: by-call tools mapped to path/query/header/body parameters,
//! with an optional JMESPath/jq-like response projection (spec §4.8).
//!
//! Grounded on the reference gateway's `registry`'s use of `reqwest` for
//! its own HTTP fetch path and `serde_json_path`'s pre-compiled `JsonPath`
//! for output projection (`compiled.rs`'s `CompiledOutputField`).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json_path::JsonPath;
use tracing::{info, warn};

use crate::catalog::{Tool, ToolCallRequest, ToolCallResult};
use crate::config::{synthesize_input_schema, HttpCallDefinition, ParameterLocation, ServiceRecord, ServiceVariant};
use crate::error::{GatewayError, UpstreamError};

use super::retry::with_one_retry;
use super::{apply_authentication, derive_tool_name, qualified_name, RegisterContext, RegisterOutcome, UpstreamDriver};

#[derive(Default)]
pub struct HttpDriver;

impl HttpDriver {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl UpstreamDriver for HttpDriver {
	async fn register(&self, ctx: &RegisterContext<'_>, record: &ServiceRecord, is_reload: bool) -> Result<RegisterOutcome, GatewayError> {
		match &record.variant {
			ServiceVariant::Http(svc) => register_http_like(ctx, record, &svc.base_url, &svc.tools, &svc.calls, is_reload),
			// Vector services proxy through the same call-mapping as plain
			// HTTP (spec §4.8 names no protocol specifics beyond that).
			ServiceVariant::Vector(svc) => register_http_like(ctx, record, &svc.endpoint, &svc.tools, &svc.calls, is_reload),
			_ => Err(GatewayError::Fatal("HttpDriver given a non-http/vector service record".into())),
		}
	}

	async fn shutdown(&self) -> Result<(), GatewayError> {
		super::noop_shutdown().await
	}
}

/// Shared between `HttpDriver` (including its `Vector` sibling) and the
/// GraphQL/OpenAPI drivers, which differ only in how a call's body is built
/// (spec §4.8 groups them as "HTTP/GraphQL/OpenAPI").
pub fn register_http_like(
	ctx: &RegisterContext<'_>,
	record: &ServiceRecord,
	base_url: &str,
	tools: &[crate::config::ToolDefinition],
	calls: &HashMap<String, HttpCallDefinition>,
	is_reload: bool,
) -> Result<RegisterOutcome, GatewayError> {
	let service_id = record.id().to_string();
	let sanitized = record.sanitized_name().to_string();

	if is_reload {
		ctx.catalog.clear_for_service(&service_id);
	}

	let base_url = base_url.to_string();
	let client = ctx.http_client.inner().clone();
	let auth = record.upstream_auth.clone();
	let secrets = *ctx.secrets;

	let mut registered = 0usize;
	for (index, tool_def) in tools.iter().enumerate() {
		if tool_def.disable {
			continue;
		}
		let Some(call) = calls.get(&tool_def.call_id) else {
			warn!(target: "mcpany::upstream", service = %record.name, call_id = %tool_def.call_id, "tool references missing call_id, skipping");
			continue;
		};

		let tool_name = derive_tool_name(&tool_def.name, &tool_def.description, index);
		let qualified = qualified_name(&sanitized, &tool_name);
		let input_schema = synthesize_input_schema(&call.parameters);

		let bound_call = call.clone();
		let bound_base = base_url.clone();
		let bound_client = client.clone();
		let bound_service_name = record.name.clone();
		let bound_auth = auth.clone();
		let extractor = compile_extractor(&call.response_extractor);

		let execute: crate::catalog::ToolExecuteFn = Arc::new(move |request: ToolCallRequest| {
			let call = bound_call.clone();
			let base = bound_base.clone();
			let client = bound_client.clone();
			let service_name = bound_service_name.clone();
			let auth = bound_auth.clone();
			let extractor = extractor.clone();
			Box::pin(async move { execute_http_call(&client, &base, &call, request, &service_name, extractor.as_ref(), auth.as_ref(), secrets).await })
		});

		ctx.catalog.tools.add(
			qualified.clone(),
			service_id.clone(),
			Tool {
				name: qualified,
				input_schema,
				output_schema: None,
				annotations: tool_def.annotations.clone(),
				service_id: service_id.clone(),
				execute,
			},
		)?;
		registered += 1;
	}

	info!(target: "mcpany::upstream", service = %record.name, tools = registered, "http service registered");

	Ok(RegisterOutcome {
		service_id,
		sanitized_name: sanitized,
		tools_registered: registered,
		resources_registered: 0,
		prompts_registered: 0,
	})
}

fn compile_extractor(pattern: &Option<String>) -> Option<Arc<JsonPath>> {
	pattern.as_ref().and_then(|p| JsonPath::parse(p).ok()).map(Arc::new)
}

async fn execute_http_call(
	client: &reqwest::Client,
	base_url: &str,
	call: &HttpCallDefinition,
	request: ToolCallRequest,
	service_name: &str,
	extractor: Option<&Arc<JsonPath>>,
	auth: Option<&crate::config::Authentication>,
	secrets: crate::config::SecretResolver,
) -> Result<ToolCallResult, GatewayError> {
	let args = request.arguments.as_object().cloned().unwrap_or_default();

	let mut path = call.path.clone();
	let mut query: Vec<(String, String)> = Vec::new();
	let mut headers = HashMap::new();
	let mut body = serde_json::Map::new();

	for param in &call.parameters {
		let Some(value) = args.get(&param.name) else { continue };
		let rendered = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
		match param.location {
			ParameterLocation::Path => path = path.replace(&format!("{{{}}}", param.name), &rendered),
			ParameterLocation::Query => query.push((param.name.clone(), rendered)),
			ParameterLocation::Header => {
				headers.insert(param.name.clone(), rendered);
			},
			ParameterLocation::Body => {
				body.insert(param.name.clone(), value.clone());
			},
		}
	}

	let url = format!("{}{}", base_url.trim_end_matches('/'), path);
	let method = reqwest::Method::from_bytes(call.method.as_bytes()).unwrap_or(reqwest::Method::GET);
	let body_value = (!body.is_empty()).then(|| serde_json::Value::Object(body));

	let build_request = || {
		let mut req = client.request(method.clone(), &url).query(&query);
		for (k, v) in &headers {
			req = req.header(k, v);
		}
		if let Some(body) = &body_value {
			req = req.json(body);
		}
		req
	};

	let authed_request = apply_authentication(build_request(), auth, &secrets)?;
	let response = with_one_retry(
		|e: &reqwest::Error| e.is_connect() || e.is_timeout(),
		|| authed_request.try_clone().expect("request body is not a stream").send(),
	)
	.await
	.map_err(|e| UpstreamError::Transport {
		service: service_name.to_string(),
		message: e.to_string(),
	})?;

	let status = response.status();
	let text = response.text().await.unwrap_or_default();

	if !status.is_success() {
		return Err(GatewayError::Upstream(UpstreamError::Status {
			service: service_name.to_string(),
			status: status.as_u16(),
			message: text,
		}));
	}

	let parsed: serde_json::Value = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));
	let projected = match extractor {
		Some(path) => path.query(&parsed).exactly_one().cloned().unwrap_or(parsed),
		None => parsed,
	};

	Ok(ToolCallResult::ok(projected))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn compile_extractor_accepts_valid_jsonpath() {
		assert!(compile_extractor(&Some("$.data".to_string())).is_some());
	}

	#[test]
	fn compile_extractor_rejects_invalid_jsonpath() {
		assert!(compile_extractor(&Some("not a jsonpath (((".to_string())).is_none());
	}

	#[test]
	fn compile_extractor_none_for_absent_pattern() {
		assert!(compile_extractor(&None).is_none());
	}
}
