//! OpenAPI driver: parses a service's OpenAPI document to resolve each
//! call's `operationId` to a concrete path + method, then drives the same
//! path/query/header/body mapping `http.rs` uses for bare HTTP services
//! (spec §4.8).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use openapiv3::{OpenAPI, Operation, ReferenceOr};
use tracing::{info, warn};

use crate::catalog::{Tool, ToolCallRequest, ToolCallResult};
use crate::config::{synthesize_input_schema, OpenapiCallDefinition, ParameterLocation, ServiceRecord, ServiceVariant};
use crate::error::{GatewayError, UpstreamError};

use super::retry::with_one_retry;
use super::{apply_authentication, derive_tool_name, qualified_name, RegisterContext, RegisterOutcome, UpstreamDriver};

#[derive(Default)]
pub struct OpenapiDriver;

impl OpenapiDriver {
	pub fn new() -> Self {
		Self
	}
}

/// `operationId -> (path template, HTTP method)`, resolved once from the
/// document at registration time.
fn resolve_operations(doc: &OpenAPI) -> HashMap<String, (String, String)> {
	let mut map = HashMap::new();
	for (path, item) in &doc.paths.paths {
		let ReferenceOr::Item(item) = item else { continue };
		for (method, op) in [
			("GET", &item.get),
			("PUT", &item.put),
			("POST", &item.post),
			("DELETE", &item.delete),
			("PATCH", &item.patch),
		] {
			if let Some(op) = op {
				if let Some(id) = operation_id(op) {
					map.insert(id, (path.clone(), method.to_string()));
				}
			}
		}
	}
	map
}

fn operation_id(op: &Operation) -> Option<String> {
	op.operation_id.clone()
}

fn load_document(spec_path: &Option<String>) -> Option<OpenAPI> {
	let path = spec_path.as_ref()?;
	let raw = std::fs::read_to_string(path).ok()?;
	if path.ends_with(".json") {
		serde_json::from_str(&raw).ok()
	} else {
		serde_yaml::from_str(&raw).ok()
	}
}

#[async_trait]
impl UpstreamDriver for OpenapiDriver {
	async fn register(&self, ctx: &RegisterContext<'_>, record: &ServiceRecord, is_reload: bool) -> Result<RegisterOutcome, GatewayError> {
		let ServiceVariant::Openapi(svc) = &record.variant else {
			return Err(GatewayError::Fatal("OpenapiDriver given a non-openapi service record".into()));
		};

		let service_id = record.id().to_string();
		let sanitized = record.sanitized_name().to_string();

		if is_reload {
			ctx.catalog.clear_for_service(&service_id);
		}

		let operations = load_document(&svc.spec_path).map(|doc| resolve_operations(&doc)).unwrap_or_default();
		if svc.spec_path.is_some() && operations.is_empty() {
			warn!(target: "mcpany::upstream", service = %record.name, "openapi document did not resolve to any operations");
		}

		let base_url = svc.base_url.clone();
		let client = ctx.http_client.inner().clone();
		let auth = record.upstream_auth.clone();
		let secrets = *ctx.secrets;
		let mut registered = 0usize;

		for (index, tool_def) in svc.tools.iter().enumerate() {
			if tool_def.disable {
				continue;
			}
			let Some(call) = svc.calls.get(&tool_def.call_id) else {
				warn!(target: "mcpany::upstream", service = %record.name, call_id = %tool_def.call_id, "tool references missing call_id, skipping");
				continue;
			};
			let Some((path, method)) = operations.get(&call.operation_id).cloned() else {
				warn!(
					target: "mcpany::upstream",
					service = %record.name,
					operation_id = %call.operation_id,
					"operationId not found in openapi document, skipping tool"
				);
				continue;
			};

			let tool_name = derive_tool_name(&tool_def.name, &tool_def.description, index);
			let qualified = qualified_name(&sanitized, &tool_name);
			let input_schema = synthesize_input_schema(&call.parameters);

			let bound_call = call.clone();
			let bound_base = base_url.clone();
			let bound_client = client.clone();
			let bound_service_name = record.name.clone();
			let bound_path = path.clone();
			let bound_method = method.clone();
			let bound_auth = auth.clone();

			let execute: crate::catalog::ToolExecuteFn = Arc::new(move |request: ToolCallRequest| {
				let call = bound_call.clone();
				let base = bound_base.clone();
				let client = bound_client.clone();
				let service_name = bound_service_name.clone();
				let path = bound_path.clone();
				let method = bound_method.clone();
				let auth = bound_auth.clone();
				Box::pin(async move { execute_openapi_call(&client, &base, &path, &method, &call, request, &service_name, auth.as_ref(), secrets).await })
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

		info!(target: "mcpany::upstream", service = %record.name, tools = registered, "openapi service registered");

		Ok(RegisterOutcome {
			service_id,
			sanitized_name: sanitized,
			tools_registered: registered,
			resources_registered: 0,
			prompts_registered: 0,
		})
	}

	async fn shutdown(&self) -> Result<(), GatewayError> {
		super::noop_shutdown().await
	}
}

async fn execute_openapi_call(
	client: &reqwest::Client,
	base_url: &str,
	path: &str,
	method: &str,
	call: &OpenapiCallDefinition,
	request: ToolCallRequest,
	service_name: &str,
	auth: Option<&crate::config::Authentication>,
	secrets: crate::config::SecretResolver,
) -> Result<ToolCallResult, GatewayError> {
	let args = request.arguments.as_object().cloned().unwrap_or_default();

	let mut resolved_path = path.to_string();
	let mut query: Vec<(String, String)> = Vec::new();
	let mut headers = HashMap::new();
	let mut body = serde_json::Map::new();

	for param in &call.parameters {
		let Some(value) = args.get(&param.name) else { continue };
		let rendered = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
		match param.location {
			ParameterLocation::Path => resolved_path = resolved_path.replace(&format!("{{{}}}", param.name), &rendered),
			ParameterLocation::Query => query.push((param.name.clone(), rendered)),
			ParameterLocation::Header => {
				headers.insert(param.name.clone(), rendered);
			},
			ParameterLocation::Body => {
				body.insert(param.name.clone(), value.clone());
			},
		}
	}

	let url = format!("{}{}", base_url.trim_end_matches('/'), resolved_path);
	let http_method = reqwest::Method::from_bytes(method.as_bytes()).unwrap_or(reqwest::Method::GET);
	let body_value = (!body.is_empty()).then(|| serde_json::Value::Object(body));

	let build_request = || {
		let mut req = client.request(http_method.clone(), &url).query(&query);
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
	Ok(ToolCallResult::ok(parsed))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn load_document_returns_none_for_missing_path() {
		assert!(load_document(&Some("/nonexistent/openapi.yaml".to_string())).is_none());
	}

	#[test]
	fn load_document_returns_none_without_spec_path() {
		assert!(load_document(&None).is_none());
	}
}
