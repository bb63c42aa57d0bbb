//! GraphQL driver: one tool per declared query/mutation document, executed
//! as a single POST with the call's parameters bound as GraphQL variables
//! (spec §4.8).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json_path::JsonPath;
use tracing::{info, warn};

use crate::catalog::{Tool, ToolCallRequest, ToolCallResult};
use crate::config::{synthesize_input_schema, GraphqlCallDefinition, GraphqlService, ServiceRecord, ServiceVariant};
use crate::error::{GatewayError, UpstreamError};

use super::retry::with_one_retry;
use super::{apply_authentication, derive_tool_name, qualified_name, RegisterContext, RegisterOutcome, UpstreamDriver};

#[derive(Default)]
pub struct GraphqlDriver;

impl GraphqlDriver {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl UpstreamDriver for GraphqlDriver {
	async fn register(&self, ctx: &RegisterContext<'_>, record: &ServiceRecord, is_reload: bool) -> Result<RegisterOutcome, GatewayError> {
		let ServiceVariant::Graphql(svc) = &record.variant else {
			return Err(GatewayError::Fatal("GraphqlDriver given a non-graphql service record".into()));
		};

		let service_id = record.id().to_string();
		let sanitized = record.sanitized_name().to_string();

		if is_reload {
			ctx.catalog.clear_for_service(&service_id);
		}

		let endpoint = svc.base_url.clone();
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

			let tool_name = derive_tool_name(&tool_def.name, &tool_def.description, index);
			let qualified = qualified_name(&sanitized, &tool_name);
			let input_schema = synthesize_input_schema(&call.parameters);

			let bound_call = call.clone();
			let bound_endpoint = endpoint.clone();
			let bound_client = client.clone();
			let bound_service_name = record.name.clone();
			let bound_auth = auth.clone();
			let extractor = compile_extractor(&call.response_extractor);

			let execute: crate::catalog::ToolExecuteFn = Arc::new(move |request: ToolCallRequest| {
				let call = bound_call.clone();
				let endpoint = bound_endpoint.clone();
				let client = bound_client.clone();
				let service_name = bound_service_name.clone();
				let auth = bound_auth.clone();
				let extractor = extractor.clone();
				Box::pin(async move { execute_graphql_call(&client, &endpoint, &call, request, &service_name, extractor.as_ref(), auth.as_ref(), secrets).await })
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

		info!(target: "mcpany::upstream", service = %record.name, tools = registered, "graphql service registered");

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

fn compile_extractor(pattern: &Option<String>) -> Option<Arc<JsonPath>> {
	pattern.as_ref().and_then(|p| JsonPath::parse(p).ok()).map(Arc::new)
}

async fn execute_graphql_call(
	client: &reqwest::Client,
	endpoint: &str,
	call: &GraphqlCallDefinition,
	request: ToolCallRequest,
	service_name: &str,
	extractor: Option<&Arc<JsonPath>>,
	auth: Option<&crate::config::Authentication>,
	secrets: crate::config::SecretResolver,
) -> Result<ToolCallResult, GatewayError> {
	let args = request.arguments.as_object().cloned().unwrap_or_default();
	let mut variables = serde_json::Map::new();
	for param in &call.parameters {
		if let Some(value) = args.get(&param.name) {
			variables.insert(param.name.clone(), value.clone());
		}
	}

	let body = serde_json::json!({
		"query": call.query,
		"variables": serde_json::Value::Object(variables),
	});

	let authed_request = apply_authentication(client.post(endpoint).json(&body), auth, &secrets)?;
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
	if let Some(errors) = parsed.get("errors") {
		if errors.as_array().is_some_and(|a| !a.is_empty()) {
			return Ok(ToolCallResult::error(errors.clone()));
		}
	}

	let data = parsed.get("data").cloned().unwrap_or(parsed);
	let projected = match extractor {
		Some(path) => path.query(&data).exactly_one().cloned().unwrap_or(data),
		None => data,
	};

	Ok(ToolCallResult::ok(projected))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn compile_extractor_accepts_valid_jsonpath() {
		assert!(compile_extractor(&Some("$.viewer".to_string())).is_some());
	}
}
