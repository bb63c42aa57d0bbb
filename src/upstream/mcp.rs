//! MCP-stdio driver: spawns the configured command as a child process and
//! speaks MCP over its stdio, discovering tools dynamically from the
//! child rather than from a static `calls` map - `McpService` has no
//! `calls` field because the child server is itself the source of truth
//! for what it exposes (spec §4.8's "CommandLine / MCP-stdio" grouping).
//!
//! Grounded directly on the agentproxy relay example's
//! `rmcp::transport::child_process::TokioChildProcess` + `serve_client`
//! usage, with `ClientHandlerService::simple()` standing in for that
//! example's full `ServerHandler` passthrough since this driver only needs
//! the client half (`list_all_tools`/`call_tool`).
//!
//! If `tools` is non-empty it is an explicit allow-list: each entry's
//! `call_id` names the child's own tool to proxy, optionally renamed via
//! `name`. An empty `tools` list proxies every tool the child advertises,
//! named and described exactly as the child reports them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rmcp::model::{CallToolRequestParam, Tool as RmcpTool};
use rmcp::service::RunningService;
use rmcp::transport::TokioChildProcess;
use rmcp::{serve_client, ClientHandlerService};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::catalog::{Tool, ToolCallRequest, ToolCallResult};
use crate::config::{ServiceRecord, ServiceVariant, ToolAnnotations, ToolDefinition};
use crate::error::{GatewayError, UpstreamError};

use super::{derive_tool_name, qualified_name, resolve_env_map, RegisterContext, RegisterOutcome, UpstreamDriver};

const CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
pub struct McpDriver;

impl McpDriver {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl UpstreamDriver for McpDriver {
	async fn register(&self, ctx: &RegisterContext<'_>, record: &ServiceRecord, is_reload: bool) -> Result<RegisterOutcome, GatewayError> {
		let ServiceVariant::Mcp(svc) = &record.variant else {
			return Err(GatewayError::Fatal("McpDriver given a non-mcp service record".into()));
		};

		let service_id = record.id().to_string();
		let sanitized = record.sanitized_name().to_string();

		if is_reload {
			ctx.catalog.clear_for_service(&service_id);
		}

		let env = resolve_env_map(ctx.secrets, &svc.env)?;

		let mut command = tokio::process::Command::new(&svc.command);
		command.args(&svc.args).envs(&env);

		let transport = TokioChildProcess::new(command).map_err(|e| UpstreamError::Transport {
			service: record.name.clone(),
			message: format!("failed to spawn mcp server '{}': {e}", svc.command),
		})?;

		let client = serve_client(ClientHandlerService::simple(), transport).await.map_err(|e| UpstreamError::Transport {
			service: record.name.clone(),
			message: format!("mcp handshake with '{}' failed: {e}", svc.command),
		})?;
		let client = Arc::new(AsyncMutex::new(Some(client)));

		let discovered = {
			let guard = client.lock().await;
			let running = guard.as_ref().expect("client just connected");
			tokio::time::timeout(CALL_TIMEOUT, running.peer().list_all_tools())
				.await
				.map_err(|_| UpstreamError::Cancelled)?
				.map_err(|e| UpstreamError::Transport {
					service: record.name.clone(),
					message: e.to_string(),
				})?
		};

		let selected = select_tools(&svc.tools, &discovered);

		let mut registered = 0usize;
		for (index, (def, remote)) in selected.into_iter().enumerate() {
			let tool_name = derive_tool_name(&def.name, &Some(remote.name.to_string()), index);
			let qualified = qualified_name(&sanitized, &tool_name);
			let input_schema = serde_json::to_value(&remote.input_schema).unwrap_or(serde_json::json!({"type": "object"}));
			let remote_name = remote.name.to_string();

			let bound_client = client.clone();
			let bound_service_name = record.name.clone();
			let bound_remote_name = remote_name.clone();

			let execute: crate::catalog::ToolExecuteFn = Arc::new(move |request: ToolCallRequest| {
				let client = bound_client.clone();
				let service_name = bound_service_name.clone();
				let remote_name = bound_remote_name.clone();
				Box::pin(async move { execute_mcp_call(client, &remote_name, request, &service_name).await })
			});

			ctx.catalog.tools.add(
				qualified.clone(),
				service_id.clone(),
				Tool {
					name: qualified,
					input_schema,
					output_schema: None,
					annotations: def.annotations.clone(),
					service_id: service_id.clone(),
					execute,
				},
			)?;
			registered += 1;
		}

		info!(target: "mcpany::upstream", service = %record.name, tools = registered, "mcp-stdio service registered");

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

/// Pairs allow-listed tool definitions with the discovered remote tool
/// they reference, or (if the allow-list is empty) pairs every discovered
/// tool with a synthesized definition.
fn select_tools<'a>(declared: &'a [ToolDefinition], discovered: &'a [RmcpTool]) -> Vec<(ToolDefinition, &'a RmcpTool)> {
	if declared.is_empty() {
		return discovered
			.iter()
			.map(|remote| {
				(
					ToolDefinition {
						name: None,
						description: Some(remote.description.clone().unwrap_or_default().to_string()),
						call_id: remote.name.to_string(),
						disable: false,
						annotations: ToolAnnotations::default(),
					},
					remote,
				)
			})
			.collect();
	}

	let mut out = Vec::new();
	for def in declared {
		if def.disable {
			continue;
		}
		match discovered.iter().find(|t| t.name == def.call_id) {
			Some(remote) => out.push((def.clone(), remote)),
			None => warn!(target: "mcpany::upstream", call_id = %def.call_id, "mcp server does not advertise this tool, skipping"),
		}
	}
	out
}

async fn execute_mcp_call(
	client: Arc<AsyncMutex<Option<RunningService<ClientHandlerService>>>>,
	remote_name: &str,
	request: ToolCallRequest,
	service_name: &str,
) -> Result<ToolCallResult, GatewayError> {
	let guard = client.lock().await;
	let running = guard.as_ref().ok_or_else(|| UpstreamError::Transport {
		service: service_name.to_string(),
		message: "mcp client has been shut down".to_string(),
	})?;

	let arguments = request.arguments.as_object().cloned();
	let params = CallToolRequestParam {
		name: remote_name.to_string().into(),
		arguments,
	};

	let result = tokio::time::timeout(CALL_TIMEOUT, running.call_tool(params))
		.await
		.map_err(|_| UpstreamError::Cancelled)?
		.map_err(|e| UpstreamError::Transport {
			service: service_name.to_string(),
			message: e.to_string(),
		})?;

	let output = serde_json::to_value(&result.content).unwrap_or(serde_json::Value::Null);
	Ok(ToolCallResult {
		output,
		is_error: result.is_error.unwrap_or(false),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn select_tools_empty_allowlist_proxies_everything() {
		let declared: Vec<ToolDefinition> = vec![];
		let discovered: Vec<RmcpTool> = vec![];
		assert!(select_tools(&declared, &discovered).is_empty());
	}

	#[test]
	fn select_tools_skips_disabled_entries() {
		let declared = vec![ToolDefinition {
			name: None,
			description: None,
			call_id: "search".to_string(),
			disable: true,
			annotations: ToolAnnotations::default(),
		}];
		let discovered: Vec<RmcpTool> = vec![];
		assert!(select_tools(&declared, &discovered).is_empty());
	}
}
