//! CommandLine driver: spawns the configured executable directly via
//! `tokio::process::Command`, never through a shell, and never accepts an
//! `args` input parameter unless the call explicitly opts in (spec P9).
//!
//! `local=false` resolves `command` on PATH with `which` before every
//! registration, the same check `config::validator`'s Server-profile pass
//! performs at load time; `local=true` skips that resolution and runs the
//! configured path as given, for services that intentionally point at a
//! script colocated with the config rather than something on PATH.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::catalog::{Tool, ToolCallRequest, ToolCallResult};
use crate::config::{synthesize_input_schema, CommandCallDefinition, ServiceRecord, ServiceVariant};
use crate::error::{GatewayError, UpstreamError};

use super::{derive_tool_name, qualified_name, resolve_env_map, RegisterContext, RegisterOutcome, UpstreamDriver};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
pub struct CommandDriver;

impl CommandDriver {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl UpstreamDriver for CommandDriver {
	async fn register(&self, ctx: &RegisterContext<'_>, record: &ServiceRecord, is_reload: bool) -> Result<RegisterOutcome, GatewayError> {
		let ServiceVariant::CommandLine(svc) = &record.variant else {
			return Err(GatewayError::Fatal("CommandDriver given a non-command-line service record".into()));
		};

		let service_id = record.id().to_string();
		let sanitized = record.sanitized_name().to_string();

		if is_reload {
			ctx.catalog.clear_for_service(&service_id);
		}

		if !svc.local {
			which::which(&svc.command).map_err(|e| UpstreamError::Transport {
				service: record.name.clone(),
				message: format!("command '{}' is not resolvable on PATH: {e}", svc.command),
			})?;
		}

		let env = resolve_env_map(ctx.secrets, &svc.env)?;
		let command_path = svc.command.clone();

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
			let bound_command = command_path.clone();
			let bound_env = env.clone();
			let bound_service_name = record.name.clone();

			let execute: crate::catalog::ToolExecuteFn = Arc::new(move |request: ToolCallRequest| {
				let call = bound_call.clone();
				let command = bound_command.clone();
				let env = bound_env.clone();
				let service_name = bound_service_name.clone();
				Box::pin(async move { execute_command_call(&command, &env, &call, request, &service_name).await })
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

		info!(target: "mcpany::upstream", service = %record.name, tools = registered, "command-line service registered");

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

/// Renders `call.args` substituting `{paramName}` placeholders with the
/// caller-supplied argument (spec §4.8's argv templating). Returns an
/// error if the caller supplied an `args` argument that the call did not
/// declare via `allow_args_parameter` (spec P9).
fn build_argv(call: &CommandCallDefinition, args: &serde_json::Map<String, serde_json::Value>) -> Result<Vec<String>, UpstreamError> {
	if args.contains_key("args") && !call.allow_args_parameter {
		return Err(UpstreamError::ArgsParameterNotAllowed);
	}

	let mut argv = Vec::with_capacity(call.args.len());
	for template in &call.args {
		let mut rendered = template.clone();
		for param in &call.parameters {
			let placeholder = format!("{{{}}}", param.name);
			if rendered.contains(&placeholder) {
				if let Some(value) = args.get(&param.name) {
					let text = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
					rendered = rendered.replace(&placeholder, &text);
				}
			}
		}
		argv.push(rendered);
	}

	if call.allow_args_parameter {
		if let Some(extra) = args.get("args").and_then(|v| v.as_array()) {
			for item in extra {
				argv.push(item.as_str().map(str::to_string).unwrap_or_else(|| item.to_string()));
			}
		}
	}

	Ok(argv)
}

async fn execute_command_call(
	command: &str,
	env: &HashMap<String, String>,
	call: &CommandCallDefinition,
	request: ToolCallRequest,
	service_name: &str,
) -> Result<ToolCallResult, GatewayError> {
	let args = request.arguments.as_object().cloned().unwrap_or_default();
	let argv = build_argv(call, &args)?;

	let timeout = call.timeout.map(Duration::from_millis).unwrap_or(DEFAULT_CALL_TIMEOUT);

	let start_time = Utc::now();
	let mut cmd = tokio::process::Command::new(command);
	cmd.args(&argv).envs(env).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

	let child = cmd.spawn().map_err(|e| UpstreamError::Transport {
		service: service_name.to_string(),
		message: format!("failed to spawn '{command}': {e}"),
	})?;

	let output = tokio::time::timeout(timeout, child.wait_with_output())
		.await
		.map_err(|_| UpstreamError::Cancelled)?
		.map_err(|e| UpstreamError::Transport {
			service: service_name.to_string(),
			message: e.to_string(),
		})?;
	let end_time = Utc::now();

	let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
	let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
	let return_code = output.status.code().unwrap_or(-1);
	let status = if output.status.success() { "ok" } else { "error" };

	let result = serde_json::json!({
		"command": command,
		"args": argv,
		"stdout": stdout,
		"stderr": stderr,
		"combined_output": format!("{stdout}{stderr}"),
		"start_time": start_time.to_rfc3339(),
		"end_time": end_time.to_rfc3339(),
		"return_code": return_code,
		"status": status,
	});

	Ok(ToolCallResult { output: result, is_error: !output.status.success() })
}

#[cfg(test)]
mod tests {
	use super::*;

	fn call(args: Vec<&str>, allow_args: bool) -> CommandCallDefinition {
		CommandCallDefinition {
			args: args.into_iter().map(String::from).collect(),
			parameters: vec![crate::config::ParameterSpec {
				name: "name".to_string(),
				param_type: "string".to_string(),
				description: None,
				required: true,
				default: None,
				location: crate::config::ParameterLocation::Body,
			}],
			allow_args_parameter: allow_args,
			timeout: None,
		}
	}

	#[test]
	fn p9_args_parameter_rejected_unless_declared() {
		let def = call(vec!["--greet", "{name}"], false);
		let args = serde_json::json!({"name": "world", "args": ["rm", "-rf", "/"]})
			.as_object()
			.cloned()
			.unwrap();
		let err = build_argv(&def, &args).unwrap_err();
		assert!(matches!(err, UpstreamError::ArgsParameterNotAllowed));
	}

	#[test]
	fn args_parameter_allowed_when_declared() {
		let def = call(vec!["--greet", "{name}"], true);
		let args = serde_json::json!({"name": "world", "args": ["--verbose"]}).as_object().cloned().unwrap();
		let argv = build_argv(&def, &args).unwrap();
		assert_eq!(argv, vec!["--greet", "world", "--verbose"]);
	}

	#[test]
	fn placeholder_substitution_renders_named_parameter() {
		let def = call(vec!["--greet", "{name}"], false);
		let args = serde_json::json!({"name": "world"}).as_object().cloned().unwrap();
		let argv = build_argv(&def, &args).unwrap();
		assert_eq!(argv, vec!["--greet", "world"]);
	}
}
