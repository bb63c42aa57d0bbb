//! Filesystem driver: exposes read/list tools whose paths are constrained
//! to a declared virtual root (spec §4.8). Any caller-supplied path that
//! would escape the root via `..` (or an absolute path that resolves
//! outside it) is refused before any I/O happens.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::catalog::{Tool, ToolCallRequest, ToolCallResult};
use crate::config::{synthesize_input_schema, FilesystemCallDefinition, FilesystemOperation, ServiceRecord, ServiceVariant};
use crate::error::{GatewayError, PolicyError, UpstreamError};

use super::{derive_tool_name, qualified_name, RegisterContext, RegisterOutcome, UpstreamDriver};

#[derive(Default)]
pub struct FilesystemDriver;

impl FilesystemDriver {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl UpstreamDriver for FilesystemDriver {
	async fn register(&self, ctx: &RegisterContext<'_>, record: &ServiceRecord, is_reload: bool) -> Result<RegisterOutcome, GatewayError> {
		let ServiceVariant::Filesystem(svc) = &record.variant else {
			return Err(GatewayError::Fatal("FilesystemDriver given a non-filesystem service record".into()));
		};

		let service_id = record.id().to_string();
		let sanitized = record.sanitized_name().to_string();

		if is_reload {
			ctx.catalog.clear_for_service(&service_id);
		}

		let roots = svc.root_paths.clone();

		let mut registered = 0usize;
		for (index, tool_def) in svc.tools.iter().enumerate() {
			if tool_def.disable {
				continue;
			}
			let Some(call) = svc.calls.get(&tool_def.call_id) else {
				warn!(target: "mcpany::upstream", service = %record.name, call_id = %tool_def.call_id, "tool references missing call_id, skipping");
				continue;
			};
			let Some(root_path) = roots.get(&call.root) else {
				warn!(target: "mcpany::upstream", service = %record.name, root = %call.root, "call references undeclared root, skipping");
				continue;
			};

			let tool_name = derive_tool_name(&tool_def.name, &tool_def.description, index);
			let qualified = qualified_name(&sanitized, &tool_name);
			let input_schema = synthesize_input_schema(&call.parameters);

			let bound_call = call.clone();
			let bound_root = PathBuf::from(shellexpand::tilde(root_path).into_owned());
			let bound_service_name = record.name.clone();

			let execute: crate::catalog::ToolExecuteFn = Arc::new(move |request: ToolCallRequest| {
				let call = bound_call.clone();
				let root = bound_root.clone();
				let service_name = bound_service_name.clone();
				Box::pin(async move { execute_filesystem_call(&root, &call, request, &service_name).await })
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

		info!(target: "mcpany::upstream", service = %record.name, tools = registered, "filesystem service registered");

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

/// Joins `root` with the caller-supplied relative `requested` path,
/// rejecting any `..`/prefix component before touching the filesystem.
/// Rejects absolute `requested` paths too, since those are an escape
/// attempt by definition under a virtual root.
fn resolve_within_root(root: &Path, requested: &str) -> Result<PathBuf, PolicyError> {
	let requested_path = Path::new(requested);
	for component in requested_path.components() {
		match component {
			Component::Normal(_) | Component::CurDir => {},
			Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
				return Err(PolicyError {
					message: format!("path '{requested}' attempts to escape its declared root"),
					remediation: Some("request a path relative to the declared root, without '..' components".to_string()),
				});
			},
		}
	}
	Ok(root.join(requested_path))
}

async fn execute_filesystem_call(
	root: &Path,
	call: &FilesystemCallDefinition,
	request: ToolCallRequest,
	service_name: &str,
) -> Result<ToolCallResult, GatewayError> {
	let args = request.arguments.as_object().cloned().unwrap_or_default();
	let requested_path = args.get("path").and_then(|v| v.as_str()).unwrap_or("");

	let resolved = resolve_within_root(root, requested_path)?;

	match call.operation {
		FilesystemOperation::Read => {
			let contents = tokio::fs::read_to_string(&resolved).await.map_err(|e| UpstreamError::Transport {
				service: service_name.to_string(),
				message: format!("failed to read '{requested_path}': {e}"),
			})?;
			Ok(ToolCallResult::ok(serde_json::json!({ "contents": contents })))
		},
		FilesystemOperation::List => {
			let mut entries = Vec::new();
			let mut dir = tokio::fs::read_dir(&resolved).await.map_err(|e| UpstreamError::Transport {
				service: service_name.to_string(),
				message: format!("failed to list '{requested_path}': {e}"),
			})?;
			while let Some(entry) = dir.next_entry().await.map_err(|e| UpstreamError::Transport {
				service: service_name.to_string(),
				message: e.to_string(),
			})? {
				let name = entry.file_name().to_string_lossy().into_owned();
				let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
				entries.push(serde_json::json!({ "name": name, "isDirectory": is_dir }));
			}
			Ok(ToolCallResult::ok(serde_json::json!({ "entries": entries })))
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn p_filesystem_parent_dir_escape_is_refused() {
		let root = Path::new("/srv/data");
		let err = resolve_within_root(root, "../../etc/passwd").unwrap_err();
		assert!(err.message.contains("escape"));
	}

	#[test]
	fn p_filesystem_absolute_path_is_refused() {
		let root = Path::new("/srv/data");
		let err = resolve_within_root(root, "/etc/passwd").unwrap_err();
		assert!(err.message.contains("escape"));
	}

	#[test]
	fn relative_path_within_root_is_accepted() {
		let root = Path::new("/srv/data");
		let resolved = resolve_within_root(root, "reports/2024.csv").unwrap();
		assert_eq!(resolved, PathBuf::from("/srv/data/reports/2024.csv"));
	}
}
