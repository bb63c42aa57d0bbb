//! The Tool/Prompt/Resource Catalog: the uniform, protocol-agnostic
//! surface every upstream populates and every caller queries and invokes
//! through (spec §2(c), §4.9).

pub mod manager;
pub mod types;

pub use manager::{CatalogError, ItemManager};
pub use types::{BoxFuture, Prompt, PromptRenderFn, Resource, ResourceReadFn, Tool, ToolCallRequest, ToolCallResult, ToolExecuteFn};

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::GatewayError;

pub type ToolManager = ItemManager<Tool>;
pub type PromptManager = ItemManager<Prompt>;
pub type ResourceManager = ItemManager<Resource>;

/// A pre-call hook consulted by `ExecuteTool` before the driver's bound
/// closure runs; returning `Err` aborts the call with that error.
pub type Middleware = Arc<dyn Fn(&Tool, &ToolCallRequest) -> Result<(), GatewayError> + Send + Sync>;

/// The unified, protocol-agnostic registry of tools, prompts, and
/// resources across every loaded service.
#[derive(Default)]
pub struct Catalog {
	pub tools: ToolManager,
	pub prompts: PromptManager,
	pub resources: ResourceManager,
	middleware: Mutex<Vec<Middleware>>,
}

impl Catalog {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_middleware(&self, mw: impl Fn(&Tool, &ToolCallRequest) -> Result<(), GatewayError> + Send + Sync + 'static) {
		self.middleware.lock().push(Arc::new(mw));
	}

	/// The single entry point for invoking a tool: looks it up by qualified
	/// name, runs it through the middleware chain, then the driver-supplied
	/// closure (spec §4.9).
	pub async fn execute_tool(&self, qualified_name: &str, request: ToolCallRequest) -> Result<ToolCallResult, GatewayError> {
		let tool = self
			.tools
			.get(qualified_name)
			.ok_or_else(|| GatewayError::NotFound(format!("tool '{qualified_name}' not found")))?;

		let chain: Vec<Middleware> = self.middleware.lock().clone();
		for mw in &chain {
			mw(&tool, &request)?;
		}

		(tool.execute)(request).await
	}

	/// Clears every tool/prompt/resource registered by `service_id`, across
	/// all three managers. Used on service removal and as the first half of
	/// a reload's replace-in-place.
	pub fn clear_for_service(&self, service_id: &str) {
		self.tools.clear_for_service(service_id);
		self.prompts.clear_for_service(service_id);
		self.resources.clear_for_service(service_id);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn tool(name: &str, service_id: &str) -> Tool {
		Tool {
			name: name.to_string(),
			input_schema: serde_json::json!({"type": "object"}),
			output_schema: None,
			annotations: Default::default(),
			service_id: service_id.to_string(),
			execute: Arc::new(|req| Box::pin(async move { Ok(ToolCallResult::ok(req.arguments)) })),
		}
	}

	#[tokio::test]
	async fn execute_tool_not_found() {
		let catalog = Catalog::new();
		let err = catalog.execute_tool("missing", ToolCallRequest::default()).await.unwrap_err();
		assert!(matches!(err, GatewayError::NotFound(_)));
	}

	#[tokio::test]
	async fn execute_tool_runs_the_bound_closure() {
		let catalog = Catalog::new();
		catalog.tools.add("svc.echo", "svc", tool("svc.echo", "svc")).unwrap();
		let request = ToolCallRequest {
			arguments: serde_json::json!({"x": 1}),
		};
		let result = catalog.execute_tool("svc.echo", request).await.unwrap();
		assert_eq!(result.output, serde_json::json!({"x": 1}));
	}

	#[tokio::test]
	async fn middleware_can_abort_the_call() {
		let catalog = Catalog::new();
		catalog.tools.add("svc.echo", "svc", tool("svc.echo", "svc")).unwrap();
		catalog.add_middleware(|_tool, _req| Err(GatewayError::Policy(crate::error::PolicyError::ssrf_blocked("x", "HINT"))));
		let err = catalog.execute_tool("svc.echo", ToolCallRequest::default()).await.unwrap_err();
		assert!(matches!(err, GatewayError::Policy(_)));
	}

	#[test]
	fn clear_for_service_clears_all_three_managers() {
		let catalog = Catalog::new();
		catalog.tools.add("svc.t", "svc", tool("svc.t", "svc")).unwrap();
		catalog
			.prompts
			.add(
				"svc.p",
				"svc",
				Prompt {
					name: "svc.p".into(),
					description: None,
					service_id: "svc".into(),
					render: Arc::new(|_| Box::pin(async { Ok(String::new()) })),
				},
			)
			.unwrap();
		catalog.clear_for_service("svc");
		assert!(catalog.tools.is_empty());
		assert!(catalog.prompts.is_empty());
	}
}
