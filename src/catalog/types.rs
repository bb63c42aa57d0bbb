//! Runtime records the Catalog stores, as distinct from the `config`
//! module's wire-facing definitions: a [`Tool`]/[`Prompt`]/[`Resource`] is
//! what a loaded, registered service actually exposes to callers (spec §3
//! "Tool (runtime)").

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::ToolAnnotations;
use crate::error::GatewayError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A caller's request to invoke a tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallRequest {
	#[serde(default)]
	pub arguments: serde_json::Value,
}

/// The outcome of a tool call. `is_error` distinguishes an upstream-
/// reported failure (still a successful *call*) from a transport/policy
/// failure, which instead surfaces as `Err(GatewayError)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
	pub output: serde_json::Value,
	#[serde(default)]
	pub is_error: bool,
}

impl ToolCallResult {
	pub fn ok(output: serde_json::Value) -> Self {
		Self { output, is_error: false }
	}

	pub fn error(output: serde_json::Value) -> Self {
		Self { output, is_error: true }
	}
}

pub type ToolExecuteFn = Arc<dyn Fn(ToolCallRequest) -> BoxFuture<'static, Result<ToolCallResult, GatewayError>> + Send + Sync>;

/// The unified record the Catalog stores for one callable tool (spec §3).
#[derive(Clone)]
pub struct Tool {
	/// Service-qualified as `<sanitizedName>.<sanitizedToolName>`.
	pub name: String,
	pub input_schema: serde_json::Value,
	pub output_schema: Option<serde_json::Value>,
	pub annotations: ToolAnnotations,
	pub service_id: String,
	pub execute: ToolExecuteFn,
}

impl std::fmt::Debug for Tool {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Tool")
			.field("name", &self.name)
			.field("service_id", &self.service_id)
			.finish_non_exhaustive()
	}
}

pub type PromptRenderFn = Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<String, GatewayError>> + Send + Sync>;

#[derive(Clone)]
pub struct Prompt {
	pub name: String,
	pub description: Option<String>,
	pub service_id: String,
	pub render: PromptRenderFn,
}

impl std::fmt::Debug for Prompt {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Prompt")
			.field("name", &self.name)
			.field("service_id", &self.service_id)
			.finish_non_exhaustive()
	}
}

pub type ResourceReadFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<u8>, GatewayError>> + Send + Sync>;

#[derive(Clone)]
pub struct Resource {
	pub name: String,
	pub description: Option<String>,
	pub service_id: String,
	pub read: ResourceReadFn,
}

impl std::fmt::Debug for Resource {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Resource")
			.field("name", &self.name)
			.field("service_id", &self.service_id)
			.finish_non_exhaustive()
	}
}
