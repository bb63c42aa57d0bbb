//! WebSocket driver: one tool per declared call, sent as a JSON message
//! built from a template plus bound parameters, with the response matched
//! either by a correlation field or by the next frame received (spec
//! §4.8).
//!
//! Registration SSRF-checks the target host the same way `http.rs` and
//! `grpc.rs` probe theirs (`SafeDialer::check_destination`), then hands
//! the actual handshake to `tokio_tungstenite`, which owns the socket from
//! there - the same split `net::dialer` documents between policy
//! enforcement and transport ownership.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::catalog::{Tool, ToolCallRequest, ToolCallResult};
use crate::config::{synthesize_input_schema, ServiceRecord, ServiceVariant, WebsocketCallDefinition};
use crate::error::{GatewayError, UpstreamError};
use crate::pool::connection_pool::{ConnectionPool, PoolConfig, PoolError};
use crate::pool::AnyPool;

use super::{derive_tool_name, qualified_name, RegisterContext, RegisterOutcome, UpstreamDriver};

const CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
pub struct WebsocketDriver;

impl WebsocketDriver {
	pub fn new() -> Self {
		Self
	}
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// One shared, mutex-serialized connection per service: concurrent tool
/// calls on the same WebSocket take turns sending/receiving rather than
/// racing on the same stream.
struct WsConnection {
	stream: AsyncMutex<WsStream>,
}

#[async_trait]
impl UpstreamDriver for WebsocketDriver {
	async fn register(&self, ctx: &RegisterContext<'_>, record: &ServiceRecord, is_reload: bool) -> Result<RegisterOutcome, GatewayError> {
		let ServiceVariant::Websocket(svc) = &record.variant else {
			return Err(GatewayError::Fatal("WebsocketDriver given a non-websocket service record".into()));
		};

		let service_id = record.id().to_string();
		let sanitized = record.sanitized_name().to_string();

		if is_reload {
			ctx.catalog.clear_for_service(&service_id);
		}

		let url = url::Url::parse(&svc.url).map_err(|e| UpstreamError::Transport {
			service: record.name.clone(),
			message: e.to_string(),
		})?;
		let host = url.host_str().ok_or_else(|| UpstreamError::Transport {
			service: record.name.clone(),
			message: "websocket url has no host".to_string(),
		})?;
		let port = url.port_or_known_default().unwrap_or(80);
		ctx.dialer.check_destination(host, port).await.map_err(|e| UpstreamError::Transport {
			service: record.name.clone(),
			message: e.to_string(),
		})?;

		let target = svc.url.clone();
		let pool = ConnectionPool::new(
			PoolConfig {
				min_size: 0,
				max_size: 1,
				idle_timeout: Duration::from_secs(600),
			},
			move || {
				let target = target.clone();
				Box::pin(async move {
					let (stream, _response) = tokio_tungstenite::connect_async(&target)
						.await
						.map_err(|e| PoolError::Factory(e.to_string()))?;
					Ok(WsConnection {
						stream: AsyncMutex::new(stream),
					})
				})
			},
			|_conn| true,
		);

		let pool_key = format!("websocket:{sanitized}");
		ctx.pools.register(&pool_key, pool.clone() as Arc<dyn AnyPool>);

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
			let bound_pool = pool.clone();
			let bound_service_name = record.name.clone();

			let execute: crate::catalog::ToolExecuteFn = Arc::new(move |request: ToolCallRequest| {
				let call = bound_call.clone();
				let pool = bound_pool.clone();
				let service_name = bound_service_name.clone();
				Box::pin(async move { execute_websocket_call(pool, &call, request, &service_name).await })
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

		info!(target: "mcpany::upstream", service = %record.name, tools = registered, "websocket service registered");

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

fn render_template(template: &serde_json::Value, args: &serde_json::Map<String, serde_json::Value>, params: &[crate::config::ParameterSpec]) -> serde_json::Value {
	let mut out = template.clone();
	if let serde_json::Value::Object(map) = &mut out {
		for param in params {
			if let Some(value) = args.get(&param.name) {
				map.insert(param.name.clone(), value.clone());
			}
		}
	}
	out
}

async fn execute_websocket_call(
	pool: Arc<ConnectionPool<WsConnection>>,
	call: &WebsocketCallDefinition,
	request: ToolCallRequest,
	service_name: &str,
) -> Result<ToolCallResult, GatewayError> {
	let args = request.arguments.as_object().cloned().unwrap_or_default();
	let message = render_template(&call.message_template, &args, &call.parameters);

	let conn = pool.get(CALL_TIMEOUT).await.map_err(|e| UpstreamError::Transport {
		service: service_name.to_string(),
		message: e.to_string(),
	})?;

	let text = serde_json::to_string(&message).map_err(|e| UpstreamError::Transport {
		service: service_name.to_string(),
		message: e.to_string(),
	})?;

	let mut stream = conn.get().stream.lock().await;
	stream.send(Message::Text(text.into())).await.map_err(|e| UpstreamError::Transport {
		service: service_name.to_string(),
		message: e.to_string(),
	})?;

	let deadline = tokio::time::Instant::now() + CALL_TIMEOUT;
	loop {
		let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
		let next = tokio::time::timeout(remaining, stream.next())
			.await
			.map_err(|_| UpstreamError::Cancelled)?;

		let Some(frame) = next else {
			return Err(GatewayError::Upstream(UpstreamError::Transport {
				service: service_name.to_string(),
				message: "websocket stream closed before a response arrived".to_string(),
			}));
		};
		let frame = frame.map_err(|e| UpstreamError::Transport {
			service: service_name.to_string(),
			message: e.to_string(),
		})?;

		let Message::Text(text) = frame else { continue };
		let parsed: serde_json::Value = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text.to_string()));

		if let Some(field) = &call.correlation_field {
			let expected = args.get(field);
			let actual = parsed.get(field);
			if expected.is_some() && expected != actual {
				continue;
			}
		}

		return Ok(ToolCallResult::ok(parsed));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn render_template_overlays_parameters_onto_object_template() {
		let template = serde_json::json!({"type": "subscribe", "channel": null});
		let params = vec![crate::config::ParameterSpec {
			name: "channel".to_string(),
			param_type: "string".to_string(),
			description: None,
			required: true,
			default: None,
			location: crate::config::ParameterLocation::Body,
		}];
		let args = serde_json::json!({"channel": "orders"}).as_object().cloned().unwrap();
		let rendered = render_template(&template, &args, &params);
		assert_eq!(rendered["channel"], serde_json::json!("orders"));
		assert_eq!(rendered["type"], serde_json::json!("subscribe"));
	}
}
