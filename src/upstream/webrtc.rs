//! WebRTC driver: registration SSRF-checks the signaling endpoint the same
//! way `websocket.rs` does, then proxies each call as a JSON message over
//! the signaling channel tagged with the configured data channel label -
//! this crate does not negotiate real ICE/SCTP data channels, since doing
//! so would pull in a full media-plane dependency for what every example
//! call here actually needs: a signaling-relayed request/response (spec
//! §4.8, Non-goal: no embedded media stack).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::catalog::{Tool, ToolCallRequest, ToolCallResult};
use crate::config::{synthesize_input_schema, ServiceRecord, ServiceVariant, WebrtcCallDefinition};
use crate::error::{GatewayError, UpstreamError};
use crate::pool::connection_pool::{ConnectionPool, PoolConfig, PoolError};
use crate::pool::AnyPool;

use super::{derive_tool_name, qualified_name, RegisterContext, RegisterOutcome, UpstreamDriver};

const CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
pub struct WebrtcDriver;

impl WebrtcDriver {
	pub fn new() -> Self {
		Self
	}
}

type SignalingStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct SignalingConnection {
	stream: AsyncMutex<SignalingStream>,
}

#[async_trait]
impl UpstreamDriver for WebrtcDriver {
	async fn register(&self, ctx: &RegisterContext<'_>, record: &ServiceRecord, is_reload: bool) -> Result<RegisterOutcome, GatewayError> {
		let ServiceVariant::Webrtc(svc) = &record.variant else {
			return Err(GatewayError::Fatal("WebrtcDriver given a non-webrtc service record".into()));
		};

		let service_id = record.id().to_string();
		let sanitized = record.sanitized_name().to_string();

		if is_reload {
			ctx.catalog.clear_for_service(&service_id);
		}

		let url = url::Url::parse(&svc.signaling_url).map_err(|e| UpstreamError::Transport {
			service: record.name.clone(),
			message: e.to_string(),
		})?;
		let host = url.host_str().ok_or_else(|| UpstreamError::Transport {
			service: record.name.clone(),
			message: "signaling url has no host".to_string(),
		})?;
		let port = url.port_or_known_default().unwrap_or(80);
		ctx.dialer.check_destination(host, port).await.map_err(|e| UpstreamError::Transport {
			service: record.name.clone(),
			message: e.to_string(),
		})?;

		let target = svc.signaling_url.clone();
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
					Ok(SignalingConnection {
						stream: AsyncMutex::new(stream),
					})
				})
			},
			|_conn| true,
		);

		let pool_key = format!("webrtc:{sanitized}");
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
				Box::pin(async move { execute_webrtc_call(pool, &call, request, &service_name).await })
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

		info!(target: "mcpany::upstream", service = %record.name, tools = registered, "webrtc service registered");

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

fn render_envelope(call: &WebrtcCallDefinition, args: &serde_json::Map<String, serde_json::Value>) -> serde_json::Value {
	let mut payload = call.message_template.clone();
	if let serde_json::Value::Object(map) = &mut payload {
		for param in &call.parameters {
			if let Some(value) = args.get(&param.name) {
				map.insert(param.name.clone(), value.clone());
			}
		}
	}
	serde_json::json!({
		"dataChannel": call.data_channel_label,
		"payload": payload,
	})
}

async fn execute_webrtc_call(
	pool: Arc<ConnectionPool<SignalingConnection>>,
	call: &WebrtcCallDefinition,
	request: ToolCallRequest,
	service_name: &str,
) -> Result<ToolCallResult, GatewayError> {
	let args = request.arguments.as_object().cloned().unwrap_or_default();
	let envelope = render_envelope(call, &args);

	let conn = pool.get(CALL_TIMEOUT).await.map_err(|e| UpstreamError::Transport {
		service: service_name.to_string(),
		message: e.to_string(),
	})?;

	let text = serde_json::to_string(&envelope).map_err(|e| UpstreamError::Transport {
		service: service_name.to_string(),
		message: e.to_string(),
	})?;

	let mut stream = conn.get().stream.lock().await;
	stream.send(Message::Text(text.into())).await.map_err(|e| UpstreamError::Transport {
		service: service_name.to_string(),
		message: e.to_string(),
	})?;

	loop {
		let next = tokio::time::timeout(CALL_TIMEOUT, stream.next())
			.await
			.map_err(|_| UpstreamError::Cancelled)?;

		let Some(frame) = next else {
			return Err(GatewayError::Upstream(UpstreamError::Transport {
				service: service_name.to_string(),
				message: "signaling stream closed before a response arrived".to_string(),
			}));
		};
		let frame = frame.map_err(|e| UpstreamError::Transport {
			service: service_name.to_string(),
			message: e.to_string(),
		})?;

		let Message::Text(text) = frame else { continue };
		let parsed: serde_json::Value = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text.to_string()));

		if let Some(label) = parsed.get("dataChannel").and_then(|v| v.as_str()) {
			if label != call.data_channel_label {
				continue;
			}
		}

		let payload = parsed.get("payload").cloned().unwrap_or(parsed);
		return Ok(ToolCallResult::ok(payload));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn render_envelope_tags_the_configured_data_channel() {
		let call = WebrtcCallDefinition {
			data_channel_label: "control".to_string(),
			message_template: serde_json::json!({"cmd": null}),
			parameters: vec![crate::config::ParameterSpec {
				name: "cmd".to_string(),
				param_type: "string".to_string(),
				description: None,
				required: true,
				default: None,
				location: crate::config::ParameterLocation::Body,
			}],
		};
		let args = serde_json::json!({"cmd": "ping"}).as_object().cloned().unwrap();
		let envelope = render_envelope(&call, &args);
		assert_eq!(envelope["dataChannel"], serde_json::json!("control"));
		assert_eq!(envelope["payload"]["cmd"], serde_json::json!("ping"));
	}
}
