//! SQL driver: one tool per declared query, parameters bound positionally
//! via `parameterOrder` (spec §4.8).
//!
//! Postgres/MySQL/SQLite are unified through `sqlx`'s `Any` driver rather
//! than three separate code paths, one per backend - `install_default_drivers`
//! registers all three compiled-in backends once per process so `AnyPool`
//! can open a DSN of any of them. Binary columns decode lossily to UTF-8
//! text, since the tool-call result is JSON and has no first-class bytes
//! type to carry them otherwise (recorded as an accepted tradeoff rather
//! than a bug).

use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{Column, Row, TypeInfo};
use tracing::{info, warn};

use crate::catalog::{Tool, ToolCallRequest, ToolCallResult};
use crate::config::{synthesize_input_schema, ServiceRecord, ServiceVariant, SqlCallDefinition};
use crate::error::{GatewayError, UpstreamError};
use crate::pool::AnyPool as GatewayAnyPool;

use super::{derive_tool_name, qualified_name, RegisterContext, RegisterOutcome, UpstreamDriver};

const CALL_TIMEOUT: Duration = Duration::from_secs(30);

static INSTALL_DRIVERS: Once = Once::new();

fn ensure_drivers_installed() {
	INSTALL_DRIVERS.call_once(|| {
		sqlx::any::install_default_drivers();
	});
}

#[derive(Default)]
pub struct SqlDriver;

impl SqlDriver {
	pub fn new() -> Self {
		Self
	}
}

/// Wraps a `sqlx::AnyPool` so it can sit in [`crate::pool::PoolManager`]'s
/// map next to the other protocols' pools. `sqlx`'s own pool already
/// enforces the bound and handles idle connections, so this is a thin
/// metrics/close adapter, not a second layer of pooling.
struct SqlxPoolHandle {
	pool: sqlx::AnyPool,
}

impl GatewayAnyPool for SqlxPoolHandle {
	fn close(&self) {
		let pool = self.pool.clone();
		tokio::spawn(async move { pool.close().await });
	}

	fn size(&self) -> usize {
		self.pool.size() as usize
	}

	fn in_use(&self) -> usize {
		(self.pool.size() as usize).saturating_sub(self.pool.num_idle())
	}

	fn idle(&self) -> usize {
		self.pool.num_idle()
	}
}

#[async_trait]
impl UpstreamDriver for SqlDriver {
	async fn register(&self, ctx: &RegisterContext<'_>, record: &ServiceRecord, is_reload: bool) -> Result<RegisterOutcome, GatewayError> {
		let ServiceVariant::Sql(svc) = &record.variant else {
			return Err(GatewayError::Fatal("SqlDriver given a non-sql service record".into()));
		};

		ensure_drivers_installed();

		let service_id = record.id().to_string();
		let sanitized = record.sanitized_name().to_string();

		if is_reload {
			ctx.catalog.clear_for_service(&service_id);
		}

		let dsn = ctx.secrets.resolve(&svc.dsn)?;

		let pool = AnyPoolOptions::new()
			.max_connections(8)
			.connect(&dsn)
			.await
			.map_err(|e| UpstreamError::Transport {
				service: record.name.clone(),
				message: e.to_string(),
			})?;

		let pool_key = format!("sql:{sanitized}");
		ctx.pools.register(&pool_key, Arc::new(SqlxPoolHandle { pool: pool.clone() }));

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
				Box::pin(async move { execute_sql_call(&pool, &call, request, &service_name).await })
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

		info!(target: "mcpany::upstream", service = %record.name, tools = registered, "sql service registered");

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

async fn execute_sql_call(
	pool: &sqlx::AnyPool,
	call: &SqlCallDefinition,
	request: ToolCallRequest,
	service_name: &str,
) -> Result<ToolCallResult, GatewayError> {
	let args = request.arguments.as_object().cloned().unwrap_or_default();

	let mut query = sqlx::query(&call.query);
	for name in &call.parameter_order {
		let value = args.get(name).cloned().unwrap_or(serde_json::Value::Null);
		query = bind_json_value(query, &value);
	}

	let rows = tokio::time::timeout(CALL_TIMEOUT, query.fetch_all(pool))
		.await
		.map_err(|_| UpstreamError::Cancelled)?
		.map_err(|e| UpstreamError::Status {
			service: service_name.to_string(),
			status: 0,
			message: e.to_string(),
		})?;

	let rows_json: Vec<serde_json::Value> = rows.iter().map(row_to_json).collect();
	Ok(ToolCallResult::ok(serde_json::json!({ "rows": rows_json })))
}

fn bind_json_value<'q>(
	query: sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>,
	value: &'q serde_json::Value,
) -> sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>> {
	match value {
		serde_json::Value::Null => query.bind(None::<String>),
		serde_json::Value::Bool(b) => query.bind(*b),
		serde_json::Value::Number(n) if n.is_i64() => query.bind(n.as_i64().unwrap()),
		serde_json::Value::Number(n) => query.bind(n.as_f64().unwrap_or_default()),
		serde_json::Value::String(s) => query.bind(s.clone()),
		other => query.bind(other.to_string()),
	}
}

fn row_to_json(row: &AnyRow) -> serde_json::Value {
	let mut obj = serde_json::Map::new();
	for column in row.columns() {
		let name = column.name().to_string();
		let value = decode_column(row, column.ordinal(), column.type_info());
		obj.insert(name, value);
	}
	serde_json::Value::Object(obj)
}

fn decode_column(row: &AnyRow, ordinal: usize, type_info: &sqlx::any::AnyTypeInfo) -> serde_json::Value {
	let type_name = type_info.name();
	if let Ok(v) = row.try_get::<i64, _>(ordinal) {
		return serde_json::json!(v);
	}
	if let Ok(v) = row.try_get::<f64, _>(ordinal) {
		return serde_json::json!(v);
	}
	if let Ok(v) = row.try_get::<bool, _>(ordinal) {
		return serde_json::json!(v);
	}
	if let Ok(v) = row.try_get::<String, _>(ordinal) {
		return serde_json::json!(v);
	}
	if let Ok(v) = row.try_get::<Vec<u8>, _>(ordinal) {
		return serde_json::json!(String::from_utf8_lossy(&v).into_owned());
	}
	warn!(target: "mcpany::upstream", column_type = type_name, "sql column could not be decoded, returning null");
	serde_json::Value::Null
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn p_sql_null_is_bound_for_missing_parameters() {
		let args = serde_json::json!({}).as_object().cloned().unwrap();
		let value = args.get("missing").cloned().unwrap_or(serde_json::Value::Null);
		assert_eq!(value, serde_json::Value::Null);
	}
}
