//! UpstreamFactory: dispatches a [`ServiceRecord`]'s variant tag to the
//! driver that knows how to register it (spec §4.8).

use std::sync::Arc;

use crate::config::{ServiceRecord, ServiceVariant};

use super::command::CommandDriver;
use super::filesystem::FilesystemDriver;
use super::graphql::GraphqlDriver;
use super::grpc::GrpcDriver;
use super::http::HttpDriver;
use super::mcp::McpDriver;
use super::openapi::OpenapiDriver;
use super::sql::SqlDriver;
use super::webrtc::WebrtcDriver;
use super::websocket::WebsocketDriver;
use super::{DriverArc, UpstreamDriver};

/// Holds one instance of each protocol driver and routes a service record
/// to the matching one. Drivers are stateless beyond their own `register`
/// logic, so one shared instance per protocol is sufficient.
pub struct UpstreamFactory {
	http: DriverArc,
	graphql: DriverArc,
	openapi: DriverArc,
	grpc: DriverArc,
	websocket: DriverArc,
	webrtc: DriverArc,
	sql: DriverArc,
	mcp: DriverArc,
	command: DriverArc,
	filesystem: DriverArc,
}

impl Default for UpstreamFactory {
	fn default() -> Self {
		Self {
			http: Arc::new(HttpDriver::new()),
			graphql: Arc::new(GraphqlDriver::new()),
			openapi: Arc::new(OpenapiDriver::new()),
			grpc: Arc::new(GrpcDriver::new()),
			websocket: Arc::new(WebsocketDriver::new()),
			webrtc: Arc::new(WebrtcDriver::new()),
			sql: Arc::new(SqlDriver::new()),
			mcp: Arc::new(McpDriver::new()),
			command: Arc::new(CommandDriver::new()),
			filesystem: Arc::new(FilesystemDriver::new()),
		}
	}
}

impl UpstreamFactory {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the driver for `record`'s variant. `Vector` services proxy
	/// through the same call-mapping as plain HTTP (spec §4.8 notes no
	/// protocol specifics beyond that), so they share `HttpDriver`'s
	/// sibling, not a dedicated one.
	pub fn driver_for(&self, record: &ServiceRecord) -> DriverArc {
		match &record.variant {
			ServiceVariant::Http(_) | ServiceVariant::Vector(_) => self.http.clone(),
			ServiceVariant::Graphql(_) => self.graphql.clone(),
			ServiceVariant::Openapi(_) => self.openapi.clone(),
			ServiceVariant::Grpc(_) => self.grpc.clone(),
			ServiceVariant::Websocket(_) => self.websocket.clone(),
			ServiceVariant::Webrtc(_) => self.webrtc.clone(),
			ServiceVariant::Sql(_) => self.sql.clone(),
			ServiceVariant::Mcp(_) => self.mcp.clone(),
			ServiceVariant::CommandLine(_) => self.command.clone(),
			ServiceVariant::Filesystem(_) => self.filesystem.clone(),
		}
	}

	pub async fn shutdown_all(&self) -> Result<(), crate::error::GatewayError> {
		for driver in [
			&self.http,
			&self.graphql,
			&self.openapi,
			&self.grpc,
			&self.websocket,
			&self.webrtc,
			&self.sql,
			&self.mcp,
			&self.command,
			&self.filesystem,
		] {
			driver.shutdown().await?;
		}
		Ok(())
	}
}
