//! End-to-end: an HTTP service record registered through `HttpDriver`
//! actually reaches a live server and projects its response, with the
//! SSRF dialer wired in exactly as the loader wires it in production.

use std::collections::HashMap;

use mcpany::catalog::{Catalog, ToolCallRequest};
use mcpany::config::{
	HttpCallDefinition, HttpService, ParameterLocation, ParameterSpec, SecretResolver, ServiceRecord, ServiceVariant, ToolDefinition,
};
use mcpany::net::{DialPolicy, SafeDialer, SafeHttpClient};
use mcpany::pool::PoolManager;
use mcpany::upstream::http::HttpDriver;
use mcpany::upstream::{RegisterContext, UpstreamDriver};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn loopback_policy() -> DialPolicy {
	// wiremock binds to 127.0.0.1; the default policy would refuse it as an
	// SSRF target, so tests opt in the same way an operator would.
	std::env::set_var("MCPANY_ALLOW_LOOPBACK_RESOURCES", "true");
	let policy = DialPolicy::from_env();
	std::env::remove_var("MCPANY_ALLOW_LOOPBACK_RESOURCES");
	policy
}

fn http_service_record(base_url: String) -> ServiceRecord {
	let mut calls = HashMap::new();
	calls.insert(
		"get_widget".to_string(),
		HttpCallDefinition {
			path: "/widgets/{id}".to_string(),
			method: "GET".to_string(),
			parameters: vec![ParameterSpec {
				name: "id".to_string(),
				param_type: "string".to_string(),
				description: None,
				required: true,
				default: None,
				location: ParameterLocation::Path,
			}],
			response_extractor: Some("$.data".to_string()),
		},
	);

	let mut record = ServiceRecord {
		name: "widgets".to_string(),
		variant: ServiceVariant::Http(HttpService {
			base_url,
			tools: vec![ToolDefinition {
				name: Some("get_widget".to_string()),
				description: None,
				call_id: "get_widget".to_string(),
				disable: false,
				annotations: Default::default(),
			}],
			resources: vec![],
			prompts: vec![],
			calls,
			health_check: None,
		}),
		disable: false,
		config_error: None,
		upstream_auth: None,
		cache: None,
		call_policies: vec![],
		id: None,
		sanitized_name: None,
	};
	record.compute_derived();
	record
}

#[tokio::test]
async fn registers_and_executes_a_projected_http_call() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/widgets/42"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": { "name": "gizmo" } })))
		.mount(&server)
		.await;

	let record = http_service_record(server.uri());

	let catalog = Catalog::new();
	let pools = PoolManager::new();
	let dialer = SafeDialer::new(loopback_policy());
	let http_client = SafeHttpClient::new(loopback_policy()).unwrap();
	let secrets = SecretResolver::new();

	let ctx = RegisterContext {
		catalog: &catalog,
		pools: &pools,
		http_client: &http_client,
		dialer: &dialer,
		secrets: &secrets,
	};

	let driver = HttpDriver::new();
	let outcome = driver.register(&ctx, &record, false).await.unwrap();
	assert_eq!(outcome.tools_registered, 1);

	let result = catalog
		.execute_tool("widgets.get_widget", ToolCallRequest {
			arguments: serde_json::json!({ "id": "42" }),
		})
		.await
		.unwrap();

	assert!(!result.is_error);
	assert_eq!(result.output, serde_json::json!({ "name": "gizmo" }));
}

#[tokio::test]
async fn upstream_error_status_surfaces_as_gateway_error() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/widgets/missing"))
		.respond_with(ResponseTemplate::new(404).set_body_string("not found"))
		.mount(&server)
		.await;

	let record = http_service_record(server.uri());

	let catalog = Catalog::new();
	let pools = PoolManager::new();
	let dialer = SafeDialer::new(loopback_policy());
	let http_client = SafeHttpClient::new(loopback_policy()).unwrap();
	let secrets = SecretResolver::new();

	let ctx = RegisterContext {
		catalog: &catalog,
		pools: &pools,
		http_client: &http_client,
		dialer: &dialer,
		secrets: &secrets,
	};

	HttpDriver::new().register(&ctx, &record, false).await.unwrap();

	let err = catalog
		.execute_tool("widgets.get_widget", ToolCallRequest {
			arguments: serde_json::json!({ "id": "missing" }),
		})
		.await
		.unwrap_err();

	assert!(err.to_string().contains("404") || err.to_string().to_lowercase().contains("not found"));
}
