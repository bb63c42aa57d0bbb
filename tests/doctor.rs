//! Doctor fans checks out across services instead of running them in
//! sequence: five services each answering after a fixed delay should
//! together take roughly one delay's worth of wall-clock, not five.

use std::time::{Duration, Instant};

use mcpany::config::{ConfigDocument, HttpService, SecretResolver, ServiceRecord, ServiceVariant};
use mcpany::diagnostics::Doctor;
use mcpany::net::{DialPolicy, SafeDialer, SafeHttpClient};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn loopback_policy() -> DialPolicy {
	std::env::set_var("MCPANY_ALLOW_LOOPBACK_RESOURCES", "true");
	let policy = DialPolicy::from_env();
	std::env::remove_var("MCPANY_ALLOW_LOOPBACK_RESOURCES");
	policy
}

fn http_record(name: &str, base_url: String) -> ServiceRecord {
	let mut record = ServiceRecord {
		name: name.to_string(),
		variant: ServiceVariant::Http(HttpService {
			base_url,
			tools: vec![],
			resources: vec![],
			prompts: vec![],
			calls: Default::default(),
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
async fn p8_five_slow_services_complete_in_parallel() {
	const DELAY: Duration = Duration::from_millis(200);
	const SERVICE_COUNT: usize = 5;

	let mut services = Vec::with_capacity(SERVICE_COUNT);
	// Each MockServer is kept alive for the test's duration by staying in
	// this Vec; dropping it early would close the listening socket.
	let mut servers = Vec::with_capacity(SERVICE_COUNT);
	for i in 0..SERVICE_COUNT {
		let server = MockServer::start().await;
		Mock::given(method("HEAD"))
			.respond_with(ResponseTemplate::new(200).set_delay(DELAY))
			.mount(&server)
			.await;
		services.push(http_record(&format!("svc-{i}"), server.uri()));
		servers.push(server);
	}

	let doc = ConfigDocument {
		global_settings: Default::default(),
		upstream_services: services,
	};

	let dialer = SafeDialer::new(loopback_policy());
	let http_client = SafeHttpClient::new(loopback_policy()).unwrap();
	let secrets = SecretResolver::new();
	let doctor = Doctor {
		http_client: &http_client,
		dialer: &dialer,
		secrets: &secrets,
	};

	let start = Instant::now();
	let results = doctor.run(&doc).await;
	let elapsed = start.elapsed();

	assert_eq!(results.len(), SERVICE_COUNT);
	for result in &results {
		assert_eq!(result.status, mcpany::diagnostics::CheckStatus::Ok, "{result:?}");
	}
	assert!(
		elapsed < Duration::from_millis(800),
		"expected parallel fan-out well under {SERVICE_COUNT} * {DELAY:?}, took {elapsed:?}"
	);
}
