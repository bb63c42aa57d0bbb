//! End-to-end: a YAML document on disk flows through `ConfigStore::load`,
//! `ConfigValidator` (server profile), and `SecretResolver` without any
//! hand-assembled `ConfigDocument` shortcutting the real parse path.

use mcpany::config::{ConfigStore, ConfigValidator, Profile, SecretResolver};

fn write_temp_yaml(contents: &str) -> tempfile::NamedTempFile {
	let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
	std::fs::write(file.path(), contents).unwrap();
	file
}

#[test]
fn loads_validates_and_resolves_a_minimal_http_service() {
	// SAFETY: test-local environment variable, not observed by other tests.
	unsafe {
		std::env::set_var("MCPANY_TEST_CONFIG_PIPELINE_TOKEN", "s3cr3t");
	}

	let yaml = r#"
globalSettings:
  mcpListenAddress: "127.0.0.1:9090"
upstreamServices:
  - name: "billing api"
    http:
      baseUrl: "https://billing.internal.example.com"
      tools:
        - callId: get_invoice
      calls:
        get_invoice:
          path: "/invoices/{id}"
          method: GET
          parameters:
            - name: id
              location: path
    upstreamAuth:
      kind: bearer
      token:
        environmentVariable: MCPANY_TEST_CONFIG_PIPELINE_TOKEN
"#;
	let file = write_temp_yaml(yaml);
	let store = ConfigStore::with_sources([file.path()]);
	let doc = store.load().unwrap();

	assert_eq!(doc.upstream_services.len(), 1);
	assert_eq!(doc.global_settings.mcp_listen_address.as_deref(), Some("127.0.0.1:9090"));

	let mut record = doc.upstream_services.into_iter().next().unwrap();
	record.compute_derived();
	assert_eq!(record.sanitized_name(), "billing_api");

	let errors = ConfigValidator::new(Profile::Server).validate(&mcpany::config::ConfigDocument {
		global_settings: doc.global_settings.clone(),
		upstream_services: vec![record.clone()],
	});
	assert!(errors.is_empty(), "expected no validation errors, got {errors:?}");

	let auth = record.upstream_auth.expect("bearer auth configured");
	let mcpany::config::Authentication::Bearer { token } = auth else {
		panic!("expected bearer auth");
	};
	let resolved = SecretResolver::new().resolve(&token).unwrap();
	assert_eq!(resolved, "s3cr3t");

	unsafe {
		std::env::remove_var("MCPANY_TEST_CONFIG_PIPELINE_TOKEN");
	}
}

#[test]
fn unknown_top_level_field_reports_a_suggestion() {
	let file = write_temp_yaml("services: []\n");
	let store = ConfigStore::with_sources([file.path()]);
	let err = store.load().unwrap_err();
	assert!(err.to_string().contains("upstream_services"));
}
