//! ConfigStore: reads an ordered list of file paths (and optionally URLs)
//! and returns a single merged config document (spec §4.1).

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use super::types::ConfigDocument;

#[derive(Error, Debug)]
pub enum ConfigLoadError {
	#[error("failed to read config file '{path}': {source}")]
	Io {
		path: String,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse '{path}': {hint}\n{source}")]
	Parse {
		path: String,
		hint: String,
		#[source]
		source: ParseErrorKind,
	},

	#[error(
		"unknown top-level field '{field}'. Did you mean '{suggestion}'?"
	)]
	UnknownFieldWithSuggestion { field: String, suggestion: String },

	#[error("failed to fetch config from '{source}': {message}")]
	Http { source: String, message: String },

	#[error("source '{0}' is an http(s) URL; use ConfigStore::load_async to load remote sources")]
	HttpSourceRequiresAsync(String),

	#[error("no config sources provided")]
	NoSources,
}

#[derive(Error, Debug)]
pub enum ParseErrorKind {
	#[error(transparent)]
	Yaml(#[from] serde_yaml::Error),
	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

/// Known historical/likely misspellings of top-level keys, with a
/// user-facing suggestion (SPEC_FULL §4.2.1).
const KNOWN_MISSPELLINGS: &[(&str, &str)] = &[
	("services", "upstream_services"),
	("mcpListenAddress", "global_settings.mcp_listen_address"),
	("port", "global_settings.mcp_listen_address or grpc_port"),
];

/// Loads and merges an ordered list of configuration sources into a single
/// [`ConfigDocument`]. Later sources override repeated top-level scalar
/// keys; `upstream_services` lists are concatenated in source order.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
	sources: Vec<PathBuf>,
}

impl ConfigStore {
	pub fn new() -> Self {
		Self { sources: Vec::new() }
	}

	pub fn with_sources(sources: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
		Self {
			sources: sources.into_iter().map(Into::into).collect(),
		}
	}

	pub fn add_source(&mut self, path: impl Into<PathBuf>) -> &mut Self {
		self.sources.push(path.into());
		self
	}

	pub fn sources(&self) -> &[PathBuf] {
		&self.sources
	}

	/// Reads every configured source and merges them into one document.
	/// Rejects http(s) sources: fetching those needs an async runtime, so
	/// they only load through [`ConfigStore::load_async`].
	pub fn load(&self) -> Result<ConfigDocument, ConfigLoadError> {
		if self.sources.is_empty() {
			return Err(ConfigLoadError::NoSources);
		}

		let mut merged = ConfigDocument::default();
		for path in &self.sources {
			if let Some(url) = http_source_url(path) {
				return Err(ConfigLoadError::HttpSourceRequiresAsync(url.to_string()));
			}
			let doc = self.load_one(path)?;
			merged.global_settings = merge_global_settings(merged.global_settings, doc.global_settings);
			merged.upstream_services.extend(doc.upstream_services);
		}

		info!(
			target: "mcpany::config",
			services = merged.upstream_services.len(),
			"merged configuration from {} source(s)",
			self.sources.len()
		);

		Ok(merged)
	}

	/// Like [`ConfigStore::load`], but sources whose path looks like an
	/// `http://`/`https://` URL are fetched over HTTP (spec §4.1's "and
	/// optionally URLs") instead of read from disk.
	pub async fn load_async(&self) -> Result<ConfigDocument, ConfigLoadError> {
		if self.sources.is_empty() {
			return Err(ConfigLoadError::NoSources);
		}

		let mut merged = ConfigDocument::default();
		for path in &self.sources {
			let doc = self.load_one_async(path).await?;
			merged.global_settings = merge_global_settings(merged.global_settings, doc.global_settings);
			merged.upstream_services.extend(doc.upstream_services);
		}

		info!(
			target: "mcpany::config",
			services = merged.upstream_services.len(),
			"merged configuration from {} source(s)",
			self.sources.len()
		);

		Ok(merged)
	}

	fn load_one(&self, path: &Path) -> Result<ConfigDocument, ConfigLoadError> {
		let raw = std::fs::read_to_string(path).map_err(|e| ConfigLoadError::Io {
			path: path.display().to_string(),
			source: e,
		})?;

		check_unknown_top_level_fields(&raw, path)?;

		parse_document(&raw, path)
	}

	async fn load_one_async(&self, path: &Path) -> Result<ConfigDocument, ConfigLoadError> {
		let Some(url) = http_source_url(path) else {
			return self.load_one(path);
		};

		let raw = fetch_http_source(url).await?;
		check_unknown_top_level_fields(&raw, path)?;
		parse_document(&raw, path)
	}
}

/// Whether `path` is really an `http(s)://` URL passed in as a source
/// rather than a filesystem path. Mirrors the reference gateway's
/// `RegistryClient::from_uri` scheme dispatch, adapted to a `PathBuf`-typed
/// source list instead of a dedicated `RegistrySource` enum, since a
/// `ConfigStore` source is overwhelmingly a file path and URLs are the
/// exception.
fn http_source_url(path: &Path) -> Option<&str> {
	let s = path.to_str()?;
	(s.starts_with("http://") || s.starts_with("https://")).then_some(s)
}

async fn fetch_http_source(url: &str) -> Result<String, ConfigLoadError> {
	let response = reqwest::get(url).await.map_err(|e| ConfigLoadError::Http {
		source: url.to_string(),
		message: e.to_string(),
	})?;

	if !response.status().is_success() {
		return Err(ConfigLoadError::Http {
			source: url.to_string(),
			message: format!("server returned status {}", response.status()),
		});
	}

	response.text().await.map_err(|e| ConfigLoadError::Http {
		source: url.to_string(),
		message: e.to_string(),
	})
}

fn merge_global_settings(
	base: super::types::GlobalSettings,
	override_with: super::types::GlobalSettings,
) -> super::types::GlobalSettings {
	super::types::GlobalSettings {
		mcp_listen_address: override_with.mcp_listen_address.or(base.mcp_listen_address),
		grpc_port: override_with.grpc_port.or(base.grpc_port),
		config_paths: if override_with.config_paths.is_empty() {
			base.config_paths
		} else {
			override_with.config_paths
		},
	}
}

/// Parses YAML or JSON based on file extension, enhancing parse failures
/// with a user-facing hint about common mistakes (indentation, tabs,
/// `key: value` vs `key:value`).
fn parse_document(raw: &str, path: &Path) -> Result<ConfigDocument, ConfigLoadError> {
	let is_json = path
		.extension()
		.and_then(|e| e.to_str())
		.map(|e| e.eq_ignore_ascii_case("json"))
		.unwrap_or(false);

	let result = if is_json {
		serde_json::from_str::<ConfigDocument>(raw).map_err(ParseErrorKind::from)
	} else {
		serde_yaml::from_str::<ConfigDocument>(raw).map_err(ParseErrorKind::from)
	};

	result.map_err(|source| ConfigLoadError::Parse {
		path: path.display().to_string(),
		hint: parse_error_hint(raw, &source),
		source,
	})
}

fn parse_error_hint(raw: &str, _err: &ParseErrorKind) -> String {
	if raw.contains('\t') {
		"file contains tab characters; YAML requires spaces for indentation".to_string()
	} else if raw.lines().any(|l| l.trim_start().starts_with('-') && l.contains(": ") && l.matches(':').count() > 1)
	{
		"check for ambiguous mapping values on a single line".to_string()
	} else {
		"check indentation consistency (YAML is whitespace-sensitive)".to_string()
	}
}

/// Scans top-level keys of a raw YAML/JSON document for recognized
/// misspellings before full structural parsing, so an unknown-but-close key
/// gets a targeted suggestion rather than a generic serde error.
fn check_unknown_top_level_fields(raw: &str, path: &Path) -> Result<(), ConfigLoadError> {
	let value: Result<serde_yaml::Value, _> = serde_yaml::from_str(raw);
	let Ok(serde_yaml::Value::Mapping(map)) = value else {
		return Ok(());
	};

	const KNOWN_FIELDS: &[&str] = &["globalSettings", "global_settings", "upstreamServices", "upstream_services"];

	for key in map.keys() {
		let Some(key_str) = key.as_str() else { continue };
		if KNOWN_FIELDS.contains(&key_str) {
			continue;
		}
		if let Some((_, suggestion)) = KNOWN_MISSPELLINGS.iter().find(|(k, _)| *k == key_str) {
			return Err(ConfigLoadError::UnknownFieldWithSuggestion {
				field: key_str.to_string(),
				suggestion: suggestion.to_string(),
			}
			.into_with_path(path));
		}
	}
	Ok(())
}

impl ConfigLoadError {
	fn into_with_path(self, _path: &Path) -> Self {
		// Field/suggestion errors are already path-agnostic; kept as a hook
		// so future variants can attach the source path uniformly.
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	fn write_temp(contents: &str, ext: &str) -> tempfile::NamedTempFile {
		let mut file = tempfile::Builder::new().suffix(ext).tempfile().unwrap();
		file.write_all(contents.as_bytes()).unwrap();
		file
	}

	#[test]
	fn loads_single_yaml_source() {
		let file = write_temp(
			r#"
upstreamServices:
  - name: svc-a
    http:
      baseUrl: "https://example.com"
"#,
			".yaml",
		);
		let store = ConfigStore::with_sources([file.path()]);
		let doc = store.load().unwrap();
		assert_eq!(doc.upstream_services.len(), 1);
		assert_eq!(doc.upstream_services[0].name, "svc-a");
	}

	#[test]
	fn merges_two_sources_concatenating_services() {
		let a = write_temp(
			r#"
upstreamServices:
  - name: svc-a
    http:
      baseUrl: "https://a.example.com"
"#,
			".yaml",
		);
		let b = write_temp(
			r#"
upstreamServices:
  - name: svc-b
    http:
      baseUrl: "https://b.example.com"
"#,
			".yaml",
		);
		let store = ConfigStore::with_sources([a.path(), b.path()]);
		let doc = store.load().unwrap();
		assert_eq!(doc.upstream_services.len(), 2);
	}

	#[test]
	fn suggests_known_misspelling() {
		let file = write_temp(
			r#"
services:
  - name: svc-a
"#,
			".yaml",
		);
		let store = ConfigStore::with_sources([file.path()]);
		let err = store.load().unwrap_err();
		assert!(matches!(err, ConfigLoadError::UnknownFieldWithSuggestion { .. }));
		assert!(err.to_string().contains("upstream_services"));
	}

	#[test]
	fn no_sources_is_an_error() {
		let store = ConfigStore::new();
		assert!(matches!(store.load(), Err(ConfigLoadError::NoSources)));
	}

	#[test]
	fn sync_load_rejects_http_source() {
		let store = ConfigStore::with_sources(["https://config.example.com/mcpany.yaml"]);
		let err = store.load().unwrap_err();
		assert!(matches!(err, ConfigLoadError::HttpSourceRequiresAsync(_)));
	}

	#[tokio::test]
	async fn async_load_fetches_an_http_source() {
		let server = wiremock::MockServer::start().await;
		wiremock::Mock::given(wiremock::matchers::method("GET"))
			.and(wiremock::matchers::path("/mcpany.yaml"))
			.respond_with(wiremock::ResponseTemplate::new(200).set_body_string(
				"upstreamServices:\n  - name: remote-svc\n    http:\n      baseUrl: \"https://example.com\"\n",
			))
			.mount(&server)
			.await;

		let store = ConfigStore::with_sources([format!("{}/mcpany.yaml", server.uri())]);
		let doc = store.load_async().await.unwrap();
		assert_eq!(doc.upstream_services.len(), 1);
		assert_eq!(doc.upstream_services[0].name, "remote-svc");
	}

	#[tokio::test]
	async fn async_load_surfaces_non_success_status() {
		let server = wiremock::MockServer::start().await;
		wiremock::Mock::given(wiremock::matchers::method("GET"))
			.and(wiremock::matchers::path("/missing.yaml"))
			.respond_with(wiremock::ResponseTemplate::new(404))
			.mount(&server)
			.await;

		let store = ConfigStore::with_sources([format!("{}/missing.yaml", server.uri())]);
		let err = store.load_async().await.unwrap_err();
		assert!(matches!(err, ConfigLoadError::Http { .. }));
	}
}
