//! SecretResolver: materializes a [`SecretValue`] into a plaintext string
//! (spec §4.5).
//!
//! Trimming and regex-matching rules are shared with the structural
//! validator's secret checks (`config::validator`) so that a secret which
//! validates also resolves, and vice versa (spec P2).

use std::path::Path;

use regex::Regex;

use crate::error::ResolutionError;

use super::types::SecretValue;

const MAX_SECRET_FILE_BYTES: usize = 64 * 1024;

/// Resolves [`SecretValue`]s to plaintext. Stateless except for an optional
/// override of the file-size bound, so it is cheap to construct per call and
/// never retains resolved plaintext after `resolve` returns.
#[derive(Debug, Clone, Copy)]
pub struct SecretResolver {
	max_file_bytes: usize,
}

impl Default for SecretResolver {
	fn default() -> Self {
		Self {
			max_file_bytes: MAX_SECRET_FILE_BYTES,
		}
	}
}

impl SecretResolver {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_max_file_bytes(mut self, max: usize) -> Self {
		self.max_file_bytes = max;
		self
	}

	/// Resolves `secret` to a single trimmed string, or a [`ResolutionError`].
	pub fn resolve(&self, secret: &SecretValue) -> Result<String, ResolutionError> {
		if secret.file_path.is_some() && secret.validation_regex.is_some() {
			return Err(ResolutionError::RegexNotSupportedForFilePath);
		}

		let raw = match (
			&secret.plain_text,
			&secret.environment_variable,
			&secret.file_path,
		) {
			(Some(v), None, None) => v.clone(),
			(None, Some(name), None) => self.resolve_env(name)?,
			(None, None, Some(path)) => self.resolve_file(path)?,
			_ => return Err(ResolutionError::MalformedSecret),
		};

		let trimmed = raw.trim().to_string();

		if let Some(pattern) = &secret.validation_regex {
			let re = Regex::new(pattern).map_err(|_| ResolutionError::ValidationMismatch)?;
			if !re.is_match(&trimmed) {
				return Err(ResolutionError::ValidationMismatch);
			}
		}

		Ok(trimmed)
	}

	fn resolve_env(&self, name: &str) -> Result<String, ResolutionError> {
		match std::env::var(name) {
			Ok(v) if !v.is_empty() => Ok(v),
			_ => Err(ResolutionError::EnvVarNotFound(name.to_string())),
		}
	}

	fn resolve_file(&self, path: &str) -> Result<String, ResolutionError> {
		let expanded = shellexpand::tilde(path);
		let path = Path::new(expanded.as_ref());
		let metadata = std::fs::metadata(path)
			.map_err(|e| ResolutionError::FileReadError(path.display().to_string(), e.to_string()))?;
		if metadata.len() as usize > self.max_file_bytes {
			return Err(ResolutionError::FileTooLarge(path.display().to_string(), self.max_file_bytes));
		}
		std::fs::read_to_string(path).map_err(|e| ResolutionError::FileReadError(path.display().to_string(), e.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn p2_trim_consistency_plain_text_with_regex() {
		let secret = SecretValue::plain("  v  ").with_validation_regex("^v$");
		let resolver = SecretResolver::new();
		assert_eq!(resolver.resolve(&secret).unwrap(), "v");
	}

	#[test]
	fn p3_blind_file_read_blocked_at_resolution_too() {
		let secret = SecretValue::file("/etc/hosts").with_validation_regex("^.*$");
		let err = SecretResolver::new().resolve(&secret).unwrap_err();
		assert_eq!(err, ResolutionError::RegexNotSupportedForFilePath);
	}

	#[test]
	fn env_var_missing_is_an_error() {
		let secret = SecretValue::env("MCPANY_TEST_DEFINITELY_UNSET_VAR_XYZ");
		let err = SecretResolver::new().resolve(&secret).unwrap_err();
		assert_eq!(
			err,
			ResolutionError::EnvVarNotFound("MCPANY_TEST_DEFINITELY_UNSET_VAR_XYZ".to_string())
		);
	}

	#[test]
	fn env_var_present_resolves() {
		// SAFETY: test-local environment variable, not shared mutable state
		// observed by other tests.
		unsafe {
			std::env::set_var("MCPANY_TEST_RESOLVE_OK", "hello");
		}
		let secret = SecretValue::env("MCPANY_TEST_RESOLVE_OK");
		assert_eq!(SecretResolver::new().resolve(&secret).unwrap(), "hello");
		unsafe {
			std::env::remove_var("MCPANY_TEST_RESOLVE_OK");
		}
	}

	#[test]
	fn file_secret_resolves_and_trims() {
		let file = tempfile::NamedTempFile::new().unwrap();
		std::fs::write(file.path(), "  secretvalue  \n").unwrap();
		let secret = SecretValue::file(file.path().to_str().unwrap());
		assert_eq!(SecretResolver::new().resolve(&secret).unwrap(), "secretvalue");
	}

	#[test]
	fn file_secret_over_size_bound_is_rejected() {
		let file = tempfile::NamedTempFile::new().unwrap();
		std::fs::write(file.path(), "x".repeat(128)).unwrap();
		let secret = SecretValue::file(file.path().to_str().unwrap());
		let resolver = SecretResolver::new().with_max_file_bytes(64);
		assert!(matches!(resolver.resolve(&secret), Err(ResolutionError::FileTooLarge(_, 64))));
	}

	#[test]
	fn regex_mismatch_is_rejected() {
		let secret = SecretValue::plain("abc").with_validation_regex("^[0-9]+$");
		assert_eq!(
			SecretResolver::new().resolve(&secret).unwrap_err(),
			ResolutionError::ValidationMismatch
		);
	}

	#[test]
	fn malformed_secret_with_zero_variants_is_rejected() {
		let secret = SecretValue {
			plain_text: None,
			environment_variable: None,
			file_path: None,
			validation_regex: None,
		};
		assert_eq!(SecretResolver::new().resolve(&secret).unwrap_err(), ResolutionError::MalformedSecret);
	}
}
