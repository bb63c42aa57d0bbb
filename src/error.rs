//! Crate-wide error taxonomy.
//!
//! Mirrors the propagation policy of spec §7: configuration errors are
//! collected into a list and surfaced together, upstream/auth errors are
//! reported per-call and never poison the catalog, and any error string
//! that might carry credentials is redacted before it leaves this crate.

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::config::redact::redact_dsn;

/// Top-level error type returned by the public API surface of this crate.
#[derive(Error, Debug)]
pub enum GatewayError {
	/// Carries only the failure count: the individual `ValidationError`s are
	/// logged at the call site (they're not `Display`-able as a list), this
	/// variant just reports how many there were.
	#[error("configuration invalid: {0} error(s)")]
	Configuration(usize),

	#[error("failed to resolve secret: {0}")]
	Resolution(#[from] ResolutionError),

	#[error("policy denied: {0}")]
	Policy(#[from] PolicyError),

	#[error("upstream error: {0}")]
	Upstream(#[from] UpstreamError),

	#[error("authentication failed: {0}")]
	Auth(#[from] AuthError),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("operation timed out")]
	Timeout,

	#[error("internal error: {0}")]
	Fatal(String),
}

impl From<CatalogError> for GatewayError {
	fn from(e: CatalogError) -> Self {
		GatewayError::Fatal(e.to_string())
	}
}

impl GatewayError {
	/// Returns a version of this error with any embedded credentials redacted,
	/// suitable for returning to a caller or writing to a diagnostic report.
	pub fn redacted(self) -> Self {
		match self {
			GatewayError::Upstream(e) => GatewayError::Upstream(e.redacted()),
			GatewayError::Auth(e) => GatewayError::Auth(e.redacted()),
			other => other,
		}
	}
}

/// Errors materializing a `SecretValue` into a usable plaintext string.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
	#[error("environment variable '{0}' not found or empty")]
	EnvVarNotFound(String),

	#[error("secret file '{0}' could not be read: {1}")]
	FileReadError(String, String),

	#[error("secret file '{0}' exceeds the maximum size of {1} bytes")]
	FileTooLarge(String, usize),

	#[error("resolved secret value did not match its validation regex")]
	ValidationMismatch,

	#[error("validation regex is not supported for secret file paths")]
	RegexNotSupportedForFilePath,

	#[error("secret value is missing exactly one of plainText, environmentVariable, or filePath")]
	MalformedSecret,
}

/// SSRF / sandboxing policy denials. Always carries a remediation hint.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct PolicyError {
	pub message: String,
	pub remediation: Option<String>,
}

impl PolicyError {
	pub fn ssrf_blocked(target: impl std::fmt::Display, env_hint: &str) -> Self {
		Self {
			message: format!(
				"ssrf attempt blocked: destination {target} is not permitted by the default network policy"
			),
			remediation: Some(format!("set {env_hint} to allow this destination")),
		}
	}
}

/// Transport/HTTP-status/DB errors from a call to an upstream service.
#[derive(Error, Debug, Clone)]
pub enum UpstreamError {
	#[error("transport error contacting '{service}': {message}")]
	Transport { service: String, message: String },

	#[error("upstream '{service}' returned status {status}: {message}")]
	Status {
		service: String,
		status: u16,
		message: String,
	},

	#[error("tool call cancelled or timed out")]
	Cancelled,

	#[error("'args' parameter is not allowed for this tool")]
	ArgsParameterNotAllowed,

	#[error("call_id '{0}' is not defined on this service")]
	UnknownCallId(String),
}

impl UpstreamError {
	pub fn redacted(self) -> Self {
		match self {
			UpstreamError::Transport { service, message } => UpstreamError::Transport {
				service,
				message: redact_dsn(&message),
			},
			UpstreamError::Status {
				service,
				status,
				message,
			} => UpstreamError::Status {
				service,
				status,
				message: redact_dsn(&message),
			},
			other => other,
		}
	}
}

/// Credential rejected (or ambiguous) at the upstream.
#[derive(Error, Debug, Clone)]
pub enum AuthError {
	#[error("Authentication failed (401 Unauthorized)")]
	Rejected,

	#[error("Service reachable but returned: 401 Unauthorized")]
	UnauthenticatedWarning,

	#[error("upstream returned {0}")]
	OtherStatus(u16),
}

impl AuthError {
	pub fn redacted(self) -> Self {
		// AuthError variants never embed raw strings today, kept for symmetry
		// with UpstreamError::redacted and future variants.
		self
	}
}

/// Sentinel returned when a cancellation context's deadline has passed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("context cancelled")]
pub struct CancellationError;
