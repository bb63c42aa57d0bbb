//! The Configuration Plane: parse, merge, validate, hot-reload, and
//! secret-resolve the declarative config (spec §2(a), §4.1–§4.6).

pub mod redact;
pub mod secrets;
pub mod store;
pub mod types;
pub mod validator;
pub mod watcher;

pub use redact::{redact_dsn, redact_json};
pub use secrets::SecretResolver;
pub use store::ConfigStore;
pub use types::*;
pub use validator::{ConfigValidator, Profile, ValidationError};
pub use watcher::ConfigWatcher;
