//! Diagnostics & Safe I/O: SSRF-checked dialing shared by HTTP and
//! WebSocket transports (spec §2(d), §4.4).

pub mod dialer;

pub use dialer::{DialPolicy, SafeDialer, SafeHttpClient};
