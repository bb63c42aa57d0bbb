//! Diagnostics & Safe I/O: Doctor, the per-service reachability and active
//! auth verification pass (spec §2(d), §4.10).

pub mod doctor;

pub use doctor::{CheckResult, CheckStatus, Doctor};
