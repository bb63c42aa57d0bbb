//! One bounded retry with jittered backoff on connect-phase transport
//! errors (SPEC_FULL §4.8.1). Applies to HTTP, GraphQL, OpenAPI, gRPC
//! probe, and WebSocket drivers only; SQL and CommandLine calls are not
//! assumed idempotent and never retry here.
//!
//! Scaled down from the reference gateway's HTTP retry policy engine to
//! this crate's narrower need: one retry, not a configurable policy chain.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

const BASE_BACKOFF: Duration = Duration::from_millis(50);
const JITTER_MAX: Duration = Duration::from_millis(50);

/// Runs `attempt` once; if it returns an error for which `is_retryable`
/// holds, sleeps a jittered backoff and runs it exactly one more time.
/// Never retries on a successful response with an error status - that
/// distinction lives in `is_retryable`, which only sees transport-layer
/// failures, not parsed responses.
pub async fn with_one_retry<T, E, F, Fut>(is_retryable: impl Fn(&E) -> bool, mut attempt: F) -> Result<T, E>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, E>>,
{
	match attempt().await {
		Ok(value) => Ok(value),
		Err(e) if is_retryable(&e) => {
			let jitter = rand::rng().random_range(Duration::ZERO..=JITTER_MAX);
			tokio::time::sleep(BASE_BACKOFF + jitter).await;
			attempt().await
		},
		Err(e) => Err(e),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[tokio::test]
	async fn retries_once_on_retryable_error() {
		let attempts = AtomicUsize::new(0);
		let result: Result<(), &str> = with_one_retry(
			|_e: &&str| true,
			|| {
				attempts.fetch_add(1, Ordering::SeqCst);
				async {
					if attempts.load(Ordering::SeqCst) < 2 {
						Err("connect failed")
					} else {
						Ok(())
					}
				}
			},
		)
		.await;
		assert!(result.is_ok());
		assert_eq!(attempts.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn does_not_retry_non_retryable_error() {
		let attempts = AtomicUsize::new(0);
		let result: Result<(), &str> = with_one_retry(
			|_e: &&str| false,
			|| {
				attempts.fetch_add(1, Ordering::SeqCst);
				async { Err("status 404") }
			},
		)
		.await;
		assert!(result.is_err());
		assert_eq!(attempts.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn p14_retry_gives_up_after_one_additional_attempt() {
		let attempts = AtomicUsize::new(0);
		let result: Result<(), &str> = with_one_retry(
			|_e: &&str| true,
			|| {
				attempts.fetch_add(1, Ordering::SeqCst);
				async { Err("connect failed") }
			},
		)
		.await;
		assert!(result.is_err());
		assert_eq!(attempts.load(Ordering::SeqCst), 2);
	}
}
