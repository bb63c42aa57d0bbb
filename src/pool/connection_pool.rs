//! ConnectionPool\<C\>: a generic bounded pool with idle eviction and a
//! health probe consulted on check-out (spec §4.7).
//!
//! Total live connections (checked-out + idle) never exceed `maxSize`: a
//! `tokio::sync::Semaphore` sized to `maxSize` gates every path that can
//! create a new connection, and the permit is held for exactly as long as
//! the connection is either checked out or sitting in the idle queue —
//! released only when the connection is discarded.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Error, Debug)]
pub enum PoolError {
	#[error("pool is closed")]
	Closed,
	#[error("timed out waiting for a connection")]
	Timeout,
	#[error("failed to create connection: {0}")]
	Factory(String),
}

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
	pub min_size: usize,
	pub max_size: usize,
	pub idle_timeout: Duration,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			min_size: 0,
			max_size: 8,
			idle_timeout: Duration::from_secs(300),
		}
	}
}

struct IdleEntry<C> {
	conn: C,
	since: Instant,
	// The permit backing this connection's slot. Held while idle so the
	// semaphore's permit count always equals live (idle + checked-out)
	// connections, not just checked-out ones.
	permit: OwnedSemaphorePermit,
}

struct PoolInner<C> {
	idle: VecDeque<IdleEntry<C>>,
}

/// A generic bounded connection pool. `C` is the pooled connection type
/// (e.g. a gRPC channel, a WebSocket stream, a SQL connection handle).
pub struct ConnectionPool<C> {
	config: PoolConfig,
	max_size: usize,
	factory: Box<dyn Fn() -> BoxFuture<'static, Result<C, PoolError>> + Send + Sync>,
	healthy: Box<dyn Fn(&C) -> bool + Send + Sync>,
	inner: Mutex<PoolInner<C>>,
	permits: Arc<Semaphore>,
}

impl<C: Send + 'static> ConnectionPool<C> {
	/// Builds a pool. `factory` is invoked to create a new connection on a
	/// cache miss; `healthy` is a cheap, synchronous liveness probe run on
	/// every check-out of an idle connection.
	pub fn new<F, Fut, H>(config: PoolConfig, factory: F, healthy: H) -> Arc<Self>
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<C, PoolError>> + Send + 'static,
		H: Fn(&C) -> bool + Send + Sync + 'static,
	{
		let max_size = config.max_size.max(1);
		Arc::new(Self {
			permits: Arc::new(Semaphore::new(max_size)),
			factory: Box::new(move || Box::pin(factory())),
			healthy: Box::new(healthy),
			inner: Mutex::new(PoolInner { idle: VecDeque::new() }),
			max_size,
			config,
		})
	}

	/// Checks out a ready connection, creating one (up to `maxSize`) if no
	/// healthy idle connection is available. Respects `timeout` as the
	/// caller's deadline for waiting on a free slot.
	pub async fn get(self: &Arc<Self>, timeout: Duration) -> Result<PooledConnection<C>, PoolError> {
		let permit = tokio::time::timeout(timeout, Arc::clone(&self.permits).acquire_owned())
			.await
			.map_err(|_| PoolError::Timeout)?
			.map_err(|_| PoolError::Closed)?;

		let mut permit = permit;
		loop {
			let candidate = self.inner.lock().idle.pop_front();
			let Some(entry) = candidate else { break };

			if entry.since.elapsed() > self.config.idle_timeout || !(self.healthy)(&entry.conn) {
				debug!(target: "mcpany::pool", "evicting stale or unhealthy idle connection");
				// Drop the evicted entry's connection and its permit, then
				// acquire a fresh permit for the replacement attempt.
				drop(entry);
				permit = tokio::time::timeout(timeout, Arc::clone(&self.permits).acquire_owned())
					.await
					.map_err(|_| PoolError::Timeout)?
					.map_err(|_| PoolError::Closed)?;
				continue;
			}

			return Ok(PooledConnection {
				conn: Some(entry.conn),
				pool: Arc::clone(self),
				permit: Some(entry.permit),
			});
		}

		let conn = (self.factory)().await?;
		Ok(PooledConnection {
			conn: Some(conn),
			pool: Arc::clone(self),
			permit: Some(permit),
		})
	}

	fn return_conn(&self, conn: C, permit: OwnedSemaphorePermit) {
		if self.permits.is_closed() {
			drop(permit);
			return;
		}
		self.inner.lock().idle.push_back(IdleEntry {
			conn,
			since: Instant::now(),
			permit,
		});
	}

	/// Stops accepting new check-outs and drops every idle connection.
	/// Connections currently checked out are released (and dropped) as
	/// their `PooledConnection` handles go out of scope.
	pub fn close(&self) {
		self.permits.close();
		let drained = self.inner.lock().idle.drain(..).count();
		debug!(target: "mcpany::pool", drained, "pool closed");
	}

	pub fn is_closed(&self) -> bool {
		self.permits.is_closed()
	}

	/// Total live connections: idle plus checked-out.
	pub fn size(&self) -> usize {
		self.max_size - self.permits.available_permits()
	}

	pub fn idle(&self) -> usize {
		self.inner.lock().idle.len()
	}

	pub fn in_use(&self) -> usize {
		self.size().saturating_sub(self.idle())
	}
}

/// RAII handle to a checked-out connection. Returning it to the pool (or
/// discarding it, if the pool has been closed) happens automatically on
/// drop.
pub struct PooledConnection<C> {
	conn: Option<C>,
	pool: Arc<ConnectionPool<C>>,
	permit: Option<OwnedSemaphorePermit>,
}

impl<C> PooledConnection<C> {
	pub fn get(&self) -> &C {
		self.conn.as_ref().expect("connection present while checked out")
	}

	pub fn get_mut(&mut self) -> &mut C {
		self.conn.as_mut().expect("connection present while checked out")
	}
}

impl<C: Send + 'static> Drop for PooledConnection<C> {
	fn drop(&mut self) {
		if let (Some(conn), Some(permit)) = (self.conn.take(), self.permit.take()) {
			self.pool.return_conn(conn, permit);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};

	fn test_pool(max_size: usize) -> Arc<ConnectionPool<u32>> {
		let next = Arc::new(AtomicU32::new(0));
		ConnectionPool::new(
			PoolConfig {
				min_size: 0,
				max_size,
				idle_timeout: Duration::from_secs(60),
			},
			move || {
				let next = next.clone();
				async move { Ok(next.fetch_add(1, Ordering::SeqCst)) }
			},
			|_c| true,
		)
	}

	#[tokio::test]
	async fn p12_reuses_returned_connection_instead_of_growing() {
		let pool = test_pool(2);
		let first = pool.get(Duration::from_millis(200)).await.unwrap();
		let id = *first.get();
		drop(first);
		tokio::task::yield_now().await;
		let second = pool.get(Duration::from_millis(200)).await.unwrap();
		assert_eq!(*second.get(), id);
		assert_eq!(pool.size(), 1);
	}

	#[tokio::test]
	async fn p12_bounded_to_max_size() {
		let pool = test_pool(1);
		let _first = pool.get(Duration::from_millis(50)).await.unwrap();
		let second = pool.get(Duration::from_millis(50)).await;
		assert!(matches!(second, Err(PoolError::Timeout)));
	}

	#[tokio::test]
	async fn close_makes_subsequent_get_fail_fast() {
		let pool = test_pool(2);
		pool.close();
		let result = pool.get(Duration::from_millis(50)).await;
		assert!(matches!(result, Err(PoolError::Closed)));
	}

	#[tokio::test]
	async fn unhealthy_idle_connection_is_evicted_on_checkout() {
		let next = Arc::new(AtomicU32::new(0));
		let factory_counter = next.clone();
		let pool = ConnectionPool::new(
			PoolConfig {
				min_size: 0,
				max_size: 2,
				idle_timeout: Duration::from_secs(60),
			},
			move || {
				let next = factory_counter.clone();
				async move { Ok(next.fetch_add(1, Ordering::SeqCst)) }
			},
			|_c| false,
		);
		let first = pool.get(Duration::from_millis(200)).await.unwrap();
		let first_id = *first.get();
		drop(first);
		tokio::task::yield_now().await;
		// The idle connection fails the health probe, so a fresh permit is
		// drawn and the factory is invoked again rather than reusing it.
		let second = pool.get(Duration::from_millis(200)).await.unwrap();
		assert_ne!(*second.get(), first_id);
		assert_eq!(pool.size(), 1);
	}
}
