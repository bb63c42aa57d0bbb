//! PoolManager: owns the map of per-service connection pools, keyed by
//! sanitized service name, and is the sole creator/destroyer of entries
//! (spec §3 `ConnectionPool<C>` ownership note, §4.7, §5).
//!
//! Grounded on the reference gateway's `RegistryStore` hot-swap discipline
//! (`mcp/registry/store.rs`): pools are type-erased behind [`AnyPool`] so
//! one map can hold a gRPC channel pool next to a SQL connection pool next
//! to a WebSocket pool, the same way `store.rs` holds one `ArcSwap` slot
//! regardless of what's compiled into it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use super::connection_pool::ConnectionPool;

/// Object-safe view over a [`ConnectionPool<C>`] for any `C`, so the
/// manager's map can hold pools of heterogeneous connection types.
pub trait AnyPool: Send + Sync {
	fn close(&self);
	fn size(&self) -> usize;
	fn in_use(&self) -> usize;
	fn idle(&self) -> usize;
}

impl<C: Send + 'static> AnyPool for ConnectionPool<C> {
	fn close(&self) {
		ConnectionPool::close(self)
	}
	fn size(&self) -> usize {
		ConnectionPool::size(self)
	}
	fn in_use(&self) -> usize {
		ConnectionPool::in_use(self)
	}
	fn idle(&self) -> usize {
		ConnectionPool::idle(self)
	}
}

/// Metrics snapshot for one registered pool (SPEC_FULL §4.7.1).
#[derive(Debug, Clone, Copy)]
pub struct PoolMetrics {
	pub size: usize,
	pub in_use: usize,
	pub idle: usize,
}

/// Owns every service's connection pool. Registration replaces (and closes)
/// any prior entry under the same key; deregistration closes and removes.
/// The map itself is guarded by a single lock, so a reader can never
/// observe a half-replaced entry.
#[derive(Default)]
pub struct PoolManager {
	pools: RwLock<HashMap<String, Arc<dyn AnyPool>>>,
}

impl PoolManager {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `pool` under `sanitized_name`. If an entry already exists
	/// under that key (e.g. a reload whose connection parameters changed),
	/// the old pool is closed before the new one is inserted, so no `Get`
	/// on the old entry can outlive the swap.
	pub fn register(&self, sanitized_name: &str, pool: Arc<dyn AnyPool>) {
		let previous = self.pools.write().insert(sanitized_name.to_string(), pool);
		if let Some(old) = previous {
			old.close();
			info!(target: "mcpany::pool", service = sanitized_name, "replaced pool, old pool closed");
		}
	}

	/// Closes and removes the pool for `sanitized_name`, if any.
	pub fn deregister(&self, sanitized_name: &str) {
		if let Some(pool) = self.pools.write().remove(sanitized_name) {
			pool.close();
			info!(target: "mcpany::pool", service = sanitized_name, "pool deregistered");
		}
	}

	pub fn get(&self, sanitized_name: &str) -> Option<Arc<dyn AnyPool>> {
		self.pools.read().get(sanitized_name).cloned()
	}

	pub fn contains(&self, sanitized_name: &str) -> bool {
		self.pools.read().contains_key(sanitized_name)
	}

	/// Snapshot metrics for every registered pool, for the (out-of-scope)
	/// metrics exporter to poll.
	pub fn metrics(&self) -> HashMap<String, PoolMetrics> {
		self
			.pools
			.read()
			.iter()
			.map(|(name, pool)| {
				(
					name.clone(),
					PoolMetrics {
						size: pool.size(),
						in_use: pool.in_use(),
						idle: pool.idle(),
					},
				)
			})
			.collect()
	}

	/// Closes and removes every pool. Used on full shutdown.
	pub fn close_all(&self) {
		let mut guard = self.pools.write();
		for (_, pool) in guard.drain() {
			pool.close();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::pool::connection_pool::{PoolConfig, PoolError};
	use std::time::Duration;

	fn dummy_pool() -> Arc<ConnectionPool<u32>> {
		ConnectionPool::new(
			PoolConfig {
				min_size: 0,
				max_size: 2,
				idle_timeout: Duration::from_secs(60),
			},
			|| async { Ok::<u32, PoolError>(0) },
			|_c| true,
		)
	}

	#[test]
	fn register_and_get_roundtrip() {
		let manager = PoolManager::new();
		manager.register("svc", dummy_pool());
		assert!(manager.contains("svc"));
		assert!(manager.get("svc").is_some());
	}

	#[test]
	fn deregister_closes_and_removes() {
		let manager = PoolManager::new();
		let pool = dummy_pool();
		manager.register("svc", pool.clone());
		manager.deregister("svc");
		assert!(!manager.contains("svc"));
		assert!(pool.is_closed());
	}

	#[test]
	fn re_registering_closes_the_previous_pool() {
		let manager = PoolManager::new();
		let first = dummy_pool();
		manager.register("svc", first.clone());
		let second = dummy_pool();
		manager.register("svc", second);
		assert!(first.is_closed());
		assert!(manager.contains("svc"));
	}
}
