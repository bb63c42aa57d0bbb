//! A generic, namespaced registry of callable items keyed by qualified
//! name, shared by the Tool/Prompt/Resource managers (spec §3 "Catalog
//! maps", §4.9).
//!
//! Grounded on the reference gateway's `RegistryStore` (`mcp/registry/
//! store.rs`): build the next snapshot completely, then swap one
//! `ArcSwap` pointer, so readers never observe a half-mutated map (spec
//! P11). `AddTool`'s duplicate policy (fatal within one service, a
//! logged-but-accepted oddity across services — the Linter's job to flag,
//! per spec §9 Open Question (a)) is generalized here to `add` for all
//! three managers.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
	#[error("item '{0}' is already registered by this service")]
	DuplicateInService(String),
}

#[derive(Clone)]
struct Entry<T> {
	service_id: String,
	item: T,
}

type Snapshot<T> = HashMap<String, Entry<T>>;

/// A concurrent map of qualified name -> item, with an `onListChanged`
/// slot fired once per batched mutation.
pub struct ItemManager<T> {
	current: ArcSwap<Snapshot<T>>,
	on_list_changed: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl<T> Default for ItemManager<T> {
	fn default() -> Self {
		Self {
			current: ArcSwap::new(Arc::new(HashMap::new())),
			on_list_changed: Mutex::new(None),
		}
	}
}

impl<T: Clone> ItemManager<T> {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_on_list_changed(&self, f: impl Fn() + Send + Sync + 'static) {
		*self.on_list_changed.lock() = Some(Arc::new(f));
	}

	fn notify(&self) {
		if let Some(f) = self.on_list_changed.lock().as_ref() {
			f();
		}
	}

	/// Inserts `item` under `qualified_name`. Rejects with
	/// [`CatalogError::DuplicateInService`] if the same service already
	/// registered something under this name; a name already taken by a
	/// *different* service is accepted (qualified names should never
	/// actually collide across services — the Linter flags the unqualified
	/// collision as advisory, spec §9 Open Question (a)) but is logged.
	pub fn add(&self, qualified_name: impl Into<String>, service_id: impl Into<String>, item: T) -> Result<(), CatalogError> {
		let qualified_name = qualified_name.into();
		let service_id = service_id.into();

		let current = self.current.load();
		if let Some(existing) = current.get(&qualified_name) {
			if existing.service_id == service_id {
				return Err(CatalogError::DuplicateInService(qualified_name));
			}
			warn!(
				target: "mcpany::catalog",
				name = %qualified_name,
				existing_service = %existing.service_id,
				new_service = %service_id,
				"qualified name collision across services"
			);
		}

		let mut next = (**current).clone();
		next.insert(qualified_name, Entry { service_id, item });
		self.current.store(Arc::new(next));
		self.notify();
		Ok(())
	}

	/// Atomically removes every entry registered by `service_id`. Readers
	/// observe either the complete old set or the complete new one, never a
	/// mix (spec P11).
	pub fn clear_for_service(&self, service_id: &str) {
		let current = self.current.load();
		if !current.values().any(|e| e.service_id == service_id) {
			return;
		}
		let next: Snapshot<T> = current.iter().filter(|(_, e)| e.service_id != service_id).map(|(k, v)| (k.clone(), v.clone())).collect();
		self.current.store(Arc::new(next));
		self.notify();
	}

	pub fn get(&self, qualified_name: &str) -> Option<T> {
		self.current.load().get(qualified_name).map(|e| e.item.clone())
	}

	/// All items currently registered, `(qualified_name, item)` pairs.
	pub fn list(&self) -> Vec<(String, T)> {
		self.current.load().iter().map(|(k, v)| (k.clone(), v.item.clone())).collect()
	}

	pub fn len(&self) -> usize {
		self.current.load().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[test]
	fn add_and_get_roundtrip() {
		let manager: ItemManager<i32> = ItemManager::new();
		manager.add("svc.tool", "svc-id", 42).unwrap();
		assert_eq!(manager.get("svc.tool"), Some(42));
	}

	#[test]
	fn duplicate_within_same_service_is_fatal() {
		let manager: ItemManager<i32> = ItemManager::new();
		manager.add("svc.tool", "svc-id", 1).unwrap();
		let err = manager.add("svc.tool", "svc-id", 2).unwrap_err();
		assert_eq!(err, CatalogError::DuplicateInService("svc.tool".to_string()));
	}

	#[test]
	fn duplicate_across_services_is_accepted() {
		let manager: ItemManager<i32> = ItemManager::new();
		manager.add("name", "svc-a", 1).unwrap();
		assert!(manager.add("name", "svc-b", 2).is_ok());
		assert_eq!(manager.get("name"), Some(2));
	}

	#[test]
	fn clear_for_service_removes_only_that_services_entries() {
		let manager: ItemManager<i32> = ItemManager::new();
		manager.add("a.one", "svc-a", 1).unwrap();
		manager.add("b.one", "svc-b", 2).unwrap();
		manager.clear_for_service("svc-a");
		assert_eq!(manager.get("a.one"), None);
		assert_eq!(manager.get("b.one"), Some(2));
	}

	#[test]
	fn p11_reader_never_observes_a_mixed_snapshot() {
		let manager: Arc<ItemManager<i32>> = Arc::new(ItemManager::new());
		manager.add("svc.old_tool", "svc", 1).unwrap();

		let reader = manager.clone();
		let mixed_seen = Arc::new(AtomicUsize::new(0));
		let mixed_seen_reader = mixed_seen.clone();
		let handle = std::thread::spawn(move || {
			for _ in 0..1000 {
				let names: Vec<String> = reader.list().into_iter().map(|(n, _)| n).collect();
				let has_old = names.iter().any(|n| n == "svc.old_tool");
				let has_new = names.iter().any(|n| n == "svc.new_tool");
				if has_old && has_new {
					mixed_seen_reader.fetch_add(1, Ordering::SeqCst);
				}
			}
		});

		manager.clear_for_service("svc");
		manager.add("svc.new_tool", "svc", 2).unwrap();
		handle.join().unwrap();

		assert_eq!(mixed_seen.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn on_list_changed_fires_after_mutation() {
		let manager: ItemManager<i32> = ItemManager::new();
		let fired = Arc::new(AtomicUsize::new(0));
		let fired_cb = fired.clone();
		manager.set_on_list_changed(move || {
			fired_cb.fetch_add(1, Ordering::SeqCst);
		});
		manager.add("a", "svc", 1).unwrap();
		assert_eq!(fired.load(Ordering::SeqCst), 1);
	}
}
