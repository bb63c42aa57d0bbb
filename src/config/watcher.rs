//! ConfigWatcher: debounced filesystem-change notifier over the watched
//! files' parents (spec §4.3).
//!
//! Grounded directly on the reference gateway's `RegistryStore::watch_file`
//! (`mcp/registry/store.rs`): watch the *parent directory*, not the file
//! itself, so editor atomic-save patterns (create-then-rename,
//! rename-away-and-replace) are captured, and bridge the sync `notify`
//! callback into async via a `tokio::sync::mpsc` channel.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::DebounceEventResult;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info};

const DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum WatcherError {
	#[error("failed to create file watcher: {0}")]
	Create(String),
	#[error("failed to determine absolute path for '{0}': {1}")]
	Absolute(String, String),
	#[error("'{0}' has no parent directory")]
	NoParent(String),
	#[error("failed to watch directory '{0}': {1}")]
	Watch(String, String),
}

/// Watches the parent directories of a set of configuration files and
/// invokes `on_change` (at most once per debounce window) whenever one of
/// the watched files is written, created, renamed, or has its permissions
/// changed. Backup files ending in `~` never trigger a reload.
pub struct ConfigWatcher {
	handle: Option<tokio::task::JoinHandle<()>>,
	closed: Arc<std::sync::atomic::AtomicBool>,
}

impl ConfigWatcher {
	/// Starts watching `paths`. `on_change` is invoked on a background task;
	/// it must be cheap or spawn its own work.
	pub fn start<F>(paths: Vec<PathBuf>, on_change: F) -> Result<Self, WatcherError>
	where
		F: Fn() + Send + Sync + 'static,
	{
		let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));
		let watched_files = canonicalize_all(&paths)?;
		let parents = distinct_parents(&watched_files)?;

		let (tx, mut rx) = mpsc::channel::<DebounceEventResult>(16);

		let mut debouncer = notify_debouncer_full::new_debouncer(DEBOUNCE, None, move |res| {
			let _ = tx.blocking_send(res);
		})
		.map_err(|e| WatcherError::Create(e.to_string()))?;

		for parent in &parents {
			debouncer
				.watch(parent, RecursiveMode::NonRecursive)
				.map_err(|e| WatcherError::Watch(parent.display().to_string(), e.to_string()))?;
		}

		info!(target: "mcpany::config", parents = parents.len(), "watching config file parents");

		let closed_task = closed.clone();
		let handle = tokio::spawn(async move {
			// The debouncer is moved into the task so it is dropped (and its
			// OS watch handles released) exactly when the task ends.
			let _debouncer = debouncer;
			while let Some(result) = rx.recv().await {
				if closed_task.load(std::sync::atomic::Ordering::Acquire) {
					break;
				}
				match result {
					Ok(events) => {
						if events.iter().any(|e| is_relevant_event(e, &watched_files)) {
							info!(target: "mcpany::config", "detected config change, reloading");
							on_change();
						}
					},
					Err(errs) => {
						for e in errs {
							error!(target: "mcpany::config", "watch error: {e}");
						}
					},
				}
			}
		});

		Ok(Self {
			handle: Some(handle),
			closed,
		})
	}

	/// Stops the watcher. Idempotent: calling this more than once is safe.
	pub fn close(&mut self) {
		self.closed.store(true, std::sync::atomic::Ordering::Release);
		if let Some(handle) = self.handle.take() {
			handle.abort();
		}
	}
}

impl Drop for ConfigWatcher {
	fn drop(&mut self) {
		self.close();
	}
}

fn canonicalize_all(paths: &[PathBuf]) -> Result<Vec<PathBuf>, WatcherError> {
	paths
		.iter()
		.map(|p| {
			std::path::absolute(p).map_err(|e| WatcherError::Absolute(p.display().to_string(), e.to_string()))
		})
		.collect()
}

fn distinct_parents(paths: &[PathBuf]) -> Result<Vec<PathBuf>, WatcherError> {
	let mut set = HashSet::new();
	for p in paths {
		let parent = p
			.parent()
			.ok_or_else(|| WatcherError::NoParent(p.display().to_string()))?;
		set.insert(parent.to_path_buf());
	}
	Ok(set.into_iter().collect())
}

fn is_relevant_event(event: &notify_debouncer_full::DebouncedEvent, watched: &[PathBuf]) -> bool {
	let kind_matches = matches!(
		event.kind,
		EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_) | EventKind::Other
	);
	if !kind_matches {
		return false;
	}
	event.paths.iter().any(|p| path_matches_watched(p, watched))
}

fn path_matches_watched(changed: &Path, watched: &[PathBuf]) -> bool {
	if is_backup_file(changed) {
		return false;
	}
	watched.iter().any(|w| w == changed)
}

fn is_backup_file(path: &Path) -> bool {
	path.file_name()
		.and_then(|n| n.to_str())
		.map(|n| n.ends_with('~'))
		.unwrap_or(false)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration as StdDuration;

	#[tokio::test]
	async fn p6_three_rapid_writes_debounce_to_at_most_one_reload() {
		let dir = tempfile::tempdir().unwrap();
		let file_path = dir.path().join("config.yaml");
		std::fs::write(&file_path, "upstreamServices: []\n").unwrap();

		let count = Arc::new(AtomicUsize::new(0));
		let count_cb = count.clone();
		let mut watcher =
			ConfigWatcher::start(vec![file_path.clone()], move || {
				count_cb.fetch_add(1, Ordering::SeqCst);
			})
			.unwrap();

		for _ in 0..3 {
			std::fs::write(&file_path, "upstreamServices: []\n# touch\n").unwrap();
			tokio::time::sleep(StdDuration::from_millis(10)).await;
		}

		tokio::time::sleep(StdDuration::from_millis(1000)).await;
		let fired = count.load(Ordering::SeqCst);
		assert!(fired >= 1, "expected at least one reload, got {fired}");
		assert!(fired <= 3, "debounce should collapse rapid writes, got {fired}");
		watcher.close();
	}

	#[tokio::test]
	async fn p7_atomic_rename_triggers_reload() {
		let dir = tempfile::tempdir().unwrap();
		let file_path = dir.path().join("config.yaml");
		std::fs::write(&file_path, "upstreamServices: []\n").unwrap();

		let count = Arc::new(AtomicUsize::new(0));
		let count_cb = count.clone();
		let mut watcher =
			ConfigWatcher::start(vec![file_path.clone()], move || {
				count_cb.fetch_add(1, Ordering::SeqCst);
			})
			.unwrap();

		let tmp_path = dir.path().join("config.yaml.tmp");
		std::fs::write(&tmp_path, "upstreamServices: []\n# new\n").unwrap();
		std::fs::rename(&tmp_path, &file_path).unwrap();

		tokio::time::sleep(StdDuration::from_millis(1000)).await;
		assert!(count.load(Ordering::SeqCst) >= 1);
		watcher.close();
	}

	#[test]
	fn backup_files_are_ignored() {
		assert!(is_backup_file(Path::new("/tmp/config.yaml~")));
		assert!(!is_backup_file(Path::new("/tmp/config.yaml")));
	}
}
