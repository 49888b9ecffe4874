/*
 * watch.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Filesystem watching for cached templates.
//!
//! One [`CacheWatcher`] per engine owns a single debounced watcher and a
//! consumer task. Every cached root registers the files of its include
//! closure. The first change to any of them clears the root's cache entry and
//! releases the root's registrations, so each cache fill is invalidated at
//! most once. Files no longer needed by any root are unwatched. The next
//! render recompiles and registers the root again.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::{DebouncedEvent, Debouncer, new_debouncer};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cache::CompileCache;
use crate::error::{Result, ViewError};
use crate::resolver::normalize_path;

/// Engine-wide watcher that clears cache entries when their files change.
pub struct CacheWatcher {
    state: Arc<Mutex<WatchState>>,
}

struct WatchState {
    /// The debouncer wrapping the underlying watcher
    debouncer: Debouncer<notify::RecommendedWatcher>,
    /// Watched file to the cached roots compiled from it
    roots_by_file: HashMap<PathBuf, HashSet<PathBuf>>,
    /// Cached root to the files it registered
    files_by_root: HashMap<PathBuf, Vec<PathBuf>>,
}

impl CacheWatcher {
    /// Start the watcher and its consumer task.
    ///
    /// Must be called from within a tokio runtime. The task ends once the
    /// watcher is dropped.
    pub fn new(cache: Weak<CompileCache>, debounce: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ViewError::Watcher(e.to_string()))?;

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<PathBuf>();
        let debouncer = new_debouncer(
            debounce,
            move |res: std::result::Result<Vec<DebouncedEvent>, notify::Error>| match res {
                Ok(events) => {
                    for event in events {
                        if event_tx.send(event.path).is_err() {
                            // Receiver dropped, watcher is shutting down
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Template watch error");
                }
            },
        )
        .map_err(|e| ViewError::Watcher(e.to_string()))?;

        let state = Arc::new(Mutex::new(WatchState {
            debouncer,
            roots_by_file: HashMap::new(),
            files_by_root: HashMap::new(),
        }));

        let weak_state = Arc::downgrade(&state);
        runtime.spawn(async move {
            while let Some(changed) = event_rx.recv().await {
                let Some(state) = weak_state.upgrade() else {
                    break;
                };
                let changed = watch_key(&changed);
                let roots = lock(&state).release_file(&changed);
                drop(state);

                let Some(cache) = cache.upgrade() else {
                    break;
                };
                for root in roots {
                    cache.clear(&root);
                    debug!(
                        root = %root.display(),
                        changed = %changed.display(),
                        "Template changed, cache entry cleared"
                    );
                }
            }
        });

        Ok(Self { state })
    }

    /// Watch `files` on behalf of the cached `root`.
    ///
    /// Replaces any earlier registration of `root`. On failure nothing stays
    /// registered for `root`.
    pub fn watch_root<'a>(
        &self,
        root: &Path,
        files: impl IntoIterator<Item = &'a Path>,
    ) -> Result<()> {
        let root = watch_key(root);
        let files: Vec<PathBuf> = files.into_iter().map(watch_key).collect();
        let mut state = lock(&self.state);
        state.release_root(&root);

        for file in &files {
            let roots = state.roots_by_file.entry(file.clone()).or_default();
            let first = roots.is_empty();
            roots.insert(root.clone());
            if !first {
                continue;
            }
            if let Err(e) = state
                .debouncer
                .watcher()
                .watch(file, RecursiveMode::NonRecursive)
            {
                state.files_by_root.insert(root.clone(), files.clone());
                state.release_root(&root);
                return Err(ViewError::Watch {
                    path: file.clone(),
                    message: e.to_string(),
                });
            }
        }

        debug!(root = %root.display(), files = files.len(), "Watching cached template");
        state.files_by_root.insert(root, files);
        Ok(())
    }

    /// Drop the registration of `root`, e.g. after an explicit cache clear.
    pub fn forget_root(&self, root: &Path) {
        lock(&self.state).release_root(&watch_key(root));
    }

    /// Whether `file` is currently watched.
    pub fn is_watching(&self, file: &Path) -> bool {
        lock(&self.state).roots_by_file.contains_key(&watch_key(file))
    }

    /// Number of cached roots with live registrations.
    pub fn root_count(&self) -> usize {
        lock(&self.state).files_by_root.len()
    }
}

impl std::fmt::Debug for CacheWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("CacheWatcher")
            .field("roots", &state.files_by_root.len())
            .field("files", &state.roots_by_file.len())
            .finish()
    }
}

impl WatchState {
    /// Remove `root`'s registrations, unwatching files no other root needs.
    fn release_root(&mut self, root: &Path) {
        let Some(files) = self.files_by_root.remove(root) else {
            return;
        };
        for file in files {
            let Some(roots) = self.roots_by_file.get_mut(&file) else {
                continue;
            };
            roots.remove(root);
            if roots.is_empty() {
                self.roots_by_file.remove(&file);
                // The file may already be gone
                let _ = self.debouncer.watcher().unwatch(&file);
            }
        }
    }

    /// Release and return every root compiled from `file`.
    fn release_file(&mut self, file: &Path) -> Vec<PathBuf> {
        let roots: Vec<PathBuf> = self
            .roots_by_file
            .get(file)
            .map(|roots| roots.iter().cloned().collect())
            .unwrap_or_default();
        for root in &roots {
            self.release_root(root);
        }
        roots
    }
}

fn lock(state: &Mutex<WatchState>) -> MutexGuard<'_, WatchState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

fn watch_key(path: &Path) -> PathBuf {
    normalize_path(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::cache::CacheEntry;
    use crate::compiled::{CompiledTemplate, EnvironmentSetup, SourceSet, TemplateSource};
    use crate::resolver::{DefaultResolver, IncludeResolver};

    fn entry(path: &Path) -> CacheEntry {
        let set = SourceSet::new(TemplateSource::new(path.to_path_buf(), "x"));
        let includes = IncludeResolver::new(Arc::new(DefaultResolver), None);
        let compiled =
            CompiledTemplate::compile(set, &includes, &EnvironmentSetup::default()).unwrap();
        CacheEntry::new(Arc::new(compiled))
    }

    fn scratch(files: &[&str]) -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        // Canonicalize to handle macOS /var -> /private/var symlinks
        let root = temp.path().canonicalize().unwrap();
        for name in files {
            std::fs::write(root.join(name), "one").unwrap();
        }
        (temp, root)
    }

    async fn wait_until_cleared(cache: &CompileCache, path: &Path) -> bool {
        tokio::time::timeout(Duration::from_secs(5), async {
            while cache.contains(path) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .is_ok()
    }

    #[tokio::test]
    async fn test_change_clears_entry_once() {
        let (_temp, dir) = scratch(&["page.liquid"]);
        let file = dir.join("page.liquid");

        let cache = Arc::new(CompileCache::new());
        let watcher = CacheWatcher::new(Arc::downgrade(&cache), Duration::from_millis(20)).unwrap();
        cache.set(&file, entry(&file));
        watcher.watch_root(&file, [file.as_path()]).unwrap();
        assert!(watcher.is_watching(&file));

        std::fs::write(&file, "two").unwrap();
        assert!(
            wait_until_cleared(&cache, &file).await,
            "Timeout waiting for cache invalidation"
        );
        assert!(!watcher.is_watching(&file));
        assert_eq!(watcher.root_count(), 0);
    }

    #[tokio::test]
    async fn test_shared_include_clears_every_root() {
        let (_temp, dir) = scratch(&["a.liquid", "b.liquid", "footer.liquid"]);
        let a = dir.join("a.liquid");
        let b = dir.join("b.liquid");
        let footer = dir.join("footer.liquid");

        let cache = Arc::new(CompileCache::new());
        let watcher = CacheWatcher::new(Arc::downgrade(&cache), Duration::from_millis(20)).unwrap();
        cache.set(&a, entry(&a));
        cache.set(&b, entry(&b));
        watcher.watch_root(&a, [a.as_path(), footer.as_path()]).unwrap();
        watcher.watch_root(&b, [b.as_path(), footer.as_path()]).unwrap();

        std::fs::write(&footer, "two").unwrap();
        assert!(wait_until_cleared(&cache, &a).await);
        assert!(wait_until_cleared(&cache, &b).await);
        assert!(!watcher.is_watching(&a));
        assert!(!watcher.is_watching(&footer));
    }

    #[tokio::test]
    async fn test_rewatching_root_replaces_registration() {
        let (_temp, dir) = scratch(&["page.liquid", "old.liquid", "new.liquid"]);
        let page = dir.join("page.liquid");
        let old = dir.join("old.liquid");
        let new = dir.join("new.liquid");

        let cache = Arc::new(CompileCache::new());
        let watcher = CacheWatcher::new(Arc::downgrade(&cache), Duration::from_millis(20)).unwrap();
        watcher.watch_root(&page, [page.as_path(), old.as_path()]).unwrap();
        watcher.watch_root(&page, [page.as_path(), new.as_path()]).unwrap();

        assert_eq!(watcher.root_count(), 1);
        assert!(!watcher.is_watching(&old));
        assert!(watcher.is_watching(&new));

        watcher.forget_root(&page);
        assert!(!watcher.is_watching(&page));
        assert!(!watcher.is_watching(&new));
    }

    #[tokio::test]
    async fn test_many_roots_share_one_watcher() {
        let names: Vec<String> = (0..300).map(|i| format!("p{i}.liquid")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let (_temp, dir) = scratch(&refs);

        let cache = Arc::new(CompileCache::new());
        let watcher = CacheWatcher::new(Arc::downgrade(&cache), Duration::from_millis(20)).unwrap();
        for name in &names {
            let file = dir.join(name);
            cache.set(&file, entry(&file));
            watcher.watch_root(&file, [file.as_path()]).unwrap();
        }
        assert_eq!(watcher.root_count(), 300);

        let last = dir.join("p299.liquid");
        std::fs::write(&last, "two").unwrap();
        assert!(wait_until_cleared(&cache, &last).await);
        assert!(cache.contains(&dir.join("p0.liquid")));
    }

    #[tokio::test]
    async fn test_missing_file_leaves_nothing_registered() {
        let (_temp, dir) = scratch(&["page.liquid"]);
        let page = dir.join("page.liquid");
        let missing = dir.join("missing.liquid");

        let cache = Arc::new(CompileCache::new());
        let watcher = CacheWatcher::new(Arc::downgrade(&cache), Duration::from_millis(20)).unwrap();
        let result = watcher.watch_root(&page, [page.as_path(), missing.as_path()]);

        assert!(matches!(result, Err(ViewError::Watch { .. })));
        assert_eq!(watcher.root_count(), 0);
        assert!(!watcher.is_watching(&page));
    }
}
