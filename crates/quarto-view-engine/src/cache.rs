/*
 * cache.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Compile cache keyed by resolved template path.
//!
//! Entries are created on the first successful compile of a render with
//! caching enabled and live until cleared, either explicitly or by a file
//! watch. There is no eviction. Writes are last-writer-wins: two renders that
//! miss concurrently compile the same closure twice and one result is kept.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::compiled::{CompiledTemplate, TemplateSource};
use crate::resolver::normalize_path;

/// A cached compile of one root template.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    template: Arc<CompiledTemplate>,
}

impl CacheEntry {
    pub fn new(template: Arc<CompiledTemplate>) -> Self {
        Self { template }
    }

    pub fn template(&self) -> &Arc<CompiledTemplate> {
        &self.template
    }

    /// Source of the root template.
    pub fn source(&self) -> Option<&TemplateSource> {
        self.template.sources().root()
    }

    /// Root template source split into lines.
    pub fn lines(&self) -> Vec<&str> {
        self.source().map(|s| s.lines()).unwrap_or_default()
    }
}

/// Shared map from resolved path to compiled template.
#[derive(Debug, Default)]
pub struct CompileCache {
    entries: RwLock<HashMap<PathBuf, Arc<CacheEntry>>>,
}

impl CompileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<Arc<CacheEntry>> {
        self.read().get(&cache_key(path)).cloned()
    }

    /// Store `entry` under `path`, returning the stored entry.
    pub fn set(&self, path: &Path, entry: CacheEntry) -> Arc<CacheEntry> {
        let entry = Arc::new(entry);
        self.write().insert(cache_key(path), Arc::clone(&entry));
        entry
    }

    /// Remove the entry for `path`, returning it if present.
    pub fn clear(&self, path: &Path) -> Option<Arc<CacheEntry>> {
        self.write().remove(&cache_key(path))
    }

    /// Remove every entry.
    pub fn clear_all(&self) {
        self.write().clear();
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.read().contains_key(&cache_key(path))
    }

    /// Cached paths, sorted.
    pub fn keys(&self) -> Vec<PathBuf> {
        let mut keys: Vec<PathBuf> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Copy of the raw key to entry mapping.
    pub fn snapshot(&self) -> HashMap<PathBuf, Arc<CacheEntry>> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<PathBuf, Arc<CacheEntry>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PathBuf, Arc<CacheEntry>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Canonical cache key: absolute and lexically normalized.
fn cache_key(path: &Path) -> PathBuf {
    normalize_path(path).unwrap_or_else(|_| path.to_path_buf())
}
