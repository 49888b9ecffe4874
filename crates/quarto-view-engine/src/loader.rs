/*
 * loader.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template source loading.
//!
//! This module provides the trait and implementations for reading template
//! source text from various places (filesystem, memory, etc.).

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::resolver::normalize_path;

/// Trait for loading template sources.
///
/// Implementations receive a resolved path and return the template text.
#[async_trait]
pub trait TemplateLoader: Send + Sync {
    /// Read the template source at `path`.
    async fn load(&self, path: &Path) -> io::Result<String>;

    /// Whether loaded paths are real files that can be watched for changes.
    fn watches_filesystem(&self) -> bool {
        false
    }
}

/// Loader that reads templates from the filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSystemLoader;

#[async_trait]
impl TemplateLoader for FileSystemLoader {
    async fn load(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    fn watches_filesystem(&self) -> bool {
        true
    }
}

/// Loader that serves templates from an in-memory map.
///
/// Useful for testing and for templates bundled into the application.
/// Paths are normalized on insert and lookup.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    templates: RwLock<HashMap<PathBuf, String>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a loader with the given templates.
    pub fn with_templates(
        templates: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<String>)>,
    ) -> Self {
        let loader = Self::new();
        for (path, content) in templates {
            loader.insert(path, content);
        }
        loader
    }

    /// Add or replace a template.
    pub fn insert(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        let path = path.into();
        let key = normalize_path(&path).unwrap_or(path);
        self.templates
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, content.into());
    }

    /// Remove a template, returning its content.
    pub fn remove(&self, path: &Path) -> Option<String> {
        let key = normalize_path(path).unwrap_or_else(|_| path.to_path_buf());
        self.templates
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key)
    }
}

#[async_trait]
impl TemplateLoader for MemoryLoader {
    async fn load(&self, path: &Path) -> io::Result<String> {
        let key = normalize_path(path)?;
        self.templates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no template registered for {}", key.display()),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_loader() {
        let loader = MemoryLoader::with_templates([
            ("/views/header.liquid", "<h1>Title</h1>"),
            ("/views/footer.liquid", "<footer>End</footer>"),
        ]);

        assert_eq!(
            loader.load(Path::new("/views/header.liquid")).await.unwrap(),
            "<h1>Title</h1>"
        );
        assert_eq!(
            loader
                .load(Path::new("/views/partials/../footer.liquid"))
                .await
                .unwrap(),
            "<footer>End</footer>"
        );

        let missing = loader.load(Path::new("/views/missing.liquid")).await;
        assert_eq!(missing.unwrap_err().kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_memory_loader_replace_and_remove() {
        let loader = MemoryLoader::new();
        loader.insert("/views/page.liquid", "one");
        loader.insert("/views/page.liquid", "two");
        assert_eq!(loader.load(Path::new("/views/page.liquid")).await.unwrap(), "two");

        assert_eq!(
            loader.remove(Path::new("/views/page.liquid")),
            Some("two".to_string())
        );
        assert!(loader.load(Path::new("/views/page.liquid")).await.is_err());
    }

    #[tokio::test]
    async fn test_filesystem_loader() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("hello.liquid");
        std::fs::write(&path, "Hello, {{ name }}!").unwrap();

        let loader = FileSystemLoader;
        assert!(loader.watches_filesystem());
        assert_eq!(loader.load(&path).await.unwrap(), "Hello, {{ name }}!");

        let missing = loader.load(&temp.path().join("missing.liquid")).await;
        assert_eq!(missing.unwrap_err().kind(), io::ErrorKind::NotFound);
    }
}
