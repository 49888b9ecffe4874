/*
 * resolver.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template filename resolution.
//!
//! Logical template names are turned into absolute, extension-qualified paths.
//! The resolved path doubles as the compile cache key, so resolution must be
//! deterministic and must not depend on cache state.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, ViewError};
use crate::settings::ViewSettings;

/// Trait for mapping a logical template name to a path.
///
/// Implemented by [`DefaultResolver`] and by any closure with the same shape,
/// so callers can plug in their own lookup rules.
pub trait FilenameResolver: Send + Sync {
    /// Resolve `name`. Without settings the name is already a path.
    fn resolve(&self, name: &str, settings: Option<&ViewSettings>) -> Result<PathBuf>;
}

impl<F> FilenameResolver for F
where
    F: Fn(&str, Option<&ViewSettings>) -> Result<PathBuf> + Send + Sync,
{
    fn resolve(&self, name: &str, settings: Option<&ViewSettings>) -> Result<PathBuf> {
        self(name, settings)
    }
}

/// Resolver that joins names onto the `views` directory.
///
/// Resolution rules:
/// - Without settings, the name is returned unchanged
/// - Otherwise `views/name`, made absolute with `.` and `..` folded away
/// - The `view engine` extension (default `liquid`) is appended when the
///   final component has no extension
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResolver;

impl FilenameResolver for DefaultResolver {
    fn resolve(&self, name: &str, settings: Option<&ViewSettings>) -> Result<PathBuf> {
        if name.is_empty() {
            return Err(ViewError::resolution(name, "template name is empty"));
        }
        let Some(settings) = settings else {
            return Ok(PathBuf::from(name));
        };

        let joined = normalize_path(&settings.views.join(name))
            .map_err(|e| ViewError::resolution(name, e.to_string()))?;
        Ok(with_default_extension(joined, settings.extension()))
    }
}

/// Append `.{extension}` unless the file name already carries one.
///
/// `Path::with_extension` is not used because it would replace a dotted
/// directory suffix such as `v1.2/page`.
pub fn with_default_extension(path: PathBuf, extension: &str) -> PathBuf {
    if path.extension().is_some() {
        return path;
    }
    let mut raw: OsString = path.into_os_string();
    raw.push(".");
    raw.push(extension);
    PathBuf::from(raw)
}

/// Make `path` absolute and fold `.` and `..` components lexically.
///
/// The file does not need to exist; symlinks are left alone.
pub fn normalize_path(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Resolves include directive names on behalf of a template.
///
/// Names starting with `./` or `../` are relative to the including template's
/// directory; all other names go through the filename resolver with the
/// render's settings, like top-level names.
#[derive(Clone)]
pub struct IncludeResolver {
    resolver: Arc<dyn FilenameResolver>,
    settings: Option<ViewSettings>,
}

impl IncludeResolver {
    pub fn new(resolver: Arc<dyn FilenameResolver>, settings: Option<ViewSettings>) -> Self {
        Self { resolver, settings }
    }

    pub fn settings(&self) -> Option<&ViewSettings> {
        self.settings.as_ref()
    }

    /// Resolve a top-level template name.
    pub fn resolve_root(&self, name: &str) -> Result<PathBuf> {
        self.resolver.resolve(name, self.settings.as_ref())
    }

    /// Resolve `name` as referenced from the template at `parent`.
    pub fn resolve_include(&self, name: &str, parent: &Path) -> Result<PathBuf> {
        if is_relative_include(name) {
            let base = parent.parent().unwrap_or(Path::new("."));
            let joined = normalize_path(&base.join(name))
                .map_err(|e| ViewError::resolution(name, e.to_string()))?;
            let joined = joined.to_string_lossy();
            self.resolver.resolve(&joined, self.settings.as_ref())
        } else {
            self.resolver.resolve(name, self.settings.as_ref())
        }
    }
}

impl std::fmt::Debug for IncludeResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncludeResolver")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn is_relative_include(name: &str) -> bool {
    name.starts_with("./") || name.starts_with("../")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ViewSettings {
        ViewSettings::new("/srv/views")
    }

    #[test]
    fn test_resolve_without_settings_is_identity() {
        let path = DefaultResolver.resolve("/abs/page.liquid", None).unwrap();
        assert_eq!(path, PathBuf::from("/abs/page.liquid"));

        let path = DefaultResolver.resolve("relative/page", None).unwrap();
        assert_eq!(path, PathBuf::from("relative/page"));
    }

    #[test]
    fn test_resolve_appends_default_extension() {
        let path = DefaultResolver.resolve("hello", Some(&settings())).unwrap();
        assert_eq!(path, PathBuf::from("/srv/views/hello.liquid"));
    }

    #[test]
    fn test_resolve_keeps_explicit_extension() {
        let path = DefaultResolver.resolve("hello.html", Some(&settings())).unwrap();
        assert_eq!(path, PathBuf::from("/srv/views/hello.html"));
    }

    #[test]
    fn test_resolve_uses_view_engine_extension() {
        let settings = settings().with_view_engine("tpl");
        let path = DefaultResolver.resolve("pages/index", Some(&settings)).unwrap();
        assert_eq!(path, PathBuf::from("/srv/views/pages/index.tpl"));
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let first = DefaultResolver.resolve("a/../b/page", Some(&settings())).unwrap();
        assert_eq!(first, PathBuf::from("/srv/views/b/page.liquid"));

        let second = DefaultResolver
            .resolve(first.to_str().unwrap(), Some(&settings()))
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_resolve_dotted_directory() {
        let path = DefaultResolver.resolve("v1.2/page", Some(&settings())).unwrap();
        assert_eq!(path, PathBuf::from("/srv/views/v1.2/page.liquid"));
    }

    #[test]
    fn test_resolve_empty_name_fails() {
        let result = DefaultResolver.resolve("", Some(&settings()));
        assert!(matches!(result, Err(ViewError::Resolution { .. })));
    }

    #[test]
    fn test_closure_resolver() {
        let resolver = |name: &str, _: Option<&ViewSettings>| -> Result<PathBuf> {
            Ok(PathBuf::from("/custom").join(name))
        };
        assert_eq!(
            resolver.resolve("x", None).unwrap(),
            PathBuf::from("/custom/x")
        );
    }

    #[test]
    fn test_include_relative_to_parent() {
        let includes = IncludeResolver::new(Arc::new(DefaultResolver), Some(settings()));
        let parent = Path::new("/srv/views/blog/post.liquid");

        let sibling = includes.resolve_include("./meta", parent).unwrap();
        assert_eq!(sibling, PathBuf::from("/srv/views/blog/meta.liquid"));

        let up = includes.resolve_include("../footer", parent).unwrap();
        assert_eq!(up, PathBuf::from("/srv/views/footer.liquid"));

        let rooted = includes.resolve_include("footer", parent).unwrap();
        assert_eq!(rooted, PathBuf::from("/srv/views/footer.liquid"));
    }

    #[test]
    fn test_normalize_path_folds_components() {
        let path = normalize_path(Path::new("/a/./b/../c")).unwrap();
        assert_eq!(path, PathBuf::from("/a/c"));
    }
}
