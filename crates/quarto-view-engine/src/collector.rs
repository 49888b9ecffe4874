/*
 * collector.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Include dependency collection.
//!
//! [`scan_includes`] scans one template for include directives, skipping
//! `{% raw %}` blocks and `{# #}` comments.
//! [`IncludeWalker`] drives the transitive closure: a queue of pending
//! `(name, parent)` pairs and a visited set of resolved paths. Every reachable
//! template is read exactly once and cycles terminate, because a path enters
//! the visited set before its includes are queued.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};

use futures::future::try_join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace};

use crate::compiled::{SourceSet, TemplateSource};
use crate::error::{Result, ViewError};
use crate::loader::TemplateLoader;
use crate::resolver::IncludeResolver;

/// `{% include "name" %}`, with optional whitespace control, either quote
/// and an optional `ignore missing` clause.
static INCLUDE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{%[-+]?\s*include\s+(?:"([^"]+)"|'([^']+)')(\s+ignore\s+missing\b)?"#)
        .unwrap()
});

/// Spans whose text is never parsed as tags: raw blocks and comments.
static VERBATIM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\{%[-+]?\s*raw\s*[-+]?%\}.*?\{%[-+]?\s*endraw\s*[-+]?%\}|\{#.*?#\}")
        .unwrap()
});

/// An include directive found in a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeRef {
    /// Literal name as written
    pub name: String,
    /// `ignore missing` was given, so a missing file is not an error
    pub optional: bool,
}

/// Include directives in `text`, in source order without duplicate names.
///
/// A name included both with and without `ignore missing` is required.
pub fn scan_includes(text: &str) -> Vec<IncludeRef> {
    let text: Cow<'_, str> = VERBATIM_RE.replace_all(text, "");
    let mut refs: Vec<IncludeRef> = Vec::new();
    for caps in INCLUDE_RE.captures_iter(&text) {
        let Some(name) = caps.get(1).or_else(|| caps.get(2)) else {
            continue;
        };
        let name = name.as_str().trim();
        if name.is_empty() {
            continue;
        }
        let optional = caps.get(3).is_some();
        match refs.iter_mut().find(|r| r.name == name) {
            Some(existing) => existing.optional &= optional,
            None => refs.push(IncludeRef {
                name: name.to_string(),
                optional,
            }),
        }
    }
    refs
}

/// Literal names referenced by include directives in `text`.
///
/// Names are returned in source order without duplicates. They are not
/// resolved and not followed.
pub fn collect_includes(text: &str) -> Vec<String> {
    scan_includes(text).into_iter().map(|r| r.name).collect()
}

/// An include waiting to be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingInclude {
    name: String,
    parent: PathBuf,
    optional: bool,
}

/// Breadth-first walker over a template's include closure.
pub struct IncludeWalker<'a> {
    loader: &'a dyn TemplateLoader,
    includes: &'a IncludeResolver,
    parallel: bool,
}

impl<'a> IncludeWalker<'a> {
    pub fn new(loader: &'a dyn TemplateLoader, includes: &'a IncludeResolver) -> Self {
        Self {
            loader,
            includes,
            parallel: false,
        }
    }

    /// Fetch each layer of pending includes concurrently.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Read `root` and every template it transitively includes.
    ///
    /// The first read failure aborts the walk.
    pub async fn collect(&self, root: &Path) -> Result<SourceSet> {
        let text = self.read(root).await?;
        let mut seen: HashSet<PathBuf> = HashSet::new();
        seen.insert(root.to_path_buf());

        let mut pending: VecDeque<PendingInclude> = VecDeque::new();
        enqueue(&mut pending, &text, root);
        let mut sources = SourceSet::new(TemplateSource::new(root.to_path_buf(), text));

        if self.parallel {
            self.walk_layers(&mut pending, &mut seen, &mut sources).await?;
        } else {
            self.walk_sequential(&mut pending, &mut seen, &mut sources).await?;
        }

        debug!(
            root = %root.display(),
            templates = sources.len(),
            "Collected include closure"
        );
        Ok(sources)
    }

    async fn walk_sequential(
        &self,
        pending: &mut VecDeque<PendingInclude>,
        seen: &mut HashSet<PathBuf>,
        sources: &mut SourceSet,
    ) -> Result<()> {
        while let Some(include) = pending.pop_front() {
            let path = self.includes.resolve_include(&include.name, &include.parent)?;
            if seen.contains(&path) {
                continue;
            }
            let Some(text) = self.read_include(&path, include.optional).await? else {
                continue;
            };
            seen.insert(path.clone());
            enqueue(pending, &text, &path);
            sources.insert(TemplateSource::new(path, text));
        }
        Ok(())
    }

    async fn walk_layers(
        &self,
        pending: &mut VecDeque<PendingInclude>,
        seen: &mut HashSet<PathBuf>,
        sources: &mut SourceSet,
    ) -> Result<()> {
        while !pending.is_empty() {
            // Path and whether every reference to it is optional
            let mut layer: Vec<(PathBuf, bool)> = Vec::new();
            let mut index: HashMap<PathBuf, usize> = HashMap::new();
            for include in pending.drain(..) {
                let path = self.includes.resolve_include(&include.name, &include.parent)?;
                if seen.contains(&path) {
                    continue;
                }
                match index.get(&path) {
                    Some(&i) => layer[i].1 &= include.optional,
                    None => {
                        index.insert(path.clone(), layer.len());
                        layer.push((path, include.optional));
                    }
                }
            }
            seen.extend(layer.iter().map(|(path, _)| path.clone()));

            let texts = try_join_all(
                layer
                    .iter()
                    .map(|(path, optional)| self.read_include(path, *optional)),
            )
            .await?;
            for ((path, _), text) in layer.into_iter().zip(texts) {
                let Some(text) = text else {
                    // A later required include may still find it
                    seen.remove(&path);
                    continue;
                };
                enqueue(pending, &text, &path);
                sources.insert(TemplateSource::new(path, text));
            }
        }
        Ok(())
    }

    /// Read an include, yielding `None` for a missing optional one.
    async fn read_include(&self, path: &Path, optional: bool) -> Result<Option<String>> {
        trace!(path = %path.display(), optional, "Reading include");
        match self.loader.load(path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if optional && e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Skipping missing optional include");
                Ok(None)
            }
            Err(source) => Err(ViewError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    async fn read(&self, path: &Path) -> Result<String> {
        trace!(path = %path.display(), "Reading template");
        self.loader
            .load(path)
            .await
            .map_err(|source| ViewError::Read {
                path: path.to_path_buf(),
                source,
            })
    }
}

fn enqueue(pending: &mut VecDeque<PendingInclude>, text: &str, parent: &Path) {
    for include in scan_includes(text) {
        pending.push_back(PendingInclude {
            name: include.name,
            parent: parent.to_path_buf(),
            optional: include.optional,
        });
    }
}
