/*
 * compiled.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Compiled template closures.
//!
//! A [`SourceSet`] holds the source text of a root template and every template
//! it transitively includes, keyed by resolved path. [`CompiledTemplate`]
//! compiles the whole set into one `minijinja` environment, so includes are
//! looked up by name in the bundle instead of being loaded during rendering.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use minijinja::value::Rest;
use minijinja::{Environment, Value};

use crate::resolver::IncludeResolver;

/// Custom filter callable from templates.
pub type FilterFn = dyn Fn(Value, &[Value]) -> Result<Value, minijinja::Error> + Send + Sync;

/// Hook run against every freshly built environment.
pub type EnvironmentHook = dyn Fn(&mut Environment<'static>) + Send + Sync;

/// Source text of one template, tied to the path it was read from.
#[derive(Debug, Clone)]
pub struct TemplateSource {
    pub path: PathBuf,
    pub text: Arc<str>,
}

impl TemplateSource {
    pub fn new(path: PathBuf, text: impl Into<Arc<str>>) -> Self {
        Self {
            path,
            text: text.into(),
        }
    }

    /// Source lines, split on `\n`.
    pub fn lines(&self) -> Vec<&str> {
        self.text.split('\n').collect()
    }
}

/// The sources of a root template and its include closure.
#[derive(Debug, Clone)]
pub struct SourceSet {
    root: String,
    sources: BTreeMap<String, TemplateSource>,
}

impl SourceSet {
    pub fn new(root: TemplateSource) -> Self {
        let key = template_key(&root.path);
        let mut sources = BTreeMap::new();
        sources.insert(key.clone(), root);
        Self { root: key, sources }
    }

    pub(crate) fn insert(&mut self, source: TemplateSource) {
        self.sources.insert(template_key(&source.path), source);
    }

    /// Template name of the root in the compiled environment.
    pub fn root_name(&self) -> &str {
        &self.root
    }

    pub fn root(&self) -> Option<&TemplateSource> {
        self.sources.get(&self.root)
    }

    /// Look up a source by its template name.
    pub fn get(&self, name: &str) -> Option<&TemplateSource> {
        self.sources.get(name)
    }

    /// Paths of every template in the set.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.sources.values().map(|s| s.path.as_path())
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Template name used for a resolved path inside a compiled environment.
pub fn template_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Extension points applied when an environment is built.
#[derive(Clone, Default)]
pub struct EnvironmentSetup {
    pub filters: BTreeMap<String, Arc<FilterFn>>,
    pub hooks: Vec<Arc<EnvironmentHook>>,
}

impl EnvironmentSetup {
    fn apply(&self, env: &mut Environment<'static>) {
        for (name, filter) in &self.filters {
            let filter = Arc::clone(filter);
            env.add_filter(name.clone(), move |value: Value, args: Rest<Value>| {
                filter(value, &args)
            });
        }
        for hook in &self.hooks {
            hook(env);
        }
    }
}

impl std::fmt::Debug for EnvironmentSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentSetup")
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// A compile that failed on template syntax.
///
/// The sources are kept so the failure can be shown with its context.
#[derive(Debug)]
pub struct CompileFailure {
    pub sources: Arc<SourceSet>,
    pub error: minijinja::Error,
}

/// An executable template closure.
///
/// Immutable once built; shared through `Arc` by the cache and in-flight renders.
#[derive(Debug)]
pub struct CompiledTemplate {
    env: Environment<'static>,
    sources: Arc<SourceSet>,
}

impl CompiledTemplate {
    /// Compile every source of `sources` into one environment.
    ///
    /// Include names are mapped to template names through `includes`, with
    /// the including template as the parent.
    pub fn compile(
        sources: SourceSet,
        includes: &IncludeResolver,
        setup: &EnvironmentSetup,
    ) -> Result<Self, CompileFailure> {
        let sources = Arc::new(sources);
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);

        let join = includes.clone();
        env.set_path_join_callback(move |name, parent| {
            match join.resolve_include(name, Path::new(parent)) {
                Ok(path) => Cow::Owned(template_key(&path)),
                Err(_) => Cow::Borrowed(name),
            }
        });
        setup.apply(&mut env);

        for (name, source) in &sources.sources {
            if let Err(error) = env.add_template_owned(name.clone(), source.text.to_string()) {
                return Err(CompileFailure { sources, error });
            }
        }

        Ok(Self { env, sources })
    }

    pub fn sources(&self) -> &Arc<SourceSet> {
        &self.sources
    }

    /// Resolved path of the root template.
    pub fn path(&self) -> PathBuf {
        PathBuf::from(self.sources.root_name())
    }

    /// Execute the root template against `locals`.
    pub fn render(&self, locals: &BTreeMap<String, Value>) -> Result<String, minijinja::Error> {
        self.env.get_template(self.sources.root_name())?.render(locals)
    }
}
