/*
 * engine.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The view engine entry point.
//!
//! A render resolves the template name, takes the compiled closure from the
//! cache or builds it (collect includes, compile, maybe cache and watch),
//! executes it against a fresh [`RenderContext`], and optionally wraps the
//! result in a layout. Execution and syntax failures come back as the error
//! page; only resolution and read failures are returned as errors.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use minijinja::{Environment, Value};
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CompileCache};
use crate::collector::IncludeWalker;
use crate::compiled::{
    CompileFailure, CompiledTemplate, EnvironmentHook, EnvironmentSetup, FilterFn, SourceSet,
};
use crate::context::RenderContext;
use crate::diagnostic::Diagnostic;
use crate::error::{Result, ViewError};
use crate::loader::{FileSystemLoader, TemplateLoader};
use crate::resolver::{DefaultResolver, FilenameResolver, IncludeResolver};
use crate::settings::{EngineConfig, RenderOptions, ViewSettings};
use crate::watch::CacheWatcher;

/// Result of a render that did not fail hard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// The template rendered normally
    Rendered(String),
    /// The template failed and the error page was rendered instead
    ErrorPage(String),
}

impl RenderOutcome {
    pub fn is_error_page(&self) -> bool {
        matches!(self, RenderOutcome::ErrorPage(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            RenderOutcome::Rendered(text) | RenderOutcome::ErrorPage(text) => text,
        }
    }

    pub fn into_string(self) -> String {
        match self {
            RenderOutcome::Rendered(text) | RenderOutcome::ErrorPage(text) => text,
        }
    }
}

/// A compile that either produced a template or failed on syntax.
enum Compiled {
    Ready(Arc<CompiledTemplate>),
    Invalid(CompileFailure),
}

/// Builder for [`ViewEngine`].
pub struct ViewEngineBuilder {
    config: EngineConfig,
    loader: Arc<dyn TemplateLoader>,
    resolver: Arc<dyn FilenameResolver>,
    globals: BTreeMap<String, Value>,
    setup: EnvironmentSetup,
}

impl Default for ViewEngineBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            loader: Arc::new(FileSystemLoader),
            resolver: Arc::new(DefaultResolver),
            globals: BTreeMap::new(),
            setup: EnvironmentSetup::default(),
        }
    }
}

impl ViewEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn trace_error(mut self, trace: bool) -> Self {
        self.config.trace_error = trace;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.config.parallel = parallel;
        self
    }

    pub fn watch(mut self, watch: bool) -> Self {
        self.config.watch = watch;
        self
    }

    pub fn watch_debounce_ms(mut self, ms: u64) -> Self {
        self.config.watch_debounce_ms = ms;
        self
    }

    pub fn context_lines(mut self, lines: usize) -> Self {
        self.config.context_lines = lines;
        self
    }

    /// Read templates through `loader` instead of the filesystem.
    pub fn loader(mut self, loader: impl TemplateLoader + 'static) -> Self {
        self.loader = Arc::new(loader);
        self
    }

    /// Resolve names through `resolver` instead of [`DefaultResolver`].
    pub fn resolver(mut self, resolver: impl FilenameResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Bind a value visible to every render. Render locals take precedence.
    pub fn global(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        self.globals.insert(key.into(), Value::from_serialize(&value));
        self
    }

    /// Register a filter callable as `{{ value | name(args) }}`.
    pub fn filter<F>(mut self, name: impl Into<String>, filter: F) -> Self
    where
        F: Fn(Value, &[Value]) -> std::result::Result<Value, minijinja::Error>
            + Send
            + Sync
            + 'static,
    {
        let filter: Arc<FilterFn> = Arc::new(filter);
        self.setup.filters.insert(name.into(), filter);
        self
    }

    /// Run `hook` on every environment the engine builds, e.g. to add tests,
    /// functions or globals the template library supports natively.
    pub fn extension<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Environment<'static>) + Send + Sync + 'static,
    {
        let hook: Arc<EnvironmentHook> = Arc::new(hook);
        self.setup.hooks.push(hook);
        self
    }

    pub fn build(self) -> ViewEngine {
        ViewEngine {
            inner: Arc::new(EngineInner {
                config: self.config,
                loader: self.loader,
                resolver: self.resolver,
                globals: self.globals,
                setup: self.setup,
                cache: Arc::new(CompileCache::new()),
                watcher: Mutex::new(None),
            }),
        }
    }
}

struct EngineInner {
    config: EngineConfig,
    loader: Arc<dyn TemplateLoader>,
    resolver: Arc<dyn FilenameResolver>,
    globals: BTreeMap<String, Value>,
    setup: EnvironmentSetup,
    cache: Arc<CompileCache>,
    /// Started on the first cache fill that needs watching
    watcher: Mutex<Option<CacheWatcher>>,
}

impl EngineInner {
    fn watcher(&self) -> MutexGuard<'_, Option<CacheWatcher>> {
        self.watcher.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Renders templates by logical name.
///
/// Cheap to clone; clones share the compile cache.
#[derive(Clone)]
pub struct ViewEngine {
    inner: Arc<EngineInner>,
}

impl Default for ViewEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ViewEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewEngine")
            .field("config", &self.inner.config)
            .field("cached", &self.inner.cache.len())
            .field("watcher", &*self.inner.watcher())
            .field("setup", &self.inner.setup)
            .finish_non_exhaustive()
    }
}

impl ViewEngine {
    /// Engine with the default configuration, filesystem loader and resolver.
    pub fn new() -> Self {
        ViewEngineBuilder::new().build()
    }

    pub fn builder() -> ViewEngineBuilder {
        ViewEngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The compile cache shared by every render of this engine.
    pub fn cache(&self) -> &CompileCache {
        &self.inner.cache
    }

    /// Cached entry for an already-resolved template path.
    pub fn get_cache(&self, name: &str) -> Option<Arc<CacheEntry>> {
        let path = self.inner.resolver.resolve(name, None).ok()?;
        self.inner.cache.get(&path)
    }

    /// Drop the cached entry for an already-resolved template path.
    pub fn clear_cache(&self, name: &str) -> Option<Arc<CacheEntry>> {
        let path = self.inner.resolver.resolve(name, None).ok()?;
        let removed = self.inner.cache.clear(&path);
        if let Some(watcher) = self.inner.watcher().as_ref() {
            watcher.forget_root(&path);
        }
        if removed.is_some() {
            debug!(path = %path.display(), "Template cache entry cleared");
        }
        removed
    }

    /// Resolve a logical name the way renders do.
    pub fn resolve(&self, name: &str, settings: Option<&ViewSettings>) -> Result<PathBuf> {
        self.inner.resolver.resolve(name, settings)
    }

    /// Compile a template closure, e.g. to warm the cache.
    ///
    /// Unlike a render, syntax errors are returned as [`ViewError::Parse`].
    pub async fn compile(
        &self,
        name: &str,
        settings: Option<ViewSettings>,
        cache: bool,
    ) -> Result<Arc<CompiledTemplate>> {
        let includes = IncludeResolver::new(Arc::clone(&self.inner.resolver), settings);
        let path = includes.resolve_root(name)?;
        match self.load(&path, &includes, cache).await? {
            Compiled::Ready(template) => Ok(template),
            Compiled::Invalid(failure) => Err(ViewError::Parse {
                path,
                source: failure.error,
            }),
        }
    }

    /// Render `name` and return the output text.
    ///
    /// A template that fails to execute yields the error page as `Ok`.
    pub async fn render(&self, name: &str, options: RenderOptions) -> Result<String> {
        self.render_outcome(name, options)
            .await
            .map(RenderOutcome::into_string)
    }

    /// Render `name`, telling normal output and the error page apart.
    pub async fn render_outcome(&self, name: &str, options: RenderOptions) -> Result<RenderOutcome> {
        let RenderOptions {
            settings,
            cache,
            layout,
            locals,
        } = options;
        let includes = IncludeResolver::new(Arc::clone(&self.inner.resolver), settings);
        let mut ctx = RenderContext::from_globals(&self.inner.globals);
        ctx.extend(locals);

        let body = match self.render_template(name, &includes, cache, &mut ctx).await? {
            RenderOutcome::Rendered(body) => body,
            page @ RenderOutcome::ErrorPage(_) => return Ok(page),
        };
        let Some(layout) = layout else {
            return Ok(RenderOutcome::Rendered(body));
        };

        debug!(template = name, layout = layout.name(), "Rendering layout");
        let body = Value::from_safe_string(body);
        ctx.set_local("body", body.clone());
        ctx.set_local("content_for_layout", body);
        self.render_template(layout.name(), &includes, cache, &mut ctx)
            .await
    }

    async fn render_template(
        &self,
        name: &str,
        includes: &IncludeResolver,
        cache: bool,
        ctx: &mut RenderContext,
    ) -> Result<RenderOutcome> {
        let path = includes.resolve_root(name)?;
        match self.load(&path, includes, cache).await? {
            Compiled::Ready(template) => match ctx.execute(&template) {
                Ok(()) => Ok(RenderOutcome::Rendered(ctx.take_output())),
                Err(error) => self.error_page(&path, &error, ctx, template.sources()),
            },
            Compiled::Invalid(failure) => {
                ctx.fail_at(&failure.error, &failure.sources);
                self.error_page(&path, &failure.error, ctx, &failure.sources)
            }
        }
    }

    /// Fetch the compiled closure for `path`, from the cache when allowed.
    async fn load(
        &self,
        path: &Path,
        includes: &IncludeResolver,
        use_cache: bool,
    ) -> Result<Compiled> {
        if use_cache {
            if let Some(entry) = self.inner.cache.get(path) {
                debug!(path = %path.display(), "Template cache hit");
                return Ok(Compiled::Ready(Arc::clone(entry.template())));
            }
        }

        let sources = IncludeWalker::new(self.inner.loader.as_ref(), includes)
            .parallel(self.inner.config.parallel)
            .collect(path)
            .await?;
        let template = match CompiledTemplate::compile(sources, includes, &self.inner.setup) {
            Ok(template) => Arc::new(template),
            Err(failure) => return Ok(Compiled::Invalid(failure)),
        };

        if use_cache {
            self.store(path, &template);
        }
        Ok(Compiled::Ready(template))
    }

    fn store(&self, path: &Path, template: &Arc<CompiledTemplate>) {
        self.inner
            .cache
            .set(path, CacheEntry::new(Arc::clone(template)));
        debug!(path = %path.display(), "Template cached");

        if !self.inner.config.watch || !self.inner.loader.watches_filesystem() {
            return;
        }
        let mut watcher = self.inner.watcher();
        if watcher.is_none() {
            let debounce = Duration::from_millis(self.inner.config.watch_debounce_ms);
            match CacheWatcher::new(Arc::downgrade(&self.inner.cache), debounce) {
                Ok(started) => *watcher = Some(started),
                Err(e) => {
                    warn!(error = %e, "Cached templates will not be invalidated on change");
                    return;
                }
            }
        }
        if let Some(watcher) = watcher.as_ref() {
            if let Err(e) = watcher.watch_root(path, template.sources().paths()) {
                warn!(error = %e, "Cached template will not be invalidated on change");
            }
        }
    }

    fn error_page(
        &self,
        path: &Path,
        error: &minijinja::Error,
        ctx: &RenderContext,
        sources: &SourceSet,
    ) -> Result<RenderOutcome> {
        warn!(path = %path.display(), error = %error, "Template failed, rendering error page");
        let config = &self.inner.config;
        Diagnostic::from_error(
            error,
            ctx.position(),
            sources,
            config.trace_error,
            config.context_lines,
        )
        .render()
        .map(RenderOutcome::ErrorPage)
        .map_err(|source| ViewError::Execution {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;
    use crate::settings::Layout;
    use pretty_assertions::assert_eq;

    fn options() -> RenderOptions {
        RenderOptions::new().with_settings(ViewSettings::new("/views"))
    }

    fn engine(templates: &[(&str, &str)]) -> ViewEngine {
        ViewEngine::builder()
            .loader(MemoryLoader::with_templates(templates.iter().copied()))
            .build()
    }

    #[tokio::test]
    async fn test_render_with_include() {
        let engine = engine(&[
            ("/views/main.liquid", "Main. {% include \"footer\" %}"),
            ("/views/footer.liquid", "Bye"),
        ]);
        let text = engine.render("main", options()).await.unwrap();
        assert_eq!(text, "Main. Bye");
    }

    #[tokio::test]
    async fn test_globals_and_locals() {
        let engine = ViewEngine::builder()
            .loader(MemoryLoader::with_templates([(
                "/views/locals.liquid",
                "a={{ a }},b={{ b }}",
            )]))
            .global("a", "a123")
            .global("b", "b456")
            .build();

        let text = engine
            .render("locals", options().with_local("a", "789"))
            .await
            .unwrap();
        assert_eq!(text, "a=789,b=b456");

        let text = engine.render("locals", options()).await.unwrap();
        assert_eq!(text, "a=a123,b=b456");
    }

    #[tokio::test]
    async fn test_layout_binds_body_twice() {
        let engine = engine(&[
            ("/views/template.liquid", "I am template."),
            (
                "/views/layout.liquid",
                "I am layout. {{ body }} {{ content_for_layout }} The end.",
            ),
        ]);
        let text = engine
            .render("template", options().with_layout(Layout::Default))
            .await
            .unwrap();
        assert_eq!(text, "I am layout. I am template. I am template. The end.");
    }

    #[tokio::test]
    async fn test_custom_resolver_and_loader() {
        struct EchoLoader;

        #[async_trait::async_trait]
        impl TemplateLoader for EchoLoader {
            async fn load(&self, path: &Path) -> std::io::Result<String> {
                Ok(format!("<File:{}>", path.display()))
            }
        }

        let engine = ViewEngine::builder()
            .loader(EchoLoader)
            .resolver(|name: &str, _: Option<&ViewSettings>| -> Result<PathBuf> {
                Ok(PathBuf::from(name))
            })
            .build();
        let text = engine.render("ooxx.liquid", options()).await.unwrap();
        assert_eq!(text, "<File:ooxx.liquid>");
    }

    #[tokio::test]
    async fn test_missing_template_is_hard_error() {
        let engine = engine(&[]);
        let result = engine.render("nothing", options()).await;
        assert!(matches!(result, Err(ViewError::Read { .. })));
    }

    #[tokio::test]
    async fn test_syntax_error_renders_error_page() {
        let engine = engine(&[("/views/bad.liquid", "{% if %}")]);
        let outcome = engine.render_outcome("bad", options()).await.unwrap();
        assert!(outcome.is_error_page());
        assert!(outcome.as_str().contains("syntax error"));

        let compiled = engine
            .compile("bad", Some(ViewSettings::new("/views")), false)
            .await;
        assert!(matches!(compiled, Err(ViewError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_raw_comment_and_optional_includes_render() {
        let engine = engine(&[
            (
                "/views/raw.liquid",
                "{% raw %}Use {% include \"header\" %} to embed{% endraw %}",
            ),
            ("/views/comment.liquid", "{# {% include \"old\" %} #}ok"),
            ("/views/optional.liquid", "{% include \"opt\" ignore missing %}ok"),
        ]);

        let text = engine.render("raw", options()).await.unwrap();
        assert_eq!(text, "Use {% include \"header\" %} to embed");
        assert_eq!(engine.render("comment", options()).await.unwrap(), "ok");
        assert_eq!(engine.render("optional", options()).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_memory_loader_is_not_watched() {
        let engine = engine(&[("/views/page.liquid", "x")]);
        engine
            .render("page", options().with_cache(true))
            .await
            .unwrap();
        assert!(engine.get_cache("/views/page.liquid").is_some());
        assert!(engine.clear_cache("/views/page.liquid").is_some());
        assert!(engine.cache().is_empty());
    }
}
