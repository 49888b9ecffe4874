/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Express-style view engine for Liquid-like templates.
//!
//! Templates are addressed by logical name and resolved against a `views`
//! directory. A render:
//!
//! - Resolves the name to an absolute, extension-qualified path
//! - Reads the template and every template it includes, each exactly once
//! - Compiles the whole include closure, optionally caching it per root path
//! - Executes it against the engine's globals layered with the render's locals
//! - Optionally wraps the output in a layout bound as `body` and `content_for_layout`
//!
//! When a template fails to compile or execute, the render still succeeds with
//! a friendly HTML error page. Only missing templates and unresolvable names
//! surface as [`ViewError`].
//!
//! # Architecture
//!
//! Parsing and evaluation are delegated to `minijinja`. This crate owns
//! name resolution, file loading, include collection, the compile cache with
//! file-watch invalidation, layouts, and the error page.
//!
//! # Example
//!
//! ```ignore
//! use quarto_view_engine::{RenderOptions, ViewEngine, ViewSettings};
//!
//! let engine = ViewEngine::builder().global("site", "Quarto").build();
//! let options = RenderOptions::new()
//!     .with_settings(ViewSettings::new("views"))
//!     .with_cache(true)
//!     .with_local("name", "World");
//!
//! let html = engine.render("hello", options).await?;
//! ```

pub mod cache;
pub mod collector;
pub mod compiled;
pub mod context;
pub mod diagnostic;
pub mod engine;
pub mod error;
pub mod loader;
pub mod resolver;
pub mod settings;
pub mod watch;

// Re-export main types at crate root
pub use cache::{CacheEntry, CompileCache};
pub use collector::{IncludeRef, IncludeWalker, collect_includes, scan_includes};
pub use compiled::{CompiledTemplate, EnvironmentHook, FilterFn, SourceSet, TemplateSource};
pub use context::{Position, RenderContext};
pub use diagnostic::{Diagnostic, SourceLine};
pub use engine::{RenderOutcome, ViewEngine, ViewEngineBuilder};
pub use error::{Result, ViewError};
pub use loader::{FileSystemLoader, MemoryLoader, TemplateLoader};
pub use resolver::{DefaultResolver, FilenameResolver, IncludeResolver};
pub use settings::{EngineConfig, Layout, RenderOptions, ViewSettings};
pub use watch::CacheWatcher;
