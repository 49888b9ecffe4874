/*
 * settings.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Render options and engine configuration.
//!
//! [`ViewSettings`] mirrors the application settings a web framework hands to
//! its view engine (`views` directory and `view engine` extension).
//! [`RenderOptions`] carries everything that varies per render call, and
//! [`EngineConfig`] holds the knobs fixed at construction time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use minijinja::Value;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ViewError};

/// Extension appended to names that have none.
pub const DEFAULT_EXTENSION: &str = "liquid";

/// Template name used when the layout flag is set without a name.
pub const DEFAULT_LAYOUT: &str = "layout";

/// Default number of source lines shown around a failing line.
pub const DEFAULT_CONTEXT_LINES: usize = 3;

/// Default debounce for template file watches (in milliseconds).
pub const DEFAULT_WATCH_DEBOUNCE_MS: u64 = 50;

/// Application-level view settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSettings {
    /// Base directory that logical template names are resolved against
    pub views: PathBuf,

    /// Default extension for names without one (`liquid` when unset)
    #[serde(
        rename = "view engine",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub view_engine: Option<String>,
}

impl ViewSettings {
    pub fn new(views: impl Into<PathBuf>) -> Self {
        Self {
            views: views.into(),
            view_engine: None,
        }
    }

    pub fn with_view_engine(mut self, extension: impl Into<String>) -> Self {
        self.view_engine = Some(extension.into());
        self
    }

    /// The extension appended to extension-less names.
    pub fn extension(&self) -> &str {
        self.view_engine
            .as_deref()
            .filter(|ext| !ext.is_empty())
            .unwrap_or(DEFAULT_EXTENSION)
    }
}

/// Which layout template wraps a render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// The conventional `layout` template
    Default,
    /// A layout template by logical name
    Named(String),
}

impl Layout {
    pub fn name(&self) -> &str {
        match self {
            Layout::Default => DEFAULT_LAYOUT,
            Layout::Named(name) => name,
        }
    }
}

impl From<&str> for Layout {
    fn from(name: &str) -> Self {
        Layout::Named(name.to_string())
    }
}

impl From<String> for Layout {
    fn from(name: String) -> Self {
        Layout::Named(name)
    }
}

/// Per-render options.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// View settings; `None` means template names are already resolved paths
    pub settings: Option<ViewSettings>,
    /// Reuse and populate the compile cache
    pub cache: bool,
    /// Wrap the output in a layout template
    pub layout: Option<Layout>,
    /// Data bindings for this render, layered over the engine's globals
    pub locals: BTreeMap<String, Value>,
}

impl RenderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(mut self, settings: ViewSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// Wrap the render in a layout (`Layout::Default` or a name).
    pub fn with_layout(mut self, layout: impl Into<Layout>) -> Self {
        self.layout = Some(layout.into());
        self
    }

    pub fn without_layout(mut self) -> Self {
        self.layout = None;
        self
    }

    /// Bind a serializable value under `key`.
    pub fn with_local(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        self.locals.insert(key.into(), Value::from_serialize(&value));
        self
    }

    /// Bind every entry of a JSON object.
    ///
    /// Non-object values are rejected, since there is no key to bind them under.
    pub fn with_json_locals(mut self, data: serde_json::Value) -> Result<Self> {
        match data {
            serde_json::Value::Object(map) => {
                for (key, value) in map {
                    self.locals.insert(key, Value::from_serialize(&value));
                }
                Ok(self)
            }
            other => Err(ViewError::Config(format!(
                "template data must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Engine configuration fixed at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Include source lines, position and error chain in the error page
    pub trace_error: bool,

    /// Fetch each layer of includes concurrently
    pub parallel: bool,

    /// Watch cached template files and drop their entry on change
    pub watch: bool,

    /// Debounce applied to template file watches
    pub watch_debounce_ms: u64,

    /// Source lines shown before and after the failing line
    pub context_lines: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trace_error: false,
            parallel: false,
            watch: true,
            watch_debounce_ms: DEFAULT_WATCH_DEBOUNCE_MS,
            context_lines: DEFAULT_CONTEXT_LINES,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| ViewError::Config(e.to_string()))
    }

    /// Read a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ViewError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }
}
