/*
 * context.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Per-render state.
//!
//! A [`RenderContext`] is built fresh for every render from the engine's
//! immutable globals plus the render's own locals. It owns the output buffer
//! and records where execution failed, and is dropped when the render returns.

use std::collections::BTreeMap;
use std::ops::Range;

use minijinja::Value;

use crate::compiled::{CompiledTemplate, SourceSet};

/// A location inside a template source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    /// Template name (the resolved path) the position refers to
    pub name: String,
    /// 1-based line
    pub line: usize,
    /// 1-based column
    pub column: usize,
}

impl Position {
    /// Locate a template error inside `sources`.
    ///
    /// Errors without a line number have no position. When the error names
    /// no template, the root is assumed.
    pub fn of_error(error: &minijinja::Error, sources: &SourceSet) -> Option<Self> {
        let line = error.line()?;
        let name = error.name().unwrap_or(sources.root_name()).to_string();
        let column = match (error.range(), sources.get(&name)) {
            (Some(range), Some(source)) => column_of(&source.text, range),
            _ => 1,
        };
        Some(Self { name, line, column })
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.name, self.line, self.column)
    }
}

fn column_of(text: &str, range: Range<usize>) -> usize {
    let start = range.start.min(text.len());
    if !text.is_char_boundary(start) {
        return 1;
    }
    let line_start = text[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    text[line_start..start].chars().count() + 1
}

/// Mutable state of a single render call.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    locals: BTreeMap<String, Value>,
    buffer: String,
    position: Option<Position>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a copy of `globals`; the globals themselves are untouched.
    pub fn from_globals(globals: &BTreeMap<String, Value>) -> Self {
        Self {
            locals: globals.clone(),
            ..Self::default()
        }
    }

    pub fn set_local(&mut self, key: impl Into<String>, value: Value) {
        self.locals.insert(key.into(), value);
    }

    /// Layer `locals` over the current bindings.
    pub fn extend(&mut self, locals: impl IntoIterator<Item = (String, Value)>) {
        self.locals.extend(locals);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.locals.get(key)
    }

    pub fn locals(&self) -> &BTreeMap<String, Value> {
        &self.locals
    }

    /// Where the last failed execution stopped.
    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// Return the accumulated output and clear the buffer.
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }

    /// Execute `template` against the current bindings.
    ///
    /// On success the output is appended to the buffer. On failure the
    /// buffer is left alone and the failing position is recorded.
    pub fn execute(&mut self, template: &CompiledTemplate) -> Result<(), minijinja::Error> {
        match template.render(&self.locals) {
            Ok(output) => {
                self.buffer.push_str(&output);
                Ok(())
            }
            Err(error) => {
                self.position = Position::of_error(&error, template.sources());
                Err(error)
            }
        }
    }

    /// Record a failure that happened outside execution (e.g. at compile time).
    pub(crate) fn fail_at(&mut self, error: &minijinja::Error, sources: &SourceSet) {
        self.position = Position::of_error(error, sources);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use crate::compiled::{EnvironmentSetup, TemplateSource};
    use crate::resolver::{DefaultResolver, IncludeResolver};

    fn compile(text: &str) -> CompiledTemplate {
        let set = SourceSet::new(TemplateSource::new(PathBuf::from("/views/t.liquid"), text));
        let includes = IncludeResolver::new(Arc::new(DefaultResolver), None);
        CompiledTemplate::compile(set, &includes, &EnvironmentSetup::default()).unwrap()
    }

    #[test]
    fn test_globals_are_copied() {
        let mut globals = BTreeMap::new();
        globals.insert("site".to_string(), Value::from("Quarto"));

        let mut ctx = RenderContext::from_globals(&globals);
        ctx.set_local("site", Value::from("Other"));

        assert_eq!(globals.get("site"), Some(&Value::from("Quarto")));
        assert_eq!(ctx.get("site"), Some(&Value::from("Other")));
    }

    #[test]
    fn test_take_output_clears_buffer() {
        let template = compile("Hello, {{ name }}!");
        let mut ctx = RenderContext::new();
        ctx.set_local("name", Value::from("Lei"));

        ctx.execute(&template).unwrap();
        assert_eq!(ctx.take_output(), "Hello, Lei!");
        assert_eq!(ctx.take_output(), "");
    }

    #[test]
    fn test_failure_records_position() {
        let template = compile("line one\nline two {{ x | nosuchfilter }}\nline three");
        let mut ctx = RenderContext::new();

        let error = ctx.execute(&template).unwrap_err();
        assert_eq!(error.kind(), minijinja::ErrorKind::UnknownFilter);

        let position = ctx.position().unwrap();
        assert_eq!(position.name, "/views/t.liquid");
        assert_eq!(position.line, 2);
        assert_eq!(ctx.take_output(), "");
    }

    #[test]
    fn test_column_of_counts_from_line_start() {
        assert_eq!(column_of("ab\ncdef", 5..6), 3);
        assert_eq!(column_of("abc", 0..1), 1);
        assert_eq!(column_of("abc", 10..12), 4);
    }
}
