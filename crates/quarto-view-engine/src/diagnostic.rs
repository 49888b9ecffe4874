/*
 * diagnostic.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Friendly error page for failed renders.
//!
//! Render failures are turned into an HTML page instead of an error result.
//! Without trace mode the page only shows the error message. With trace mode
//! it also shows the failing position, a window of source lines around it,
//! and the chain of underlying errors.

use minijinja::Environment;
use serde::Serialize;

use crate::compiled::SourceSet;
use crate::context::Position;

const ERROR_PAGE_NAME: &str = "error_page.html";

/// Built-in error page. Bindings: `error`, and with trace mode `location`,
/// `lines` and `stack`.
const ERROR_PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Template Error</title>
<style>
body { font-family: sans-serif; margin: 2em; color: #222; }
h1 { color: #b00020; font-size: 1.4em; }
pre { background: #f6f6f6; padding: 1em; overflow-x: auto; }
.source span { display: block; }
.source .highlight { background: #ffe0e0; color: #b00020; }
.stack { color: #666; }
</style>
</head>
<body>
<h1>Template Error</h1>
<pre class="error">{{ error }}</pre>
{% if location %}<p class="location">at {{ location }}</p>
{% endif %}{% if lines %}<pre class="source">{% for line in lines %}<span{% if line.highlight %} class="highlight"{% endif %}>{{ line.text }}</span>{% endfor %}</pre>
{% endif %}{% if stack %}<pre class="stack">{{ stack }}</pre>
{% endif %}</body>
</html>
"#;

/// One line of the source window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLine {
    pub text: String,
    pub highlight: bool,
}

/// Everything the error page shows.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostic {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<SourceLine>,
}

impl Diagnostic {
    /// Describe `error`, with position and source detail only when `trace` is set.
    pub fn from_error(
        error: &minijinja::Error,
        position: Option<&Position>,
        sources: &SourceSet,
        trace: bool,
        context_lines: usize,
    ) -> Self {
        let mut diagnostic = Diagnostic {
            error: summary(error),
            ..Diagnostic::default()
        };
        if !trace {
            return diagnostic;
        }

        diagnostic.stack = Some(error_chain(error));
        if let Some(position) = position {
            diagnostic.location = Some(position.to_string());
            if let Some(source) = sources.get(&position.name) {
                diagnostic.lines = source_window(&source.lines(), position, context_lines);
            }
        }
        diagnostic
    }

    /// Render the built-in error page.
    pub fn render(&self) -> Result<String, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template(ERROR_PAGE_NAME, ERROR_PAGE_TEMPLATE)?;
        env.get_template(ERROR_PAGE_NAME)?.render(self)
    }
}

/// Error kind and detail, without location.
fn summary(error: &minijinja::Error) -> String {
    match error.detail() {
        Some(detail) => format!("{}: {}", error.kind(), detail),
        None => error.kind().to_string(),
    }
}

/// The error followed by each of its sources, one per line.
fn error_chain(error: &minijinja::Error) -> String {
    let mut chain = vec![error.to_string()];
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        chain.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    chain.join("\n")
}

/// Lines around `position`, numbered `"{n}|    "`.
///
/// The failing line is highlighted and followed by a highlighted caret line
/// pointing at the failing column. Lines outside the source are skipped.
pub fn source_window(lines: &[&str], position: &Position, context_lines: usize) -> Vec<SourceLine> {
    let mut window = Vec::new();
    let line = position.line;

    let first = line.saturating_sub(context_lines).max(1);
    for n in first..line {
        push_line(&mut window, lines, n, false);
    }

    let prefix = push_line(&mut window, lines, line, true);
    let indent = (prefix + position.column).saturating_sub(1);
    window.push(SourceLine {
        text: format!("{}^", " ".repeat(indent)),
        highlight: true,
    });

    for n in line + 1..=line + context_lines {
        push_line(&mut window, lines, n, false);
    }
    window
}

/// Push line `n` (1-based) if it exists, returning the prefix width.
fn push_line(window: &mut Vec<SourceLine>, lines: &[&str], n: usize, highlight: bool) -> usize {
    let Some(text) = n.checked_sub(1).and_then(|i| lines.get(i)) else {
        return 0;
    };
    let prefix = format!("{n}|    ");
    window.push(SourceLine {
        text: format!("{prefix}{}", text.trim_end()),
        highlight,
    });
    prefix.len()
}
