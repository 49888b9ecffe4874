/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error types for the view engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while resolving, loading, compiling or rendering views.
///
/// Only `Resolution` and `Read` reach the caller of a render: execution and
/// syntax failures are rendered in-band as the error page.
#[derive(Debug, Error)]
pub enum ViewError {
    /// A logical name could not be turned into a path.
    #[error("Cannot resolve template '{name}': {message}")]
    Resolution { name: String, message: String },

    /// A template file is missing or unreadable.
    #[error("Failed to read template {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed template syntax, reported by the template library.
    #[error("Failed to compile template {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: minijinja::Error,
    },

    /// Failure while evaluating a compiled template.
    #[error("Failed to render template {}: {source}", path.display())]
    Execution {
        path: PathBuf,
        #[source]
        source: minijinja::Error,
    },

    /// A filesystem watch could not be established.
    #[error("Failed to watch {}: {message}", path.display())]
    Watch { path: PathBuf, message: String },

    /// The template file watcher could not be started.
    #[error("Failed to start template watcher: {0}")]
    Watcher(String),

    /// Invalid engine configuration.
    #[error("Invalid view engine configuration: {0}")]
    Config(String),
}

impl ViewError {
    pub(crate) fn resolution(name: &str, message: impl Into<String>) -> Self {
        ViewError::Resolution {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

/// Result type for view engine operations.
pub type Result<T> = std::result::Result<T, ViewError>;
