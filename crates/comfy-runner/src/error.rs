//! Error types for a run
//!
//! Composes the graph and client errors with the failures that only the
//! runner can hit: configuration, prompt file and input discovery.

use comfy_client::{ClientError, JobHandle};
use comfy_graph::GraphError;
use std::path::PathBuf;

/// Run-level error type
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Template could not be loaded
    #[error("template error: {0}")]
    Graph(#[from] GraphError),

    /// Server interaction failed
    #[error("{0}")]
    Client(#[from] ClientError),

    /// Invalid or incomplete configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Prompt file unreadable or missing a field
    #[error("prompt file {path}: {reason}")]
    PromptFile {
        /// Prompt file
        path: PathBuf,
        /// Parse failure
        reason: String,
    },

    /// Input directory holds no usable image
    #[error("no input images in {dir}")]
    NoInputImages {
        /// Directory that was scanned
        dir: PathBuf,
    },

    /// Local file IO failure
    #[error("io error on {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl RunError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// Job the failure belongs to, once one was submitted
    #[must_use]
    pub fn job(&self) -> Option<&JobHandle> {
        match self {
            Self::Client(e) => e.job(),
            _ => None,
        }
    }

    /// Whether running again unchanged could succeed
    ///
    /// Always false: there is no retry or backoff layer, every failure ends
    /// the run.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        false
    }
}
