//! Error types for server interaction
//!
//! Every variant is terminal for the current run. Nothing here is retried
//! automatically; callers that want retry/backoff must add it themselves.

use crate::protocol::{JobHandle, OutputDescriptor};
use std::path::PathBuf;

/// Errors raised while talking to the server
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Asset upload answered with a non-success status
    #[error("upload of '{name}' failed with HTTP {status}: {body}")]
    Upload {
        /// Staged asset name
        name: String,
        /// HTTP status code
        status: u16,
        /// Response body, for diagnosis
        body: String,
    },

    /// Server refused the workflow submission
    #[error("submission rejected with HTTP {status}: {body}")]
    SubmissionRejected {
        /// HTTP status code
        status: u16,
        /// Response body (usually the node validation report)
        body: String,
    },

    /// Server answered with something the protocol does not allow
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Job did not reach a terminal state before the deadline
    #[error("job {job} did not complete within {elapsed_secs:.1}s")]
    Timeout {
        /// Job that was being watched
        job: JobHandle,
        /// Seconds spent waiting
        elapsed_secs: f64,
    },

    /// Event stream ended before the job completed
    #[error("event stream for job {job} closed before completion: {reason}")]
    StreamClosed {
        /// Job that was being watched
        job: JobHandle,
        /// Why the stream is considered closed
        reason: String,
    },

    /// Artifact download answered with a non-success status
    #[error("retrieval of {descriptor} for job {job} failed with HTTP {status}")]
    Retrieval {
        /// Job that produced the artifact
        job: JobHandle,
        /// Artifact that could not be fetched
        descriptor: OutputDescriptor,
        /// HTTP status code
        status: u16,
    },

    /// Configured server address or path does not form a valid URL
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// HTTP transport failure
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket transport failure
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

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

impl ClientError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Job the error refers to, if any
    #[must_use]
    pub fn job(&self) -> Option<&JobHandle> {
        match self {
            Self::Timeout { job, .. }
            | Self::StreamClosed { job, .. }
            | Self::Retrieval { job, .. } => Some(job),
            _ => None,
        }
    }

    /// HTTP status carried by the error, if any
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Upload { status, .. }
            | Self::SubmissionRejected { status, .. }
            | Self::Retrieval { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StorageClass;

    #[test]
    fn timeout_display_names_job() {
        let err = ClientError::Timeout {
            job: JobHandle::new("X"),
            elapsed_secs: 5.02,
        };
        assert_eq!(err.to_string(), "job X did not complete within 5.0s");
        assert_eq!(err.job().map(JobHandle::as_str), Some("X"));
    }

    #[test]
    fn retrieval_display_names_descriptor() {
        let err = ClientError::Retrieval {
            job: JobHandle::new("X"),
            descriptor: OutputDescriptor::new("out.png", "faces", StorageClass::Output),
            status: 404,
        };
        assert_eq!(
            err.to_string(),
            "retrieval of output/faces/out.png for job X failed with HTTP 404"
        );
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.job().map(JobHandle::as_str), Some("X"));
    }

    #[test]
    fn upload_status() {
        let err = ClientError::Upload {
            name: "k1.png".to_string(),
            status: 500,
            body: String::new(),
        };
        assert!(err.to_string().contains("'k1.png'"));
        assert_eq!(err.status(), Some(500));
        assert!(err.job().is_none());
    }
}
