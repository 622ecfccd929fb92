//! Comfy Client - job lifecycle against a ComfyUI-compatible server
//!
//! Covers everything after the graph has been prepared:
//! - staging input assets through the upload endpoint
//! - submitting the graph and obtaining a [`JobHandle`]
//! - waiting for completion by polling or by following the event stream
//! - downloading the produced artifacts
//!
//! The server address is an explicit [`ServerEndpoint`] carried by the
//! [`ComfyClient`]; there is no process-wide default.
//!
//! # Example
//!
//! ```rust,ignore
//! use comfy_client::{
//!     completion_source, ArtifactRetriever, ComfyClient, JobSubmission, ServerEndpoint,
//!     WatchSettings,
//! };
//!
//! let client = ComfyClient::new(ServerEndpoint::new("http://127.0.0.1:8188")?)?;
//! let mut watcher = completion_source(&WatchSettings::default(), "session-1");
//! watcher.prepare(&client).await?;
//!
//! let job = client.submit(&JobSubmission::new(graph)).await?;
//! let manifest = watcher.wait(&client, &job).await?;
//! ArtifactRetriever::new("./outputs").retrieve_all(&client, &job, &manifest).await?;
//! ```

#![warn(unreachable_pub)]

pub mod client;
pub mod endpoint;
pub mod error;
pub mod protocol;
pub mod retrieve;
pub mod watch;

pub use client::{ComfyClient, HistoryPoll, DEFAULT_REQUEST_TIMEOUT};
pub use endpoint::{Endpoints, ServerEndpoint, DEFAULT_SERVER};
pub use error::ClientError;
pub use protocol::{
    JobHandle, JobSubmission, OutputDescriptor, OutputManifest, StorageClass, StreamEvent,
};
pub use retrieve::ArtifactRetriever;
pub use watch::{
    completion_source, CompletionSource, PollingWatcher, StreamingWatcher, WatchSettings,
    WatchStrategy,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
