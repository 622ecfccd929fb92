//! Server address and endpoint paths

use crate::error::ClientError;
use crate::protocol::{JobHandle, OutputDescriptor};
use serde::{Deserialize, Serialize};
use url::Url;

/// Default server address
pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8188";

/// Endpoint paths relative to the server base
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// Multipart asset upload
    pub upload: String,
    /// Job submission
    pub prompt: String,
    /// Job history, job id appended as a path segment
    pub history: String,
    /// Artifact download
    pub view: String,
    /// Event stream
    pub websocket: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            upload: "/upload/image".to_string(),
            prompt: "/prompt".to_string(),
            history: "/history".to_string(),
            view: "/view".to_string(),
            websocket: "/ws".to_string(),
        }
    }
}

/// Where the server lives
///
/// Passed explicitly to every call that reaches the network; nothing holds
/// a global address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    base: Url,
    paths: Endpoints,
}

impl ServerEndpoint {
    /// Parse a base address; a bare `host:port` is taken as `http://`
    pub fn new(address: &str) -> Result<Self, ClientError> {
        let address = address.trim();
        let with_scheme = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };

        let base = Url::parse(&with_scheme)
            .map_err(|e| ClientError::InvalidEndpoint(format!("{address}: {e}")))?;
        match base.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ClientError::InvalidEndpoint(format!(
                    "{address}: unsupported scheme '{other}'"
                )))
            }
        }
        if base.cannot_be_a_base() || base.host_str().is_none() {
            return Err(ClientError::InvalidEndpoint(format!("{address}: missing host")));
        }

        Ok(Self {
            base,
            paths: Endpoints::default(),
        })
    }

    /// With custom endpoint paths
    #[inline]
    #[must_use]
    pub fn with_paths(mut self, paths: Endpoints) -> Self {
        self.paths = paths;
        self
    }

    /// Base URL
    #[inline]
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Endpoint paths
    #[inline]
    #[must_use]
    pub fn paths(&self) -> &Endpoints {
        &self.paths
    }

    fn join(&self, path: &str) -> Result<Url, ClientError> {
        let joined = format!(
            "{}/{}",
            self.base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| ClientError::InvalidEndpoint(format!("{joined}: {e}")))
    }

    /// Upload URL
    pub fn upload_url(&self) -> Result<Url, ClientError> {
        self.join(&self.paths.upload)
    }

    /// Submission URL
    pub fn prompt_url(&self) -> Result<Url, ClientError> {
        self.join(&self.paths.prompt)
    }

    /// History URL for one job
    pub fn history_url(&self, job: &JobHandle) -> Result<Url, ClientError> {
        let mut url = self.join(&self.paths.history)?;
        url.path_segments_mut()
            .map_err(|()| ClientError::InvalidEndpoint(self.paths.history.clone()))?
            .pop_if_empty()
            .push(job.as_str());
        Ok(url)
    }

    /// Download URL for one artifact
    pub fn view_url(&self, descriptor: &OutputDescriptor) -> Result<Url, ClientError> {
        let mut url = self.join(&self.paths.view)?;
        url.query_pairs_mut()
            .append_pair("filename", &descriptor.filename)
            .append_pair("subfolder", &descriptor.subfolder)
            .append_pair("type", descriptor.storage.as_str());
        Ok(url)
    }

    /// Event stream URL for a client session
    pub fn ws_url(&self, client_id: &str) -> Result<Url, ClientError> {
        let mut url = self.join(&self.paths.websocket)?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| ClientError::InvalidEndpoint(format!("cannot switch {url} to {scheme}")))?;
        url.query_pairs_mut().append_pair("clientId", client_id);
        Ok(url)
    }
}
