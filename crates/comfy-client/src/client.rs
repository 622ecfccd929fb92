//! HTTP transport: upload, submission, history and artifact download

use crate::endpoint::ServerEndpoint;
use crate::error::ClientError;
use crate::protocol::{JobHandle, JobSubmission, OutputDescriptor, OutputManifest};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::Duration;

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Result of a single history query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryPoll {
    /// Job known but not finished, or not yet in history
    Pending,
    /// Job finished with these artifacts
    Complete(OutputManifest),
    /// Server answered with a non-success status
    Unavailable {
        /// HTTP status code
        status: u16,
    },
}

/// Client for one server
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct ComfyClient {
    http: reqwest::Client,
    endpoint: ServerEndpoint,
}

impl ComfyClient {
    /// Create a client with the default request timeout
    pub fn new(endpoint: ServerEndpoint) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http, endpoint })
    }

    /// Create a client over a preconfigured HTTP client
    #[inline]
    #[must_use]
    pub fn with_http(endpoint: ServerEndpoint, http: reqwest::Client) -> Self {
        Self { http, endpoint }
    }

    /// Server this client talks to
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    /// Upload one asset into the server's input area
    ///
    /// Returns the name the server stored it under (falls back to `name`
    /// when the response does not say).
    pub async fn upload_image(&self, name: &str, bytes: Vec<u8>) -> Result<String, ClientError> {
        let url = self.endpoint.upload_url()?;
        let part = Part::bytes(bytes)
            .file_name(name.to_string())
            .mime_str("application/octet-stream")?;
        let form = Form::new()
            .part("image", part)
            .text("type", "input")
            .text("overwrite", "true");

        tracing::debug!("Uploading {} to {}", name, url);
        let response = self.http.post(url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Upload {
                name: name.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let stored = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| body.get("name").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| name.to_string());
        tracing::info!("Uploaded {} as {}", name, stored);
        Ok(stored)
    }

    /// Submit a job and return its handle
    pub async fn submit(&self, submission: &JobSubmission) -> Result<JobHandle, ClientError> {
        let url = self.endpoint.prompt_url()?;
        let response = self.http.post(url).json(submission).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::SubmissionRejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ClientError::Protocol(format!("submission response is not JSON: {e}")))?;
        let job = JobHandle::from_submit_response(&body).ok_or_else(|| {
            ClientError::Protocol(format!("submission response has no prompt_id: {body}"))
        })?;

        tracing::info!("Submitted job {}", job);
        Ok(job)
    }

    /// Query history for a job once
    pub async fn poll_history(&self, job: &JobHandle) -> Result<HistoryPoll, ClientError> {
        let url = self.endpoint.history_url(job)?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Ok(HistoryPoll::Unavailable {
                status: status.as_u16(),
            });
        }

        let body: Value = response.json().await?;
        Ok(match OutputManifest::from_history(job, &body) {
            Some(manifest) => HistoryPoll::Complete(manifest),
            None => HistoryPoll::Pending,
        })
    }

    /// Download one artifact of `job` fully into memory
    pub async fn fetch_artifact(
        &self,
        job: &JobHandle,
        descriptor: &OutputDescriptor,
    ) -> Result<Vec<u8>, ClientError> {
        let url = self.endpoint.view_url(descriptor)?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Retrieval {
                job: job.clone(),
                descriptor: descriptor.clone(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}
