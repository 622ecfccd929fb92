//! Artifact Retriever

use crate::client::ComfyClient;
use crate::error::ClientError;
use crate::protocol::{JobHandle, OutputDescriptor, OutputManifest};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Downloads finished artifacts into a local directory
#[derive(Debug, Clone)]
pub struct ArtifactRetriever {
    output_dir: PathBuf,
}

impl ArtifactRetriever {
    /// Create a retriever writing into `output_dir`
    #[inline]
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Destination directory
    #[inline]
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Local path an artifact is saved under
    ///
    /// Only the final path component of the server file name is kept.
    #[must_use]
    pub fn destination(&self, descriptor: &OutputDescriptor) -> PathBuf {
        let name = Path::new(&descriptor.filename)
            .file_name()
            .unwrap_or_else(|| OsStr::new("artifact"));
        self.output_dir.join(name)
    }

    /// Fetch every artifact in manifest order
    ///
    /// Stops at the first failure; artifacts already written stay on disk.
    pub async fn retrieve_all(
        &self,
        client: &ComfyClient,
        job: &JobHandle,
        manifest: &OutputManifest,
    ) -> Result<Vec<PathBuf>, ClientError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| ClientError::io_error(&self.output_dir, e))?;

        let mut saved = Vec::with_capacity(manifest.artifact_count());
        for (node, descriptor) in manifest.iter() {
            tracing::debug!("Retrieving {} from node {} of job {}", descriptor, node, job);
            saved.push(self.retrieve(client, job, descriptor).await?);
        }
        Ok(saved)
    }

    /// Fetch one artifact; nothing is written unless the download succeeds
    pub async fn retrieve(
        &self,
        client: &ComfyClient,
        job: &JobHandle,
        descriptor: &OutputDescriptor,
    ) -> Result<PathBuf, ClientError> {
        let bytes = client.fetch_artifact(job, descriptor).await?;
        let path = self.destination(descriptor);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::warn!("Overwriting {}", path.display());
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| ClientError::io_error(&path, e))?;
        tracing::info!("Saved {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }
}
