//! Asset Staging
//!
//! Puts the input images where the server's image loaders can find them and
//! reports the name each one is known by there.

use crate::config::StagingStrategy;
use crate::error::RunError;
use comfy_client::ComfyClient;
use std::path::{Path, PathBuf};

/// One input image as the server sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedAsset {
    /// Local file
    pub source: PathBuf,
    /// Name to write into the image loader
    pub name: String,
}

fn staged_name(path: &Path) -> Result<String, RunError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| RunError::config(format!("{} has no file name", path.display())))
}

/// Stage every asset with the configured strategy, in order
///
/// The first failure aborts; nothing is retried.
pub async fn stage_assets(
    client: &ComfyClient,
    strategy: &StagingStrategy,
    assets: &[PathBuf],
) -> Result<Vec<StagedAsset>, RunError> {
    let mut staged = Vec::with_capacity(assets.len());
    match strategy {
        StagingStrategy::Upload => {
            for source in assets {
                let name = staged_name(source)?;
                let bytes = tokio::fs::read(source)
                    .await
                    .map_err(|e| RunError::io_error(source, e))?;
                let stored = client.upload_image(&name, bytes).await?;
                staged.push(StagedAsset {
                    source: source.clone(),
                    name: stored,
                });
            }
        }
        StagingStrategy::DirectPlacement { input_dir } => {
            tokio::fs::create_dir_all(input_dir)
                .await
                .map_err(|e| RunError::io_error(input_dir, e))?;
            for source in assets {
                let name = staged_name(source)?;
                let target = input_dir.join(&name);
                tokio::fs::copy(source, &target)
                    .await
                    .map_err(|e| RunError::io_error(&target, e))?;
                tracing::info!("Placed {} at {}", name, target.display());
                staged.push(StagedAsset {
                    source: source.clone(),
                    name,
                });
            }
        }
    }
    Ok(staged)
}
