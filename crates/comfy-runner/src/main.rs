//! `comfy-run` entry point

use anyhow::Context;
use comfy_runner::{cli, JobRunner};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli::command().get_matches();
    let config = cli::resolve(&matches).context("invalid configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    tracing::info!(
        "comfy-run {} against {} ({} watcher, seed {})",
        comfy_runner::VERSION,
        config.server,
        config.watch.strategy,
        config.seed
    );

    let runner = JobRunner::new(config)?;
    match runner.run().await {
        Ok(report) => {
            for path in &report.saved_files {
                println!("{}", path.display());
            }
            Ok(())
        }
        Err(e) => {
            match e.job() {
                Some(job) => tracing::error!("Run failed for job {}: {}", job, e),
                None => tracing::error!("Run failed: {}", e),
            }
            Err(e.into())
        }
    }
}
