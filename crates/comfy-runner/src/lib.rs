//! Comfy Runner - one workflow job, end to end
//!
//! Glues the template mutator and the server client into a single
//! sequential run:
//! - load the prompt pair and discover the input images
//! - load the template and stage the images (upload or direct placement)
//! - substitute prompts, image names and seed; optionally drop face swap
//! - submit, wait for completion, download the artifacts
//!
//! # Example
//!
//! ```rust,ignore
//! use comfy_runner::{JobRunner, RunConfig};
//!
//! let config = RunConfig::new()
//!     .with_job("workflow_api.json", "prompts.json")
//!     .with_dirs("input", "output");
//! let report = JobRunner::new(config)?.run().await?;
//! println!("job {} wrote {} file(s)", report.job, report.saved_files.len());
//! ```

#![warn(unreachable_pub)]

pub mod assets;
pub mod cli;
pub mod config;
pub mod error;
pub mod prompts;
pub mod runner;
pub mod staging;

pub use assets::{discover_input_images, IMAGE_EXTENSIONS};
pub use config::{FileConfig, RunConfig, SeedPolicy, StagingStrategy};
pub use error::RunError;
pub use prompts::load_prompt_pair;
pub use runner::{GraphMutations, JobRunner, RunReport};
pub use staging::{stage_assets, StagedAsset};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
