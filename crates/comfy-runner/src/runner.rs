//! Sequential job runner
//!
//! One run, one job:
//! load prompts and inputs → load template → stage assets → mutate graph →
//! open watcher → submit → wait → retrieve.
//! Each step finishes before the next begins, and the first error ends the
//! run.

use crate::assets::discover_input_images;
use crate::config::RunConfig;
use crate::error::RunError;
use crate::prompts::load_prompt_pair;
use crate::staging::{stage_assets, StagedAsset};
use comfy_client::{
    completion_source, ArtifactRetriever, ComfyClient, JobHandle, JobSubmission, OutputManifest,
    ServerEndpoint,
};
use comfy_graph::{
    assign_images, assign_prompts, assign_seed, strip_face_swap, DanglingRef, ImageAssignment,
    NodeId, PromptAssignment, PromptPair, WorkflowGraph,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// What was changed in the template before submission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphMutations {
    /// Prompt targets that received text
    pub prompts: PromptAssignment,
    /// Image loaders that received names
    pub images: Vec<ImageAssignment>,
    /// Seed written, if any
    pub seed: Option<u64>,
    /// Noise sources that received the seed
    pub seeded_nodes: Vec<NodeId>,
    /// Nodes removed with the face-swap stage
    pub removed_nodes: Vec<NodeId>,
    /// References left pointing at removed nodes
    pub dangling: Vec<DanglingRef>,
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Server job id
    pub job: JobHandle,
    /// Session id sent with the submission
    pub client_id: String,
    /// Graph changes applied
    pub mutations: GraphMutations,
    /// Input images as staged on the server
    pub staged_assets: Vec<StagedAsset>,
    /// Artifacts reported by the server
    pub manifest: OutputManifest,
    /// Local files written
    pub saved_files: Vec<PathBuf>,
    /// Wall time of the whole run
    pub elapsed: Duration,
}

/// Runs one configured job end to end
#[derive(Debug, Clone)]
pub struct JobRunner {
    config: RunConfig,
    client: ComfyClient,
}

impl JobRunner {
    /// Create a runner talking to the configured server
    pub fn new(config: RunConfig) -> Result<Self, RunError> {
        config.validate()?;
        let endpoint =
            ServerEndpoint::new(&config.server)?.with_paths(config.endpoints.clone());
        let client = ComfyClient::new(endpoint)?;
        Ok(Self { config, client })
    }

    /// Create a runner over an existing client
    #[inline]
    #[must_use]
    pub fn with_client(config: RunConfig, client: ComfyClient) -> Self {
        Self { config, client }
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Apply prompts, image names, seed and face-swap removal to a graph
    pub fn mutate(
        &self,
        graph: &mut WorkflowGraph,
        prompts: &PromptPair,
        image_names: &[String],
    ) -> GraphMutations {
        let roles = &self.config.roles;
        let mut mutations = GraphMutations {
            prompts: assign_prompts(graph, prompts, roles, &self.config.prompt_targets),
            images: assign_images(graph, image_names, roles),
            ..GraphMutations::default()
        };

        if let Some(seed) = self.config.seed.resolve() {
            mutations.seeded_nodes = assign_seed(graph, seed, roles);
            mutations.seed = Some(seed);
            tracing::info!("Seed {} on {} node(s)", seed, mutations.seeded_nodes.len());
        }

        if self.config.bypass_face_swap {
            mutations.removed_nodes = strip_face_swap(graph, roles);
            mutations.dangling = graph.dangling_references();
            for dangling in &mutations.dangling {
                tracing::warn!(
                    "Node {} input '{}' still points at removed node {}",
                    dangling.node,
                    dangling.input,
                    dangling.target
                );
            }
        }
        mutations
    }

    /// Run the configured job
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let start = Instant::now();
        let config = &self.config;

        let prompts = load_prompt_pair(&config.prompt_file)?;
        let assets = discover_input_images(&config.input_dir)?;

        let template = tokio::fs::read(&config.template)
            .await
            .map_err(|e| RunError::io_error(&config.template, e))?;
        let mut graph = WorkflowGraph::from_slice(&template)?;
        tracing::info!(
            "Loaded template {} ({} nodes)",
            config.template.display(),
            graph.len()
        );

        let staged_assets = stage_assets(&self.client, &config.staging, &assets).await?;
        let names: Vec<String> = staged_assets.iter().map(|a| a.name.clone()).collect();
        let mutations = self.mutate(&mut graph, &prompts, &names);

        let client_id = uuid::Uuid::new_v4().to_string();
        let mut watcher = completion_source(&config.watch, &client_id);
        watcher.prepare(&self.client).await?;

        let submission = JobSubmission::new(graph)
            .with_client_id(client_id.clone())
            .with_outputs(config.output_nodes.clone());
        let job = self.client.submit(&submission).await?;
        drop(submission);

        tracing::info!("Waiting for job {} ({} watcher)", job, watcher.name());
        let manifest = watcher.wait(&self.client, &job).await?;
        if manifest.failed() {
            tracing::error!(
                "Job {} ended with server status '{}' and {} artifact(s)",
                job,
                manifest.status().unwrap_or_default(),
                manifest.artifact_count()
            );
        } else if manifest.is_empty() {
            tracing::warn!("Job {} finished without producing artifacts", job);
        }

        let saved_files = ArtifactRetriever::new(&config.output_dir)
            .retrieve_all(&self.client, &job, &manifest)
            .await?;

        let elapsed = start.elapsed();
        tracing::info!(
            "Job {} done: {} file(s) in {:.1}s",
            job,
            saved_files.len(),
            elapsed.as_secs_f64()
        );

        Ok(RunReport {
            job,
            client_id,
            mutations,
            staged_assets,
            manifest,
            saved_files,
            elapsed,
        })
    }
}
