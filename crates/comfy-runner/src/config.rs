//! Run configuration
//!
//! Built in three layers, later layers winning:
//! 1. [`RunConfig::default`]
//! 2. an optional TOML file ([`FileConfig`])
//! 3. command-line flags (see [`crate::cli`])

use crate::error::RunError;
use comfy_client::{Endpoints, WatchSettings, WatchStrategy, DEFAULT_SERVER};
use comfy_graph::{NodeId, NodeRoles, PromptTargets};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Seed handling for noise sources
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "SeedRepr")]
pub enum SeedPolicy {
    /// Leave the template's seeds alone
    #[default]
    Keep,
    /// Write this seed
    Fixed(u64),
    /// Draw a fresh seed per run
    Random,
}

impl SeedPolicy {
    /// Seed to write for this run, if any
    #[must_use]
    pub fn resolve(self) -> Option<u64> {
        match self {
            Self::Keep => None,
            Self::Fixed(seed) => Some(seed),
            // 53 bits so the value survives JSON readers that use f64
            Self::Random => Some(rand::random::<u64>() >> 11),
        }
    }
}

impl fmt::Display for SeedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keep => f.write_str("keep"),
            Self::Fixed(seed) => write!(f, "{seed}"),
            Self::Random => f.write_str("random"),
        }
    }
}

impl FromStr for SeedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" | "template" => Ok(Self::Keep),
            "random" | "rand" => Ok(Self::Random),
            other => other
                .parse::<u64>()
                .map(Self::Fixed)
                .map_err(|_| format!("invalid seed '{s}' (expected a number, 'random' or 'keep')")),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SeedRepr {
    Number(u64),
    Text(String),
}

impl TryFrom<SeedRepr> for SeedPolicy {
    type Error = String;

    fn try_from(repr: SeedRepr) -> Result<Self, Self::Error> {
        match repr {
            SeedRepr::Number(seed) => Ok(Self::Fixed(seed)),
            SeedRepr::Text(text) => text.parse(),
        }
    }
}

/// How input images reach the server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StagingStrategy {
    /// Multipart upload through the server API
    #[default]
    Upload,
    /// Copy into a directory the server reads directly (shared filesystem)
    DirectPlacement {
        /// Server-side input directory
        input_dir: PathBuf,
    },
}

impl StagingStrategy {
    /// Combine a strategy name and an optional directory
    ///
    /// A directory alone implies direct placement; `direct` without any
    /// directory is an error.
    pub fn from_parts(
        kind: Option<&str>,
        input_dir: Option<PathBuf>,
        current: &StagingStrategy,
    ) -> Result<Self, RunError> {
        match (kind.map(str::to_ascii_lowercase).as_deref(), input_dir) {
            (None, None) => Ok(current.clone()),
            (Some("upload"), _) => Ok(Self::Upload),
            (Some("direct"), Some(dir)) | (None, Some(dir)) => {
                Ok(Self::DirectPlacement { input_dir: dir })
            }
            (Some("direct"), None) => match current {
                Self::DirectPlacement { input_dir } => Ok(Self::DirectPlacement {
                    input_dir: input_dir.clone(),
                }),
                Self::Upload => Err(RunError::config(
                    "direct staging needs a server input directory",
                )),
            },
            (Some(other), _) => Err(RunError::config(format!(
                "unknown staging strategy '{other}' (expected upload or direct)"
            ))),
        }
    }
}

/// Everything one run needs
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// API-format workflow template
    pub template: PathBuf,
    /// JSON file with `positive` and `negative` prompt text
    pub prompt_file: PathBuf,
    /// Local directory holding the reference images
    pub input_dir: PathBuf,
    /// Where retrieved artifacts are written
    pub output_dir: PathBuf,
    /// Server base address
    pub server: String,
    /// Endpoint paths on the server
    pub endpoints: Endpoints,
    /// Remove the face-swap stage before submission
    pub bypass_face_swap: bool,
    /// Completion watcher settings
    pub watch: WatchSettings,
    /// Asset staging strategy
    pub staging: StagingStrategy,
    /// Output node hints sent with the submission
    pub output_nodes: Vec<NodeId>,
    /// Seed handling
    pub seed: SeedPolicy,
    /// Explicit prompt node ids
    pub prompt_targets: PromptTargets,
    /// Class tags and input keys of the substituted roles
    pub roles: NodeRoles,
    /// Log filter used when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            template: PathBuf::new(),
            prompt_file: PathBuf::new(),
            input_dir: PathBuf::from("input"),
            output_dir: PathBuf::from("output"),
            server: DEFAULT_SERVER.to_string(),
            endpoints: Endpoints::default(),
            bypass_face_swap: false,
            watch: WatchSettings::default(),
            staging: StagingStrategy::default(),
            output_nodes: Vec::new(),
            seed: SeedPolicy::default(),
            prompt_targets: PromptTargets::positional(),
            roles: NodeRoles::default(),
            log_level: "info".to_string(),
        }
    }
}

impl RunConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With template and prompt file
    #[inline]
    #[must_use]
    pub fn with_job(mut self, template: impl Into<PathBuf>, prompt_file: impl Into<PathBuf>) -> Self {
        self.template = template.into();
        self.prompt_file = prompt_file.into();
        self
    }

    /// With input and output directories
    #[inline]
    #[must_use]
    pub fn with_dirs(mut self, input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        self.input_dir = input_dir.into();
        self.output_dir = output_dir.into();
        self
    }

    /// With server address
    #[inline]
    #[must_use]
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into();
        self
    }

    /// With watcher settings
    #[inline]
    #[must_use]
    pub fn with_watch(mut self, watch: WatchSettings) -> Self {
        self.watch = watch;
        self
    }

    /// With staging strategy
    #[inline]
    #[must_use]
    pub fn with_staging(mut self, staging: StagingStrategy) -> Self {
        self.staging = staging;
        self
    }

    /// With face-swap bypass
    #[inline]
    #[must_use]
    pub fn with_bypass_face_swap(mut self, bypass: bool) -> Self {
        self.bypass_face_swap = bypass;
        self
    }

    /// With seed policy
    #[inline]
    #[must_use]
    pub fn with_seed(mut self, seed: SeedPolicy) -> Self {
        self.seed = seed;
        self
    }

    /// With output node hints
    #[inline]
    #[must_use]
    pub fn with_output_nodes(mut self, nodes: Vec<NodeId>) -> Self {
        self.output_nodes = nodes;
        self
    }

    /// With explicit prompt targets
    #[inline]
    #[must_use]
    pub fn with_prompt_targets(mut self, targets: PromptTargets) -> Self {
        self.prompt_targets = targets;
        self
    }

    /// Read a TOML configuration file
    pub fn read_file(path: &Path) -> Result<FileConfig, RunError> {
        let text = std::fs::read_to_string(path).map_err(|e| RunError::io_error(path, e))?;
        toml::from_str(&text)
            .map_err(|e| RunError::config(format!("{}: {}", path.display(), e.message())))
    }

    /// Overlay the values set in a configuration file
    pub fn merge_file(mut self, file: FileConfig) -> Result<Self, RunError> {
        if let Some(template) = file.template {
            self.template = template;
        }
        if let Some(prompt_file) = file.prompt_file {
            self.prompt_file = prompt_file;
        }
        if let Some(input_dir) = file.input_dir {
            self.input_dir = input_dir;
        }
        if let Some(output_dir) = file.output_dir {
            self.output_dir = output_dir;
        }
        if let Some(server) = file.server {
            self.server = server;
        }
        if let Some(endpoints) = file.endpoints {
            self.endpoints = endpoints;
        }
        if let Some(bypass) = file.bypass_face_swap {
            self.bypass_face_swap = bypass;
        }
        if let Some(secs) = file.poll_interval_secs {
            self.watch.poll_interval = seconds("poll_interval_secs", secs)?;
        }
        if let Some(secs) = file.timeout_secs {
            self.watch.timeout = seconds("timeout_secs", secs)?;
        }
        if let Some(secs) = file.read_timeout_secs {
            self.watch.read_timeout = seconds("read_timeout_secs", secs)?;
        }
        if let Some(watch) = file.watch {
            self.watch.strategy = watch;
        }
        self.staging =
            StagingStrategy::from_parts(file.staging.as_deref(), file.server_input_dir, &self.staging)?;
        if let Some(nodes) = file.output_nodes {
            self.output_nodes = nodes;
        }
        if let Some(seed) = file.seed {
            self.seed = seed;
        }
        if file.positive_node.is_some() || file.negative_node.is_some() {
            self.prompt_targets = PromptTargets::explicit(file.positive_node, file.negative_node);
        }
        if let Some(roles) = file.roles {
            self.roles = roles;
        }
        if let Some(level) = file.log_level {
            self.log_level = level;
        }
        Ok(self)
    }

    /// Check the configuration is complete enough to run
    pub fn validate(&self) -> Result<(), RunError> {
        if self.template.as_os_str().is_empty() {
            return Err(RunError::config("no workflow template given"));
        }
        if self.prompt_file.as_os_str().is_empty() {
            return Err(RunError::config("no prompt file given"));
        }
        if self.watch.poll_interval.is_zero() {
            return Err(RunError::config("poll interval must be positive"));
        }
        if self.watch.timeout.is_zero() {
            return Err(RunError::config("timeout must be positive"));
        }
        if self.watch.strategy == WatchStrategy::Stream && self.watch.read_timeout.is_zero() {
            return Err(RunError::config("read timeout must be positive"));
        }
        Ok(())
    }
}

/// Convert a seconds value from configuration into a duration
pub fn seconds(name: &str, secs: f64) -> Result<Duration, RunError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| RunError::config(format!("{name} must be a non-negative number of seconds, got {secs}")))
}

/// Contents of a TOML configuration file; every key is optional
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Workflow template path
    pub template: Option<PathBuf>,
    /// Prompt file path
    pub prompt_file: Option<PathBuf>,
    /// Local image directory
    pub input_dir: Option<PathBuf>,
    /// Artifact directory
    pub output_dir: Option<PathBuf>,
    /// Server base address
    pub server: Option<String>,
    /// Endpoint path overrides
    pub endpoints: Option<Endpoints>,
    /// Remove the face-swap stage
    pub bypass_face_swap: Option<bool>,
    /// History polling interval in seconds
    pub poll_interval_secs: Option<f64>,
    /// Overall deadline in seconds
    pub timeout_secs: Option<f64>,
    /// Event stream silence limit in seconds
    pub read_timeout_secs: Option<f64>,
    /// `poll` or `stream`
    pub watch: Option<WatchStrategy>,
    /// `upload` or `direct`
    pub staging: Option<String>,
    /// Server-side input directory for direct staging
    pub server_input_dir: Option<PathBuf>,
    /// Output node hints
    pub output_nodes: Option<Vec<NodeId>>,
    /// Number, `random` or `keep`
    pub seed: Option<SeedPolicy>,
    /// Node id for the positive prompt
    pub positive_node: Option<NodeId>,
    /// Node id for the negative prompt
    pub negative_node: Option<NodeId>,
    /// Role table overrides
    pub roles: Option<NodeRoles>,
    /// Log filter
    pub log_level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn seed_policy_parsing() {
        assert_eq!("42".parse::<SeedPolicy>(), Ok(SeedPolicy::Fixed(42)));
        assert_eq!("Random".parse::<SeedPolicy>(), Ok(SeedPolicy::Random));
        assert_eq!("keep".parse::<SeedPolicy>(), Ok(SeedPolicy::Keep));
        assert!("-1".parse::<SeedPolicy>().is_err());
    }

    #[test]
    fn random_seed_is_json_safe() {
        for _ in 0..64 {
            let seed = SeedPolicy::Random.resolve().unwrap();
            assert!(seed < (1 << 53));
        }
        assert_eq!(SeedPolicy::Keep.resolve(), None);
        assert_eq!(SeedPolicy::Fixed(7).resolve(), Some(7));
    }

    #[test]
    fn file_values_override_defaults() {
        let file: FileConfig = toml::from_str(
            r#"
            template = "wf.json"
            prompt_file = "prompts.json"
            server = "http://gpu-box:8188"
            timeout_secs = 60
            poll_interval_secs = 0.5
            watch = "stream"
            seed = "random"
            positive_node = "83"
            output_nodes = ["203", "204"]

            [roles]
            image_input = "path"
            "#,
        )
        .unwrap();

        let config = RunConfig::default().merge_file(file).unwrap();
        assert_eq!(config.server, "http://gpu-box:8188");
        assert_eq!(config.watch.timeout, Duration::from_secs(60));
        assert_eq!(config.watch.poll_interval, Duration::from_millis(500));
        assert_eq!(config.watch.strategy, WatchStrategy::Stream);
        assert_eq!(config.seed, SeedPolicy::Random);
        assert_eq!(config.prompt_targets.positive, Some(NodeId::from("83")));
        assert_eq!(config.prompt_targets.negative, None);
        assert_eq!(config.output_nodes.len(), 2);
        assert_eq!(config.roles.image_input, "path");
        assert_eq!(config.roles.image_loader, "LoadImage");
        // untouched
        assert_eq!(config.input_dir, PathBuf::from("input"));
        assert_eq!(config.staging, StagingStrategy::Upload);
        config.validate().unwrap();
    }

    #[test]
    fn numeric_seed_in_file() {
        let file: FileConfig = toml::from_str("seed = 42424242424242").unwrap();
        assert_eq!(file.seed, Some(SeedPolicy::Fixed(42_424_242_424_242)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<FileConfig>("tmeout_secs = 3").is_err());
    }

    #[test]
    fn staging_parts() {
        let upload = StagingStrategy::Upload;
        assert_eq!(
            StagingStrategy::from_parts(None, Some("/srv/in".into()), &upload).unwrap(),
            StagingStrategy::DirectPlacement {
                input_dir: "/srv/in".into()
            }
        );
        assert!(StagingStrategy::from_parts(Some("direct"), None, &upload).is_err());
        assert!(StagingStrategy::from_parts(Some("ftp"), None, &upload).is_err());
        assert_eq!(
            StagingStrategy::from_parts(None, None, &upload).unwrap(),
            StagingStrategy::Upload
        );
    }

    #[test]
    fn validation_needs_template() {
        let err = RunConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("template"));

        let zero = RunConfig::default()
            .with_job("wf.json", "p.json")
            .with_watch(WatchSettings {
                timeout: Duration::ZERO,
                ..WatchSettings::default()
            });
        assert!(zero.validate().is_err());
    }

    #[test]
    fn negative_seconds_rejected() {
        assert!(seconds("timeout_secs", -1.0).is_err());
        assert_eq!(seconds("timeout_secs", 1.5).unwrap(), Duration::from_millis(1500));
    }
}
