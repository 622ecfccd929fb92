//! Comfy Graph - API-format workflow templates
//!
//! Loads a workflow template (a JSON object of node id → node descriptor),
//! locates nodes by class tag or by id, and rewrites the fixed set of roles a
//! run needs to touch:
//! - prompt text on the text encoders
//! - reference image names on the image loaders
//! - the seed on every noise source
//! - optional removal of the face-swap stage
//!
//! # Example
//!
//! ```rust,ignore
//! use comfy_graph::{assign_images, assign_prompts, NodeRoles, PromptPair, PromptTargets, WorkflowGraph};
//!
//! let mut graph = WorkflowGraph::from_json_str(&template)?;
//! let roles = NodeRoles::default();
//!
//! let prompts = PromptPair::new("masterpiece best quality man", "bad hands");
//! assign_prompts(&mut graph, &prompts, &roles, &PromptTargets::positional());
//! assign_images(&mut graph, &["k1.png".to_string()], &roles);
//!
//! let body = graph.to_json_string()?;
//! ```

#![warn(unreachable_pub)]

pub mod error;
pub mod graph;
pub mod roles;

pub use error::GraphError;
pub use graph::{DanglingRef, NodeDescriptor, NodeId, WorkflowGraph};
pub use roles::{
    assign_images, assign_prompts, assign_seed, strip_face_swap, ImageAssignment, NodeRoles,
    PromptAssignment, PromptPair, PromptTargets,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
