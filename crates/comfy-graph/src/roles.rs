//! Role substitution on a workflow graph
//!
//! A run only ever rewrites a fixed set of node roles. Which class tag plays
//! which role is configured through [`NodeRoles`], because templates built on
//! custom node packs rename the stock nodes.
//!
//! # Positional convention
//!
//! When several nodes share a role's class tag, they are matched by their
//! order in the template: the first text encoder receives the positive
//! prompt, the second the negative one; image names fill the image loaders in
//! the same order. Reordering nodes in the template file changes which node
//! gets what. [`PromptTargets`] pins prompts to explicit node ids instead.

use crate::graph::{NodeId, WorkflowGraph};
use serde::{Deserialize, Serialize};

/// Class tags and input keys for the substitutable roles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeRoles {
    /// Class tag of prompt text encoders
    pub text_encoder: String,
    /// Input key holding the prompt text
    pub text_input: String,
    /// Class tag of reference image loaders
    pub image_loader: String,
    /// Input key holding the staged image name
    ///
    /// Defaults to `image`, the stock `LoadImage` input. Templates built for
    /// loaders that read a `path` input need `with_image_input("path")`
    /// (`[roles] image_input = "path"` in the run config).
    pub image_input: String,
    /// Class tag of seed-bearing noise sources
    pub noise_source: String,
    /// Input key holding the seed
    pub seed_input: String,
    /// Class tag prefix of the optional face-swap stage
    pub face_swap_prefix: String,
}

impl Default for NodeRoles {
    fn default() -> Self {
        Self {
            text_encoder: "CLIPTextEncode".to_string(),
            text_input: "text".to_string(),
            image_loader: "LoadImage".to_string(),
            image_input: "image".to_string(),
            noise_source: "RandomNoise".to_string(),
            seed_input: "noise_seed".to_string(),
            face_swap_prefix: "ReActor".to_string(),
        }
    }
}

impl NodeRoles {
    /// Create the stock ComfyUI role table
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With image input key
    #[inline]
    #[must_use]
    pub fn with_image_input(mut self, key: impl Into<String>) -> Self {
        self.image_input = key.into();
        self
    }

    /// With face-swap class prefix
    #[inline]
    #[must_use]
    pub fn with_face_swap_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.face_swap_prefix = prefix.into();
        self
    }
}

/// Positive / negative prompt text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPair {
    /// Text for the positive conditioning
    pub positive: String,
    /// Text for the negative conditioning
    pub negative: String,
}

impl PromptPair {
    /// Create a prompt pair
    #[inline]
    #[must_use]
    pub fn new(positive: impl Into<String>, negative: impl Into<String>) -> Self {
        Self {
            positive: positive.into(),
            negative: negative.into(),
        }
    }
}

/// Where prompt text goes
///
/// With no explicit id set, prompts are assigned positionally. Once either id
/// is set, only the explicit ids are written, and an id missing from the
/// template is skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTargets {
    /// Node receiving the positive prompt
    pub positive: Option<NodeId>,
    /// Node receiving the negative prompt
    pub negative: Option<NodeId>,
}

impl PromptTargets {
    /// First-seen order targets
    #[inline]
    #[must_use]
    pub fn positional() -> Self {
        Self::default()
    }

    /// Explicit node ids
    #[inline]
    #[must_use]
    pub fn explicit(positive: Option<NodeId>, negative: Option<NodeId>) -> Self {
        Self { positive, negative }
    }

    /// Check if any explicit id is configured
    #[inline]
    #[must_use]
    pub fn is_explicit(&self) -> bool {
        self.positive.is_some() || self.negative.is_some()
    }
}

/// Nodes that received prompt text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptAssignment {
    /// Node that got the positive text
    pub positive: Option<NodeId>,
    /// Node that got the negative text
    pub negative: Option<NodeId>,
}

/// One image name written into one loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAssignment {
    /// Loader node
    pub node: NodeId,
    /// Staged image name
    pub image: String,
}

/// Write prompt text into the text encoders
pub fn assign_prompts(
    graph: &mut WorkflowGraph,
    prompts: &PromptPair,
    roles: &NodeRoles,
    targets: &PromptTargets,
) -> PromptAssignment {
    if targets.is_explicit() {
        let positive = targets
            .positive
            .as_ref()
            .and_then(|id| set_text_by_id(graph, id, &prompts.positive, roles));
        let negative = targets
            .negative
            .as_ref()
            .and_then(|id| set_text_by_id(graph, id, &prompts.negative, roles));
        return PromptAssignment { positive, negative };
    }

    let mut assignment = PromptAssignment::default();
    let mut encoders = graph.nodes_of_type_mut(&roles.text_encoder);

    if let Some(node) = encoders.next() {
        node.set_input(roles.text_input.as_str(), prompts.positive.as_str());
        assignment.positive = Some(node.id().clone());
    }
    if let Some(node) = encoders.next() {
        node.set_input(roles.text_input.as_str(), prompts.negative.as_str());
        assignment.negative = Some(node.id().clone());
    }

    if assignment.negative.is_none() {
        tracing::warn!(
            "Template has fewer than two {} nodes; negative prompt not applied",
            roles.text_encoder
        );
    }
    assignment
}

fn set_text_by_id(
    graph: &mut WorkflowGraph,
    id: &NodeId,
    text: &str,
    roles: &NodeRoles,
) -> Option<NodeId> {
    match graph.get_mut(id.as_str()) {
        Some(node) => {
            node.set_input(roles.text_input.as_str(), text);
            Some(id.clone())
        }
        None => {
            tracing::warn!("Prompt target node {} not in template, skipping", id);
            None
        }
    }
}

/// Write image names into the image loaders, one name per loader
///
/// Extra names are ignored; extra loaders are left untouched.
pub fn assign_images(
    graph: &mut WorkflowGraph,
    images: &[String],
    roles: &NodeRoles,
) -> Vec<ImageAssignment> {
    let assigned: Vec<ImageAssignment> = graph
        .nodes_of_type_mut(&roles.image_loader)
        .zip(images)
        .map(|(node, image)| {
            node.set_input(roles.image_input.as_str(), image.as_str());
            tracing::debug!("{}: {} <- {}", node.id(), roles.image_input, image);
            ImageAssignment {
                node: node.id().clone(),
                image: image.clone(),
            }
        })
        .collect();

    if assigned.len() < images.len() {
        tracing::warn!(
            "{} image(s) left over: template has only {} {} node(s)",
            images.len() - assigned.len(),
            assigned.len(),
            roles.image_loader
        );
    }
    assigned
}

/// Write the same seed into every noise source
pub fn assign_seed(graph: &mut WorkflowGraph, seed: u64, roles: &NodeRoles) -> Vec<NodeId> {
    graph
        .nodes_of_type_mut(&roles.noise_source)
        .map(|node| {
            node.set_input(roles.seed_input.as_str(), seed);
            node.id().clone()
        })
        .collect()
}

/// Excise the face-swap stage
pub fn strip_face_swap(graph: &mut WorkflowGraph, roles: &NodeRoles) -> Vec<NodeId> {
    let removed = graph.remove_by_type_prefix(&roles.face_swap_prefix);
    if !removed.is_empty() {
        tracing::info!("Removed face-swap nodes: {:?}", removed);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeDescriptor;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn loaders(count: usize) -> WorkflowGraph {
        let mut graph = WorkflowGraph::new();
        for i in 0..count {
            graph.insert(
                NodeDescriptor::new(format!("{}", 10 + i), "LoadImage")
                    .with_input("image", "placeholder.png"),
            );
        }
        graph
    }

    #[test]
    fn images_fill_loaders_in_order() {
        let mut graph = loaders(4);
        let images = vec!["k1.png".to_string(), "k2.png".to_string(), "k3.png".to_string()];

        let assigned = assign_images(&mut graph, &images, &NodeRoles::default());

        assert_eq!(assigned.len(), 3);
        assert_eq!(graph.get("10").unwrap().input("image"), Some(&json!("k1.png")));
        assert_eq!(graph.get("11").unwrap().input("image"), Some(&json!("k2.png")));
        assert_eq!(graph.get("12").unwrap().input("image"), Some(&json!("k3.png")));
        assert_eq!(
            graph.get("13").unwrap().input("image"),
            Some(&json!("placeholder.png"))
        );
    }

    #[test]
    fn extra_images_are_ignored() {
        let mut graph = loaders(1);
        let images = vec!["a.png".to_string(), "b.png".to_string()];
        let assigned = assign_images(&mut graph, &images, &NodeRoles::default());
        assert_eq!(
            assigned,
            vec![ImageAssignment {
                node: NodeId::from("10"),
                image: "a.png".to_string()
            }]
        );
    }

    #[test]
    fn custom_image_key() {
        let mut graph = loaders(1);
        let roles = NodeRoles::default().with_image_input("path");
        assign_images(&mut graph, &["k1.png".to_string()], &roles);
        let node = graph.get("10").unwrap();
        assert_eq!(node.input("path"), Some(&json!("k1.png")));
        assert_eq!(node.input("image"), Some(&json!("placeholder.png")));
    }

    #[test]
    fn prompts_follow_first_seen_order() {
        let mut graph = WorkflowGraph::new();
        graph.insert(NodeDescriptor::new("83", "CLIPTextEncode").with_input("text", ""));
        graph.insert(NodeDescriptor::new("3", "KSampler"));
        graph.insert(NodeDescriptor::new("88", "CLIPTextEncode").with_input("text", ""));

        let prompts = PromptPair::new("masterpiece best quality man", "bad hands");
        let assignment = assign_prompts(
            &mut graph,
            &prompts,
            &NodeRoles::default(),
            &PromptTargets::positional(),
        );

        assert_eq!(assignment.positive, Some(NodeId::from("83")));
        assert_eq!(assignment.negative, Some(NodeId::from("88")));
        assert_eq!(
            graph.get("83").unwrap().input("text"),
            Some(&json!("masterpiece best quality man"))
        );
        assert_eq!(graph.get("88").unwrap().input("text"), Some(&json!("bad hands")));
    }

    #[test]
    fn explicit_targets_skip_missing_ids() {
        let mut graph = WorkflowGraph::new();
        graph.insert(NodeDescriptor::new("6", "CLIPTextEncode").with_input("text", "a"));
        graph.insert(NodeDescriptor::new("7", "CLIPTextEncode").with_input("text", "b"));

        let targets = PromptTargets::explicit(Some(NodeId::from("7")), Some(NodeId::from("88")));
        let assignment = assign_prompts(
            &mut graph,
            &PromptPair::new("pos", "neg"),
            &NodeRoles::default(),
            &targets,
        );

        assert_eq!(assignment.positive, Some(NodeId::from("7")));
        assert_eq!(assignment.negative, None);
        assert_eq!(graph.get("6").unwrap().input("text"), Some(&json!("a")));
        assert_eq!(graph.get("7").unwrap().input("text"), Some(&json!("pos")));
    }

    #[test]
    fn seed_reaches_every_noise_source() {
        let mut graph = WorkflowGraph::new();
        graph.insert(NodeDescriptor::new("25", "RandomNoise").with_input("noise_seed", 1));
        graph.insert(NodeDescriptor::new("26", "RandomNoise").with_input("noise_seed", 2));

        let touched = assign_seed(&mut graph, 42_424_242_424_242, &NodeRoles::default());

        assert_eq!(touched.len(), 2);
        for node in graph.nodes_of_type("RandomNoise") {
            assert_eq!(node.input("noise_seed"), Some(&json!(42_424_242_424_242_u64)));
        }
    }

    #[test]
    fn face_swap_stage_is_stripped() {
        let mut graph = WorkflowGraph::new();
        graph.insert(NodeDescriptor::new("161", "ReActorFaceSwap"));
        graph.insert(NodeDescriptor::new("162", "ReActorRestoreFace"));
        graph.insert(NodeDescriptor::new("203", "SaveImage"));

        let removed = strip_face_swap(&mut graph, &NodeRoles::default());

        assert_eq!(removed, vec![NodeId::from("161"), NodeId::from("162")]);
        assert_eq!(graph.len(), 1);
    }
}
