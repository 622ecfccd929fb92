//! Workflow graph model
//!
//! An API-format workflow is a JSON object keyed by node id. Each value holds
//! a `class_type` tag and an `inputs` object; any other authored field (for
//! example `_meta`) is carried through untouched.
//!
//! Node order is the order of the template file and is kept through load,
//! mutation, removal and serialization. Role assignment depends on it.

use crate::error::GraphError;
use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use std::borrow::Borrow;
use std::fmt;

/// Node identifier (the string key of a template entry)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// One node of a workflow graph
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDescriptor {
    id: NodeId,
    class_type: String,
    inputs: Map<String, Value>,
    extra: Map<String, Value>,
}

impl NodeDescriptor {
    /// Create a node with no inputs
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<NodeId>, class_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            class_type: class_type.into(),
            inputs: Map::new(),
            extra: Map::new(),
        }
    }

    /// With an input value
    #[inline]
    #[must_use]
    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    /// Node id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Class tag (`class_type`)
    #[inline]
    #[must_use]
    pub fn class_type(&self) -> &str {
        &self.class_type
    }

    /// All inputs, in authored order
    #[inline]
    #[must_use]
    pub fn inputs(&self) -> &Map<String, Value> {
        &self.inputs
    }

    /// Single input value
    #[inline]
    #[must_use]
    pub fn input(&self, key: &str) -> Option<&Value> {
        self.inputs.get(key)
    }

    /// Overwrite an input in place
    ///
    /// The value is not checked against any schema; the server validates.
    pub fn set_input(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.inputs.insert(key.into(), value.into());
    }

    /// Authored fields other than `class_type` and `inputs`
    #[inline]
    #[must_use]
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Inputs that reference another node's output (`[node_id, slot]`)
    pub fn links(&self) -> impl Iterator<Item = (&str, NodeId)> + '_ {
        self.inputs.iter().filter_map(|(key, value)| match value {
            Value::Array(pair) if pair.len() == 2 && pair[1].is_u64() => {
                pair[0].as_str().map(|target| (key.as_str(), NodeId::from(target)))
            }
            _ => None,
        })
    }

    fn from_value(id: NodeId, value: Value) -> Result<Self, GraphError> {
        let fields = match value {
            Value::Object(fields) => fields,
            other => {
                return Err(GraphError::malformed(format!(
                    "node {id}: expected an object, found {}",
                    json_kind(&other)
                )))
            }
        };

        let mut class_type = None;
        let mut inputs = None;
        let mut extra = Map::new();
        for (key, value) in fields {
            match key.as_str() {
                "class_type" => class_type = Some(value),
                "inputs" => inputs = Some(value),
                _ => {
                    extra.insert(key, value);
                }
            }
        }

        let class_type = match class_type {
            Some(Value::String(tag)) => tag,
            Some(other) => {
                return Err(GraphError::malformed(format!(
                    "node {id}: class_type must be a string, found {}",
                    json_kind(&other)
                )))
            }
            None => return Err(GraphError::malformed(format!("node {id}: missing class_type"))),
        };

        let inputs = match inputs {
            None => Map::new(),
            Some(Value::Object(inputs)) => inputs,
            Some(other) => {
                return Err(GraphError::malformed(format!(
                    "node {id}: inputs must be an object, found {}",
                    json_kind(&other)
                )))
            }
        };

        Ok(Self {
            id,
            class_type,
            inputs,
            extra,
        })
    }
}

impl Serialize for NodeDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2 + self.extra.len()))?;
        map.serialize_entry("inputs", &self.inputs)?;
        map.serialize_entry("class_type", &self.class_type)?;
        for (key, value) in &self.extra {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// An input that points at a node which is not in the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingRef {
    /// Node holding the reference
    pub node: NodeId,
    /// Input key holding the reference
    pub input: String,
    /// Missing target
    pub target: NodeId,
}

/// Ordered mapping of node id → node descriptor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowGraph {
    nodes: IndexMap<NodeId, NodeDescriptor>,
}

impl WorkflowGraph {
    /// Create an empty graph
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a template from JSON text
    ///
    /// # Errors
    /// `GraphError::MalformedTemplate` if the text is not JSON or does not
    /// have the node-map shape.
    pub fn from_json_str(text: &str) -> Result<Self, GraphError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| GraphError::malformed(format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Parse a template from JSON bytes
    ///
    /// # Errors
    /// Same as [`WorkflowGraph::from_json_str`].
    pub fn from_slice(bytes: &[u8]) -> Result<Self, GraphError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| GraphError::malformed(format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Build a graph from an already parsed JSON value
    ///
    /// # Errors
    /// - top level is not an object
    /// - a node is not an object, lacks a string `class_type`, or has
    ///   non-object `inputs`
    pub fn from_value(value: Value) -> Result<Self, GraphError> {
        let root = match value {
            Value::Object(root) => root,
            other => {
                return Err(GraphError::malformed(format!(
                    "expected an object of nodes, found {}",
                    json_kind(&other)
                )))
            }
        };

        // UI exports carry a "nodes" array plus links; only API format is submittable
        if root.get("nodes").is_some_and(Value::is_array) {
            return Err(GraphError::malformed(
                "looks like a UI-format workflow; export it in API format",
            ));
        }

        let mut nodes = IndexMap::with_capacity(root.len());
        for (key, value) in root {
            let id = NodeId::from(key);
            let node = NodeDescriptor::from_value(id.clone(), value)?;
            nodes.insert(id, node);
        }

        tracing::debug!("Loaded workflow graph with {} nodes", nodes.len());
        Ok(Self { nodes })
    }

    /// Serialize to a JSON value
    ///
    /// # Errors
    /// `GraphError::Serialize` if serialization fails.
    pub fn to_value(&self) -> Result<Value, GraphError> {
        serde_json::to_value(self).map_err(GraphError::Serialize)
    }

    /// Serialize to compact JSON text
    ///
    /// # Errors
    /// `GraphError::Serialize` if serialization fails.
    pub fn to_json_string(&self) -> Result<String, GraphError> {
        serde_json::to_string(self).map_err(GraphError::Serialize)
    }

    /// Serialize to indented JSON text
    ///
    /// # Errors
    /// `GraphError::Serialize` if serialization fails.
    pub fn to_json_string_pretty(&self) -> Result<String, GraphError> {
        serde_json::to_string_pretty(self).map_err(GraphError::Serialize)
    }

    /// Number of nodes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if graph has no nodes
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Insert a node, replacing any node with the same id in place
    pub fn insert(&mut self, node: NodeDescriptor) -> Option<NodeDescriptor> {
        self.nodes.insert(node.id.clone(), node)
    }

    /// Check if a node id is present
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Look up a node by id; absent is not an error
    #[inline]
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&NodeDescriptor> {
        self.nodes.get(id)
    }

    /// Mutable lookup by id
    #[inline]
    pub fn get_mut(&mut self, id: &str) -> Option<&mut NodeDescriptor> {
        self.nodes.get_mut(id)
    }

    /// Node ids in graph order
    pub fn ids(&self) -> impl Iterator<Item = &NodeId> + '_ {
        self.nodes.keys()
    }

    /// Nodes in graph order
    pub fn iter(&self) -> impl Iterator<Item = &NodeDescriptor> + '_ {
        self.nodes.values()
    }

    /// Nodes whose class tag equals `class_type`, in graph order
    ///
    /// The iterator is lazy and `Clone`, so it can be restarted.
    pub fn nodes_of_type<'a>(
        &'a self,
        class_type: &'a str,
    ) -> impl Iterator<Item = &'a NodeDescriptor> + Clone + 'a {
        self.nodes
            .values()
            .filter(move |node| node.class_type == class_type)
    }

    /// Mutable variant of [`WorkflowGraph::nodes_of_type`]
    pub fn nodes_of_type_mut<'a>(
        &'a mut self,
        class_type: &'a str,
    ) -> impl Iterator<Item = &'a mut NodeDescriptor> + 'a {
        self.nodes
            .values_mut()
            .filter(move |node| node.class_type == class_type)
    }

    /// Remove every node whose class tag starts with `prefix`
    ///
    /// Returns the removed ids in graph order. Surviving nodes keep their
    /// order. Edges into removed nodes are left dangling; see
    /// [`WorkflowGraph::dangling_references`]. An empty prefix removes nothing.
    pub fn remove_by_type_prefix(&mut self, prefix: &str) -> Vec<NodeId> {
        if prefix.is_empty() {
            return Vec::new();
        }

        let mut removed = Vec::new();
        self.nodes.retain(|id, node| {
            if node.class_type.starts_with(prefix) {
                removed.push(id.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Inputs that link to nodes missing from the graph
    #[must_use]
    pub fn dangling_references(&self) -> Vec<DanglingRef> {
        self.nodes
            .values()
            .flat_map(|node| {
                node.links()
                    .filter(|(_, target)| !self.nodes.contains_key(target))
                    .map(|(input, target)| DanglingRef {
                        node: node.id.clone(),
                        input: input.to_string(),
                        target,
                    })
            })
            .collect()
    }
}

impl Serialize for WorkflowGraph {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.nodes.len()))?;
        for (id, node) in &self.nodes {
            map.serialize_entry(id, node)?;
        }
        map.end()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "4": {"inputs": {"ckpt_name": "model.safetensors"}, "class_type": "CheckpointLoaderSimple"},
            "10": {"inputs": {"image": "a.png", "upload": "image"}, "class_type": "LoadImage"},
            "83": {"inputs": {"text": "old", "clip": ["4", 1]}, "class_type": "CLIPTextEncode", "_meta": {"title": "Positive"}},
            "161": {"inputs": {"input_image": ["10", 0]}, "class_type": "ReActorFaceSwap"},
            "203": {"inputs": {"images": ["161", 0]}, "class_type": "SaveImage"}
        })
    }

    #[test]
    fn load_preserves_authored_order() {
        let graph = WorkflowGraph::from_value(sample()).unwrap();
        let ids: Vec<&str> = graph.ids().map(NodeId::as_str).collect();
        assert_eq!(ids, vec!["4", "10", "83", "161", "203"]);
    }

    #[test]
    fn load_rejects_non_object_root() {
        let err = WorkflowGraph::from_json_str("[1, 2, 3]").unwrap_err();
        assert!(err.is_malformed());
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn load_rejects_invalid_json() {
        let err = WorkflowGraph::from_json_str("{\"3\": ").unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn load_rejects_missing_class_type() {
        let err = WorkflowGraph::from_value(json!({"3": {"inputs": {}}})).unwrap_err();
        assert!(err.to_string().contains("node 3: missing class_type"));
    }

    #[test]
    fn load_rejects_non_object_node() {
        let err = WorkflowGraph::from_value(json!({"3": "KSampler"})).unwrap_err();
        assert!(err.to_string().contains("node 3"));
    }

    #[test]
    fn load_rejects_ui_format() {
        let err = WorkflowGraph::from_value(json!({"nodes": [], "links": []})).unwrap_err();
        assert!(err.to_string().contains("API format"));
    }

    #[test]
    fn missing_inputs_become_empty() {
        let graph = WorkflowGraph::from_value(json!({"1": {"class_type": "Note"}})).unwrap();
        assert!(graph.get("1").unwrap().inputs().is_empty());
    }

    #[test]
    fn round_trip_keeps_meta_and_inputs() {
        let graph = WorkflowGraph::from_value(sample()).unwrap();
        assert_eq!(graph.to_value().unwrap(), sample());
    }

    #[test]
    fn find_by_id_absent_is_none() {
        let graph = WorkflowGraph::from_value(sample()).unwrap();
        assert!(graph.get("999").is_none());
        assert_eq!(graph.get("83").unwrap().class_type(), "CLIPTextEncode");
    }

    #[test]
    fn nodes_of_type_is_restartable() {
        let graph = WorkflowGraph::from_value(sample()).unwrap();
        let loaders = graph.nodes_of_type("LoadImage");
        assert_eq!(loaders.clone().count(), 1);
        assert_eq!(loaders.count(), 1);
        assert_eq!(graph.nodes_of_type("Missing").count(), 0);
    }

    #[test]
    fn remove_by_prefix_leaves_dangling_refs() {
        let mut graph = WorkflowGraph::from_value(sample()).unwrap();
        let removed = graph.remove_by_type_prefix("ReActor");
        assert_eq!(removed, vec![NodeId::from("161")]);
        assert_eq!(graph.len(), 4);

        let dangling = graph.dangling_references();
        assert_eq!(
            dangling,
            vec![DanglingRef {
                node: NodeId::from("203"),
                input: "images".to_string(),
                target: NodeId::from("161"),
            }]
        );
    }

    #[test]
    fn remove_with_empty_prefix_is_noop() {
        let mut graph = WorkflowGraph::from_value(sample()).unwrap();
        assert!(graph.remove_by_type_prefix("").is_empty());
        assert_eq!(graph.len(), 5);
    }

    #[test]
    fn set_input_overwrites() {
        let mut graph = WorkflowGraph::from_value(sample()).unwrap();
        graph.get_mut("83").unwrap().set_input("text", "new");
        assert_eq!(graph.get("83").unwrap().input("text"), Some(&json!("new")));
        // link untouched
        assert_eq!(graph.get("83").unwrap().input("clip"), Some(&json!(["4", 1])));
    }
}
