//! Wire types shared by submission, watching and retrieval

use comfy_graph::{NodeId, WorkflowGraph};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Server-issued job identifier (`prompt_id`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    /// Wrap a job id
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

    /// Extract the job id from a submission response
    ///
    /// Accepts `prompt_id`, falling back to a legacy `id` field.
    #[must_use]
    pub fn from_submit_response(body: &Value) -> Option<Self> {
        ["prompt_id", "id"]
            .iter()
            .filter_map(|key| body.get(*key).and_then(Value::as_str))
            .find(|id| !id.is_empty())
            .map(Self::new)
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Submission envelope for one job
///
/// Built fresh per run; the graph is moved in and dropped once the server
/// has accepted it.
#[derive(Debug, Clone, Serialize)]
pub struct JobSubmission {
    /// Mutated workflow graph
    pub prompt: WorkflowGraph,
    /// Session id the event stream is tagged with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Output node hints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<NodeId>>,
}

impl JobSubmission {
    /// Create a submission for a graph
    #[inline]
    #[must_use]
    pub fn new(prompt: WorkflowGraph) -> Self {
        Self {
            prompt,
            client_id: None,
            outputs: None,
        }
    }

    /// With client session id
    #[inline]
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// With output node hints; an empty list sends no hints
    #[inline]
    #[must_use]
    pub fn with_outputs(mut self, outputs: Vec<NodeId>) -> Self {
        self.outputs = if outputs.is_empty() { None } else { Some(outputs) };
        self
    }
}

/// Storage class of an artifact on the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageClass {
    /// Final outputs
    #[default]
    Output,
    /// Uploaded inputs
    Input,
    /// Previews and intermediates
    Temp,
}

impl StorageClass {
    /// Query-string form
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Output => "output",
            Self::Input => "input",
            Self::Temp => "temp",
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to one retrievable artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputDescriptor {
    /// File name on the server
    pub filename: String,
    /// Subfolder below the storage class root
    #[serde(default)]
    pub subfolder: String,
    /// Storage class
    #[serde(rename = "type", default)]
    pub storage: StorageClass,
}

impl OutputDescriptor {
    /// Create a descriptor
    #[inline]
    #[must_use]
    pub fn new(
        filename: impl Into<String>,
        subfolder: impl Into<String>,
        storage: StorageClass,
    ) -> Self {
        Self {
            filename: filename.into(),
            subfolder: subfolder.into(),
            storage,
        }
    }
}

impl fmt::Display for OutputDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.subfolder.is_empty() {
            write!(f, "{}/{}", self.storage, self.filename)
        } else {
            write!(f, "{}/{}/{}", self.storage, self.subfolder, self.filename)
        }
    }
}

/// Artifacts of a finished job, grouped by the node that produced them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputManifest {
    nodes: IndexMap<NodeId, Vec<OutputDescriptor>>,
    status: Option<String>,
}

impl OutputManifest {
    /// Create an empty manifest
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append descriptors for a node
    pub fn push(&mut self, node: NodeId, descriptor: OutputDescriptor) {
        self.nodes.entry(node).or_default().push(descriptor);
    }

    /// Number of artifacts across all nodes
    #[must_use]
    pub fn artifact_count(&self) -> usize {
        self.nodes.values().map(Vec::len).sum()
    }

    /// Check if no artifact was produced
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifact_count() == 0
    }

    /// Descriptors produced by one node
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&[OutputDescriptor]> {
        self.nodes.get(id).map(Vec::as_slice)
    }

    /// Server-reported `status_str` of the history entry (`success`, `error`)
    #[inline]
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Check if the server marked the job as failed
    #[must_use]
    pub fn failed(&self) -> bool {
        self.status() == Some("error")
    }

    /// Producing node ids in server order
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> + '_ {
        self.nodes.keys()
    }

    /// All `(node, descriptor)` pairs in server order
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &OutputDescriptor)> + '_ {
        self.nodes
            .iter()
            .flat_map(|(node, descriptors)| descriptors.iter().map(move |d| (node, d)))
    }

    /// Read a manifest out of a history response
    ///
    /// The entry may sit under the job id key (current servers) or at the
    /// top level. Completion is signalled by an `outputs` (or `output`) key;
    /// `None` means the job is still running. A flat `output` list is stored
    /// under the empty node id.
    #[must_use]
    pub fn from_history(job: &JobHandle, body: &Value) -> Option<Self> {
        let entry = body.get(job.as_str()).unwrap_or(body);
        let outputs = entry.get("outputs").or_else(|| entry.get("output"))?;

        let mut manifest = Self::new();
        manifest.status = entry
            .pointer("/status/status_str")
            .and_then(Value::as_str)
            .map(str::to_string);
        match outputs {
            Value::Object(nodes) => {
                for (node, produced) in nodes {
                    let Some(fields) = produced.as_object() else {
                        continue;
                    };
                    // images, gifs, audio... any list of file records
                    for items in fields.values().filter_map(Value::as_array) {
                        collect_descriptors(&mut manifest, NodeId::from(node.as_str()), items);
                    }
                }
            }
            Value::Array(items) => collect_descriptors(&mut manifest, NodeId::from(""), items),
            other => {
                tracing::warn!("Unexpected outputs shape in history for {}: {}", job, other);
            }
        }
        Some(manifest)
    }
}

fn collect_descriptors(manifest: &mut OutputManifest, node: NodeId, items: &[Value]) {
    for item in items {
        if item.get("filename").and_then(Value::as_str).is_none() {
            continue;
        }
        match OutputDescriptor::deserialize(item) {
            Ok(descriptor) => manifest.push(node.clone(), descriptor),
            Err(e) => tracing::warn!("Skipping unreadable output record on node {}: {}", node, e),
        }
    }
}

/// One event from the server's event stream
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEvent {
    /// Event type (`status`, `executing`, `progress`, ...)
    #[serde(rename = "type")]
    pub kind: String,
    /// Event payload
    #[serde(default)]
    pub data: Value,
}

impl StreamEvent {
    /// Job the event belongs to, if it names one
    #[must_use]
    pub fn prompt_id(&self) -> Option<&str> {
        self.data.get("prompt_id").and_then(Value::as_str)
    }

    /// Node named by an `executing` event
    #[must_use]
    pub fn node(&self) -> Option<&str> {
        self.data.get("node").and_then(Value::as_str)
    }

    /// `executing` with `node: null` for this job: the job is done
    #[must_use]
    pub fn is_completion_of(&self, job: &JobHandle) -> bool {
        self.kind == "executing"
            && self.prompt_id() == Some(job.as_str())
            && matches!(self.data.get("node"), Some(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn job_handle_prefers_prompt_id() {
        let handle = JobHandle::from_submit_response(&json!({"prompt_id": "abc", "number": 3}));
        assert_eq!(handle, Some(JobHandle::new("abc")));

        let legacy = JobHandle::from_submit_response(&json!({"id": "old"}));
        assert_eq!(legacy, Some(JobHandle::new("old")));

        assert!(JobHandle::from_submit_response(&json!({"number": 3})).is_none());
        assert!(JobHandle::from_submit_response(&json!({"prompt_id": ""})).is_none());
    }

    #[test]
    fn submission_omits_absent_fields() {
        let body = serde_json::to_value(JobSubmission::new(WorkflowGraph::new())).unwrap();
        assert_eq!(body, json!({"prompt": {}}));

        let body = serde_json::to_value(
            JobSubmission::new(WorkflowGraph::new())
                .with_client_id("cid")
                .with_outputs(vec![NodeId::from("203"), NodeId::from("204")]),
        )
        .unwrap();
        assert_eq!(
            body,
            json!({"prompt": {}, "client_id": "cid", "outputs": ["203", "204"]})
        );
    }

    #[test]
    fn history_keyed_by_job() {
        let job = JobHandle::new("X");
        let body = json!({
            "X": {
                "outputs": {
                    "203": {"images": [
                        {"filename": "a.png", "subfolder": "", "type": "output"},
                        {"filename": "b.png", "subfolder": "faces", "type": "temp"}
                    ]},
                    "204": {"text": ["not a file"]}
                }
            }
        });

        let manifest = OutputManifest::from_history(&job, &body).unwrap();
        assert_eq!(manifest.artifact_count(), 2);
        assert_eq!(
            manifest.node("203").unwrap()[1],
            OutputDescriptor::new("b.png", "faces", StorageClass::Temp)
        );
        assert!(manifest.node("204").is_none());
    }

    #[test]
    fn history_without_outputs_is_pending() {
        let job = JobHandle::new("X");
        assert!(OutputManifest::from_history(&job, &json!({})).is_none());
        assert!(OutputManifest::from_history(&job, &json!({"X": {"status": {}}})).is_none());
    }

    #[test]
    fn flat_output_list() {
        let job = JobHandle::new("X");
        let body = json!({"output": [{"filename": "a.png"}]});
        let manifest = OutputManifest::from_history(&job, &body).unwrap();
        let all: Vec<_> = manifest.iter().collect();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0.as_str(), "");
        assert_eq!(all[0].1.storage, StorageClass::Output);
    }

    #[test]
    fn completion_event_matching() {
        let job = JobHandle::new("X");
        let done: StreamEvent =
            serde_json::from_value(json!({"type": "executing", "data": {"node": null, "prompt_id": "X"}}))
                .unwrap();
        let other: StreamEvent =
            serde_json::from_value(json!({"type": "executing", "data": {"node": null, "prompt_id": "Y"}}))
                .unwrap();
        let running: StreamEvent =
            serde_json::from_value(json!({"type": "executing", "data": {"node": "3", "prompt_id": "X"}}))
                .unwrap();
        let status: StreamEvent =
            serde_json::from_value(json!({"type": "status", "data": {"status": {}}})).unwrap();
        let no_node: StreamEvent =
            serde_json::from_value(json!({"type": "executing", "data": {"prompt_id": "X"}}))
                .unwrap();

        assert!(done.is_completion_of(&job));
        assert!(!other.is_completion_of(&job));
        assert!(!running.is_completion_of(&job));
        assert_eq!(running.node(), Some("3"));
        assert!(!status.is_completion_of(&job));
        assert!(!no_node.is_completion_of(&job));
    }

    #[test]
    fn history_status_is_kept() {
        let job = JobHandle::new("X");
        let body = json!({
            "X": {
                "outputs": {},
                "status": {"status_str": "error", "completed": false, "messages": []}
            }
        });
        let manifest = OutputManifest::from_history(&job, &body).unwrap();
        assert!(manifest.is_empty());
        assert_eq!(manifest.status(), Some("error"));
        assert!(manifest.failed());

        let plain = OutputManifest::from_history(&job, &json!({"outputs": {}})).unwrap();
        assert_eq!(plain.status(), None);
        assert!(!plain.failed());
    }
}
