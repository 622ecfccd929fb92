use comfy_graph::{NodeDescriptor, NodeId, WorkflowGraph};
use proptest::prelude::*;
use serde_json::{json, Value};

const CLASSES: &[&str] = &[
    "LoadImage",
    "CLIPTextEncode",
    "RandomNoise",
    "ReActorFaceSwap",
    "ReActorRestoreFace",
    "SaveImage",
];

/// Template JSON with unique ids and a class picked per node
fn template_strategy() -> impl Strategy<Value = Value> {
    proptest::collection::vec((0..CLASSES.len(), any::<u32>()), 0..24).prop_map(|nodes| {
        let mut root = serde_json::Map::new();
        for (idx, (class, value)) in nodes.into_iter().enumerate() {
            let id = format!("{}", 100 + idx * 7);
            root.insert(
                id,
                json!({
                    "inputs": {"value": value, "link": ["100", 0]},
                    "class_type": CLASSES[class],
                }),
            );
        }
        Value::Object(root)
    })
}

proptest! {
    #[test]
    fn prop_nodes_of_type_matches_exactly_in_order(template in template_strategy(), pick in 0..CLASSES.len()) {
        let class = CLASSES[pick];
        let graph = WorkflowGraph::from_value(template.clone()).unwrap();

        let found: Vec<&str> = graph.nodes_of_type(class).map(|n| n.id().as_str()).collect();
        let expected: Vec<&str> = template
            .as_object()
            .unwrap()
            .iter()
            .filter(|(_, node)| node["class_type"] == class)
            .map(|(id, _)| id.as_str())
            .collect();

        prop_assert_eq!(found, expected);
    }

    #[test]
    fn prop_set_input_is_idempotent(template in template_strategy(), text in ".*") {
        let mut once = WorkflowGraph::from_value(template).unwrap();
        let ids: Vec<NodeId> = once.ids().cloned().collect();
        for id in &ids {
            once.get_mut(id.as_str()).unwrap().set_input("text", text.as_str());
        }

        let mut twice = once.clone();
        for id in &ids {
            twice.get_mut(id.as_str()).unwrap().set_input("text", text.as_str());
        }

        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_removed_prefix_is_gone(template in template_strategy()) {
        let mut graph = WorkflowGraph::from_value(template).unwrap();
        let before = graph.len();
        let removed = graph.remove_by_type_prefix("ReActor");

        prop_assert_eq!(graph.nodes_of_type("ReActorFaceSwap").count(), 0);
        prop_assert_eq!(graph.nodes_of_type("ReActorRestoreFace").count(), 0);
        prop_assert_eq!(graph.len() + removed.len(), before);
    }

    #[test]
    fn prop_round_trip_without_mutation(template in template_strategy()) {
        let graph = WorkflowGraph::from_value(template.clone()).unwrap();
        let text = graph.to_json_string().unwrap();
        let reloaded = WorkflowGraph::from_json_str(&text).unwrap();

        prop_assert_eq!(reloaded.to_value().unwrap(), template);
        let original_ids: Vec<&NodeId> = graph.ids().collect();
        let reloaded_ids: Vec<&NodeId> = reloaded.ids().collect();
        prop_assert_eq!(original_ids, reloaded_ids);
    }
}

#[test]
fn face_swap_removal_then_lookup_is_empty() {
    let mut graph = WorkflowGraph::new();
    graph.insert(NodeDescriptor::new("1", "FaceSwap"));
    graph.insert(NodeDescriptor::new("2", "FaceSwapRestore"));
    graph.insert(NodeDescriptor::new("3", "SaveImage"));

    graph.remove_by_type_prefix("FaceSwap");

    assert_eq!(graph.nodes_of_type("FaceSwap").count(), 0);
    assert_eq!(graph.ids().map(NodeId::as_str).collect::<Vec<_>>(), vec!["3"]);
}
