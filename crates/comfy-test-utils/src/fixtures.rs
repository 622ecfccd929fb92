//! Template, prompt and image fixtures

use comfy_graph::WorkflowGraph;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Smallest byte string that still starts with a PNG signature
pub const PNG_BYTES: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, b'I', b'H', b'D', b'R',
];

/// Face-match workflow in API format
///
/// Three reference loaders (10, 11, 12), positive/negative encoders (83, 88),
/// one noise source, a two-node face-swap stage (161, 162) and two savers
/// (203, 204).
pub const FACE_MATCH_TEMPLATE: &str = r#"{
  "4": {
    "inputs": {"ckpt_name": "sdxl_base.safetensors"},
    "class_type": "CheckpointLoaderSimple",
    "_meta": {"title": "Load Checkpoint"}
  },
  "10": {
    "inputs": {"image": "placeholder_a.png", "upload": "image"},
    "class_type": "LoadImage",
    "_meta": {"title": "Reference 1"}
  },
  "11": {
    "inputs": {"image": "placeholder_b.png", "upload": "image"},
    "class_type": "LoadImage",
    "_meta": {"title": "Reference 2"}
  },
  "12": {
    "inputs": {"image": "placeholder_c.png", "upload": "image"},
    "class_type": "LoadImage",
    "_meta": {"title": "Reference 3"}
  },
  "83": {
    "inputs": {"text": "", "clip": ["4", 1]},
    "class_type": "CLIPTextEncode",
    "_meta": {"title": "Positive"}
  },
  "88": {
    "inputs": {"text": "", "clip": ["4", 1]},
    "class_type": "CLIPTextEncode",
    "_meta": {"title": "Negative"}
  },
  "25": {
    "inputs": {"noise_seed": 0},
    "class_type": "RandomNoise"
  },
  "8": {
    "inputs": {"samples": ["25", 0], "vae": ["4", 2]},
    "class_type": "VAEDecode"
  },
  "161": {
    "inputs": {"enabled": true, "input_image": ["8", 0], "source_image": ["10", 0]},
    "class_type": "ReActorFaceSwap"
  },
  "162": {
    "inputs": {"image": ["161", 0], "model": "codeformer.pth"},
    "class_type": "ReActorRestoreFace"
  },
  "203": {
    "inputs": {"filename_prefix": "swapped", "images": ["162", 0]},
    "class_type": "SaveImage"
  },
  "204": {
    "inputs": {"filename_prefix": "raw", "images": ["8", 0]},
    "class_type": "SaveImage"
  }
}"#;

pub fn face_match_template() -> Value {
    serde_json::from_str(FACE_MATCH_TEMPLATE).unwrap()
}

pub fn face_match_graph() -> WorkflowGraph {
    WorkflowGraph::from_json_str(FACE_MATCH_TEMPLATE).unwrap()
}

/// Write the face-match template into `dir`
pub fn write_template(dir: &Path) -> PathBuf {
    let path = dir.join("workflow_api.json");
    std::fs::write(&path, FACE_MATCH_TEMPLATE).unwrap();
    path
}

pub fn write_prompt_file(dir: &Path, positive: &str, negative: &str) -> PathBuf {
    let path = dir.join("prompts.json");
    let body = serde_json::json!({"positive": positive, "negative": negative});
    std::fs::write(&path, serde_json::to_vec_pretty(&body).unwrap()).unwrap();
    path
}

/// Write a fake image per name into `dir`
pub fn write_input_images(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    std::fs::create_dir_all(dir).unwrap();
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            std::fs::write(&path, PNG_BYTES).unwrap();
            path
        })
        .collect()
}
