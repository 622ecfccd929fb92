//! Testing utilities for the comfy-runner workspace
//!
//! Shared fixtures and an in-process mock server.

#![allow(missing_docs)]

pub mod fixtures;
pub mod mock_server;

pub use fixtures::{
    face_match_graph, face_match_template, write_input_images, write_prompt_file, write_template,
    FACE_MATCH_TEMPLATE, PNG_BYTES,
};
pub use mock_server::{
    Completion, MockBehavior, MockComfyServer, Recorded, StreamScript, UploadRecord,
};
