//! In-process stand-in for the generation server
//!
//! Serves the five endpoints the client uses and records every request so
//! tests can assert on what was sent.

use crate::fixtures::PNG_BYTES;
use bytes::Buf;
use futures::{SinkExt, StreamExt, TryStreamExt};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use warp::http::StatusCode;
use warp::multipart::FormData;
use warp::reply::Response;
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Reply};

/// When history starts reporting outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// On the n-th successful history query (or once the stream said so)
    AfterPolls(u32),
    /// Never
    Never,
}

/// What the event stream sends after a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamScript {
    /// Progress for the job, then its completion marker
    Complete,
    /// Another job's completion marker first, then ours
    ForeignThenComplete,
    /// Progress, then a close frame
    CloseBeforeCompletion,
    /// Nothing at all
    Silent,
}

#[derive(Debug, Clone)]
pub struct MockBehavior {
    pub prompt_id: String,
    pub completion: Completion,
    /// `(node id, filename)` pairs reported as outputs
    pub outputs: Vec<(String, String)>,
    /// Number of leading history queries answered with HTTP 500
    pub history_error_polls: u32,
    pub reject_submission: bool,
    pub omit_prompt_id: bool,
    pub reject_uploads: bool,
    pub stream: StreamScript,
    /// Bytes served per filename; missing names answer 404
    pub artifacts: HashMap<String, Vec<u8>>,
    /// `status_str` reported in the history entry
    pub status_str: String,
}

impl Default for MockBehavior {
    fn default() -> Self {
        let outputs = vec![
            ("203".to_string(), "swapped_00001_.png".to_string()),
            ("204".to_string(), "raw_00001_.png".to_string()),
        ];
        let artifacts = outputs
            .iter()
            .map(|(_, file)| (file.clone(), PNG_BYTES.to_vec()))
            .collect();
        Self {
            prompt_id: "job-1".to_string(),
            completion: Completion::AfterPolls(2),
            outputs,
            history_error_polls: 0,
            reject_submission: false,
            omit_prompt_id: false,
            reject_uploads: false,
            stream: StreamScript::Complete,
            artifacts,
            status_str: "success".to_string(),
        }
    }
}

impl MockBehavior {
    pub fn with_completion(mut self, completion: Completion) -> Self {
        self.completion = completion;
        self
    }

    pub fn with_stream(mut self, stream: StreamScript) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_history_errors(mut self, polls: u32) -> Self {
        self.history_error_polls = polls;
        self
    }

    pub fn rejecting_submission(mut self) -> Self {
        self.reject_submission = true;
        self
    }

    pub fn without_prompt_id(mut self) -> Self {
        self.omit_prompt_id = true;
        self
    }

    pub fn rejecting_uploads(mut self) -> Self {
        self.reject_uploads = true;
        self
    }

    /// Job finishes with an execution error and no outputs
    pub fn failing_execution(mut self) -> Self {
        self.outputs.clear();
        self.status_str = "error".to_string();
        self
    }

    /// Stop serving bytes for one artifact
    pub fn without_artifact(mut self, filename: &str) -> Self {
        self.artifacts.remove(filename);
        self
    }
}

/// One received multipart upload
#[derive(Debug, Clone, Default)]
pub struct UploadRecord {
    /// Text fields other than the image
    pub fields: BTreeMap<String, String>,
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

/// Everything the server has seen so far
#[derive(Debug, Clone, Default)]
pub struct Recorded {
    pub submissions: Vec<Value>,
    pub uploads: Vec<UploadRecord>,
    pub history_polls: u32,
    pub views: Vec<HashMap<String, String>>,
    pub ws_clients: Vec<String>,
}

#[derive(Debug, Clone)]
enum WsFrame {
    Text(String),
    Close,
}

struct MockState {
    behavior: MockBehavior,
    recorded: Mutex<Recorded>,
    events: broadcast::Sender<WsFrame>,
    stream_completed: AtomicBool,
}

pub struct MockComfyServer {
    addr: SocketAddr,
    state: Arc<MockState>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockComfyServer {
    /// Bind on an ephemeral localhost port and start serving
    pub async fn start(behavior: MockBehavior) -> Self {
        let (events, _) = broadcast::channel(64);
        let state = Arc::new(MockState {
            behavior,
            recorded: Mutex::new(Recorded::default()),
            events,
            stream_completed: AtomicBool::new(false),
        });

        let (shutdown, signal) = oneshot::channel::<()>();
        let (addr, server) = warp::serve(routes(state.clone()))
            .bind_with_graceful_shutdown(([127, 0, 0, 1], 0), async move {
                let _ = signal.await;
            });
        tokio::spawn(server);

        Self {
            addr,
            state,
            shutdown: Some(shutdown),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn recorded(&self) -> Recorded {
        self.state.recorded.lock().unwrap().clone()
    }
}

impl Drop for MockComfyServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

fn routes(
    state: Arc<MockState>,
) -> impl Filter<Extract = (Response,), Error = warp::Rejection> + Clone {
    let with_state = warp::any().map(move || state.clone());

    let prompt = warp::post()
        .and(warp::path("prompt"))
        .and(warp::path::end())
        .and(warp::body::json())
        .and(with_state.clone())
        .and_then(handle_prompt);

    let history = warp::get()
        .and(warp::path!("history" / String))
        .and(with_state.clone())
        .and_then(handle_history);

    let view = warp::get()
        .and(warp::path("view"))
        .and(warp::path::end())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_state.clone())
        .and_then(handle_view);

    let upload = warp::post()
        .and(warp::path!("upload" / "image"))
        .and(warp::multipart::form().max_length(16 * 1024 * 1024))
        .and(with_state.clone())
        .and_then(handle_upload);

    let ws = warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_state)
        .map(|ws: Ws, query: HashMap<String, String>, state: Arc<MockState>| {
            let client_id = query.get("clientId").cloned().unwrap_or_default();
            state.recorded.lock().unwrap().ws_clients.push(client_id.clone());
            // subscribe before the handshake completes so no event is lost
            let events = state.events.subscribe();
            ws.on_upgrade(move |socket| serve_socket(socket, client_id, events))
                .into_response()
        });

    prompt
        .or(history)
        .unify()
        .or(view)
        .unify()
        .or(upload)
        .unify()
        .or(ws)
        .unify()
}

async fn handle_prompt(body: Value, state: Arc<MockState>) -> Result<Response, Infallible> {
    state.recorded.lock().unwrap().submissions.push(body);
    let behavior = &state.behavior;

    if behavior.reject_submission {
        let report = json!({
            "error": {
                "type": "prompt_outputs_failed_validation",
                "message": "Prompt outputs failed validation"
            },
            "node_errors": {}
        });
        return Ok(
            warp::reply::with_status(warp::reply::json(&report), StatusCode::BAD_REQUEST)
                .into_response(),
        );
    }
    if behavior.omit_prompt_id {
        return Ok(warp::reply::json(&json!({"number": 0, "node_errors": {}})).into_response());
    }

    tokio::spawn(play_script(state.clone()));
    Ok(warp::reply::json(&json!({
        "prompt_id": behavior.prompt_id,
        "number": 0,
        "node_errors": {}
    }))
    .into_response())
}

fn executing(job: &str, node: Option<&str>) -> WsFrame {
    WsFrame::Text(json!({"type": "executing", "data": {"node": node, "prompt_id": job}}).to_string())
}

async fn play_script(state: Arc<MockState>) {
    tokio::time::sleep(Duration::from_millis(30)).await;
    let job = state.behavior.prompt_id.as_str();
    let progress = WsFrame::Text(
        json!({"type": "progress", "data": {"value": 1, "max": 2, "prompt_id": job, "node": "3"}})
            .to_string(),
    );

    let frames = match state.behavior.stream {
        StreamScript::Complete => vec![
            executing(job, Some("3")),
            progress,
            executing(job, None),
        ],
        StreamScript::ForeignThenComplete => vec![
            executing("other-job", None),
            executing(job, Some("3")),
            executing(job, None),
        ],
        StreamScript::CloseBeforeCompletion => vec![executing(job, Some("3")), WsFrame::Close],
        StreamScript::Silent => Vec::new(),
    };

    let completes = matches!(
        state.behavior.stream,
        StreamScript::Complete | StreamScript::ForeignThenComplete
    );
    if completes {
        state.stream_completed.store(true, Ordering::SeqCst);
    }
    for frame in frames {
        let _ = state.events.send(frame);
    }
}

async fn handle_history(id: String, state: Arc<MockState>) -> Result<Response, Infallible> {
    let behavior = &state.behavior;
    let poll = {
        let mut recorded = state.recorded.lock().unwrap();
        recorded.history_polls += 1;
        recorded.history_polls
    };

    if poll <= behavior.history_error_polls {
        return Ok(
            warp::reply::with_status("internal error", StatusCode::INTERNAL_SERVER_ERROR)
                .into_response(),
        );
    }
    if id != behavior.prompt_id {
        return Ok(warp::reply::json(&json!({})).into_response());
    }

    let ready = match behavior.completion {
        Completion::Never => false,
        Completion::AfterPolls(n) => {
            poll - behavior.history_error_polls >= n
                || state.stream_completed.load(Ordering::SeqCst)
        }
    };
    if !ready {
        return Ok(warp::reply::json(&json!({})).into_response());
    }

    let mut outputs = Map::new();
    for (node, filename) in &behavior.outputs {
        let entry = outputs
            .entry(node.clone())
            .or_insert_with(|| json!({"images": []}));
        if let Some(images) = entry["images"].as_array_mut() {
            images.push(json!({"filename": filename, "subfolder": "", "type": "output"}));
        }
    }

    let mut body = Map::new();
    body.insert(
        id,
        json!({
            "prompt": [],
            "outputs": Value::Object(outputs),
            "status": {
                "status_str": behavior.status_str,
                "completed": behavior.status_str == "success"
            }
        }),
    );
    Ok(warp::reply::json(&Value::Object(body)).into_response())
}

async fn handle_view(
    query: HashMap<String, String>,
    state: Arc<MockState>,
) -> Result<Response, Infallible> {
    let filename = query.get("filename").cloned().unwrap_or_default();
    state.recorded.lock().unwrap().views.push(query);

    match state.behavior.artifacts.get(&filename) {
        Some(bytes) => {
            Ok(warp::reply::with_header(bytes.clone(), "content-type", "image/png").into_response())
        }
        None => Ok(warp::reply::with_status("not found", StatusCode::NOT_FOUND).into_response()),
    }
}

async fn handle_upload(form: FormData, state: Arc<MockState>) -> Result<Response, Infallible> {
    let record = match read_upload(form).await {
        Ok(record) => record,
        Err(_) => {
            return Ok(
                warp::reply::with_status("bad multipart body", StatusCode::BAD_REQUEST)
                    .into_response(),
            )
        }
    };

    let stored = record.filename.clone().unwrap_or_default();
    state.recorded.lock().unwrap().uploads.push(record);

    if state.behavior.reject_uploads {
        return Ok(
            warp::reply::with_status("disk full", StatusCode::INTERNAL_SERVER_ERROR)
                .into_response(),
        );
    }
    Ok(warp::reply::json(&json!({"name": stored, "subfolder": "", "type": "input"})).into_response())
}

/// Parts must be drained one at a time, in arrival order
async fn read_upload(mut form: FormData) -> Result<UploadRecord, warp::Error> {
    let mut record = UploadRecord::default();
    while let Some(part) = form.try_next().await? {
        let name = part.name().to_string();
        let filename = part.filename().map(str::to_string);
        let data = part
            .stream()
            .try_fold(Vec::new(), |mut acc, buf| async move {
                acc.extend_from_slice(buf.chunk());
                Ok::<_, warp::Error>(acc)
            })
            .await?;

        if name == "image" {
            record.filename = filename;
            record.bytes = data;
        } else {
            record
                .fields
                .insert(name, String::from_utf8_lossy(&data).into_owned());
        }
    }
    Ok(record)
}

async fn serve_socket(
    socket: WebSocket,
    client_id: String,
    mut events: broadcast::Receiver<WsFrame>,
) {
    let (mut tx, mut rx) = socket.split();
    let hello = json!({
        "type": "status",
        "data": {"status": {"exec_info": {"queue_remaining": 0}}, "sid": client_id}
    });
    if tx.send(Message::text(hello.to_string())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            frame = events.recv() => match frame {
                Ok(WsFrame::Text(text)) => {
                    if tx.send(Message::text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(WsFrame::Close) => {
                    let _ = tx.send(Message::close()).await;
                    break;
                }
                Err(_) => break,
            },
            incoming = rx.next() => match incoming {
                Some(Ok(msg)) if !msg.is_close() => {}
                _ => break,
            },
        }
    }
}
