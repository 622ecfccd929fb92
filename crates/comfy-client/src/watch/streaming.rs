use super::{deadline_after, time_left, CompletionSource};
use crate::client::{ComfyClient, HistoryPoll};
use crate::error::ClientError;
use crate::protocol::{JobHandle, OutputManifest, StreamEvent};
use futures::StreamExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Follows the server event stream for one client session
///
/// The socket is opened in `prepare` so that the completion event of a
/// fast job cannot slip past before anyone is listening.
pub struct StreamingWatcher {
    client_id: String,
    read_timeout: Duration,
    timeout: Duration,
    socket: Option<Socket>,
}

impl StreamingWatcher {
    /// Create a streaming watcher for a client session
    #[must_use]
    pub fn new(client_id: impl Into<String>, read_timeout: Duration, timeout: Duration) -> Self {
        Self {
            client_id: client_id.into(),
            read_timeout,
            timeout,
            socket: None,
        }
    }
}

async fn connect(client: &ComfyClient, client_id: &str) -> Result<Socket, ClientError> {
    let url = client.endpoint().ws_url(client_id)?;
    tracing::debug!("Connecting event stream {}", url);
    let (socket, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
    tracing::info!("Event stream open for client {}", client_id);
    Ok(socket)
}

/// Read events until `job` reports completion
async fn await_completion(
    socket: &mut Socket,
    job: &JobHandle,
    read_timeout: Duration,
    timeout: Duration,
) -> Result<(), ClientError> {
    let start = Instant::now();
    let deadline = deadline_after(start, timeout);

    loop {
        let remaining = time_left(deadline);
        if remaining.is_zero() {
            return Err(timed_out(job, start));
        }
        let window = read_timeout.min(remaining);

        let frame = match tokio::time::timeout(window, socket.next()).await {
            Ok(frame) => frame,
            Err(_) if window < read_timeout => return Err(timed_out(job, start)),
            Err(_) => {
                return Err(ClientError::StreamClosed {
                    job: job.clone(),
                    reason: format!("no event for {:.1}s", read_timeout.as_secs_f64()),
                })
            }
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                let event: StreamEvent = match serde_json::from_str(text.as_str()) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::debug!("Ignoring unparseable event: {}", e);
                        continue;
                    }
                };
                if event.is_completion_of(job) {
                    tracing::info!("Job {} finished executing", job);
                    return Ok(());
                }
                log_event(&event, job);
            }
            // previews
            Some(Ok(Message::Binary(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                let reason = frame.map_or_else(
                    || "server closed the connection".to_string(),
                    |f| format!("server closed the connection: {} {}", f.code, f.reason.as_str()),
                );
                return Err(ClientError::StreamClosed {
                    job: job.clone(),
                    reason,
                });
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                return Err(ClientError::StreamClosed {
                    job: job.clone(),
                    reason: e.to_string(),
                })
            }
            None => {
                return Err(ClientError::StreamClosed {
                    job: job.clone(),
                    reason: "stream ended".to_string(),
                })
            }
        }
    }
}

impl std::fmt::Debug for StreamingWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingWatcher")
            .field("client_id", &self.client_id)
            .field("read_timeout", &self.read_timeout)
            .field("timeout", &self.timeout)
            .field("connected", &self.socket.is_some())
            .finish()
    }
}

fn timed_out(job: &JobHandle, start: Instant) -> ClientError {
    ClientError::Timeout {
        job: job.clone(),
        elapsed_secs: start.elapsed().as_secs_f64(),
    }
}

fn log_event(event: &StreamEvent, job: &JobHandle) {
    if event.prompt_id().is_some_and(|id| id != job.as_str()) {
        return;
    }
    match event.kind.as_str() {
        "executing" => {
            if let Some(node) = event.node() {
                tracing::debug!("Job {} executing node {}", job, node);
            }
        }
        "progress" => {
            let value = event.data.get("value").and_then(serde_json::Value::as_u64);
            let max = event.data.get("max").and_then(serde_json::Value::as_u64);
            if let (Some(value), Some(max)) = (value, max) {
                tracing::debug!("Job {} progress {}/{}", job, value, max);
            }
        }
        "execution_error" => {
            tracing::warn!("Job {} reported an execution error: {}", job, event.data);
        }
        _ => {}
    }
}

#[async_trait::async_trait]
impl CompletionSource for StreamingWatcher {
    fn client_id(&self) -> Option<&str> {
        Some(&self.client_id)
    }

    async fn prepare(&mut self, client: &ComfyClient) -> Result<(), ClientError> {
        if self.socket.is_none() {
            self.socket = Some(connect(client, &self.client_id).await?);
        }
        Ok(())
    }

    async fn wait(
        &mut self,
        client: &ComfyClient,
        job: &JobHandle,
    ) -> Result<OutputManifest, ClientError> {
        let mut socket = match self.socket.take() {
            Some(socket) => socket,
            None => connect(client, &self.client_id).await?,
        };

        let outcome = await_completion(&mut socket, job, self.read_timeout, self.timeout).await;
        if let Err(e) = socket.close(None).await {
            tracing::debug!("Closing event stream: {}", e);
        }
        outcome?;

        match client.poll_history(job).await? {
            HistoryPoll::Complete(manifest) => Ok(manifest),
            HistoryPoll::Pending => Err(ClientError::Protocol(format!(
                "job {job} finished but history lists no outputs"
            ))),
            HistoryPoll::Unavailable { status } => Err(ClientError::Protocol(format!(
                "job {job} finished but history answered HTTP {status}"
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "stream"
    }
}
