//! The terminal gateway: bridges one browser WebSocket to one in-pod exec stream

use super::common::{ensure_available, load_owned, resolve_pod};
use crate::audit_buffer::CommandBuffer;
use crate::auth::Principal;
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use kube::api::TerminalSize;
use sandkube_common::{ApiError, AuditEntry, Reservation};
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

/// Mounts the terminal attach route
pub fn mount(app: Router<AppState>) -> Router<AppState> {
    app.route("/reservations/:id/attach", get(attach))
}

/// The shell started inside the sandbox container for interactive sessions
const SHELL_COMMAND: &[&str] = &["sh"];
/// How often a keepalive ping is sent
const PING_INTERVAL: Duration = Duration::from_secs(54);
/// How long to wait for a pong (or any frame) before closing a stalled session
const READ_DEADLINE: Duration = Duration::from_secs(60);
/// The maximum size of one outbound binary chunk
const OUTBOUND_CHUNK: usize = 4096;
/// The gap left between outbound chunks
const OUTBOUND_GAP: Duration = Duration::from_millis(1);
/// How many pending resizes the coalescing queue holds before dropping the oldest
const RESIZE_QUEUE_DEPTH: usize = 2;

/// `GET /reservations/{id}/attach`
pub async fn attach(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let reservation = load_owned(&state, &principal, id).await?;
    ensure_available(&reservation)?;
    let pod_name = resolve_pod(&state, &reservation).await?;
    if !state.driver.is_pod_ready(&pod_name).await.unwrap_or(false) {
        return sandkube_common::bad!("Environment not available");
    }
    Ok(ws.on_upgrade(move |socket| run_session(socket, state, principal, reservation, pod_name)))
}

/// The initial `{cols, rows}` handshake frame; falls back to 80x24 when absent or unparseable
#[derive(Debug, Deserialize)]
struct Handshake {
    cols: u16,
    rows: u16,
}

/// An incoming frame once classified
enum InboundFrame {
    Resize { cols: u16, rows: u16 },
    Stdin(Vec<u8>),
}

fn classify(bytes: &[u8]) -> InboundFrame {
    #[derive(Deserialize)]
    struct ResizeFrame {
        resize: bool,
        cols: u16,
        rows: u16,
    }
    if let Ok(frame) = serde_json::from_slice::<ResizeFrame>(bytes) {
        if frame.resize {
            return InboundFrame::Resize { cols: frame.cols, rows: frame.rows };
        }
    }
    InboundFrame::Stdin(bytes.to_vec())
}

/// A depth-[`RESIZE_QUEUE_DEPTH`] coalescing queue of pending terminal sizes
struct ResizeQueue {
    pending: Mutex<VecDeque<TerminalSize>>,
    notify: Notify,
}

impl ResizeQueue {
    fn new() -> Self {
        ResizeQueue { pending: Mutex::new(VecDeque::new()), notify: Notify::new() }
    }

    async fn push(&self, size: TerminalSize) {
        let mut pending = self.pending.lock().await;
        if pending.len() >= RESIZE_QUEUE_DEPTH {
            pending.pop_front();
        }
        pending.push_back(size);
        drop(pending);
        self.notify.notify_one();
    }

    async fn recv(&self) -> TerminalSize {
        loop {
            {
                let mut pending = self.pending.lock().await;
                if let Some(size) = pending.pop_front() {
                    return size;
                }
            }
            self.notify.notified().await;
        }
    }
}

async fn run_session(
    socket: WebSocket,
    state: AppState,
    principal: Principal,
    reservation: Reservation,
    pod_name: String,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (cols, rows) = match tokio::time::timeout(Duration::from_secs(5), ws_rx.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str::<Handshake>(&text)
            .map(|h| (h.cols, h.rows))
            .unwrap_or((80, 24)),
        Ok(Some(Ok(Message::Binary(bytes)))) => serde_json::from_slice::<Handshake>(&bytes)
            .map(|h| (h.cols, h.rows))
            .unwrap_or((80, 24)),
        _ => (80, 24),
    };

    let mut attached = match state
        .driver
        .attach_shell(&pod_name, sandkube_driver::SANDBOX_CONTAINER, SHELL_COMMAND.iter().map(|s| s.to_string()).collect())
        .await
    {
        Ok(attached) => attached,
        Err(err) => {
            let _ = ws_tx.send(Message::Text(format!("\x1b[31mfailed to attach: {err}\x1b[0m\r\n"))).await;
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };

    let session_id = sandkube_common::ids::session_id(&principal.id, &pod_name, now_nanos());
    let _ = ws_tx
        .send(Message::Text(format!("\x1b[32mWelcome! attached to {pod_name}\x1b[0m\r\n")))
        .await;

    let resize_queue = Arc::new(ResizeQueue::new());
    if let Some(mut sizer) = attached.terminal_size() {
        let _ = sizer.send(TerminalSize { height: rows, width: cols }).await;
        let resize_queue = resize_queue.clone();
        tokio::spawn(async move {
            loop {
                let size = resize_queue.recv().await;
                if sizer.send(size).await.is_err() {
                    return;
                }
            }
        });
    }

    let ws_tx = Arc::new(Mutex::new(ws_tx));

    let mut stdout_task = attached.stdout().map(|reader| {
        let ws_tx = ws_tx.clone();
        tokio::spawn(relay_output(reader, ws_tx))
    });

    let mut stdin = attached.stdin();
    let mut buffer = CommandBuffer::new();
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await;

    loop {
        tokio::select! {
            frame = tokio::time::timeout(READ_DEADLINE, ws_rx.next()) => {
                let frame = match frame {
                    Ok(Some(Ok(frame))) => frame,
                    _ => break,
                };
                match frame {
                    Message::Binary(bytes) => {
                        if !handle_inbound(&bytes, &mut stdin, &resize_queue, &mut buffer, &state, &principal, &reservation, &pod_name, &session_id).await {
                            break;
                        }
                    }
                    Message::Text(text) => {
                        if !handle_inbound(text.as_bytes(), &mut stdin, &resize_queue, &mut buffer, &state, &principal, &reservation, &pod_name, &session_id).await {
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            _ = ping_interval.tick() => {
                let mut tx = ws_tx.lock().await;
                if tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(task) = stdout_task.take() {
        task.abort();
    }
    drop(attached);
    let mut tx = ws_tx.lock().await;
    let _ = tx.send(Message::Close(None)).await;
}

/// Classifies one inbound frame, forwarding stdin bytes (and flushing any completed commands
/// to the audit side channel) or queuing a resize; returns false when stdin has closed
async fn handle_inbound(
    bytes: &[u8],
    stdin: &mut Option<impl tokio::io::AsyncWrite + Unpin>,
    resize_queue: &Arc<ResizeQueue>,
    buffer: &mut CommandBuffer,
    state: &AppState,
    principal: &Principal,
    reservation: &Reservation,
    pod_name: &str,
    session_id: &str,
) -> bool {
    match classify(bytes) {
        InboundFrame::Resize { cols, rows } => {
            resize_queue.push(TerminalSize { height: rows, width: cols }).await;
            true
        }
        InboundFrame::Stdin(data) => {
            for command in buffer.feed(&data) {
                let entry = AuditEntry {
                    id: Uuid::new_v4(),
                    reservation_id: reservation.id,
                    user_id: principal.id.clone(),
                    user_name: None,
                    pod_name: pod_name.to_owned(),
                    session_id: session_id.to_owned(),
                    command_text: command,
                    timestamp: chrono::Utc::now(),
                };
                if let Err(err) = state.queue.audit_push(&entry).await {
                    tracing::error!(%err, "failed to enqueue audit entry");
                }
            }
            match stdin {
                Some(stdin) => stdin.write_all(&data).await.is_ok(),
                None => true,
            }
        }
    }
}

/// Relays one pod output stream to the browser as chunked binary WebSocket frames
async fn relay_output(
    mut reader: impl tokio::io::AsyncRead + Unpin,
    ws_tx: Arc<Mutex<futures_util::stream::SplitSink<WebSocket, Message>>>,
) {
    let mut buf = [0u8; OUTBOUND_CHUNK];
    loop {
        let read = match reader.read(&mut buf).await {
            Ok(0) => return,
            Ok(read) => read,
            Err(_) => return,
        };
        let mut tx = ws_tx.lock().await;
        if tx.send(Message::Binary(buf[..read].to_vec())).await.is_err() {
            return;
        }
        drop(tx);
        tokio::time::sleep(OUTBOUND_GAP).await;
    }
}

fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}
