use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use afc_core::connection::{ConnectionPhase, ConnectionState};
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a shutdown waits for the close handshake before dropping the socket.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl ReconnectPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            max: max.max(initial),
        }
    }

    pub fn next_backoff(&self, current: Duration) -> Duration {
        let next = current + current;
        if next > self.max {
            self.max
        } else {
            next
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(10))
    }
}

/// What the connection manager reports to its single consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// `resumed` is set on every open after the first; events may have been
    /// missed in between.
    Opened { resumed: bool },
    Message(String),
    Closed {
        error: Option<String>,
        retry_in: Duration,
    },
}

/// Owner side of a running connection manager. Dropping the handle tears the
/// manager down as well.
pub struct StreamHandle {
    disposed: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Stops the manager: no reconnect fires afterwards and no further
    /// message is forwarded.
    pub async fn close(self) {
        self.disposed.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!("stream_task_join_error: {err}");
        }
    }
}

/// Starts the connection manager. There is exactly one connection task per
/// handle, so at most one socket and one pending reconnect timer exist.
pub fn open(url: Url, policy: ReconnectPolicy, consumer: mpsc::Sender<StreamEvent>) -> StreamHandle {
    let disposed = Arc::new(AtomicBool::new(false));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (state_tx, state_rx) = watch::channel(ConnectionState::default());
    let task = tokio::spawn(stream_loop(
        url,
        policy,
        consumer,
        state_tx,
        disposed.clone(),
        shutdown_rx,
    ));
    StreamHandle {
        disposed,
        shutdown: shutdown_tx,
        state: state_rx,
        task,
    }
}

enum PumpEnd {
    Shutdown,
    Closed(Option<String>),
}

async fn stream_loop(
    url: Url,
    policy: ReconnectPolicy,
    consumer: mpsc::Sender<StreamEvent>,
    state: watch::Sender<ConnectionState>,
    disposed: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = policy.initial;

    loop {
        if disposed.load(Ordering::SeqCst) {
            break;
        }
        state.send_modify(ConnectionState::connecting);
        debug!("stream_connecting: {url}");

        let connected = tokio::select! {
            result = connect_async(url.as_str()) => result,
            _ = shutdown.changed() => break,
        };

        let error = match connected {
            Ok((socket, _response)) => {
                if disposed.load(Ordering::SeqCst) {
                    break;
                }
                backoff = policy.initial;
                state.send_modify(ConnectionState::opened);
                let resumed = state.borrow().is_resumed();
                info!("stream_connected: {url} resumed={resumed}");
                if !forward(&consumer, &mut shutdown, StreamEvent::Opened { resumed }).await {
                    break;
                }
                match pump(socket, &consumer, &disposed, &mut shutdown).await {
                    PumpEnd::Shutdown => break,
                    PumpEnd::Closed(error) => error,
                }
            }
            Err(err) => {
                warn!("stream_connect_error: {err}");
                Some(err.to_string())
            }
        };

        if disposed.load(Ordering::SeqCst) {
            break;
        }
        state.send_modify(|current| current.closed(error.clone()));
        let closed = StreamEvent::Closed {
            error,
            retry_in: backoff,
        };
        if !forward(&consumer, &mut shutdown, closed).await {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.changed() => break,
        }
        backoff = policy.next_backoff(backoff);
    }

    state.send_modify(|current| current.phase = ConnectionPhase::Closed);
    debug!("stream_loop_stopped: {url}");
}

async fn pump(
    mut socket: Socket,
    consumer: &mpsc::Sender<StreamEvent>,
    disposed: &AtomicBool,
    shutdown: &mut watch::Receiver<bool>,
) -> PumpEnd {
    loop {
        let frame = tokio::select! {
            frame = socket.next() => frame,
            _ = shutdown.changed() => {
                close_socket(&mut socket).await;
                return PumpEnd::Shutdown;
            }
        };
        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!("stream_binary_frame_dropped");
                    continue;
                }
            },
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|frame| frame.reason.to_string())
                    .filter(|reason| !reason.is_empty());
                return PumpEnd::Closed(reason);
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                warn!("stream_read_error: {err}");
                return PumpEnd::Closed(Some(err.to_string()));
            }
            None => return PumpEnd::Closed(None),
        };
        if disposed.load(Ordering::SeqCst) {
            return PumpEnd::Shutdown;
        }
        if !forward(consumer, shutdown, StreamEvent::Message(text)).await {
            close_socket(&mut socket).await;
            return PumpEnd::Shutdown;
        }
    }
}

/// Hands one event to the consumer. A full queue never outlives a shutdown:
/// returns false when the manager should stop instead.
async fn forward(
    consumer: &mpsc::Sender<StreamEvent>,
    shutdown: &mut watch::Receiver<bool>,
    event: StreamEvent,
) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.changed() => false,
        sent = consumer.send(event) => sent.is_ok(),
    }
}

async fn close_socket(socket: &mut Socket) {
    if tokio::time::timeout(CLOSE_GRACE, socket.close(None)).await.is_err() {
        debug!("stream_close_handshake_timeout");
    }
}
