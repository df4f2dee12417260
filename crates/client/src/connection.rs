//! Persistent channel connection
//!
//! One background task owns the WebSocket. Commands are queued on an
//! unbounded channel and written in order; inbound frames are decoded at
//! this boundary and fanned out to listeners as `ConnectionEvent`s.
//!
//! Every command is tagged with the link it was emitted for. Links are
//! numbered from 1 and each successful reconnect starts the next one.
//!
//! Lifecycle of the task:
//! - first successful connect: `Open`, then any commands queued so far
//! - link lost: `Close`, wait out the policy delay, retry
//! - later successful connect: bump the link, `Open`, then
//!   `Reconnect { attempt, link }` so the owner can restore membership;
//!   commands tagged for an older link are dropped instead of written
//! - retries exhausted: `Error`, task ends
//! - `disconnect()`: commands queued before it are written, then a close
//!   frame, and the task ends

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use deepagents_protocol::{ChannelCommand, ChannelEvent};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::reconnect::ReconnectPolicy;
use crate::subscription::{ChannelTransport, LinkId};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Listeners = Arc<Mutex<Vec<mpsc::UnboundedSender<ConnectionEvent>>>>;

/// How long a disconnecting task may spend flushing before it is aborted
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Observable connection lifecycle plus decoded inbound events
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Open,
    Close { reason: String },
    Error(String),
    /// A new link is up. `link` is its sequence number.
    Reconnect { attempt: u32, link: LinkId },
    Event(ChannelEvent),
}

/// Decode one inbound text frame.
pub fn decode_frame(text: &str) -> Result<ChannelEvent, serde_json::Error> {
    serde_json::from_str(text)
}

enum Outbound {
    Command { link: LinkId, command: ChannelCommand },
    Close,
}

/// Handle to the process-wide connection (cheap to Clone).
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    policy: ReconnectPolicy,
    link: Arc<AtomicU64>,
    shutdown: Arc<Notify>,
    command_tx: mpsc::UnboundedSender<Outbound>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<Outbound>>>,
    listeners: Listeners,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Connection {
    /// Create a handle. Nothing is dialed until `connect()`.
    pub fn new(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                policy,
                link: Arc::new(AtomicU64::new(1)),
                shutdown: Arc::new(Notify::new()),
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
                listeners: Arc::new(Mutex::new(Vec::new())),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Link that commands emitted now are bound for
    pub fn link(&self) -> LinkId {
        self.inner.link.load(Ordering::SeqCst)
    }

    /// Register a listener for lifecycle and inbound events.
    pub fn listen(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.listeners).push(tx);
        rx
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl ChannelTransport for Connection {
    fn connect(&self) {
        let mut task = lock(&self.inner.task);
        if task.is_some() {
            return;
        }
        let Some(commands) = lock(&self.inner.command_rx).take() else {
            debug!(
                component = "connection",
                event = "connection.connect.closed",
                "Connect after disconnect ignored"
            );
            return;
        };

        *task = Some(tokio::spawn(run(
            self.inner.url.clone(),
            self.inner.policy,
            commands,
            self.inner.listeners.clone(),
            self.inner.link.clone(),
            self.inner.shutdown.clone(),
        )));
    }

    fn emit(&self, command: ChannelCommand) -> LinkId {
        let link = self.link();
        if self
            .inner
            .command_tx
            .send(Outbound::Command { link, command })
            .is_err()
        {
            debug!(
                component = "connection",
                event = "connection.emit.dropped",
                "Command dropped, connection task gone"
            );
        }
        link
    }

    /// Flush queued commands, close the socket and drop every listener.
    /// The handle cannot be reconnected afterwards.
    fn disconnect(&self) {
        let _ = self.inner.command_tx.send(Outbound::Close);
        self.inner.shutdown.notify_one();
        lock(&self.inner.command_rx).take();
        lock(&self.inner.listeners).clear();

        if let Some(task) = lock(&self.inner.task).take() {
            let abort = task.abort_handle();
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                            abort.abort();
                        }
                    });
                }
                Err(_) => abort.abort(),
            }
        }
        info!(
            component = "connection",
            event = "connection.disconnected",
            url = %self.inner.url,
            "Connection torn down"
        );
    }
}

fn broadcast(listeners: &Listeners, event: ConnectionEvent) {
    lock(listeners).retain(|listener| listener.send(event.clone()).is_ok());
}

enum LinkEnd {
    Shutdown,
    Lost(String),
}

async fn run(
    url: String,
    policy: ReconnectPolicy,
    mut commands: mpsc::UnboundedReceiver<Outbound>,
    listeners: Listeners,
    link: Arc<AtomicU64>,
    shutdown: Arc<Notify>,
) {
    let mut opened_once = false;
    let mut failures: u32 = 0;

    loop {
        let connected = tokio::select! {
            result = connect_async(url.as_str()) => result,
            _ = shutdown.notified() => return,
        };

        match connected {
            Ok((socket, _response)) => {
                let current = if opened_once {
                    let current = link.fetch_add(1, Ordering::SeqCst) + 1;
                    info!(
                        component = "connection",
                        event = "connection.reconnected",
                        url = %url,
                        attempt = failures,
                        link = current,
                        "Reconnected"
                    );
                    broadcast(&listeners, ConnectionEvent::Open);
                    broadcast(
                        &listeners,
                        ConnectionEvent::Reconnect {
                            attempt: failures.max(1),
                            link: current,
                        },
                    );
                    current
                } else {
                    opened_once = true;
                    info!(
                        component = "connection",
                        event = "connection.opened",
                        url = %url,
                        "Connected"
                    );
                    broadcast(&listeners, ConnectionEvent::Open);
                    link.load(Ordering::SeqCst)
                };
                failures = 0;

                match pump(socket, &mut commands, &listeners, current).await {
                    LinkEnd::Shutdown => {
                        info!(
                            component = "connection",
                            event = "connection.closed",
                            url = %url,
                            "Connection closed by client"
                        );
                        return;
                    }
                    LinkEnd::Lost(reason) => {
                        warn!(
                            component = "connection",
                            event = "connection.lost",
                            url = %url,
                            reason = %reason,
                            "Connection lost"
                        );
                        broadcast(&listeners, ConnectionEvent::Close { reason });
                    }
                }
            }
            Err(e) => {
                warn!(
                    component = "connection",
                    event = "connection.connect_failed",
                    url = %url,
                    attempt = failures,
                    error = %e,
                    "Connect failed"
                );
            }
        }

        failures += 1;
        match policy.next_delay(failures) {
            Some(delay) => tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.notified() => return,
            },
            None => {
                let err = ClientError::ReconnectExhausted {
                    attempts: policy.max_attempts,
                };
                warn!(
                    component = "connection",
                    event = "connection.failed",
                    url = %url,
                    error = %err,
                    "Giving up on connection"
                );
                broadcast(&listeners, ConnectionEvent::Error(err.to_string()));
                return;
            }
        }
    }
}

async fn pump(
    socket: Socket,
    commands: &mut mpsc::UnboundedReceiver<Outbound>,
    listeners: &Listeners,
    link: LinkId,
) -> LinkEnd {
    let (mut writer, mut reader) = socket.split();

    loop {
        tokio::select! {
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                    Ok(event) => broadcast(listeners, ConnectionEvent::Event(event)),
                    Err(e) => warn!(
                        component = "connection",
                        event = "connection.frame.invalid",
                        error = %e,
                        "Dropped undecodable frame"
                    ),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by server".to_string());
                    return LinkEnd::Lost(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return LinkEnd::Lost(e.to_string()),
                None => return LinkEnd::Lost("stream ended".to_string()),
            },

            outbound = commands.recv() => match outbound {
                Some(Outbound::Command { link: target, command }) => {
                    if target < link {
                        debug!(
                            component = "connection",
                            event = "connection.command.stale",
                            channel = %command.channel(),
                            target,
                            link,
                            "Dropped command queued for an earlier link"
                        );
                        continue;
                    }
                    let json = match serde_json::to_string(&command) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(
                                component = "connection",
                                event = "connection.command.encode_failed",
                                error = %e,
                                "Failed to encode command"
                            );
                            continue;
                        }
                    };
                    if let Err(e) = writer.send(Message::text(json)).await {
                        return LinkEnd::Lost(e.to_string());
                    }
                    debug!(
                        component = "connection",
                        event = "connection.command.sent",
                        channel = %command.channel(),
                        link,
                        "Command sent"
                    );
                }
                // Explicit disconnect, or every handle is gone.
                Some(Outbound::Close) | None => {
                    let _ = writer.send(Message::Close(None)).await;
                    return LinkEnd::Shutdown;
                }
            },
        }
    }
}
