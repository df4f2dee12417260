//! Workspace actor - owns the session store and channel membership.
//!
//! One tokio task drains two queues: commands from `WorkspaceHandle`s and
//! events from the connection. Each handler runs to completion before the
//! next item is taken, and connection events are preferred over commands,
//! so the store only ever sees one mutation at a time in arrival order.
//! Readers get a lock-free snapshot through `ArcSwap` plus a revision feed.

use std::sync::Arc;

use arc_swap::ArcSwap;
use deepagents_protocol::{AgentStatus, SessionStatus, Todo};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::api::{HttpApi, SessionApi};
use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionEvent};
use crate::error::{ClientError, Result};
use crate::reconnect::restore_membership;
use crate::router::route;
use crate::store::{SessionStore, StoreSnapshot};
use crate::subscription::{ChannelTransport, SubscriptionManager};

const COMMAND_BUFFER: usize = 64;
const CHANGE_BUFFER: usize = 256;

/// State of the underlying channel connection as seen by the workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No connection has been opened yet
    Idle,
    Connected,
    /// Link dropped; the connection is retrying
    Reconnecting,
    /// Retries exhausted
    Failed,
}

enum WorkspaceCommand {
    OpenSession {
        session_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    SendMessage {
        content: String,
        reply: oneshot::Sender<Result<()>>,
    },
    ToggleTodo {
        todo_id: String,
        reply: oneshot::Sender<Result<Todo>>,
    },
    EndSession {
        reply: oneshot::Sender<Result<()>>,
    },
    Settle {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the running workspace (cheap to Clone).
#[derive(Clone)]
pub struct WorkspaceHandle {
    command_tx: mpsc::Sender<WorkspaceCommand>,
    snapshot: Arc<ArcSwap<StoreSnapshot>>,
    changes: broadcast::Sender<u64>,
    link: watch::Receiver<LinkState>,
}

impl WorkspaceHandle {
    /// Wire a workspace to a real connection and HTTP backend.
    ///
    /// The connection is not dialed until the first session is opened.
    pub fn start(config: &ClientConfig) -> Result<(WorkspaceHandle, Arc<HttpApi>)> {
        let connection = Connection::new(config.socket_url()?, config.reconnect_policy());
        let events = connection.listen();
        let api = Arc::new(HttpApi::new(config));
        let handle = WorkspaceHandle::spawn(api.clone(), Arc::new(connection), events);
        Ok((handle, api))
    }

    /// Spawn the actor over arbitrary API and transport implementations.
    pub fn spawn<A: SessionApi>(
        api: Arc<A>,
        transport: Arc<dyn ChannelTransport>,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) -> WorkspaceHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let snapshot = Arc::new(ArcSwap::from_pointee(StoreSnapshot::default()));
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        let (link_tx, link) = watch::channel(LinkState::Idle);

        let workspace = Workspace {
            api,
            transport: transport.clone(),
            store: SessionStore::new(),
            subscriptions: SubscriptionManager::new(transport),
            snapshot: snapshot.clone(),
            changes: changes.clone(),
            link: link_tx,
        };
        tokio::spawn(workspace.run(command_rx, events));

        WorkspaceHandle {
            command_tx,
            snapshot,
            changes,
            link,
        }
    }

    /// Switch to `session_id`: leave the old channel, reload, enter the new one.
    pub async fn open_session(&self, session_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        self.request(|reply| WorkspaceCommand::OpenSession { session_id, reply })
            .await?
    }

    pub async fn send_message(&self, content: &str) -> Result<()> {
        let content = content.to_string();
        self.request(|reply| WorkspaceCommand::SendMessage { content, reply })
            .await?
    }

    /// Flip a todo between completed and not, optimistically.
    pub async fn toggle_todo(&self, todo_id: &str) -> Result<Todo> {
        let todo_id = todo_id.to_string();
        self.request(|reply| WorkspaceCommand::ToggleTodo { todo_id, reply })
            .await?
    }

    pub async fn end_session(&self) -> Result<()> {
        self.request(|reply| WorkspaceCommand::EndSession { reply })
            .await?
    }

    /// Resolves once every command sent before it, and every connection
    /// event queued by then, has been applied.
    pub async fn settle(&self) -> Result<()> {
        self.request(|reply| WorkspaceCommand::Settle { reply })
            .await
    }

    /// Leave the current session, tear down the connection, stop the actor.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| WorkspaceCommand::Shutdown { reply })
            .await
    }

    /// Lock-free snapshot read.
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        self.snapshot.load_full()
    }

    /// Revision numbers published after every store mutation.
    pub fn changes(&self) -> broadcast::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn link_state(&self) -> LinkState {
        *self.link.borrow()
    }

    pub fn link_changes(&self) -> watch::Receiver<LinkState> {
        self.link.clone()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> WorkspaceCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(build(reply))
            .await
            .map_err(|_| ClientError::WorkspaceClosed)?;
        rx.await.map_err(|_| ClientError::WorkspaceClosed)
    }
}

struct Workspace<A> {
    api: Arc<A>,
    transport: Arc<dyn ChannelTransport>,
    store: SessionStore,
    subscriptions: SubscriptionManager,
    snapshot: Arc<ArcSwap<StoreSnapshot>>,
    changes: broadcast::Sender<u64>,
    link: watch::Sender<LinkState>,
}

impl<A: SessionApi> Workspace<A> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<WorkspaceCommand>,
        mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) {
        let mut events_open = true;

        loop {
            tokio::select! {
                biased;

                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_connection_event(event),
                    None => {
                        debug!(
                            component = "workspace",
                            event = "workspace.events.closed",
                            "Connection event stream ended"
                        );
                        events_open = false;
                    }
                },

                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            return;
                        }
                    }
                    None => {
                        self.shutdown();
                        return;
                    }
                },
            }
        }
    }

    /// Returns false once the actor should stop.
    async fn handle_command(&mut self, command: WorkspaceCommand) -> bool {
        match command {
            WorkspaceCommand::OpenSession { session_id, reply } => {
                let result = self.open_session(session_id).await;
                let _ = reply.send(result);
            }
            WorkspaceCommand::SendMessage { content, reply } => {
                let result = self.send_message(content).await;
                let _ = reply.send(result);
            }
            WorkspaceCommand::ToggleTodo { todo_id, reply } => {
                let result = self.toggle_todo(todo_id).await;
                let _ = reply.send(result);
            }
            WorkspaceCommand::EndSession { reply } => {
                let result = self.end_session().await;
                let _ = reply.send(result);
            }
            WorkspaceCommand::Settle { reply } => {
                let _ = reply.send(());
            }
            WorkspaceCommand::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Open => {
                self.link.send_replace(LinkState::Connected);
            }
            ConnectionEvent::Close { reason } => {
                info!(
                    component = "workspace",
                    event = "workspace.link.down",
                    reason = %reason,
                    "Channel connection closed"
                );
                self.link.send_replace(LinkState::Reconnecting);
            }
            ConnectionEvent::Reconnect { attempt, link } => {
                self.link.send_replace(LinkState::Connected);
                restore_membership(&mut self.subscriptions, attempt, link);
            }
            ConnectionEvent::Error(message) => {
                warn!(
                    component = "workspace",
                    event = "workspace.link.failed",
                    error = %message,
                    "Channel connection failed"
                );
                self.link.send_replace(LinkState::Failed);
                if self.store.session_id().is_some() {
                    self.store
                        .push_system(format!("Connection error: {message}"), &crate::now());
                    self.publish();
                }
            }
            ConnectionEvent::Event(event) => {
                if route(&mut self.store, event, &crate::now()).changed_store() {
                    self.publish();
                }
            }
        }
    }

    async fn open_session(&mut self, session_id: String) -> Result<()> {
        if let Some(previous) = self.subscriptions.current().map(str::to_string) {
            if previous != session_id {
                self.subscriptions.leave_session(&previous);
            }
        }

        // From here on, events for the previous session fail the router guard.
        self.store.reset(&session_id);
        self.publish();

        let result = match self.api.get_session(&session_id).await {
            Ok(snapshot) => {
                self.store.load(snapshot);
                info!(
                    component = "workspace",
                    event = "workspace.session.opened",
                    session_id = %session_id,
                    messages = self.store.messages().len(),
                    "Session loaded"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    component = "workspace",
                    event = "workspace.session.load_failed",
                    session_id = %session_id,
                    error = %e,
                    "Failed to load session"
                );
                self.store
                    .push_system(format!("Failed to load session: {e}"), &crate::now());
                self.store.set_agent_status(AgentStatus::Error, None);
                Err(e)
            }
        };

        self.subscriptions.enter_session(&session_id);
        self.publish();
        result
    }

    async fn send_message(&mut self, content: String) -> Result<()> {
        let session_id = self
            .store
            .session_id()
            .map(str::to_string)
            .ok_or(ClientError::NoActiveSession)?;

        self.store.begin_turn(&content, &crate::now())?;
        self.publish();

        if let Err(e) = self.api.send_message(&session_id, &content).await {
            warn!(
                component = "workspace",
                event = "workspace.send.failed",
                session_id = %session_id,
                error = %e,
                "Send failed"
            );
            self.store.fail_turn(&e.to_string(), &crate::now());
            self.publish();
            return Err(e);
        }
        Ok(())
    }

    async fn toggle_todo(&mut self, todo_id: String) -> Result<Todo> {
        let (previous, next) = self.store.toggle_todo(&todo_id)?;
        self.publish();

        match self.api.update_todo(&todo_id, next).await {
            Ok(todo) => {
                self.store.upsert_todo(todo.clone());
                self.publish();
                Ok(todo)
            }
            Err(e) => {
                warn!(
                    component = "workspace",
                    event = "workspace.todo.revert",
                    todo_id = %todo_id,
                    error = %e,
                    "Todo update rejected, reverting"
                );
                self.store.restore_todo(&todo_id, previous);
                self.store
                    .push_system(format!("Failed to update todo: {e}"), &crate::now());
                self.publish();
                Err(e)
            }
        }
    }

    async fn end_session(&mut self) -> Result<()> {
        let session_id = self
            .store
            .session_id()
            .map(str::to_string)
            .ok_or(ClientError::NoActiveSession)?;

        match self.api.end_session(&session_id).await {
            Ok(_) => {
                self.store.set_session_status(SessionStatus::Completed);
                self.store.complete_turn(&crate::now());
                self.publish();
                Ok(())
            }
            Err(e) => {
                self.store
                    .push_system(format!("Failed to end session: {e}"), &crate::now());
                self.publish();
                Err(e)
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(session_id) = self.subscriptions.current().map(str::to_string) {
            self.subscriptions.leave_session(&session_id);
        }
        self.transport.disconnect();
        info!(
            component = "workspace",
            event = "workspace.shutdown",
            "Workspace stopped"
        );
    }

    fn publish(&self) {
        self.snapshot.store(Arc::new(self.store.snapshot()));
        let _ = self.changes.send(self.store.revision());
    }
}
