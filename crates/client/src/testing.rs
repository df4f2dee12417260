//! Test doubles for the transport and API seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use deepagents_protocol::{
    AgentDefinition, AgentImport, ChannelCommand, Session, SessionAck, SessionSnapshot,
    SessionStatus, Todo, TodoStatus,
};

use crate::api::SessionApi;
use crate::error::{ClientError, Result};
use crate::subscription::{ChannelTransport, LinkId};

/// Records every command instead of sending it
#[derive(Default)]
pub(crate) struct RecordingTransport {
    commands: Mutex<Vec<ChannelCommand>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    link: AtomicU64,
}

impl RecordingTransport {
    pub(crate) fn commands(&self) -> Vec<ChannelCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub(crate) fn clear(&self) {
        self.commands.lock().unwrap().clear();
    }

    /// Link that subsequent commands are reported as bound for.
    pub(crate) fn set_link(&self, link: LinkId) {
        self.link.store(link, Ordering::SeqCst);
    }
}

impl ChannelTransport for RecordingTransport {
    fn connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn emit(&self, command: ChannelCommand) -> LinkId {
        self.commands.lock().unwrap().push(command);
        self.link.load(Ordering::SeqCst)
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeState {
    sessions: HashMap<String, SessionSnapshot>,
    todos: HashMap<String, Todo>,
    fail_send: Option<String>,
    fail_todo: Option<String>,
    fail_get: Option<String>,
    calls: Vec<String>,
}

/// In-memory backend with switchable failures
#[derive(Default)]
pub(crate) struct FakeApi {
    state: Mutex<FakeState>,
}

impl FakeApi {
    pub(crate) fn with_session(self, snapshot: SessionSnapshot) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for todo in &snapshot.todos {
                state.todos.insert(todo.id.clone(), todo.clone());
            }
            state.sessions.insert(snapshot.name.clone(), snapshot);
        }
        self
    }

    pub(crate) fn fail_send(&self, message: &str) {
        self.state.lock().unwrap().fail_send = Some(message.to_string());
    }

    pub(crate) fn fail_todo(&self, message: &str) {
        self.state.lock().unwrap().fail_todo = Some(message.to_string());
    }

    pub(crate) fn fail_get(&self, message: &str) {
        self.state.lock().unwrap().fail_get = Some(message.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: String) -> std::sync::MutexGuard<'_, FakeState> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state
    }
}

fn api_error(message: &str) -> ClientError {
    ClientError::Api {
        status: 417,
        message: message.to_string(),
    }
}

fn ack(session: &str, status: &str) -> SessionAck {
    SessionAck {
        session: session.to_string(),
        status: status.to_string(),
        agent: None,
    }
}

pub(crate) fn snapshot(session_id: &str) -> SessionSnapshot {
    SessionSnapshot {
        name: session_id.to_string(),
        agent_definition: Some("researcher".to_string()),
        status: SessionStatus::Active,
        messages: Vec::new(),
        todos: Vec::new(),
        files: Vec::new(),
        tool_calls: Vec::new(),
        started_at: None,
    }
}

impl SessionApi for FakeApi {
    async fn create_session(&self, agent_definition: &str) -> Result<SessionAck> {
        let mut state = self.record(format!("create_session {agent_definition}"));
        let id = format!("S{}", state.sessions.len() + 1);
        state.sessions.insert(id.clone(), snapshot(&id));
        Ok(ack(&id, "active"))
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionSnapshot> {
        let state = self.record(format!("get_session {session_id}"));
        if let Some(message) = &state.fail_get {
            return Err(api_error(message));
        }
        state
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| api_error("Agent Session not found"))
    }

    async fn send_message(&self, session_id: &str, message: &str) -> Result<SessionAck> {
        let state = self.record(format!("send_message {session_id} {message}"));
        match &state.fail_send {
            Some(error) => Err(api_error(error)),
            None => Ok(ack(session_id, "processing")),
        }
    }

    async fn end_session(&self, session_id: &str) -> Result<SessionAck> {
        let _state = self.record(format!("end_session {session_id}"));
        Ok(ack(session_id, "completed"))
    }

    async fn list_agents(&self) -> Result<Vec<AgentDefinition>> {
        let _state = self.record("list_agents".to_string());
        Ok(Vec::new())
    }

    async fn list_sessions(
        &self,
        _agent_definition: Option<&str>,
        _status: Option<SessionStatus>,
    ) -> Result<Vec<Session>> {
        let _state = self.record("list_sessions".to_string());
        Ok(Vec::new())
    }

    async fn update_todo(&self, todo_name: &str, status: TodoStatus) -> Result<Todo> {
        let mut state = self.record(format!("update_todo {todo_name} {}", status.as_str()));
        if let Some(message) = &state.fail_todo {
            return Err(api_error(message));
        }
        let todo = state
            .todos
            .get_mut(todo_name)
            .ok_or_else(|| api_error("Agent Todo not found"))?;
        todo.status = status;
        Ok(todo.clone())
    }

    async fn get_file_content(&self, file_name: &str) -> Result<String> {
        let _state = self.record(format!("get_file_content {file_name}"));
        Ok(String::new())
    }

    async fn export_agent_yaml(&self, agent_definition: &str) -> Result<String> {
        let _state = self.record(format!("export_agent_yaml {agent_definition}"));
        Ok(format!("name: {agent_definition}\n"))
    }

    async fn import_agent_yaml(&self, _yaml: &str) -> Result<AgentImport> {
        let _state = self.record("import_agent_yaml".to_string());
        Ok(AgentImport {
            agent: "imported".to_string(),
            status: "imported".to_string(),
        })
    }
}

/// Wraps `FakeApi`, holding `get_session` for one session until released
pub(crate) struct GatedApi {
    inner: FakeApi,
    gated: String,
    entered: Notify,
    release: Notify,
}

impl GatedApi {
    pub(crate) fn new(inner: FakeApi, gated: &str) -> Self {
        Self {
            inner,
            gated: gated.to_string(),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    /// Resolves once `get_session` for the gated session is waiting.
    pub(crate) async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub(crate) fn release(&self) {
        self.release.notify_one();
    }
}

impl SessionApi for GatedApi {
    async fn create_session(&self, agent_definition: &str) -> Result<SessionAck> {
        self.inner.create_session(agent_definition).await
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionSnapshot> {
        if session_id == self.gated {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.get_session(session_id).await
    }

    async fn send_message(&self, session_id: &str, message: &str) -> Result<SessionAck> {
        self.inner.send_message(session_id, message).await
    }

    async fn end_session(&self, session_id: &str) -> Result<SessionAck> {
        self.inner.end_session(session_id).await
    }

    async fn list_agents(&self) -> Result<Vec<AgentDefinition>> {
        self.inner.list_agents().await
    }

    async fn list_sessions(
        &self,
        agent_definition: Option<&str>,
        status: Option<SessionStatus>,
    ) -> Result<Vec<Session>> {
        self.inner.list_sessions(agent_definition, status).await
    }

    async fn update_todo(&self, todo_name: &str, status: TodoStatus) -> Result<Todo> {
        self.inner.update_todo(todo_name, status).await
    }

    async fn get_file_content(&self, file_name: &str) -> Result<String> {
        self.inner.get_file_content(file_name).await
    }

    async fn export_agent_yaml(&self, agent_definition: &str) -> Result<String> {
        self.inner.export_agent_yaml(agent_definition).await
    }

    async fn import_agent_yaml(&self, yaml: &str) -> Result<AgentImport> {
        self.inner.import_agent_yaml(yaml).await
    }
}
