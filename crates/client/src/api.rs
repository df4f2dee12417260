//! Request/response API
//!
//! Everything except the live event stream goes through the backend's RPC
//! endpoints: `POST {base}/api/method/<method>` with a JSON body, answered
//! with `{"message": <result>}`.

use std::future::Future;

use deepagents_protocol::{
    AgentDefinition, AgentImport, Session, SessionAck, SessionSnapshot, SessionStatus, Todo,
    TodoStatus,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

const API_MODULE: &str = "frappe_deep_agents.api";

/// Operations the session layer needs from the backend
pub trait SessionApi: Send + Sync + 'static {
    fn create_session(
        &self,
        agent_definition: &str,
    ) -> impl Future<Output = Result<SessionAck>> + Send;

    fn get_session(&self, session_id: &str)
        -> impl Future<Output = Result<SessionSnapshot>> + Send;

    /// Kicks off server-side processing. The reply arrives on the channel.
    fn send_message(
        &self,
        session_id: &str,
        message: &str,
    ) -> impl Future<Output = Result<SessionAck>> + Send;

    fn end_session(&self, session_id: &str) -> impl Future<Output = Result<SessionAck>> + Send;

    fn list_agents(&self) -> impl Future<Output = Result<Vec<AgentDefinition>>> + Send;

    fn list_sessions(
        &self,
        agent_definition: Option<&str>,
        status: Option<SessionStatus>,
    ) -> impl Future<Output = Result<Vec<Session>>> + Send;

    fn update_todo(
        &self,
        todo_name: &str,
        status: TodoStatus,
    ) -> impl Future<Output = Result<Todo>> + Send;

    fn get_file_content(&self, file_name: &str) -> impl Future<Output = Result<String>> + Send;

    /// Serialize an agent definition to YAML.
    fn export_agent_yaml(
        &self,
        agent_definition: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Create or update an agent definition from YAML.
    fn import_agent_yaml(&self, yaml: &str) -> impl Future<Output = Result<AgentImport>> + Send;
}

#[derive(Deserialize)]
struct Envelope<T> {
    message: T,
}

#[derive(Deserialize)]
struct FileContent {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP implementation backed by reqwest
#[derive(Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    auth: Option<String>,
}

impl HttpApi {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth: config.auth_header(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T> {
        let url = format!("{}/api/method/{method}", self.base_url);
        debug!(
            component = "api",
            event = "api.request",
            method = %method,
            "Calling backend"
        );

        let mut request = self.client.post(&url).json(&body);
        if let Some(auth) = &self.auth {
            request = request.header("Authorization", auth);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = extract_error_message(&text).unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });
            warn!(
                component = "api",
                event = "api.request.failed",
                method = %method,
                status = status.as_u16(),
                error = %message,
                "Backend call failed"
            );
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: Envelope<T> = response.json().await?;
        Ok(envelope.message)
    }

    async fn call_api<T: DeserializeOwned>(&self, operation: &str, body: Value) -> Result<T> {
        self.call(&format!("{API_MODULE}.{operation}"), body).await
    }
}

impl SessionApi for HttpApi {
    async fn create_session(&self, agent_definition: &str) -> Result<SessionAck> {
        self.call_api(
            "create_session",
            json!({ "agent_definition": agent_definition }),
        )
        .await
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionSnapshot> {
        self.call_api("get_session", json!({ "session_id": session_id }))
            .await
    }

    async fn send_message(&self, session_id: &str, message: &str) -> Result<SessionAck> {
        self.call_api(
            "send_message",
            json!({ "session_id": session_id, "message": message }),
        )
        .await
    }

    async fn end_session(&self, session_id: &str) -> Result<SessionAck> {
        self.call_api("end_session", json!({ "session_id": session_id }))
            .await
    }

    async fn list_agents(&self) -> Result<Vec<AgentDefinition>> {
        self.call_api("list_agents", json!({})).await
    }

    async fn list_sessions(
        &self,
        agent_definition: Option<&str>,
        status: Option<SessionStatus>,
    ) -> Result<Vec<Session>> {
        self.call_api("list_sessions", list_sessions_body(agent_definition, status))
            .await
    }

    async fn update_todo(&self, todo_name: &str, status: TodoStatus) -> Result<Todo> {
        self.call_api(
            "update_todo",
            json!({ "todo_name": todo_name, "status": status.as_str() }),
        )
        .await
    }

    async fn get_file_content(&self, file_name: &str) -> Result<String> {
        let file: FileContent = self
            .call(
                "frappe.client.get_value",
                json!({
                    "doctype": "Agent File",
                    "filters": { "name": file_name },
                    "fieldname": "content",
                }),
            )
            .await?;
        Ok(file.content.unwrap_or_default())
    }

    async fn export_agent_yaml(&self, agent_definition: &str) -> Result<String> {
        self.call_api(
            "export_agent_yaml",
            json!({ "agent_definition": agent_definition }),
        )
        .await
    }

    async fn import_agent_yaml(&self, yaml: &str) -> Result<AgentImport> {
        self.call_api("import_agent_yaml", json!({ "yaml_content": yaml }))
            .await
    }
}

fn list_sessions_body(agent_definition: Option<&str>, status: Option<SessionStatus>) -> Value {
    let mut body = Map::new();
    if let Some(agent) = agent_definition {
        body.insert("agent_definition".to_string(), json!(agent));
    }
    if let Some(status) = status {
        body.insert("status".to_string(), json!(status.as_str()));
    }
    Value::Object(body)
}

/// Pull a human-readable message out of a backend error body.
///
/// Tries `_server_messages` (a JSON-encoded list of JSON-encoded objects),
/// then `exception`, then `exc_type`.
pub fn extract_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;

    if let Some(message) = value
        .get("_server_messages")
        .and_then(Value::as_str)
        .and_then(first_server_message)
    {
        return Some(message);
    }

    if let Some(exception) = value.get("exception").and_then(Value::as_str) {
        let message = exception
            .split_once(": ")
            .map(|(_, rest)| rest)
            .unwrap_or(exception)
            .trim();
        if !message.is_empty() {
            return Some(message.to_string());
        }
    }

    value
        .get("exc_type")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn first_server_message(raw: &str) -> Option<String> {
    let entries: Vec<String> = serde_json::from_str(raw).ok()?;
    entries.iter().find_map(|entry| {
        let message = match serde_json::from_str::<Value>(entry) {
            Ok(Value::Object(obj)) => obj
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => Some(entry.clone()),
        };
        message.filter(|m| !m.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;

    #[test]
    fn extracts_server_messages_first() {
        let inner = json!({"message": "Session is not active", "indicator": "red"}).to_string();
        let body = json!({
            "exception": "frappe.exceptions.ValidationError: other",
            "_server_messages": serde_json::to_string(&vec![inner]).expect("encode"),
        })
        .to_string();

        assert_eq!(
            extract_error_message(&body).as_deref(),
            Some("Session is not active")
        );
    }

    #[test]
    fn falls_back_to_exception_then_type() {
        let body = json!({
            "exception": "frappe.exceptions.DoesNotExistError: Agent Session S9 not found"
        })
        .to_string();
        assert_eq!(
            extract_error_message(&body).as_deref(),
            Some("Agent Session S9 not found")
        );

        let body = json!({ "exc_type": "PermissionError" }).to_string();
        assert_eq!(extract_error_message(&body).as_deref(), Some("PermissionError"));
    }

    #[test]
    fn non_json_body_has_no_message() {
        assert_eq!(extract_error_message("<html>502</html>"), None);
        assert_eq!(extract_error_message("{}"), None);
    }

    #[test]
    fn list_sessions_body_omits_absent_filters() {
        assert_eq!(list_sessions_body(None, None), json!({}));
        assert_eq!(
            list_sessions_body(Some("researcher"), Some(SessionStatus::Active)),
            json!({"agent_definition": "researcher", "status": "active"})
        );
    }

    /// Serve one canned HTTP response and hand back the raw request.
    async fn serve_once(status: &'static str, body: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.expect("read");
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket
                .write_all(response.as_bytes())
                .await
                .expect("write");
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{addr}"), task)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some((head, body)) = text.split_once("\r\n\r\n") else {
            return false;
        };
        let length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        body.len() >= length
    }

    fn api_for(base_url: String) -> HttpApi {
        HttpApi::new(&ClientConfig {
            base_url,
            api_key: Some("key".to_string()),
            api_secret: Some("secret".to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn update_todo_posts_rpc_and_unwraps_message() {
        let reply = json!({
            "message": {"name": "T1", "description": "write tests", "status": "completed"}
        })
        .to_string();
        let (base_url, server) = serve_once("200 OK", reply).await;

        let todo = api_for(base_url)
            .update_todo("T1", TodoStatus::Completed)
            .await
            .expect("update todo");
        assert_eq!(todo.id, "T1");
        assert_eq!(todo.status, TodoStatus::Completed);

        let request = server.await.expect("server task");
        assert!(request.starts_with("POST /api/method/frappe_deep_agents.api.update_todo "));
        assert!(request
            .to_ascii_lowercase()
            .contains("authorization: token key:secret"));
        assert!(request.contains(r#""todo_name":"T1""#));
        assert!(request.contains(r#""status":"completed""#));
    }

    #[tokio::test]
    async fn agent_yaml_export_and_import_use_rpc_params() {
        let yaml = "name: researcher\nmodel: claude\n";
        let (base_url, server) = serve_once("200 OK", json!({ "message": yaml }).to_string()).await;
        let exported = api_for(base_url)
            .export_agent_yaml("researcher")
            .await
            .expect("export");
        assert_eq!(exported, yaml);
        let request = server.await.expect("server task");
        assert!(request.starts_with("POST /api/method/frappe_deep_agents.api.export_agent_yaml "));
        assert!(request.contains(r#""agent_definition":"researcher""#));

        let reply = json!({ "message": {"agent": "researcher", "status": "imported"} }).to_string();
        let (base_url, server) = serve_once("200 OK", reply).await;
        let imported = api_for(base_url)
            .import_agent_yaml(yaml)
            .await
            .expect("import");
        assert_eq!(imported.agent, "researcher");
        assert_eq!(imported.status, "imported");
        let request = server.await.expect("server task");
        assert!(request.starts_with("POST /api/method/frappe_deep_agents.api.import_agent_yaml "));
        assert!(request.contains(r#""yaml_content":"name: researcher\nmodel: claude\n""#));
    }

    #[tokio::test]
    async fn error_status_maps_to_api_error() {
        let reply = json!({
            "exception": "frappe.exceptions.ValidationError: Session is not active"
        })
        .to_string();
        let (base_url, server) = serve_once("417 Expectation Failed", reply).await;

        let err = api_for(base_url)
            .send_message("S1", "hello")
            .await
            .expect_err("send should fail");
        match err {
            ClientError::Api { status, message } => {
                assert_eq!(status, 417);
                assert_eq!(message, "Session is not active");
            }
            other => panic!("expected api error, got {other:?}"),
        }
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn get_session_tolerates_missing_tool_calls() {
        let reply = json!({
            "message": {
                "name": "S1",
                "agent_definition": "researcher",
                "status": "active",
                "messages": [
                    {"role": "user", "content": "hi", "tool_name": null, "creation": "2026-01-01 10:00:00"}
                ],
                "todos": [],
                "files": [{"name": "F1", "file_path": "/workspace/a.txt", "is_directory": 0}],
                "started_at": null
            }
        })
        .to_string();
        let (base_url, server) = serve_once("200 OK", reply).await;

        let snapshot = api_for(base_url).get_session("S1").await.expect("get session");
        assert_eq!(snapshot.name, "S1");
        assert!(snapshot.tool_calls.is_empty());
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.files[0].display_name, "a.txt");
        server.await.expect("server task");
    }
}
