//! `deepagents chat <session>` - interactive view of one live session.
//!
//! Lines typed on stdin are sent as messages; lines starting with `/` are
//! local commands. The transcript is redrawn incrementally from workspace
//! snapshots, so streamed tokens appear as they arrive.

use std::collections::HashMap;
use std::io::Write;

use console::style;
use deepagents_client::{HttpApi, LinkState, SessionApi, StoreSnapshot, WorkspaceHandle};
use deepagents_protocol::{AgentStatus, MessageRole, TodoStatus, ToolCallStatus};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

const HELP: &str = "\
  /todos            list todos
  /toggle <id>      mark a todo done (or reopen it)
  /files            list workspace files
  /open <name>      print a file's content
  /end              end the session
  /quit             leave the chat
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Message(String),
    Todos,
    Toggle(String),
    Files,
    Open(String),
    End,
    Quit,
    Help,
    Empty,
    Unknown(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line.to_string());
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match (name, arg) {
        ("todos", _) => Input::Todos,
        ("files", _) => Input::Files,
        ("toggle", id) if !id.is_empty() => Input::Toggle(id.to_string()),
        ("open", file) if !file.is_empty() => Input::Open(file.to_string()),
        ("end", _) => Input::End,
        ("quit" | "exit", _) => Input::Quit,
        ("help", _) => Input::Help,
        _ => Input::Unknown(line.to_string()),
    }
}

pub async fn run(handle: WorkspaceHandle, api: &HttpApi, session_id: &str) -> anyhow::Result<()> {
    let mut changes = handle.changes();
    let mut link = handle.link_changes();

    if let Err(e) = handle.open_session(session_id).await {
        warn!(
            component = "chat",
            event = "chat.open_failed",
            session_id = %session_id,
            error = %e,
            "Session failed to load"
        );
    }

    let mut renderer = Renderer::default();
    emit(&renderer.render(&handle.snapshot()));
    println!("{}", style("Type a message, or /help for commands.").dim());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(_) | Err(RecvError::Lagged(_)) => emit(&renderer.render(&handle.snapshot())),
                Err(RecvError::Closed) => break,
            },

            Ok(()) = link.changed() => {
                let state = *link.borrow_and_update();
                emit(&renderer.link_notice(state));
            }

            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_input(&handle, api, &mut renderer, parse_input(&line)).await {
                    break;
                }
            }
        }
    }

    handle.shutdown().await?;
    Ok(())
}

/// Returns false when the user asked to leave.
async fn handle_input(
    handle: &WorkspaceHandle,
    api: &HttpApi,
    renderer: &mut Renderer,
    input: Input,
) -> bool {
    let snapshot = handle.snapshot();
    match input {
        Input::Message(text) => {
            // Failures land in the transcript as a system message.
            let _ = handle.send_message(&text).await;
        }
        Input::Todos => emit(&renderer.break_line(format_todos(&snapshot))),
        Input::Files => emit(&renderer.break_line(format_files(&snapshot))),
        Input::Toggle(id) => {
            if let Err(e) = handle.toggle_todo(&id).await {
                emit(&renderer.break_line(format!("{} {e}\n", style("!").red())));
            }
        }
        Input::Open(name) => {
            let target = snapshot
                .files
                .iter()
                .find(|f| f.name.as_deref() == Some(name.as_str()) || f.path == name)
                .and_then(|f| f.name.clone())
                .unwrap_or(name);
            let text = match api.get_file_content(&target).await {
                Ok(content) => format!("{content}\n"),
                Err(e) => format!("{} {e}\n", style("!").red()),
            };
            emit(&renderer.break_line(text));
        }
        Input::End => {
            let _ = handle.end_session().await;
        }
        Input::Quit => return false,
        Input::Help => emit(&renderer.break_line(HELP.to_string())),
        Input::Empty => {}
        Input::Unknown(line) => emit(&renderer.break_line(format!(
            "{} unknown command {line}, try /help\n",
            style("!").yellow()
        ))),
    }
    true
}

fn emit(text: &str) {
    if text.is_empty() {
        return;
    }
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

fn format_todos(snapshot: &StoreSnapshot) -> String {
    if snapshot.todos.is_empty() {
        return "No todos.\n".to_string();
    }
    snapshot
        .todos
        .iter()
        .map(|todo| {
            let mark = match todo.status {
                TodoStatus::Completed => "[x]",
                TodoStatus::InProgress => "[~]",
                TodoStatus::Pending => "[ ]",
            };
            format!("{mark} {}  {}\n", todo.description, style(&todo.id).dim())
        })
        .collect()
}

fn format_files(snapshot: &StoreSnapshot) -> String {
    if snapshot.files.is_empty() {
        return "No files.\n".to_string();
    }
    snapshot
        .files
        .iter()
        .map(|file| {
            let suffix = if file.is_directory { "/" } else { "" };
            format!("{}{suffix}  {}\n", file.display_name, style(&file.path).dim())
        })
        .collect()
}

/// Turns successive snapshots into terminal output, printing only what changed.
#[derive(Debug, Default)]
pub struct Renderer {
    session: Option<String>,
    /// Messages fully written out
    printed: usize,
    /// Bytes already written of the message being streamed
    partial: Option<usize>,
    tool_status: HashMap<String, ToolCallStatus>,
    agent_status: AgentStatus,
    detail: Option<String>,
    /// Cursor is not at the start of a line
    mid_line: bool,
}

impl Renderer {
    pub fn render(&mut self, snapshot: &StoreSnapshot) -> String {
        let mut out = String::new();

        if snapshot.session_id() != self.session.as_deref() || snapshot.messages.len() < self.printed
        {
            *self = Renderer {
                session: snapshot.session_id().map(str::to_string),
                ..Renderer::default()
            };
            if let Some(session) = &snapshot.session {
                out.push_str(&format!(
                    "{} {} ({})\n",
                    style("Session").bold(),
                    session.id,
                    session.status.as_str()
                ));
            }
        }

        self.render_tool_calls(snapshot, &mut out);
        self.render_messages(snapshot, &mut out);
        self.render_status(snapshot, &mut out);
        out
    }

    /// Start a fresh line before unsolicited output.
    pub fn break_line(&mut self, text: String) -> String {
        if self.mid_line {
            self.mid_line = false;
            format!("\n{text}")
        } else {
            text
        }
    }

    pub fn link_notice(&mut self, state: LinkState) -> String {
        let text = match state {
            LinkState::Idle | LinkState::Connected => return String::new(),
            LinkState::Reconnecting => format!("{}\n", style("Connection lost, reconnecting...").yellow()),
            LinkState::Failed => format!("{}\n", style("Connection failed.").red()),
        };
        self.break_line(text)
    }

    fn render_messages(&mut self, snapshot: &StoreSnapshot, out: &mut String) {
        while let Some(message) = snapshot.messages.get(self.printed) {
            if message.streaming {
                let written = self.partial.unwrap_or(0);
                if self.partial.is_none() || !self.mid_line {
                    self.line(out, &format!("{} ", style("agent>").green().bold()));
                }
                out.push_str(message.content.get(written..).unwrap_or(""));
                self.mid_line = true;
                self.partial = Some(message.content.len());
                return;
            }

            match self.partial.take() {
                // The message we were streaming has been finalized.
                Some(written) if message.role == MessageRole::Assistant => {
                    out.push_str(message.content.get(written..).unwrap_or(""));
                    out.push('\n');
                    self.mid_line = false;
                }
                // A notice was inserted ahead of the live message.
                Some(written) => {
                    self.partial = Some(written);
                    self.line(out, &format_message(message));
                }
                None => self.line(out, &format_message(message)),
            }
            self.printed += 1;
        }
    }

    fn render_tool_calls(&mut self, snapshot: &StoreSnapshot, out: &mut String) {
        for call in &snapshot.tool_calls {
            if self.tool_status.get(&call.id) == Some(&call.status) {
                continue;
            }
            self.tool_status.insert(call.id.clone(), call.status);
            let text = match call.status {
                ToolCallStatus::Pending | ToolCallStatus::Running => {
                    format!("{} {}\n", style("⚙").cyan(), call.tool_name)
                }
                ToolCallStatus::Success => format!("{} {}\n", style("✓").green(), call.tool_name),
                ToolCallStatus::Error => format!(
                    "{} {}: {}\n",
                    style("✗").red(),
                    call.tool_name,
                    call.error.as_deref().unwrap_or("failed")
                ),
            };
            self.line(out, &text);
        }
    }

    fn render_status(&mut self, snapshot: &StoreSnapshot, out: &mut String) {
        let detail_changed = snapshot.status_detail != self.detail;
        if snapshot.agent_status == self.agent_status && !detail_changed {
            return;
        }
        self.agent_status = snapshot.agent_status;
        self.detail = snapshot.status_detail.clone();

        if let Some(detail) = &snapshot.status_detail {
            self.line(out, &format!("{}\n", style(format!("… {detail}")).dim()));
        } else if snapshot.agent_status == AgentStatus::Thinking && self.partial.is_none() {
            self.line(out, &format!("{}\n", style("… thinking").dim()));
        }
    }

    fn line(&mut self, out: &mut String, text: &str) {
        if self.mid_line {
            out.push('\n');
            self.mid_line = false;
        }
        out.push_str(text);
    }
}

fn format_message(message: &deepagents_protocol::Message) -> String {
    let label = match message.role {
        MessageRole::User => style("you>").cyan().bold().to_string(),
        MessageRole::Assistant => style("agent>").green().bold().to_string(),
        MessageRole::System => style("system>").yellow().bold().to_string(),
        MessageRole::Tool => {
            let name = message.tool_name.as_deref().unwrap_or("tool");
            style(format!("{name}>")).magenta().to_string()
        }
    };
    format!("{label} {}\n", message.content)
}
