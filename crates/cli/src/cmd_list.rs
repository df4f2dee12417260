//! One-shot commands: `agents`, `agent export|import`, `sessions`, `new`,
//! `file`, `end`.

use std::path::Path;

use anyhow::Context;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use console::style;
use deepagents_client::SessionApi;
use deepagents_protocol::{AgentDefinition, Session, SessionStatus};
use serde_json::Value;

pub async fn agents(api: &impl SessionApi) -> anyhow::Result<()> {
    let agents = api.list_agents().await?;
    if agents.is_empty() {
        println!("No agent definitions found.");
        return Ok(());
    }
    println!("{}", agents_table(&agents));
    Ok(())
}

/// Print an agent definition as YAML, or write it to `output`.
pub async fn export_agent(
    api: &impl SessionApi,
    name: &str,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let yaml = api.export_agent_yaml(name).await?;
    match output {
        Some(path) => {
            write_yaml(path, &yaml)?;
            println!(
                "{} {} to {}",
                style("Exported").green().bold(),
                name,
                path.display()
            );
        }
        None => {
            print!("{yaml}");
            if !yaml.ends_with('\n') {
                println!();
            }
        }
    }
    Ok(())
}

pub async fn import_agent(api: &impl SessionApi, path: &Path) -> anyhow::Result<()> {
    let yaml = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let result = api.import_agent_yaml(&yaml).await?;
    println!(
        "{} agent {} ({})",
        style("Imported").green().bold(),
        style(&result.agent).bold(),
        result.status
    );
    Ok(())
}

fn write_yaml(path: &Path, yaml: &str) -> anyhow::Result<()> {
    std::fs::write(path, yaml).with_context(|| format!("writing {}", path.display()))
}

pub async fn sessions(
    api: &impl SessionApi,
    agent: Option<&str>,
    status: Option<SessionStatus>,
) -> anyhow::Result<()> {
    let sessions = api.list_sessions(agent, status).await?;
    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }
    println!("{}", sessions_table(&sessions));
    Ok(())
}

pub async fn new_session(api: &impl SessionApi, agent: &str) -> anyhow::Result<()> {
    let ack = api.create_session(agent).await?;
    println!(
        "{} session {} ({})",
        style("Created").green().bold(),
        style(&ack.session).bold(),
        ack.agent.as_deref().unwrap_or(agent)
    );
    println!("  Chat with: deepagents chat {}", ack.session);
    Ok(())
}

pub async fn file(api: &impl SessionApi, name: &str) -> anyhow::Result<()> {
    let content = api.get_file_content(name).await?;
    print!("{content}");
    if !content.ends_with('\n') {
        println!();
    }
    Ok(())
}

pub async fn end(api: &impl SessionApi, session_id: &str) -> anyhow::Result<()> {
    let ack = api.end_session(session_id).await?;
    println!("Session {} is now {}", ack.session, ack.status);
    Ok(())
}

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    table
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "-"
    }
}

pub fn agents_table(agents: &[AgentDefinition]) -> Table {
    let mut table = new_table(&["Name", "Agent", "Files", "Todos", "Description"]);
    for agent in agents {
        table.add_row(vec![
            Cell::new(&agent.name),
            Cell::new(agent.agent_name.as_deref().unwrap_or("")),
            Cell::new(enabled(agent.enable_filesystem)),
            Cell::new(enabled(agent.enable_todos)),
            Cell::new(agent.description.as_deref().unwrap_or("")),
        ]);
    }
    table
}

fn status_color(status: SessionStatus) -> Color {
    match status {
        SessionStatus::Active => Color::Green,
        SessionStatus::Completed => Color::Blue,
        SessionStatus::Error => Color::Red,
        SessionStatus::Timeout => Color::Yellow,
    }
}

pub fn sessions_table(sessions: &[Session]) -> Table {
    let mut table = new_table(&["Session", "Agent", "Status", "Started"]);
    for session in sessions {
        let started = session
            .started_at
            .as_deref()
            .or(session.creation.as_deref())
            .unwrap_or("");
        table.add_row(vec![
            Cell::new(&session.id),
            Cell::new(session.agent_definition.as_deref().unwrap_or("")),
            Cell::new(session.status.as_str()).fg(status_color(session.status)),
            Cell::new(started),
        ]);
    }
    table
}

/// Parse a `--status` filter value using the wire vocabulary of `SessionStatus`.
pub fn parse_status(value: &str) -> Result<SessionStatus, String> {
    serde_json::from_value(Value::String(value.to_ascii_lowercase()))
        .map_err(|e| format!("invalid status '{value}': {e}"))
}
