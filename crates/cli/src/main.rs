//! Deep Agents CLI
//!
//! Browse agents and sessions, and chat with a live agent session from the
//! terminal.

mod cmd_chat;
mod cmd_list;
mod logging;
mod paths;

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use deepagents_client::{ClientConfig, HttpApi, WorkspaceHandle};
use deepagents_protocol::SessionStatus;
use tracing::info;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "deepagents", bin_name = "deepagents", version = VERSION)]
#[command(about = "Chat with Deep Agents sessions from the terminal")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Data directory for config and logs [default: ~/.deepagents]
    #[arg(long, global = true, env = "DEEPAGENTS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Site URL of the backend (overrides config and DEEPAGENTS_URL)
    #[arg(long, global = true)]
    url: Option<String>,

    /// WebSocket URL for live events (overrides config and DEEPAGENTS_SOCKET_URL)
    #[arg(long, global = true)]
    socket_url: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available agent definitions.
    Agents,
    /// Export or import an agent definition as YAML.
    Agent {
        #[command(subcommand)]
        action: AgentCommand,
    },
    /// List recent sessions.
    Sessions {
        /// Only sessions of this agent definition
        #[arg(long)]
        agent: Option<String>,
        /// Only sessions in this status (active, completed, error, timeout)
        #[arg(long, value_parser = cmd_list::parse_status)]
        status: Option<SessionStatus>,
    },
    /// Start a new session with an agent definition.
    New { agent: String },
    /// Open a live chat on a session.
    Chat { session: String },
    /// Print the content of a workspace file.
    File { name: String },
    /// End a session.
    End { session: String },
    /// Generate shell completions.
    Completions { shell: Shell },
}

#[derive(Subcommand, Debug)]
enum AgentCommand {
    /// Print an agent definition as YAML.
    Export {
        name: String,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Create or update an agent definition from a YAML file.
    Import { file: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Command::Completions { shell } = cli.command {
        clap_complete::generate(
            shell,
            &mut Cli::command(),
            "deepagents",
            &mut std::io::stdout(),
        );
        return Ok(());
    }

    let data_dir = paths::resolve_data_dir(cli.data_dir.as_deref())?;
    paths::ensure_dirs(&data_dir)?;
    let logging = logging::init_logging(&paths::log_dir(&data_dir))?;

    let config = resolve_config(&cli, &data_dir)?;
    info!(
        component = "cli",
        event = "cli.started",
        run_id = %logging.run_id,
        data_dir = %data_dir.display(),
        base_url = %config.base_url,
        command = ?cli.command,
        "deepagents starting"
    );

    match cli.command {
        Command::Agents => cmd_list::agents(&HttpApi::new(&config)).await,
        Command::Agent { action } => match action {
            AgentCommand::Export { name, output } => {
                cmd_list::export_agent(&HttpApi::new(&config), &name, output.as_deref()).await
            }
            AgentCommand::Import { file } => {
                cmd_list::import_agent(&HttpApi::new(&config), &file).await
            }
        },
        Command::Sessions { agent, status } => {
            cmd_list::sessions(&HttpApi::new(&config), agent.as_deref(), status).await
        }
        Command::New { agent } => cmd_list::new_session(&HttpApi::new(&config), &agent).await,
        Command::File { name } => cmd_list::file(&HttpApi::new(&config), &name).await,
        Command::End { session } => cmd_list::end(&HttpApi::new(&config), &session).await,
        Command::Chat { session } => {
            let (handle, api) = WorkspaceHandle::start(&config)?;
            cmd_chat::run(handle, &api, &session).await
        }
        Command::Completions { .. } => Ok(()),
    }
}

/// Flags > environment > config file > defaults.
fn resolve_config(cli: &Cli, data_dir: &std::path::Path) -> anyhow::Result<ClientConfig> {
    let mut config = ClientConfig::load(&paths::config_path(data_dir))?.with_env();
    if let Some(url) = &cli.url {
        config.base_url = url.clone();
    }
    if let Some(url) = &cli.socket_url {
        config.socket_url = Some(url.clone());
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn agent_yaml_subcommands_parse() {
        let cli = Cli::parse_from(["deepagents", "agent", "export", "researcher", "-o", "out.yaml"]);
        match cli.command {
            Command::Agent {
                action: AgentCommand::Export { name, output },
            } => {
                assert_eq!(name, "researcher");
                assert_eq!(output, Some(PathBuf::from("out.yaml")));
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::parse_from(["deepagents", "agent", "import", "agent.yaml"]);
        assert!(matches!(
            cli.command,
            Command::Agent {
                action: AgentCommand::Import { .. }
            }
        ));
    }

    #[test]
    fn flags_override_config_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            paths::config_path(tmp.path()),
            "base_url = \"http://file.example\"\nreconnect_attempts = 4\n",
        )
        .expect("write config");

        let cli = Cli::parse_from([
            "deepagents",
            "--url",
            "http://flag.example",
            "sessions",
            "--status",
            "active",
        ]);
        let config = resolve_config(&cli, tmp.path()).expect("config");

        assert_eq!(config.base_url, "http://flag.example");
        assert_eq!(config.reconnect_attempts, 4);
        assert!(matches!(
            cli.command,
            Command::Sessions {
                status: Some(SessionStatus::Active),
                ..
            }
        ));
    }
}
