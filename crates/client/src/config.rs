//! Client configuration
//!
//! Resolved from a TOML file, then overridden by `DEEPAGENTS_*` environment
//! variables. Command-line flags are applied on top by the binary.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};
use crate::reconnect::{ReconnectPolicy, DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const SOCKET_PATH: &str = "/socket";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Site URL serving the request/response API
    pub base_url: String,
    /// WebSocket endpoint; derived from `base_url` when unset
    pub socket_url: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub reconnect_delay_ms: u64,
    pub reconnect_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            socket_url: None,
            api_key: None,
            api_secret: None,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY.as_millis() as u64,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
        }
    }
}

impl ClientConfig {
    /// Read a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply `DEEPAGENTS_*` overrides from the process environment.
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = var("DEEPAGENTS_URL") {
            self.base_url = url;
        }
        if let Some(url) = var("DEEPAGENTS_SOCKET_URL") {
            self.socket_url = Some(url);
        }
        if let Some(key) = var("DEEPAGENTS_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(secret) = var("DEEPAGENTS_API_SECRET") {
            self.api_secret = Some(secret);
        }
        self
    }

    /// WebSocket URL for the persistent connection
    pub fn socket_url(&self) -> Result<String> {
        if let Some(url) = &self.socket_url {
            return Ok(url.clone());
        }

        let base = self.base_url.trim_end_matches('/');
        let ws = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(ClientError::Config(format!(
                "base_url must start with http:// or https://, got {base}"
            )));
        };
        Ok(format!("{ws}{SOCKET_PATH}"))
    }

    /// `Authorization` header value for token-based API access
    pub fn auth_header(&self) -> Option<String> {
        match (&self.api_key, &self.api_secret) {
            (Some(key), Some(secret)) => Some(format!("token {key}:{secret}")),
            _ => None,
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_millis(self.reconnect_delay_ms),
            self.reconnect_attempts,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ClientConfig::load(&dir.path().join("config.toml")).expect("load");
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.reconnect_policy(), ReconnectPolicy::default());
    }

    #[test]
    fn loads_partial_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "base_url = \"https://agents.example.com/\"\nreconnect_attempts = 3\n",
        )
        .expect("write config");

        let config = ClientConfig::load(&path).expect("load");
        assert_eq!(config.base_url, "https://agents.example.com/");
        assert_eq!(config.reconnect_attempts, 3);
        assert_eq!(config.reconnect_delay_ms, 2000);
        assert_eq!(
            config.socket_url().expect("socket url"),
            "wss://agents.example.com/socket"
        );
    }

    #[test]
    fn rejects_malformed_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "base_url = [").expect("write config");
        assert!(matches!(ClientConfig::load(&path), Err(ClientError::Toml(_))));
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DEEPAGENTS_URL", "http://127.0.0.1:8001"),
            ("DEEPAGENTS_API_KEY", "key"),
            ("DEEPAGENTS_API_SECRET", "secret"),
            ("DEEPAGENTS_SOCKET_URL", "  "),
        ]);
        let config = ClientConfig::default()
            .with_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.base_url, "http://127.0.0.1:8001");
        assert_eq!(config.socket_url, None);
        assert_eq!(
            config.socket_url().expect("socket url"),
            "ws://127.0.0.1:8001/socket"
        );
        assert_eq!(config.auth_header().as_deref(), Some("token key:secret"));
    }

    #[test]
    fn explicit_socket_url_wins() {
        let config = ClientConfig {
            socket_url: Some("ws://localhost:9000/agents".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.socket_url().expect("socket url"),
            "ws://localhost:9000/agents"
        );
    }

    #[test]
    fn unsupported_scheme_is_a_config_error() {
        let config = ClientConfig {
            base_url: "ftp://example.com".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.socket_url(), Err(ClientError::Config(_))));
        assert_eq!(config.auth_header(), None);
    }
}
