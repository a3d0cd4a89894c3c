//! Agent configuration: command line, environment and YAML file

use crate::error::AgentError;
use crate::reconnect::ReconnectConfig;
use edgelink_proto::DEFAULT_TUNNEL_PATH;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;
use uuid::Uuid;

/// Default address of the edge server
pub const DEFAULT_REMOTE_URL: &str = "ws://localhost:3000";

/// Default base URL of the private service
pub const DEFAULT_LOCAL_URL: &str = "http://homeassistant.local:8123";

/// Command-line arguments of `edgelink agent`
///
/// Every setting may also come from the YAML file given with `--config`;
/// command line and environment take precedence over the file.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct AgentArgs {
    /// Edge server URL (ws://, wss://, http:// or https://)
    #[arg(long, env = "REMOTE_WS_URL")]
    pub remote_url: Option<String>,

    /// Tenant token presented to the edge
    #[arg(long, env = "SOCKET_TOKEN")]
    pub token: Option<String>,

    /// Base URL of the private service
    #[arg(long, env = "LOCAL_HOME_ASSISTANT_URL")]
    pub local_url: Option<String>,

    /// Tunnel path on the edge server
    #[arg(long, env = "TUNNEL_PATH")]
    pub tunnel_path: Option<String>,

    /// Agent ID (auto-generated if not specified)
    #[arg(long, env = "AGENT_ID")]
    pub agent_id: Option<String>,

    /// Configuration file (YAML)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Give up after this many failed reconnects (unlimited by default)
    #[arg(long)]
    pub max_reconnect_attempts: Option<usize>,
}

/// Configuration file format
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    pub remote_ws_url: Option<String>,
    pub socket_token: Option<String>,
    pub local_home_assistant_url: Option<String>,
    pub log_level: Option<String>,
    pub tunnel_path: Option<String>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&contents).map_err(|e| {
            AgentError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }
}

/// Resolved agent settings
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_id: String,
    /// Edge server base URL (ws or wss)
    pub remote_url: Url,
    pub tunnel_path: String,
    pub token: String,
    /// Base URL of the private service (http or https)
    pub local_url: Url,
    /// Log level from the config file, if any
    pub log_level: Option<String>,
    /// YAML file the settings were merged from
    pub config_file: Option<PathBuf>,
    /// Whether `agent_id` was made up because none was given
    pub generated_agent_id: bool,
    pub reconnect: ReconnectConfig,
}

impl AgentArgs {
    /// Merge CLI args with the config file, giving precedence to CLI args
    pub fn into_config(self) -> Result<AgentConfig, AgentError> {
        let file = match &self.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };

        let remote_url = self
            .remote_url
            .or(file.remote_ws_url)
            .unwrap_or_else(|| DEFAULT_REMOTE_URL.to_string());
        let local_url = self
            .local_url
            .or(file.local_home_assistant_url)
            .unwrap_or_else(|| DEFAULT_LOCAL_URL.to_string());
        let token = self.token.or(file.socket_token).unwrap_or_default();
        let tunnel_path = self
            .tunnel_path
            .or(file.tunnel_path)
            .unwrap_or_else(|| DEFAULT_TUNNEL_PATH.to_string());

        if token.is_empty() {
            return Err(AgentError::Config(
                "Token is required (use --token, SOCKET_TOKEN or socketToken in the config file)"
                    .into(),
            ));
        }
        if !tunnel_path.starts_with('/') {
            return Err(AgentError::Config(format!(
                "Tunnel path must start with '/': {}",
                tunnel_path
            )));
        }

        let generated_agent_id = self.agent_id.is_none();
        let agent_id = self
            .agent_id
            .unwrap_or_else(|| format!("agent-{}", Uuid::new_v4()));

        Ok(AgentConfig {
            agent_id,
            remote_url: parse_remote_url(&remote_url)?,
            tunnel_path,
            token,
            local_url: parse_local_url(&local_url)?,
            log_level: file.log_level,
            config_file: self.config,
            generated_agent_id,
            reconnect: ReconnectConfig {
                max_attempts: self.max_reconnect_attempts,
                ..Default::default()
            },
        })
    }
}

impl AgentConfig {
    /// Full URL of the edge's tunnel endpoint
    pub fn tunnel_url(&self) -> String {
        format!(
            "{}{}",
            self.remote_url.as_str().trim_end_matches('/'),
            self.tunnel_path
        )
    }
}

/// Parse the edge URL, mapping http(s) to ws(s)
pub fn parse_remote_url(raw: &str) -> Result<Url, AgentError> {
    let mut url = Url::parse(raw)
        .map_err(|e| AgentError::Config(format!("Invalid remote URL {}: {}", raw, e)))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(AgentError::Config(format!(
                "Unsupported remote URL scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| AgentError::Config(format!("Invalid remote URL: {}", raw)))?;
    Ok(url)
}

fn parse_local_url(raw: &str) -> Result<Url, AgentError> {
    let url = Url::parse(raw)
        .map_err(|e| AgentError::Config(format!("Invalid local URL {}: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(AgentError::Config(format!(
            "Unsupported local URL scheme: {}",
            other
        ))),
    }
}
