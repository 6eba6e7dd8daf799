//! Configuration for the pocketbot gateway.
//!
//! The file is YAML. Environment references (`${VAR}`, `${VAR:-default}`) are
//! substituted in every string value before the document is deserialized, so
//! secrets such as bot tokens can stay out of the file.

use pocket_core::{PocketError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

pub mod env_substitution;

pub use env_substitution::substitute_env_vars;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Bot token from @BotFather
    #[serde(default)]
    pub token: String,
    /// Allowed user ids or usernames; empty allows everyone
    #[serde(default)]
    pub allow_from: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,
    #[serde(default)]
    pub allow_from: Vec<String>,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bridge_url: default_bridge_url(),
            allow_from: Vec::new(),
        }
    }
}

/// Third-party services used by channels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub groq: GroqConfig,
}

/// Groq speech-to-text, used to transcribe Telegram voice notes.
/// An empty `api_key` disables transcription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroqConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_groq_api_base")]
    pub api_base: String,
}

impl Default for GroqConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: default_groq_api_base(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// MCP servers keyed by name. Ordered so servers connect deterministically.
    #[serde(default, alias = "mcpServers")]
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
}

/// One external MCP server.
///
/// Exactly one of `command` (stdio transport) or `url` (streamable HTTP
/// transport) is expected. Neither is not a parse error: the adapter skips
/// such a server with a warning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_mcp_timeout", alias = "timeout")]
    pub timeout_ms: u64,
}

/// The transport selected for an MCP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSpec {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    Http {
        url: String,
        headers: HashMap<String, String>,
    },
}

impl TransportSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportSpec::Stdio { .. } => "stdio",
            TransportSpec::Http { .. } => "http",
        }
    }
}

impl McpServerConfig {
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: Some(command.into()),
            args,
            ..Self::default()
        }
    }

    pub fn http(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Select the transport for this server. A command takes precedence over a URL.
    pub fn transport(&self) -> Option<TransportSpec> {
        let command = self.command.as_deref().filter(|c| !c.trim().is_empty());
        let url = self.url.as_deref().filter(|u| !u.trim().is_empty());

        match (command, url) {
            (Some(command), url) => {
                if url.is_some() {
                    debug!("MCP server config has both command and url, using command '{}'", command);
                }
                Some(TransportSpec::Stdio {
                    command: command.to_string(),
                    args: self.args.clone(),
                    env: self.env.clone(),
                })
            }
            (None, Some(url)) => Some(TransportSpec::Http {
                url: url.to_string(),
                headers: self.headers.clone(),
            }),
            (None, None) => None,
        }
    }
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            url: None,
            headers: HashMap::new(),
            timeout_ms: default_mcp_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Upper bound on each channel's `stop()` during shutdown
    #[serde(default = "default_channel_stop_timeout")]
    pub channel_stop_timeout_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            channel_stop_timeout_secs: default_channel_stop_timeout(),
        }
    }
}

impl Config {
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PocketError::ConfigError(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut raw: serde_json::Value = serde_yaml::from_str(yaml)
            .map_err(|e| PocketError::ConfigError(format!("Failed to parse YAML: {}", e)))?;

        // An empty document parses as null
        if raw.is_null() {
            raw = serde_json::Value::Object(Default::default());
        }

        substitute_env_vars(&mut raw)?;

        let config: Config = serde_json::from_value(raw)
            .map_err(|e| PocketError::ConfigError(format!("Invalid configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, server) in &self.tools.mcp_servers {
            if name.trim().is_empty() {
                return Err(PocketError::ConfigError("MCP server name cannot be empty".into()));
            }
            if server.timeout_ms == 0 {
                return Err(PocketError::ConfigError(format!(
                    "MCP server '{}': timeout_ms must be greater than zero",
                    name
                )));
            }
        }
        if self.gateway.channel_stop_timeout_secs == 0 {
            return Err(PocketError::ConfigError(
                "channel_stop_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn default_config_path() -> PathBuf {
        let home_dir = env::var("HOME_DIR")
            .unwrap_or_else(|_| env::var("HOME").unwrap_or_else(|_| ".".to_string()));
        PathBuf::from(home_dir).join(".pocketbot").join("config.yaml")
    }
}

fn default_bridge_url() -> String { "ws://localhost:3001".to_string() }
fn default_mcp_timeout() -> u64 { 30000 }
fn default_channel_stop_timeout() -> u64 { 5 }
fn default_groq_api_base() -> String { "https://api.groq.com/openai/v1".to_string() }
