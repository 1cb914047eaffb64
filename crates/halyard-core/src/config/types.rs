use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use halyard_mcp::{McpTransport, ServerEntry};
use halyard_tools::ToolsConfig;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

/// OpenAI-compatible endpoint used for edit correction.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: None,
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434/v1".into()
}

fn default_model() -> String {
    "qwen3:8b".into()
}

fn default_max_tokens() -> u32 {
    4096
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

#[derive(Clone, Deserialize)]
pub struct McpServerConfig {
    pub id: String,
    /// Stdio transport: command to spawn.
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    /// HTTP transport: remote MCP server URL.
    pub url: Option<String>,
    #[serde(default = "default_mcp_timeout")]
    pub timeout: u64,
    /// Skip confirmation for every tool of this server.
    #[serde(default)]
    pub trust: bool,
}

impl std::fmt::Debug for McpServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted: HashMap<&str, &str> = self
            .env
            .keys()
            .map(|k| (k.as_str(), "[REDACTED]"))
            .collect();
        f.debug_struct("McpServerConfig")
            .field("id", &self.id)
            .field("command", &self.command)
            .field("args", &self.args)
            .field("env", &redacted)
            .field("cwd", &self.cwd)
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .field("trust", &self.trust)
            .finish()
    }
}

fn default_mcp_timeout() -> u64 {
    30
}

impl McpServerConfig {
    /// Connection parameters for `McpManager`. Returns `None` when neither
    /// `command` nor `url` is set; `Config::validate` rejects that earlier.
    #[must_use]
    pub fn to_server_entry(&self) -> Option<ServerEntry> {
        let transport = if let Some(ref command) = self.command {
            McpTransport::Stdio {
                command: command.clone(),
                args: self.args.clone(),
                env: self.env.clone(),
                cwd: self.cwd.clone(),
            }
        } else {
            McpTransport::Http {
                url: self.url.clone()?,
            }
        };
        Some(ServerEntry {
            id: self.id.clone(),
            transport,
            timeout: Duration::from_secs(self.timeout),
            trust: self.trust,
        })
    }
}
