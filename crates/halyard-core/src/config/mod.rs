mod env;
mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use halyard_llm::CompatibleProvider;
use halyard_mcp::ServerEntry;

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the result fails [`Config::validate`].
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Rejects empty or duplicate MCP server ids, servers that set both or
    /// neither of `command` and `url`, and zero timeouts.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tools.shell.timeout == 0 {
            bail!("tools.shell.timeout must be greater than zero");
        }
        if self.tools.fetch.timeout == 0 {
            bail!("tools.fetch.timeout must be greater than zero");
        }

        let mut seen = HashSet::new();
        for server in &self.mcp.servers {
            if server.id.trim().is_empty() {
                bail!("mcp server id must not be empty");
            }
            if !seen.insert(server.id.as_str()) {
                bail!("duplicate mcp server id: {}", server.id);
            }
            match (&server.command, &server.url) {
                (Some(_), Some(_)) => {
                    bail!("mcp server '{}' sets both command and url", server.id);
                }
                (None, None) => bail!("mcp server '{}' needs a command or a url", server.id),
                _ => {}
            }
            if server.timeout == 0 {
                bail!("mcp server '{}' timeout must be greater than zero", server.id);
            }
        }
        Ok(())
    }

    /// Workspace root for file tools and shell commands: the configured
    /// root, or the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn workspace_root(&self) -> anyhow::Result<PathBuf> {
        match self.tools.workspace_root {
            Some(ref root) => Ok(root.clone()),
            None => std::env::current_dir().context("failed to determine current directory"),
        }
    }

    #[must_use]
    pub fn mcp_entries(&self) -> Vec<ServerEntry> {
        self.mcp
            .servers
            .iter()
            .filter_map(McpServerConfig::to_server_entry)
            .collect()
    }

    /// Provider used to repair failed edits.
    #[must_use]
    pub fn llm_provider(&self) -> CompatibleProvider {
        let api_key = self.llm.api_key_env.as_deref().and_then(|var| {
            let key = std::env::var(var).ok();
            if key.is_none() {
                tracing::warn!("{var} is not set, calling the model without an API key");
            }
            key
        });
        CompatibleProvider::new(
            api_key,
            self.llm.base_url.clone(),
            self.llm.model.clone(),
            self.llm.max_tokens,
        )
    }
}
