use std::path::PathBuf;

use serde::Deserialize;

use crate::permissions::ToolPolicy;

fn default_shell_timeout() -> u64 {
    120
}

fn default_fetch_timeout() -> u64 {
    15
}

fn default_max_body_bytes() -> usize {
    1_048_576
}

/// `[tools]` section: policy lists, approval mode, and per-tool settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsConfig {
    #[serde(flatten)]
    pub policy: ToolPolicy,
    /// Root the file tools and shell working directories are confined to.
    /// Defaults to the current directory.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
}

/// Shell tool settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
    /// Seconds before a running command is cancelled.
    #[serde(default = "default_shell_timeout")]
    pub timeout: u64,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            timeout: default_shell_timeout(),
        }
    }
}

/// Configuration for the web fetch tool.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: default_fetch_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}
