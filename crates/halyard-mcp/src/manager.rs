use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use rmcp::model::CallToolResult;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::client::{McpClient, RemoteTool};
use crate::error::McpError;

/// How to reach a server.
#[derive(Clone)]
pub enum McpTransport {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        cwd: Option<PathBuf>,
    },
    /// Streamable HTTP endpoint; responses may arrive as SSE streams.
    Http { url: String },
}

impl fmt::Debug for McpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                let mut env_keys: Vec<&str> = env.keys().map(String::as_str).collect();
                env_keys.sort_unstable();
                f.debug_struct("Stdio")
                    .field("command", command)
                    .field("args", args)
                    .field("env", &env_keys)
                    .field("cwd", cwd)
                    .finish()
            }
            Self::Http { url } => f.debug_struct("Http").field("url", url).finish(),
        }
    }
}

/// Server connection parameters consumed by `McpManager`.
#[derive(Debug, Clone)]
pub struct ServerEntry {
    pub id: String,
    pub transport: McpTransport,
    /// Bounds connect + list, and every tool call.
    pub timeout: Duration,
    /// Calls to a trusted server skip confirmation.
    pub trust: bool,
}

pub struct McpManager {
    configs: Vec<ServerEntry>,
    clients: RwLock<HashMap<String, McpClient>>,
}

impl std::fmt::Debug for McpManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpManager")
            .field("server_count", &self.configs.len())
            .finish_non_exhaustive()
    }
}

impl McpManager {
    #[must_use]
    pub fn new(configs: Vec<ServerEntry>) -> Self {
        Self {
            configs,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Number of configured servers, connected or not.
    #[must_use]
    pub fn server_count(&self) -> usize {
        self.configs.len()
    }

    /// Ids of the configured servers, in configuration order.
    pub fn server_ids(&self) -> impl Iterator<Item = &str> {
        self.configs.iter().map(|c| c.id.as_str())
    }

    #[must_use]
    pub fn is_trusted(&self, server_id: &str) -> bool {
        self.configs
            .iter()
            .any(|c| c.id == server_id && c.trust)
    }

    /// Connect to all configured servers concurrently, return aggregated tool list.
    ///
    /// Each server gets its own task and its own timeout covering handshake
    /// and listing. Servers that fail or time out are logged and skipped.
    pub async fn connect_all(&self) -> Vec<RemoteTool> {
        let mut join_set = JoinSet::new();

        for config in self.configs.clone() {
            join_set.spawn(async move {
                let outcome = tokio::time::timeout(config.timeout, async {
                    let client = McpClient::connect(&config).await?;
                    let tools = client.list_tools().await?;
                    Ok::<_, McpError>((client, tools))
                })
                .await;
                (config.id, config.timeout, outcome)
            });
        }

        let mut connected = Vec::new();
        let mut all_tools = Vec::new();

        while let Some(result) = join_set.join_next().await {
            let Ok((server_id, timeout, outcome)) = result else {
                tracing::warn!("MCP connection task panicked");
                continue;
            };

            match outcome {
                Ok(Ok((client, tools))) => {
                    tracing::info!(server_id, tools = tools.len(), "connected to MCP server");
                    all_tools.extend(tools);
                    connected.push((server_id, client));
                }
                Ok(Err(e)) => {
                    tracing::warn!(server_id, "MCP server discovery failed: {e:#}");
                }
                Err(_) => {
                    tracing::warn!(
                        server_id,
                        timeout_secs = timeout.as_secs_f64(),
                        "MCP server discovery timed out"
                    );
                }
            }
        }

        let mut clients = self.clients.write().await;
        for (server_id, client) in connected {
            if let Some(old) = clients.insert(server_id, client) {
                old.shutdown().await;
            }
        }

        all_tools
    }

    /// Ids of connected servers, sorted.
    pub async fn connected_servers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.clients.read().await.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Route tool call to the correct server's client.
    ///
    /// # Errors
    ///
    /// Returns `McpError::ServerNotFound` if the server is not connected, or
    /// the client's call error.
    pub async fn call_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        args: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<CallToolResult, McpError> {
        let clients = self.clients.read().await;
        let client = clients
            .get(server_id)
            .ok_or_else(|| McpError::ServerNotFound {
                server_id: server_id.into(),
            })?;
        client.call_tool(tool_name, args, cancel).await
    }

    /// Graceful shutdown of all connections.
    pub async fn shutdown_all(&self) {
        let mut clients = self.clients.write().await;
        let drained: Vec<(String, McpClient)> = clients.drain().collect();
        for (id, client) in drained {
            tracing::info!(server_id = id, "shutting down MCP client");
            client.shutdown().await;
        }
    }
}
