use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use rmcp::ServiceExt;
use rmcp::model::{CallToolRequestParams, CallToolResult};
use rmcp::service::RunningService;
use rmcp::transport::TokioChildProcess;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransport;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::McpError;
use crate::manager::{McpTransport, ServerEntry};

type ClientService = RunningService<rmcp::RoleClient, ()>;

/// A tool as listed by a server, before sanitizing and registration.
#[derive(Debug, Clone)]
pub struct RemoteTool {
    pub server_id: String,
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

pub struct McpClient {
    server_id: String,
    service: Arc<ClientService>,
    timeout: Duration,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("server_id", &self.server_id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// Connect over the entry's transport and perform the MCP handshake.
    ///
    /// # Errors
    ///
    /// Returns `McpError::Connection` if the process cannot be spawned, the
    /// endpoint is unreachable, or the handshake fails.
    pub async fn connect(entry: &ServerEntry) -> Result<Self, McpError> {
        let connection_error = |message: String| McpError::Connection {
            server_id: entry.id.clone(),
            message,
        };

        let service = match &entry.transport {
            McpTransport::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                let mut cmd = Command::new(command);
                cmd.args(args);
                for (k, v) in env {
                    cmd.env(k, v);
                }
                if let Some(dir) = cwd {
                    cmd.current_dir(dir);
                }
                let transport =
                    TokioChildProcess::new(cmd).map_err(|e| connection_error(e.to_string()))?;
                ().serve(transport)
                    .await
                    .map_err(|e| connection_error(e.to_string()))?
            }
            McpTransport::Http { url } => {
                let transport = StreamableHttpClientTransport::from_uri(url.clone());
                ().serve(transport)
                    .await
                    .map_err(|e| connection_error(e.to_string()))?
            }
        };

        Ok(Self {
            server_id: entry.id.clone(),
            service: Arc::new(service),
            timeout: entry.timeout,
        })
    }

    #[must_use]
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Call tools/list, following pagination.
    ///
    /// # Errors
    ///
    /// Returns `McpError::ToolCall` if listing fails.
    pub async fn list_tools(&self) -> Result<Vec<RemoteTool>, McpError> {
        let tools = self
            .service
            .list_all_tools()
            .await
            .map_err(|e| McpError::ToolCall {
                server_id: self.server_id.clone(),
                tool_name: "tools/list".into(),
                message: e.to_string(),
            })?;

        Ok(tools
            .into_iter()
            .map(|t| RemoteTool {
                server_id: self.server_id.clone(),
                name: t.name.to_string(),
                description: t.description.map_or_else(String::new, |d| d.to_string()),
                input_schema: serde_json::Value::Object((*t.input_schema).clone()),
            })
            .collect())
    }

    /// Call tools/call with JSON args, bounded by the server timeout and
    /// `cancel`.
    ///
    /// # Errors
    ///
    /// Returns `McpError::Timeout`, `McpError::Cancelled` or
    /// `McpError::ToolCall` on failure.
    pub async fn call_tool(
        &self,
        name: &str,
        args: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<CallToolResult, McpError> {
        let arguments = match args {
            serde_json::Value::Object(map) => Some(map),
            _ => None,
        };

        let params = CallToolRequestParams {
            name: Cow::Owned(name.to_owned()),
            arguments,
            task: None,
            meta: None,
        };

        let call = tokio::time::timeout(self.timeout, self.service.call_tool(params));
        let outcome = tokio::select! {
            () = cancel.cancelled() => {
                return Err(McpError::Cancelled {
                    server_id: self.server_id.clone(),
                    tool_name: name.into(),
                });
            }
            r = call => r,
        };

        outcome
            .map_err(|_| McpError::Timeout {
                server_id: self.server_id.clone(),
                tool_name: name.into(),
                timeout_secs: self.timeout.as_secs(),
            })?
            .map_err(|e| McpError::ToolCall {
                server_id: self.server_id.clone(),
                tool_name: name.into(),
                message: e.to_string(),
            })
    }

    /// Graceful shutdown.
    pub async fn shutdown(self) {
        match Arc::try_unwrap(self.service) {
            Ok(service) => {
                let _ = service.cancel().await;
            }
            Err(_arc) => {
                tracing::warn!(
                    server_id = self.server_id,
                    "cannot shutdown: service has multiple references"
                );
            }
        }
    }
}
