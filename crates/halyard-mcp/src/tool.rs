use std::sync::Arc;

use halyard_tools::{
    BoxFuture, ConfirmationQuery, Icon, Tool, ToolDeclaration, ToolError, ToolErrorKind, ToolEvent,
    ToolEventTx, ToolInvocation, ToolResult, truncate_tool_output,
};
use rmcp::model::{CallToolResult, RawContent};
use tokio_util::sync::CancellationToken;

use crate::client::RemoteTool;
use crate::error::McpError;
use crate::manager::McpManager;
use crate::schema::sanitize_schema;

/// A discovered tool registered in the catalog, routed back to its server
/// through the shared manager.
pub struct McpTool {
    declaration: ToolDeclaration,
    server_id: String,
    tool_name: String,
    trusted: bool,
    manager: Arc<McpManager>,
}

impl std::fmt::Debug for McpTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpTool")
            .field("name", &self.declaration.name)
            .field("server_id", &self.server_id)
            .field("tool_name", &self.tool_name)
            .field("trusted", &self.trusted)
            .finish_non_exhaustive()
    }
}

impl McpTool {
    #[must_use]
    pub fn new(
        remote: RemoteTool,
        registered_name: String,
        trusted: bool,
        manager: Arc<McpManager>,
    ) -> Self {
        let description = if remote.description.is_empty() {
            format!("Tool `{}` provided by MCP server `{}`", remote.name, remote.server_id)
        } else {
            remote.description
        };
        Self {
            declaration: ToolDeclaration {
                name: registered_name,
                display_name: format!("{} ({} MCP server)", remote.name, remote.server_id),
                description,
                icon: Icon::Hammer,
                parameters: sanitize_schema(&remote.input_schema),
                is_output_markdown: true,
                can_update_output: false,
            },
            server_id: remote.server_id,
            tool_name: remote.name,
            trusted,
            manager,
        }
    }
}

impl Tool for McpTool {
    fn declaration(&self) -> &ToolDeclaration {
        &self.declaration
    }

    fn server_name(&self) -> Option<&str> {
        Some(&self.server_id)
    }

    fn build(&self, params: serde_json::Value) -> Result<Box<dyn ToolInvocation>, ToolError> {
        let args = match params {
            serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
            obj @ serde_json::Value::Object(_) => obj,
            other => {
                return Err(ToolError::InvalidParams {
                    message: format!("MCP tool arguments must be an object, got {other}"),
                });
            }
        };
        Ok(Box::new(McpInvocation {
            registered_name: self.declaration.name.clone(),
            server_id: self.server_id.clone(),
            tool_name: self.tool_name.clone(),
            trusted: self.trusted,
            args,
            manager: Arc::clone(&self.manager),
        }))
    }
}

struct McpInvocation {
    registered_name: String,
    server_id: String,
    tool_name: String,
    trusted: bool,
    args: serde_json::Value,
    manager: Arc<McpManager>,
}

impl ToolInvocation for McpInvocation {
    fn tool_name(&self) -> &str {
        &self.registered_name
    }

    fn description(&self) -> String {
        format!("{}/{} {}", self.server_id, self.tool_name, self.args)
    }

    fn confirmation_query<'a>(
        &'a self,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ConfirmationQuery, ToolError>> {
        Box::pin(std::future::ready(Ok(ConfirmationQuery::Mcp {
            server: self.server_id.clone(),
            tool: self.tool_name.clone(),
            display_name: self.registered_name.clone(),
            trusted: self.trusted,
        })))
    }

    fn execute(
        &self,
        cancel: CancellationToken,
        events: Option<ToolEventTx>,
    ) -> BoxFuture<'_, ToolResult> {
        Box::pin(async move {
            let outcome = self
                .manager
                .call_tool(&self.server_id, &self.tool_name, self.args.clone(), &cancel)
                .await;
            let result = match outcome {
                Ok(call) => self.to_tool_result(&call),
                Err(e) => {
                    tracing::warn!(
                        server_id = %self.server_id,
                        tool = %self.tool_name,
                        "MCP tool call failed: {e:#}"
                    );
                    ToolResult::failure(error_kind(&e), e.to_string())
                }
            };
            if let Some(tx) = &events {
                let _ = tx.send(ToolEvent::Completed {
                    tool_name: self.registered_name.clone(),
                    success: !result.is_error(),
                });
            }
            result
        })
    }
}

impl McpInvocation {
    fn to_tool_result(&self, call: &CallToolResult) -> ToolResult {
        let text = call
            .content
            .iter()
            .filter_map(|c| {
                if let RawContent::Text(t) = &c.raw {
                    Some(t.text.as_str())
                } else {
                    tracing::debug!(
                        server_id = %self.server_id,
                        tool = %self.tool_name,
                        "skipping non-text content from MCP tool"
                    );
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        if call.is_error == Some(true) {
            let message = if text.is_empty() {
                format!("{}/{} reported an error", self.server_id, self.tool_name)
            } else {
                text
            };
            return ToolResult::failure(ToolErrorKind::Execution, message);
        }
        ToolResult::success(truncate_tool_output(&text), text)
    }
}

fn error_kind(err: &McpError) -> ToolErrorKind {
    match err {
        McpError::Cancelled { .. } => ToolErrorKind::Cancelled,
        McpError::Timeout { .. } | McpError::ToolCall { .. } => ToolErrorKind::Execution,
        McpError::Connection { .. } | McpError::ServerNotFound { .. } => ToolErrorKind::System,
    }
}
