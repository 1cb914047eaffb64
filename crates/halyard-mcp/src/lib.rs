//! MCP client lifecycle, tool discovery, and bridging into the tool catalog.

pub mod client;
pub mod error;
pub mod manager;
pub mod naming;
pub mod schema;
pub mod tool;

use std::sync::Arc;

use halyard_tools::ToolCatalog;

pub use client::{McpClient, RemoteTool};
pub use error::McpError;
pub use manager::{McpManager, McpTransport, ServerEntry};
pub use naming::{registered_name, valid_tool_name};
pub use schema::sanitize_schema;
pub use tool::McpTool;

/// Register discovered tools into `catalog`, namespacing names when more
/// than one server is configured. Returns the number registered.
///
/// Tools left over from an earlier discovery of any configured server are
/// dropped first, so a server that no longer offers a tool loses it.
pub fn register_discovered(
    catalog: &mut ToolCatalog,
    manager: &Arc<McpManager>,
    tools: Vec<RemoteTool>,
) -> usize {
    for server_id in manager.server_ids() {
        let removed = catalog.remove_server(server_id);
        if removed > 0 {
            tracing::debug!(server_id, removed, "dropped previously discovered MCP tools");
        }
    }

    let namespaced = manager.server_count() > 1;
    let mut count = 0;
    for remote in tools {
        let name = registered_name(&remote.server_id, &remote.name, namespaced);
        let trusted = manager.is_trusted(&remote.server_id);
        tracing::debug!(
            server_id = %remote.server_id,
            tool = %remote.name,
            registered = %name,
            "registering MCP tool"
        );
        catalog.register(Arc::new(McpTool::new(
            remote,
            name,
            trusted,
            Arc::clone(manager),
        )));
        count += 1;
    }
    count
}
