//! Tool declaration and invocation contract, shell command policy,
//! confirmation gate, and the subprocess runner behind the built-in tools.

pub mod command_policy;
pub mod config;
pub mod confirm;
pub mod edit_fix;
pub mod executor;
pub mod fetch;
pub mod file;
pub mod permissions;
pub mod process;
pub mod registry;
pub mod schema;
pub mod shell;
mod workspace;

pub use command_policy::{CommandPermissionResult, check_command_permissions};
pub use config::{FetchConfig, ShellConfig, ToolsConfig};
pub use confirm::{
    ConfirmationDetails, ConfirmationGate, ConfirmationKind, ConfirmationOutcome,
    SessionApprovals,
};
pub use executor::{
    BoxFuture, ConfirmationQuery, Icon, MAX_TOOL_OUTPUT_CHARS, Tool, ToolDeclaration, ToolError,
    ToolErrorKind, ToolEvent, ToolEventTx, ToolFailure, ToolInvocation, ToolLocation, ToolResult,
    truncate_tool_output,
};
pub use fetch::WebFetchTool;
pub use file::{EditFileTool, ReadFileTool, WriteFileTool};
pub use permissions::{ApprovalMode, ToolPolicy};
pub use process::{OutputEvent, OutputStream, ProcessResult, ProcessRunner, RunningProcess};
pub use registry::ToolCatalog;
pub use shell::ShellTool;

use std::path::PathBuf;
use std::sync::Arc;

/// Build the built-in tool set, honoring `policy` exclusions.
#[must_use]
pub fn builtin_tools<P>(
    config: &ToolsConfig,
    policy: &ToolPolicy,
    workspace_root: PathBuf,
    corrector: Arc<P>,
) -> Vec<Arc<dyn Tool>>
where
    P: halyard_llm::LlmProvider + 'static,
{
    let candidates: Vec<Arc<dyn Tool>> = vec![
        Arc::new(ShellTool::new(&config.shell, workspace_root.clone())),
        Arc::new(ReadFileTool::new(workspace_root.clone())),
        Arc::new(WriteFileTool::new(workspace_root.clone())),
        Arc::new(EditFileTool::new(workspace_root, corrector)),
        Arc::new(WebFetchTool::new(&config.fetch)),
    ];
    candidates
        .into_iter()
        .filter(|tool| {
            let enabled = policy.is_tool_enabled(&tool.declaration().name);
            if !enabled {
                tracing::debug!(tool = %tool.declaration().name, "tool excluded by policy");
            }
            enabled
        })
        .collect()
}
