use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Icon tag shown next to a tool in the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Icon {
    FileSearch,
    Globe,
    Hammer,
    Pencil,
    Terminal,
}

/// Immutable description of a tool, created once at registration.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub icon: Icon,
    /// JSON schema (subset) of the parameters object.
    pub parameters: serde_json::Value,
    pub is_output_markdown: bool,
    pub can_update_output: bool,
}

/// Filesystem path an invocation will touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolLocation {
    pub path: PathBuf,
    pub line: Option<usize>,
}

/// What an invocation needs from the confirmation gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationQuery {
    None,
    Edit {
        file_path: PathBuf,
        diff: String,
    },
    Exec {
        command: String,
    },
    Mcp {
        server: String,
        tool: String,
        display_name: String,
        trusted: bool,
    },
    Info {
        prompt: String,
        urls: Vec<String>,
    },
}

/// A registered tool: declaration plus a typed builder for invocations.
pub trait Tool: Send + Sync {
    fn declaration(&self) -> &ToolDeclaration;

    /// Name of the MCP server this tool was discovered from, if any.
    fn server_name(&self) -> Option<&str> {
        None
    }

    /// Bind already schema-checked parameters into an invocation.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::InvalidParams` when the parameters fail typed
    /// deserialization or a semantic check.
    fn build(&self, params: serde_json::Value) -> Result<Box<dyn ToolInvocation>, ToolError>;
}

/// A declaration bound to validated parameters. Created per call.
pub trait ToolInvocation: Send + Sync {
    fn tool_name(&self) -> &str;

    /// One-line human description of what this call will do.
    fn description(&self) -> String;

    fn locations(&self) -> Vec<ToolLocation> {
        Vec::new()
    }

    fn confirmation_query<'a>(
        &'a self,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ConfirmationQuery, ToolError>> {
        Box::pin(std::future::ready(Ok(ConfirmationQuery::None)))
    }

    /// Run the invocation. Failures are reported through `ToolResult::error`.
    fn execute(
        &self,
        cancel: CancellationToken,
        events: Option<ToolEventTx>,
    ) -> BoxFuture<'_, ToolResult>;
}

impl fmt::Debug for dyn ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolInvocation")
            .field("tool", &self.tool_name())
            .field("description", &self.description())
            .finish()
    }
}

/// Failure category carried by a tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    Validation,
    PermissionDenied,
    Execution,
    System,
    Cancelled,
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Validation => "validation error",
            Self::PermissionDenied => "permission denied",
            Self::Execution => "execution failed",
            Self::System => "system error",
            Self::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolFailure {
    pub kind: ToolErrorKind,
    pub message: String,
}

/// Outcome of one tool call, fed back to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub llm_content: String,
    pub return_display: String,
    pub error: Option<ToolFailure>,
}

impl ToolResult {
    #[must_use]
    pub fn success(llm_content: impl Into<String>, return_display: impl Into<String>) -> Self {
        Self {
            llm_content: llm_content.into(),
            return_display: return_display.into(),
            error: None,
        }
    }

    #[must_use]
    pub fn failure(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            llm_content: format!("Error ({kind}): {message}"),
            return_display: message.clone(),
            error: Some(ToolFailure { kind, message }),
        }
    }

    #[must_use]
    pub fn from_error(err: &ToolError) -> Self {
        Self::failure(err.kind(), err.to_string())
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl fmt::Display for ToolResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.llm_content)
    }
}

pub const MAX_TOOL_OUTPUT_CHARS: usize = 30_000;

/// Truncate tool output that exceeds `MAX_TOOL_OUTPUT_CHARS` using head+tail split.
#[must_use]
pub fn truncate_tool_output(output: &str) -> String {
    if output.len() <= MAX_TOOL_OUTPUT_CHARS {
        return output.to_string();
    }

    let half = MAX_TOOL_OUTPUT_CHARS / 2;
    let head_end = floor_char_boundary(output, half);
    let tail_start = ceil_char_boundary(output, output.len() - half);
    let head = &output[..head_end];
    let tail = &output[tail_start..];
    let truncated = tail_start - head_end;

    format!(
        "{head}\n\n... [truncated {truncated} chars, showing first and last ~{half} chars] ...\n\n{tail}"
    )
}

pub(crate) fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

pub(crate) fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
    while index < s.len() && !s.is_char_boundary(index) {
        index += 1;
    }
    index.min(s.len())
}

/// Event emitted during tool execution for real-time UI updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolEvent {
    Started {
        tool_name: String,
        description: String,
    },
    OutputChunk {
        tool_name: String,
        chunk: String,
    },
    BinaryProgress {
        tool_name: String,
        bytes_received: u64,
    },
    Completed {
        tool_name: String,
        success: bool,
    },
}

pub type ToolEventTx = tokio::sync::mpsc::UnboundedSender<ToolEvent>;

/// Errors raised while building, gating, or running a tool call.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid tool parameters: {message}")]
    InvalidParams { message: String },

    #[error("tool \"{name}\" not found in registry")]
    NotFound { name: String },

    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String, hard: bool },

    #[error("path not allowed by sandbox: {path}")]
    SandboxViolation { path: String },

    #[error("timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("execution failed: {0}")]
    Execution(#[from] std::io::Error),
}

impl ToolError {
    #[must_use]
    pub fn kind(&self) -> ToolErrorKind {
        match self {
            Self::InvalidParams { .. } | Self::NotFound { .. } => ToolErrorKind::Validation,
            Self::PermissionDenied { .. } | Self::SandboxViolation { .. } => {
                ToolErrorKind::PermissionDenied
            }
            Self::Timeout { .. } => ToolErrorKind::Execution,
            Self::Cancelled => ToolErrorKind::Cancelled,
            Self::Execution(_) => ToolErrorKind::System,
        }
    }

    /// True for denials that no confirmation can override.
    #[must_use]
    pub fn is_hard_denial(&self) -> bool {
        matches!(self, Self::PermissionDenied { hard: true, .. })
    }
}

/// Deserialize tool call params into a typed struct.
///
/// # Errors
///
/// Returns `ToolError::InvalidParams` when deserialization fails.
pub fn deserialize_params<T: serde::de::DeserializeOwned>(
    params: serde_json::Value,
) -> Result<T, ToolError> {
    serde_json::from_value(params).map_err(|e| ToolError::InvalidParams {
        message: e.to_string(),
    })
}

/// Render a parameter struct's JSON schema for a declaration.
#[must_use]
pub fn parameters_schema<T: schemars::JsonSchema>() -> serde_json::Value {
    schemars::schema_for!(T).to_value()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_not_found_display() {
        let err = ToolError::NotFound {
            name: "nope".to_owned(),
        };
        assert_eq!(err.to_string(), "tool \"nope\" not found in registry");
        assert_eq!(err.kind(), ToolErrorKind::Validation);
    }

    #[test]
    fn tool_error_sandbox_violation_display() {
        let err = ToolError::SandboxViolation {
            path: "/etc/shadow".to_owned(),
        };
        assert_eq!(err.to_string(), "path not allowed by sandbox: /etc/shadow");
        assert_eq!(err.kind(), ToolErrorKind::PermissionDenied);
    }

    #[test]
    fn tool_error_timeout_display() {
        let err = ToolError::Timeout { timeout_secs: 30 };
        assert_eq!(err.to_string(), "timed out after 30s");
    }

    #[test]
    fn tool_error_execution_maps_to_system() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "bash not found");
        let err = ToolError::Execution(io_err);
        assert!(err.to_string().starts_with("execution failed:"));
        assert!(err.to_string().contains("bash not found"));
        assert_eq!(err.kind(), ToolErrorKind::System);
    }

    #[test]
    fn hard_denial_flag() {
        let hard = ToolError::PermissionDenied {
            reason: "x".into(),
            hard: true,
        };
        let soft = ToolError::PermissionDenied {
            reason: "x".into(),
            hard: false,
        };
        assert!(hard.is_hard_denial());
        assert!(!soft.is_hard_denial());
        assert!(!ToolError::Cancelled.is_hard_denial());
    }

    #[test]
    fn failure_result_carries_kind() {
        let result = ToolResult::from_error(&ToolError::Cancelled);
        assert!(result.is_error());
        let failure = result.error.unwrap();
        assert_eq!(failure.kind, ToolErrorKind::Cancelled);
        assert_eq!(failure.message, "operation cancelled");
        assert!(result.llm_content.contains("cancelled"));
    }

    #[test]
    fn success_result_has_no_error() {
        let result = ToolResult::success("for model", "for user");
        assert!(!result.is_error());
        assert_eq!(result.to_string(), "for model");
    }

    #[test]
    fn deserialize_params_valid() {
        #[derive(Debug, serde::Deserialize, PartialEq)]
        struct P {
            name: String,
            count: u32,
        }
        let p: P = deserialize_params(serde_json::json!({"name": "test", "count": 42})).unwrap();
        assert_eq!(
            p,
            P {
                name: "test".to_owned(),
                count: 42
            }
        );
    }

    #[test]
    fn deserialize_params_wrong_type() {
        #[derive(Debug, serde::Deserialize)]
        struct P {
            #[allow(dead_code)]
            count: u32,
        }
        let err = deserialize_params::<P>(serde_json::json!({"count": "nope"})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams { .. }));
    }

    #[test]
    fn parameters_schema_lists_required_fields() {
        #[derive(schemars::JsonSchema)]
        #[allow(dead_code)]
        struct P {
            command: String,
            directory: Option<String>,
        }
        let schema = parameters_schema::<P>();
        assert_eq!(schema["type"], "object");
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&serde_json::json!("command")));
        assert!(!required.contains(&serde_json::json!("directory")));
    }

    #[test]
    fn truncate_tool_output_short_passthrough() {
        let short = "hello world";
        assert_eq!(truncate_tool_output(short), short);
    }

    #[test]
    fn truncate_tool_output_exact_limit() {
        let exact = "a".repeat(MAX_TOOL_OUTPUT_CHARS);
        assert_eq!(truncate_tool_output(&exact), exact);
    }

    #[test]
    fn truncate_tool_output_long_split() {
        let long = "x".repeat(MAX_TOOL_OUTPUT_CHARS + 1000);
        let result = truncate_tool_output(&long);
        assert!(result.contains("truncated 1000 chars"));
        assert!(result.len() < long.len());
    }

    #[test]
    fn truncate_tool_output_respects_char_boundaries() {
        let long = "é".repeat(MAX_TOOL_OUTPUT_CHARS);
        let result = truncate_tool_output(&long);
        assert!(result.starts_with('é'));
        assert!(result.ends_with('é'));
    }
}
