use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::ShellConfig;
use crate::executor::{
    BoxFuture, ConfirmationQuery, Icon, Tool, ToolDeclaration, ToolError, ToolErrorKind, ToolEvent,
    ToolEventTx, ToolFailure, ToolInvocation, ToolResult, deserialize_params, parameters_schema,
    truncate_tool_output,
};
use crate::process::{OutputEvent, ProcessResult, ProcessRunner};
use crate::workspace::Workspace;

pub const SHELL_TOOL_NAME: &str = "run_shell_command";

#[derive(Debug, Deserialize, JsonSchema)]
struct ShellParams {
    /// Exact bash command to execute.
    command: String,
    /// Short description of the command's purpose, shown to the user.
    #[serde(default)]
    description: Option<String>,
    /// Directory to run the command in, relative to the workspace root.
    #[serde(default)]
    directory: Option<String>,
}

/// Runs a command through the platform shell inside the workspace.
#[derive(Debug)]
pub struct ShellTool {
    declaration: ToolDeclaration,
    workspace: Workspace,
    timeout: Duration,
    runner: ProcessRunner,
}

impl ShellTool {
    #[must_use]
    pub fn new(config: &ShellConfig, workspace_root: PathBuf) -> Self {
        Self {
            declaration: ToolDeclaration {
                name: SHELL_TOOL_NAME.to_owned(),
                display_name: "Shell".to_owned(),
                description: "Executes a bash command (cmd.exe on Windows) and returns its \
                              output, exit code and terminating signal. Command substitution \
                              with $(), <() or backticks is rejected."
                    .to_owned(),
                icon: Icon::Terminal,
                parameters: parameters_schema::<ShellParams>(),
                is_output_markdown: false,
                can_update_output: true,
            },
            workspace: Workspace::new(workspace_root),
            timeout: Duration::from_secs(config.timeout),
            runner: ProcessRunner::new(),
        }
    }
}

impl Tool for ShellTool {
    fn declaration(&self) -> &ToolDeclaration {
        &self.declaration
    }

    fn build(&self, params: serde_json::Value) -> Result<Box<dyn ToolInvocation>, ToolError> {
        let params: ShellParams = deserialize_params(params)?;
        let command = params.command.trim().to_owned();
        if command.is_empty() {
            return Err(ToolError::InvalidParams {
                message: "command cannot be empty".to_owned(),
            });
        }
        let cwd = match params.directory.as_deref() {
            Some(dir) if !dir.trim().is_empty() => {
                if Path::new(dir).is_absolute() {
                    return Err(ToolError::InvalidParams {
                        message: "directory must be relative to the workspace root".to_owned(),
                    });
                }
                self.workspace.resolve(Path::new(dir))?
            }
            _ => self.workspace.root().to_path_buf(),
        };
        Ok(Box::new(ShellInvocation {
            command,
            description: params.description,
            directory: params.directory,
            cwd,
            timeout: self.timeout,
            runner: self.runner.clone(),
        }))
    }
}

#[derive(Debug)]
struct ShellInvocation {
    command: String,
    description: Option<String>,
    directory: Option<String>,
    cwd: PathBuf,
    timeout: Duration,
    runner: ProcessRunner,
}

impl ShellInvocation {
    async fn run(&self, cancel: CancellationToken, events: Option<ToolEventTx>) -> ToolResult {
        let run_token = cancel.child_token();
        let timer = {
            let token = run_token.clone();
            let timeout = self.timeout;
            tokio::spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep(timeout) => token.cancel(),
                    () = token.cancelled() => {}
                }
            })
        };

        let process = self.runner.execute(&self.command, &self.cwd, run_token.clone());
        tracing::debug!(command = %self.command, pid = ?process.pid, "shell command started");

        let result = process
            .collect(|event| {
                let Some(tx) = events.as_ref() else {
                    return;
                };
                let event = match event {
                    OutputEvent::Data { chunk, .. } => ToolEvent::OutputChunk {
                        tool_name: SHELL_TOOL_NAME.to_owned(),
                        chunk,
                    },
                    OutputEvent::BinaryDetected => ToolEvent::OutputChunk {
                        tool_name: SHELL_TOOL_NAME.to_owned(),
                        chunk: "[binary output detected, streaming suppressed]\n".to_owned(),
                    },
                    OutputEvent::BinaryProgress { bytes_received } => ToolEvent::BinaryProgress {
                        tool_name: SHELL_TOOL_NAME.to_owned(),
                        bytes_received,
                    },
                };
                let _ = tx.send(event);
            })
            .await;
        timer.abort();

        let timed_out = run_token.is_cancelled() && !cancel.is_cancelled();
        tracing::debug!(
            command = %self.command,
            exit_code = ?result.exit_code,
            signal = ?result.signal,
            aborted = result.aborted,
            timed_out,
            "shell command finished"
        );
        self.to_tool_result(&result, cancel.is_cancelled(), timed_out)
    }

    fn to_tool_result(
        &self,
        result: &ProcessResult,
        cancelled: bool,
        timed_out: bool,
    ) -> ToolResult {
        let output = if result.binary_detected {
            format!("[binary output, {} bytes]", result.raw_output.len())
        } else if result.output.trim().is_empty() {
            "(empty)".to_owned()
        } else {
            truncate_tool_output(result.output.trim_end())
        };

        let mut content = String::new();
        let _ = writeln!(content, "Command: {}", self.command);
        let _ = writeln!(
            content,
            "Directory: {}",
            self.directory.as_deref().unwrap_or("(root)")
        );
        let _ = writeln!(content, "Output: {output}");
        let _ = writeln!(
            content,
            "Error: {}",
            result.error.as_deref().unwrap_or("(none)")
        );
        let _ = writeln!(content, "Exit Code: {}", opt_to_string(result.exit_code));
        let _ = write!(content, "Signal: {}", opt_to_string(result.signal));

        let failure = if cancelled {
            Some((ToolErrorKind::Cancelled, "command was cancelled".to_owned()))
        } else if timed_out {
            Some((
                ToolErrorKind::Execution,
                ToolError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                }
                .to_string(),
            ))
        } else if let Some(err) = &result.error {
            Some((ToolErrorKind::System, err.clone()))
        } else if let Some(signal) = result.signal {
            Some((ToolErrorKind::Execution, format!("command terminated by signal {signal}")))
        } else if result.exit_code != Some(0) {
            Some((
                ToolErrorKind::Execution,
                format!("command exited with code {}", opt_to_string(result.exit_code)),
            ))
        } else {
            None
        };

        if let Some((kind, message)) = &failure {
            let _ = write!(content, "\nFailure ({kind}): {message}");
        }

        let display = if result.binary_detected || result.output.trim().is_empty() {
            output
        } else {
            truncate_tool_output(result.output.trim_end())
        };

        ToolResult {
            llm_content: content,
            return_display: display,
            error: failure.map(|(kind, message)| ToolFailure { kind, message }),
        }
    }
}

fn opt_to_string(value: Option<i32>) -> String {
    value.map_or_else(|| "(none)".to_owned(), |v| v.to_string())
}

impl ToolInvocation for ShellInvocation {
    fn tool_name(&self) -> &str {
        SHELL_TOOL_NAME
    }

    fn description(&self) -> String {
        let mut text = self.command.clone();
        if let Some(dir) = &self.directory {
            let _ = write!(text, " [in {dir}]");
        }
        if let Some(desc) = &self.description {
            let _ = write!(text, " ({})", desc.replace('\n', " "));
        }
        text
    }

    fn confirmation_query<'a>(
        &'a self,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ConfirmationQuery, ToolError>> {
        Box::pin(std::future::ready(Ok(ConfirmationQuery::Exec {
            command: self.command.clone(),
        })))
    }

    fn execute(
        &self,
        cancel: CancellationToken,
        events: Option<ToolEventTx>,
    ) -> BoxFuture<'_, ToolResult> {
        Box::pin(async move {
            if let Some(tx) = &events {
                let _ = tx.send(ToolEvent::Started {
                    tool_name: SHELL_TOOL_NAME.to_owned(),
                    description: self.description(),
                });
            }
            let result = self.run(cancel, events.clone()).await;
            if let Some(tx) = &events {
                let _ = tx.send(ToolEvent::Completed {
                    tool_name: SHELL_TOOL_NAME.to_owned(),
                    success: !result.is_error(),
                });
            }
            result
        })
    }
}
