use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use halyard_llm::LlmProvider;
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::edit_fix::{EditParams, ensure_correct_edit};
use crate::executor::{
    BoxFuture, ConfirmationQuery, Icon, Tool, ToolDeclaration, ToolError, ToolErrorKind, ToolEvent,
    ToolEventTx, ToolFailure, ToolInvocation, ToolLocation, ToolResult, deserialize_params,
    parameters_schema, truncate_tool_output,
};
use crate::workspace::Workspace;

fn resolve_file(workspace: &Workspace, file_path: &str) -> Result<PathBuf, ToolError> {
    if file_path.trim().is_empty() {
        return Err(ToolError::InvalidParams {
            message: "file_path cannot be empty".to_owned(),
        });
    }
    let path = workspace.resolve(Path::new(file_path))?;
    if path.is_dir() {
        return Err(ToolError::InvalidParams {
            message: format!("path is a directory, not a file: {}", path.display()),
        });
    }
    Ok(path)
}

/// Unified diff of a pending change, as shown in edit confirmations.
fn unified_diff(path: &Path, old: &str, new: &str) -> String {
    let name = path.display().to_string();
    similar::TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("{name} (current)"), &format!("{name} (proposed)"))
        .to_string()
}

/// Read the file, treating a missing file as `None`.
async fn read_existing(path: &Path) -> Result<Option<String>, std::io::Error> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

async fn write_creating_parents(path: &Path, content: &str) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await
}

fn notify(events: Option<&ToolEventTx>, event: ToolEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

// read_file

#[derive(Debug, Deserialize, JsonSchema)]
struct ReadFileParams {
    /// Path of the file to read, absolute or relative to the workspace root.
    file_path: String,
    /// Zero-based line to start reading from.
    #[serde(default)]
    offset: Option<usize>,
    /// Maximum number of lines to read.
    #[serde(default)]
    limit: Option<usize>,
}

/// Reads a text file inside the workspace, optionally a line range of it.
#[derive(Debug)]
pub struct ReadFileTool {
    declaration: ToolDeclaration,
    workspace: Workspace,
}

impl ReadFileTool {
    #[must_use]
    pub fn new(workspace_root: PathBuf) -> Self {
        Self {
            declaration: ToolDeclaration {
                name: "read_file".to_owned(),
                display_name: "ReadFile".to_owned(),
                description: "Reads a text file and returns its lines prefixed with line \
                              numbers. Use offset and limit to page through large files."
                    .to_owned(),
                icon: Icon::FileSearch,
                parameters: parameters_schema::<ReadFileParams>(),
                is_output_markdown: true,
                can_update_output: false,
            },
            workspace: Workspace::new(workspace_root),
        }
    }
}

impl Tool for ReadFileTool {
    fn declaration(&self) -> &ToolDeclaration {
        &self.declaration
    }

    fn build(&self, params: serde_json::Value) -> Result<Box<dyn ToolInvocation>, ToolError> {
        let params: ReadFileParams = deserialize_params(params)?;
        if params.limit == Some(0) {
            return Err(ToolError::InvalidParams {
                message: "limit must be greater than 0".to_owned(),
            });
        }
        let path = resolve_file(&self.workspace, &params.file_path)?;
        Ok(Box::new(ReadFileInvocation {
            path,
            offset: params.offset.unwrap_or(0),
            limit: params.limit,
        }))
    }
}

#[derive(Debug)]
struct ReadFileInvocation {
    path: PathBuf,
    offset: usize,
    limit: Option<usize>,
}

impl ReadFileInvocation {
    async fn run(&self) -> ToolResult {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return ToolResult::failure(
                    ToolErrorKind::Execution,
                    format!("file not found: {}", self.path.display()),
                );
            }
            Err(e) => return ToolResult::from_error(&ToolError::Execution(e)),
        };

        let total = content.lines().count();
        let limit = self.limit.unwrap_or(usize::MAX);
        let selected: Vec<String> = content
            .lines()
            .skip(self.offset)
            .take(limit)
            .enumerate()
            .map(|(i, line)| format!("{:>4}\t{line}", self.offset + i + 1))
            .collect();

        let mut body = String::new();
        let end = self.offset + selected.len();
        if self.offset > 0 || end < total {
            let _ = writeln!(
                body,
                "[showing lines {}-{end} of {total}]",
                (self.offset + 1).min(end.max(1))
            );
        }
        body.push_str(&selected.join("\n"));
        let body = truncate_tool_output(&body);
        ToolResult::success(body, format!("Read {} lines", selected.len()))
    }
}

impl ToolInvocation for ReadFileInvocation {
    fn tool_name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> String {
        self.path.display().to_string()
    }

    fn locations(&self) -> Vec<ToolLocation> {
        vec![ToolLocation {
            path: self.path.clone(),
            line: Some(self.offset + 1),
        }]
    }

    fn execute(
        &self,
        _cancel: CancellationToken,
        events: Option<ToolEventTx>,
    ) -> BoxFuture<'_, ToolResult> {
        Box::pin(async move {
            let result = self.run().await;
            notify(
                events.as_ref(),
                ToolEvent::Completed {
                    tool_name: self.tool_name().to_owned(),
                    success: !result.is_error(),
                },
            );
            result
        })
    }
}

// write_file

#[derive(Debug, Deserialize, JsonSchema)]
struct WriteFileParams {
    /// Path of the file to write, absolute or relative to the workspace root.
    file_path: String,
    /// Full content to write.
    content: String,
}

/// Creates or overwrites a file inside the workspace.
#[derive(Debug)]
pub struct WriteFileTool {
    declaration: ToolDeclaration,
    workspace: Workspace,
}

impl WriteFileTool {
    #[must_use]
    pub fn new(workspace_root: PathBuf) -> Self {
        Self {
            declaration: ToolDeclaration {
                name: "write_file".to_owned(),
                display_name: "WriteFile".to_owned(),
                description: "Writes content to a file, creating it and any missing parent \
                              directories, or overwriting it if it exists."
                    .to_owned(),
                icon: Icon::Pencil,
                parameters: parameters_schema::<WriteFileParams>(),
                is_output_markdown: true,
                can_update_output: false,
            },
            workspace: Workspace::new(workspace_root),
        }
    }
}

impl Tool for WriteFileTool {
    fn declaration(&self) -> &ToolDeclaration {
        &self.declaration
    }

    fn build(&self, params: serde_json::Value) -> Result<Box<dyn ToolInvocation>, ToolError> {
        let params: WriteFileParams = deserialize_params(params)?;
        let path = resolve_file(&self.workspace, &params.file_path)?;
        Ok(Box::new(WriteFileInvocation {
            path,
            content: params.content,
        }))
    }
}

#[derive(Debug)]
struct WriteFileInvocation {
    path: PathBuf,
    content: String,
}

impl ToolInvocation for WriteFileInvocation {
    fn tool_name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> String {
        format!("Writing to {}", self.path.display())
    }

    fn locations(&self) -> Vec<ToolLocation> {
        vec![ToolLocation {
            path: self.path.clone(),
            line: None,
        }]
    }

    fn confirmation_query<'a>(
        &'a self,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ConfirmationQuery, ToolError>> {
        Box::pin(async move {
            let current = read_existing(&self.path).await?.unwrap_or_default();
            Ok(ConfirmationQuery::Edit {
                file_path: self.path.clone(),
                diff: unified_diff(&self.path, &current, &self.content),
            })
        })
    }

    fn execute(
        &self,
        cancel: CancellationToken,
        events: Option<ToolEventTx>,
    ) -> BoxFuture<'_, ToolResult> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return ToolResult::from_error(&ToolError::Cancelled);
            }
            let existed = self.path.exists();
            let result = match write_creating_parents(&self.path, &self.content).await {
                Ok(()) => {
                    let msg = if existed {
                        format!("Successfully overwrote file: {}", self.path.display())
                    } else {
                        format!(
                            "Successfully created and wrote to new file: {}",
                            self.path.display()
                        )
                    };
                    ToolResult::success(msg.clone(), msg)
                }
                Err(e) => ToolResult::from_error(&ToolError::Execution(e)),
            };
            notify(
                events.as_ref(),
                ToolEvent::Completed {
                    tool_name: self.tool_name().to_owned(),
                    success: !result.is_error(),
                },
            );
            result
        })
    }
}

// replace

fn default_expected_replacements() -> usize {
    1
}

#[derive(Debug, Deserialize, JsonSchema)]
struct EditFileParams {
    /// Path of the file to modify, absolute or relative to the workspace root.
    file_path: String,
    /// Exact text to replace, including surrounding context so it is unique.
    /// Empty to create a new file.
    old_string: String,
    /// Text to replace `old_string` with.
    new_string: String,
    /// Number of occurrences to replace.
    #[serde(default = "default_expected_replacements")]
    expected_replacements: usize,
}

/// Replaces text in a file, repairing near-miss targets with the model.
#[derive(Debug)]
pub struct EditFileTool<P> {
    declaration: ToolDeclaration,
    workspace: Workspace,
    corrector: Arc<P>,
}

impl<P: LlmProvider + 'static> EditFileTool<P> {
    #[must_use]
    pub fn new(workspace_root: PathBuf, corrector: Arc<P>) -> Self {
        Self {
            declaration: ToolDeclaration {
                name: "replace".to_owned(),
                display_name: "Edit".to_owned(),
                description: "Replaces text within a file. By default replaces a single \
                              occurrence; set expected_replacements to replace several. \
                              old_string must match the file exactly, including whitespace."
                    .to_owned(),
                icon: Icon::Pencil,
                parameters: parameters_schema::<EditFileParams>(),
                is_output_markdown: true,
                can_update_output: false,
            },
            workspace: Workspace::new(workspace_root),
            corrector,
        }
    }
}

impl<P: LlmProvider + 'static> Tool for EditFileTool<P> {
    fn declaration(&self) -> &ToolDeclaration {
        &self.declaration
    }

    fn build(&self, params: serde_json::Value) -> Result<Box<dyn ToolInvocation>, ToolError> {
        let params: EditFileParams = deserialize_params(params)?;
        if params.expected_replacements == 0 {
            return Err(ToolError::InvalidParams {
                message: "expected_replacements must be at least 1".to_owned(),
            });
        }
        if !params.old_string.is_empty() && params.old_string == params.new_string {
            return Err(ToolError::InvalidParams {
                message: "old_string and new_string are identical, nothing to change".to_owned(),
            });
        }
        let path = resolve_file(&self.workspace, &params.file_path)?;
        Ok(Box::new(EditFileInvocation {
            path,
            params: EditParams {
                old_string: params.old_string,
                new_string: params.new_string,
                expected_replacements: params.expected_replacements,
            },
            corrector: Arc::clone(&self.corrector),
            plan: OnceCell::new(),
        }))
    }
}

/// Computed outcome of an edit, shared by confirmation and execution.
#[derive(Debug, Clone)]
struct EditPlan {
    original: String,
    updated: String,
    is_new_file: bool,
    replacements: usize,
}

struct EditFileInvocation<P> {
    path: PathBuf,
    params: EditParams,
    corrector: Arc<P>,
    plan: OnceCell<Result<EditPlan, ToolFailure>>,
}

impl<P: LlmProvider> EditFileInvocation<P> {
    async fn plan(&self, cancel: &CancellationToken) -> &Result<EditPlan, ToolFailure> {
        self.plan.get_or_init(|| self.compute_plan(cancel)).await
    }

    async fn compute_plan(&self, cancel: &CancellationToken) -> Result<EditPlan, ToolFailure> {
        let fail = |kind, message: String| ToolFailure { kind, message };
        let current = read_existing(&self.path)
            .await
            .map_err(|e| fail(ToolErrorKind::System, e.to_string()))?;

        let Some(original) = current else {
            if self.params.old_string.is_empty() {
                return Ok(EditPlan {
                    original: String::new(),
                    updated: self.params.new_string.clone(),
                    is_new_file: true,
                    replacements: 0,
                });
            }
            return Err(fail(
                ToolErrorKind::Execution,
                format!(
                    "file not found: {}. Use an empty old_string to create a new file",
                    self.path.display()
                ),
            ));
        };
        if self.params.old_string.is_empty() {
            return Err(fail(
                ToolErrorKind::Execution,
                format!(
                    "attempted to create a file that already exists: {}",
                    self.path.display()
                ),
            ));
        }

        let corrected =
            ensure_correct_edit(&original, self.params.clone(), self.corrector.as_ref(), cancel)
                .await;
        if corrected.occurrences == 0 {
            let found = original.matches(&self.params.old_string).count();
            let expected = self.params.expected_replacements;
            let message = if found == 0 {
                format!(
                    "could not find the string to replace in {}. Re-read the file and make sure \
                     old_string matches exactly, including whitespace and indentation",
                    self.path.display()
                )
            } else {
                format!(
                    "expected {expected} occurrence(s) but found {found} in {}",
                    self.path.display()
                )
            };
            return Err(fail(ToolErrorKind::Execution, message));
        }

        let params = corrected.params;
        let updated = original.replace(&params.old_string, &params.new_string);
        Ok(EditPlan {
            original,
            updated,
            is_new_file: false,
            replacements: corrected.occurrences,
        })
    }
}

impl<P: LlmProvider + 'static> ToolInvocation for EditFileInvocation<P> {
    fn tool_name(&self) -> &str {
        "replace"
    }

    fn description(&self) -> String {
        let snippet = |s: &str| {
            let line = s.lines().next().unwrap_or_default();
            let end = crate::executor::floor_char_boundary(line, 30);
            if end < line.len() || s.contains('\n') {
                format!("{}...", &line[..end])
            } else {
                line.to_owned()
            }
        };
        if self.params.old_string.is_empty() {
            return format!("Create {}", self.path.display());
        }
        format!(
            "{}: {} => {}",
            self.path.display(),
            snippet(&self.params.old_string),
            snippet(&self.params.new_string)
        )
    }

    fn locations(&self) -> Vec<ToolLocation> {
        vec![ToolLocation {
            path: self.path.clone(),
            line: None,
        }]
    }

    fn confirmation_query<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ConfirmationQuery, ToolError>> {
        Box::pin(async move {
            // A failing plan is reported by execute(); nothing to confirm.
            let Ok(plan) = self.plan(cancel).await else {
                return Ok(ConfirmationQuery::None);
            };
            Ok(ConfirmationQuery::Edit {
                file_path: self.path.clone(),
                diff: unified_diff(&self.path, &plan.original, &plan.updated),
            })
        })
    }

    fn execute(
        &self,
        cancel: CancellationToken,
        events: Option<ToolEventTx>,
    ) -> BoxFuture<'_, ToolResult> {
        Box::pin(async move {
            let result = match self.plan(&cancel).await {
                Err(failure) => ToolResult::failure(failure.kind, failure.message.clone()),
                Ok(_) if cancel.is_cancelled() => ToolResult::from_error(&ToolError::Cancelled),
                Ok(plan) => match write_creating_parents(&self.path, &plan.updated).await {
                    Ok(()) => {
                        let msg = if plan.is_new_file {
                            format!("Created new file: {}", self.path.display())
                        } else {
                            format!(
                                "Successfully modified file: {} ({} replacements)",
                                self.path.display(),
                                plan.replacements
                            )
                        };
                        ToolResult::success(
                            msg,
                            unified_diff(&self.path, &plan.original, &plan.updated),
                        )
                    }
                    Err(e) => ToolResult::from_error(&ToolError::Execution(e)),
                },
            };
            notify(
                events.as_ref(),
                ToolEvent::Completed {
                    tool_name: self.tool_name().to_owned(),
                    success: !result.is_error(),
                },
            );
            result
        })
    }
}
