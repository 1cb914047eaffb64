//! Confirmation gate: decides whether a built invocation needs the user's
//! approval and records "always allow" answers for the rest of the session.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;

use crate::command_policy::{check_command_permissions, command_root};
use crate::executor::{ConfirmationQuery, ToolError, ToolInvocation};
use crate::permissions::{ApprovalMode, ToolPolicy};

/// User's answer to a confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    ProceedOnce,
    ProceedAlways,
    ProceedAlwaysServer,
    ProceedAlwaysTool,
    ModifyWithEditor,
    Cancel,
}

impl ConfirmationOutcome {
    /// Whether the call may run after this answer.
    #[must_use]
    pub fn proceeds(self) -> bool {
        matches!(
            self,
            Self::ProceedOnce
                | Self::ProceedAlways
                | Self::ProceedAlwaysServer
                | Self::ProceedAlwaysTool
        )
    }
}

#[derive(Debug, Default)]
struct Allowlist {
    servers: BTreeSet<String>,
    tools: BTreeSet<String>,
    shell_prefixes: Vec<String>,
}

#[derive(Debug, Default)]
struct SessionState {
    allowlist: Allowlist,
    mode: ApprovalMode,
}

/// Per-session approvals: the allowlist plus the current approval mode.
///
/// Lives for one session only; create a fresh instance per session and
/// share it between the gate and the details it hands out.
#[derive(Debug, Default)]
pub struct SessionApprovals {
    state: RwLock<SessionState>,
}

impl SessionApprovals {
    #[must_use]
    pub fn new(mode: ApprovalMode) -> Self {
        Self {
            state: RwLock::new(SessionState {
                allowlist: Allowlist::default(),
                mode,
            }),
        }
    }

    #[must_use]
    pub fn mode(&self) -> ApprovalMode {
        self.state.read().unwrap_or_else(PoisonError::into_inner).mode
    }

    pub fn set_mode(&self, mode: ApprovalMode) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.mode != mode {
            tracing::info!(from = %state.mode, to = %mode, "approval mode changed");
            state.mode = mode;
        }
    }

    pub fn allow_server(&self, server: &str) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.allowlist.servers.insert(server.to_owned());
    }

    pub fn allow_tool(&self, server: &str, tool: &str) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.allowlist.tools.insert(tool_key(server, tool));
    }

    pub fn allow_shell_prefixes<I, S>(&self, prefixes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        for prefix in prefixes {
            let prefix = prefix.into();
            if !state.allowlist.shell_prefixes.contains(&prefix) {
                state.allowlist.shell_prefixes.push(prefix);
            }
        }
    }

    #[must_use]
    pub fn is_server_allowed(&self, server: &str) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.allowlist.servers.contains(server)
    }

    #[must_use]
    pub fn is_tool_allowed(&self, server: &str, tool: &str) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.allowlist.tools.contains(&tool_key(server, tool))
    }

    #[must_use]
    pub fn shell_prefixes(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.allowlist.shell_prefixes.clone()
    }
}

fn tool_key(server: &str, tool: &str) -> String {
    format!("{server}.{tool}")
}

/// What the user is being asked to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationKind {
    Edit {
        file_path: PathBuf,
        diff: String,
    },
    Exec {
        command: String,
        /// Roots of the commands that were not already allowed.
        root_commands: Vec<String>,
    },
    Mcp {
        server: String,
        tool: String,
        display_name: String,
    },
    Info {
        prompt: String,
        urls: Vec<String>,
    },
}

/// A pending confirmation. `on_confirm` applies the user's answer to the
/// session that produced it.
#[derive(Debug, Clone)]
pub struct ConfirmationDetails {
    pub title: String,
    pub kind: ConfirmationKind,
    session: Arc<SessionApprovals>,
}

impl ConfirmationDetails {
    /// Root commands joined for display, for exec confirmations.
    #[must_use]
    pub fn root_command(&self) -> Option<String> {
        match &self.kind {
            ConfirmationKind::Exec { root_commands, .. } => Some(root_commands.join(", ")),
            _ => None,
        }
    }

    /// Record the user's answer in the session allowlist or approval mode.
    pub fn on_confirm(&self, outcome: ConfirmationOutcome) {
        match (outcome, &self.kind) {
            (ConfirmationOutcome::ProceedAlwaysServer, ConfirmationKind::Mcp { server, .. }) => {
                tracing::debug!(server = %server, "server added to session allowlist");
                self.session.allow_server(server);
            }
            (
                ConfirmationOutcome::ProceedAlwaysTool | ConfirmationOutcome::ProceedAlways,
                ConfirmationKind::Mcp { server, tool, .. },
            ) => {
                tracing::debug!(server = %server, tool = %tool, "tool added to session allowlist");
                self.session.allow_tool(server, tool);
            }
            (ConfirmationOutcome::ProceedAlways, ConfirmationKind::Exec { root_commands, .. }) => {
                tracing::debug!(roots = ?root_commands, "command roots added to session allowlist");
                self.session.allow_shell_prefixes(root_commands.iter().cloned());
            }
            (
                ConfirmationOutcome::ProceedAlways,
                ConfirmationKind::Edit { .. } | ConfirmationKind::Info { .. },
            ) => self.session.set_mode(ApprovalMode::AutoEdit),
            _ => {}
        }
    }
}

/// Decides whether an invocation must be confirmed before it runs.
#[derive(Debug, Clone)]
pub struct ConfirmationGate {
    policy: ToolPolicy,
    session: Arc<SessionApprovals>,
}

impl ConfirmationGate {
    #[must_use]
    pub fn new(policy: ToolPolicy, session: Arc<SessionApprovals>) -> Self {
        Self { policy, session }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<SessionApprovals> {
        &self.session
    }

    #[must_use]
    pub fn policy(&self) -> &ToolPolicy {
        &self.policy
    }

    /// `Ok(None)` means the call may run without asking.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::PermissionDenied { hard: true, .. }` for shell
    /// commands no confirmation may unlock, and propagates errors from the
    /// invocation's own confirmation query (for example a failed diff read).
    pub async fn should_confirm(
        &self,
        invocation: &dyn ToolInvocation,
        cancel: &CancellationToken,
    ) -> Result<Option<ConfirmationDetails>, ToolError> {
        let mode = self.session.mode();
        let query = invocation.confirmation_query(cancel).await?;
        if mode == ApprovalMode::Yolo {
            // Hard denials hold even when nothing else is asked.
            if let ConfirmationQuery::Exec { ref command } = query {
                let verdict = check_command_permissions(command, &self.policy, None);
                if verdict.is_hard_denial {
                    return Err(hard_denial(verdict.block_reason));
                }
            }
            return Ok(None);
        }

        let kind = match query {
            ConfirmationQuery::None => return Ok(None),
            ConfirmationQuery::Mcp {
                server,
                tool,
                display_name,
                trusted,
            } => {
                if trusted
                    || self.session.is_server_allowed(&server)
                    || self.session.is_tool_allowed(&server, &tool)
                {
                    return Ok(None);
                }
                ConfirmationKind::Mcp {
                    server,
                    tool,
                    display_name,
                }
            }
            ConfirmationQuery::Exec { command } => {
                let session_prefixes = self.session.shell_prefixes();
                let verdict = check_command_permissions(
                    &command,
                    &self.policy,
                    Some(session_prefixes.as_slice()),
                );
                if verdict.is_hard_denial {
                    return Err(hard_denial(verdict.block_reason));
                }
                if verdict.all_allowed {
                    return Ok(None);
                }
                let mut root_commands: Vec<String> = Vec::new();
                for root in verdict
                    .disallowed_commands
                    .iter()
                    .filter_map(|c| command_root(c))
                {
                    if !root_commands.contains(&root) {
                        root_commands.push(root);
                    }
                }
                ConfirmationKind::Exec {
                    command,
                    root_commands,
                }
            }
            ConfirmationQuery::Edit { file_path, diff } => {
                if mode == ApprovalMode::AutoEdit {
                    return Ok(None);
                }
                ConfirmationKind::Edit { file_path, diff }
            }
            ConfirmationQuery::Info { prompt, urls } => {
                if mode == ApprovalMode::AutoEdit {
                    return Ok(None);
                }
                ConfirmationKind::Info { prompt, urls }
            }
        };

        Ok(Some(ConfirmationDetails {
            title: confirmation_title(&kind),
            kind,
            session: Arc::clone(&self.session),
        }))
    }
}

fn hard_denial(reason: Option<String>) -> ToolError {
    ToolError::PermissionDenied {
        reason: reason.unwrap_or_else(|| "command blocked by policy".to_owned()),
        hard: true,
    }
}

fn confirmation_title(kind: &ConfirmationKind) -> String {
    match kind {
        ConfirmationKind::Edit { file_path, .. } => {
            let name = file_path.file_name().map_or_else(
                || file_path.display().to_string(),
                |n| n.to_string_lossy().into_owned(),
            );
            format!("Confirm Edit: {name}")
        }
        ConfirmationKind::Exec { .. } => "Confirm Shell Command".to_owned(),
        ConfirmationKind::Mcp { server, .. } => {
            format!("Confirm MCP Tool Execution ({server})")
        }
        ConfirmationKind::Info { .. } => "Confirm Web Fetch".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{BoxFuture, ToolEventTx, ToolResult};

    struct QueryInvocation(ConfirmationQuery);

    impl ToolInvocation for QueryInvocation {
        fn tool_name(&self) -> &str {
            "test"
        }

        fn description(&self) -> String {
            "test invocation".to_owned()
        }

        fn confirmation_query<'a>(
            &'a self,
            _cancel: &'a CancellationToken,
        ) -> BoxFuture<'a, Result<ConfirmationQuery, ToolError>> {
            Box::pin(std::future::ready(Ok(self.0.clone())))
        }

        fn execute(
            &self,
            _cancel: CancellationToken,
            _events: Option<ToolEventTx>,
        ) -> BoxFuture<'_, ToolResult> {
            Box::pin(std::future::ready(ToolResult::success("ok", "ok")))
        }
    }

    fn exec(command: &str) -> QueryInvocation {
        QueryInvocation(ConfirmationQuery::Exec {
            command: command.to_owned(),
        })
    }

    fn mcp(server: &str, tool: &str, trusted: bool) -> QueryInvocation {
        QueryInvocation(ConfirmationQuery::Mcp {
            server: server.to_owned(),
            tool: tool.to_owned(),
            display_name: tool.to_owned(),
            trusted,
        })
    }

    fn edit() -> QueryInvocation {
        QueryInvocation(ConfirmationQuery::Edit {
            file_path: PathBuf::from("/work/src/main.rs"),
            diff: "-a\n+b\n".to_owned(),
        })
    }

    fn gate(policy: ToolPolicy, mode: ApprovalMode) -> ConfirmationGate {
        ConfirmationGate::new(policy, Arc::new(SessionApprovals::new(mode)))
    }

    async fn ask(gate: &ConfirmationGate, inv: &QueryInvocation) -> Option<ConfirmationDetails> {
        gate.should_confirm(inv, &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn yolo_skips_everything() {
        let g = gate(ToolPolicy::default(), ApprovalMode::Yolo);
        assert!(ask(&g, &exec("rm -rf build")).await.is_none());
        assert!(ask(&g, &mcp("s", "t", false)).await.is_none());
        assert!(ask(&g, &edit()).await.is_none());
    }

    #[tokio::test]
    async fn yolo_still_enforces_hard_denials() {
        let policy = ToolPolicy {
            excluded: vec!["run_shell_command(rm)".to_owned()],
            ..ToolPolicy::default()
        };
        let g = gate(policy, ApprovalMode::Yolo);
        let err = g
            .should_confirm(&exec("echo $(whoami)"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_hard_denial());
        let err = g
            .should_confirm(&exec("rm -rf build"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_hard_denial());
    }

    #[tokio::test]
    async fn no_query_needs_no_confirmation() {
        let g = gate(ToolPolicy::default(), ApprovalMode::Default);
        let inv = QueryInvocation(ConfirmationQuery::None);
        assert!(ask(&g, &inv).await.is_none());
    }

    #[tokio::test]
    async fn exec_soft_denial_lists_roots() {
        let g = gate(ToolPolicy::default(), ApprovalMode::Default);
        let details = ask(&g, &exec("git status && npm test && git log")).await.unwrap();
        assert_eq!(details.root_command().as_deref(), Some("git, npm"));
        assert_eq!(details.title, "Confirm Shell Command");
    }

    #[tokio::test]
    async fn exec_hard_denial_is_error() {
        let g = gate(ToolPolicy::default(), ApprovalMode::Default);
        let err = g
            .should_confirm(&exec("echo $(id)"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_hard_denial());
    }

    #[tokio::test]
    async fn exec_proceed_always_allowlists_roots() {
        let g = gate(ToolPolicy::default(), ApprovalMode::Default);
        let details = ask(&g, &exec("git status")).await.unwrap();
        details.on_confirm(ConfirmationOutcome::ProceedAlways);
        assert!(ask(&g, &exec("git   log --oneline")).await.is_none());
        assert!(ask(&g, &exec("npm test")).await.is_some());
    }

    #[tokio::test]
    async fn exec_proceed_always_looks_through_shell_wrapper() {
        let g = gate(ToolPolicy::default(), ApprovalMode::Default);
        let details = ask(&g, &exec(r#"bash -c "ls""#)).await.unwrap();
        assert_eq!(details.root_command().as_deref(), Some("ls"));
        details.on_confirm(ConfirmationOutcome::ProceedAlways);
        assert!(ask(&g, &exec(r#"bash -c "ls -la""#)).await.is_none());
        let details = ask(&g, &exec(r#"bash -c "rm -rf ~/important""#)).await.unwrap();
        assert_eq!(details.root_command().as_deref(), Some("rm"));
    }

    #[tokio::test]
    async fn exec_proceed_once_does_not_allowlist() {
        let g = gate(ToolPolicy::default(), ApprovalMode::Default);
        let details = ask(&g, &exec("git status")).await.unwrap();
        details.on_confirm(ConfirmationOutcome::ProceedOnce);
        assert!(ask(&g, &exec("git status")).await.is_some());
        assert!(g.session().shell_prefixes().is_empty());
    }

    #[tokio::test]
    async fn exec_global_prefix_skips_confirmation() {
        let policy = ToolPolicy {
            allowed: vec!["run_shell_command(ls)".into()],
            ..ToolPolicy::default()
        };
        let g = gate(policy, ApprovalMode::Default);
        assert!(ask(&g, &exec("ls -la")).await.is_none());
    }

    #[tokio::test]
    async fn exec_still_asks_in_auto_edit() {
        let g = gate(ToolPolicy::default(), ApprovalMode::AutoEdit);
        assert!(ask(&g, &exec("make")).await.is_some());
    }

    #[tokio::test]
    async fn trusted_mcp_server_skips_confirmation() {
        let g = gate(ToolPolicy::default(), ApprovalMode::Default);
        assert!(ask(&g, &mcp("s", "t", true)).await.is_none());
    }

    #[tokio::test]
    async fn mcp_always_server_covers_all_tools() {
        let g = gate(ToolPolicy::default(), ApprovalMode::Default);
        let details = ask(&g, &mcp("docs", "search", false)).await.unwrap();
        details.on_confirm(ConfirmationOutcome::ProceedAlwaysServer);
        assert!(ask(&g, &mcp("docs", "search", false)).await.is_none());
        assert!(ask(&g, &mcp("docs", "fetch", false)).await.is_none());
        assert!(ask(&g, &mcp("other", "search", false)).await.is_some());
    }

    #[tokio::test]
    async fn mcp_always_tool_covers_one_tool() {
        let g = gate(ToolPolicy::default(), ApprovalMode::Default);
        let details = ask(&g, &mcp("docs", "search", false)).await.unwrap();
        details.on_confirm(ConfirmationOutcome::ProceedAlwaysTool);
        assert!(ask(&g, &mcp("docs", "search", false)).await.is_none());
        assert!(ask(&g, &mcp("docs", "fetch", false)).await.is_some());
    }

    #[tokio::test]
    async fn edit_proceed_always_switches_to_auto_edit() {
        let g = gate(ToolPolicy::default(), ApprovalMode::Default);
        let details = ask(&g, &edit()).await.unwrap();
        assert_eq!(details.title, "Confirm Edit: main.rs");
        details.on_confirm(ConfirmationOutcome::ProceedAlways);
        assert_eq!(g.session().mode(), ApprovalMode::AutoEdit);
        assert!(ask(&g, &edit()).await.is_none());
    }

    #[tokio::test]
    async fn cancel_and_modify_are_no_ops() {
        let g = gate(ToolPolicy::default(), ApprovalMode::Default);
        let details = ask(&g, &mcp("docs", "search", false)).await.unwrap();
        details.on_confirm(ConfirmationOutcome::Cancel);
        details.on_confirm(ConfirmationOutcome::ModifyWithEditor);
        assert!(ask(&g, &mcp("docs", "search", false)).await.is_some());
    }

    #[tokio::test]
    async fn sessions_do_not_share_allowlists() {
        let a = gate(ToolPolicy::default(), ApprovalMode::Default);
        let b = gate(ToolPolicy::default(), ApprovalMode::Default);
        let details = ask(&a, &mcp("docs", "search", false)).await.unwrap();
        details.on_confirm(ConfirmationOutcome::ProceedAlwaysServer);
        assert!(ask(&b, &mcp("docs", "search", false)).await.is_some());
    }

    #[test]
    fn outcome_proceeds() {
        assert!(ConfirmationOutcome::ProceedOnce.proceeds());
        assert!(!ConfirmationOutcome::Cancel.proceeds());
        assert!(!ConfirmationOutcome::ModifyWithEditor.proceeds());
    }
}
