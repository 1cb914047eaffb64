//! Runs the function calls of one model turn: build, confirm, execute.

use std::sync::Arc;

use halyard_tools::{
    BoxFuture, ConfirmationDetails, ConfirmationGate, ConfirmationOutcome, ToolCatalog,
    ToolErrorKind, ToolEvent, ToolEventTx, ToolResult,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::loop_guard::{GenerationEvent, LoopGuard};

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// Result of one function call, ready to be sent back to the model.
#[derive(Debug, Clone)]
pub struct CallResult {
    pub call_id: String,
    pub name: String,
    pub result: ToolResult,
}

/// How a turn ended. Each variant carries the results gathered so far.
#[derive(Debug)]
pub enum TurnOutcome {
    Completed(Vec<CallResult>),
    Cancelled(Vec<CallResult>),
    LoopDetected(Vec<CallResult>),
}

impl TurnOutcome {
    #[must_use]
    pub fn results(&self) -> &[CallResult] {
        match self {
            Self::Completed(r) | Self::Cancelled(r) | Self::LoopDetected(r) => r,
        }
    }

    #[must_use]
    pub fn into_results(self) -> Vec<CallResult> {
        match self {
            Self::Completed(r) | Self::Cancelled(r) | Self::LoopDetected(r) => r,
        }
    }
}

/// Asks the user about a call the gate flagged.
pub trait Approver: Send + Sync {
    fn approve<'a>(&'a self, details: &'a ConfirmationDetails)
    -> BoxFuture<'a, ConfirmationOutcome>;
}

/// Answers every prompt the same way. Used for non-interactive runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedApprover(pub ConfirmationOutcome);

impl Approver for FixedApprover {
    fn approve<'a>(
        &'a self,
        _details: &'a ConfirmationDetails,
    ) -> BoxFuture<'a, ConfirmationOutcome> {
        Box::pin(std::future::ready(self.0))
    }
}

pub struct TurnScheduler {
    catalog: Arc<ToolCatalog>,
    gate: ConfirmationGate,
    approver: Arc<dyn Approver>,
    loop_guard: LoopGuard,
    events: Option<ToolEventTx>,
}

impl TurnScheduler {
    #[must_use]
    pub fn new(
        catalog: Arc<ToolCatalog>,
        gate: ConfirmationGate,
        approver: Arc<dyn Approver>,
    ) -> Self {
        Self {
            catalog,
            gate,
            approver,
            loop_guard: LoopGuard::new(),
            events: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: ToolEventTx) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn gate(&self) -> &ConfirmationGate {
        &self.gate
    }

    #[must_use]
    pub fn loop_guard(&self) -> &LoopGuard {
        &self.loop_guard
    }

    /// Start a new user prompt: loop tracking begins from scratch.
    pub fn start_prompt(&mut self) {
        self.loop_guard.reset();
    }

    /// Feed a streamed non-tool event (model text, thoughts) to the loop guard.
    pub fn observe(&mut self, event: &GenerationEvent) -> bool {
        self.loop_guard.add_and_check(event)
    }

    /// Run `calls` in order.
    ///
    /// A failing or declined call does not stop the turn; its failure is
    /// recorded in its own result. Only cancellation or a detected loop end
    /// the turn early.
    pub async fn run_turn(
        &mut self,
        calls: Vec<FunctionCall>,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            if cancel.is_cancelled() {
                tracing::info!(remaining_from = %call.id, "turn cancelled");
                return TurnOutcome::Cancelled(results);
            }

            let event = GenerationEvent::ToolCall {
                name: call.name.clone(),
                args: call.args.clone(),
            };
            if self.loop_guard.add_and_check(&event) {
                tracing::warn!(tool = %call.name, "stopping turn: tool call loop");
                return TurnOutcome::LoopDetected(results);
            }

            let result = self.run_call(&call, cancel).await;
            let cancelled = result
                .error
                .as_ref()
                .is_some_and(|e| e.kind == ToolErrorKind::Cancelled)
                && cancel.is_cancelled();
            results.push(CallResult {
                call_id: call.id,
                name: call.name,
                result,
            });
            if cancelled {
                return TurnOutcome::Cancelled(results);
            }
        }
        TurnOutcome::Completed(results)
    }

    async fn run_call(&self, call: &FunctionCall, cancel: &CancellationToken) -> ToolResult {
        let invocation = match self.catalog.build(&call.name, call.args.clone()) {
            Ok(inv) => inv,
            Err(e) => {
                tracing::debug!(tool = %call.name, error = %e, "tool call rejected");
                return ToolResult::from_error(&e);
            }
        };

        let details = match self.gate.should_confirm(invocation.as_ref(), cancel).await {
            Ok(details) => details,
            Err(e) => {
                tracing::info!(tool = %call.name, error = %e, "tool call denied");
                return ToolResult::from_error(&e);
            }
        };

        if let Some(details) = details {
            let outcome = tokio::select! {
                outcome = self.approver.approve(&details) => outcome,
                () = cancel.cancelled() => {
                    return ToolResult::failure(ToolErrorKind::Cancelled, "turn cancelled");
                }
            };
            details.on_confirm(outcome);
            if !outcome.proceeds() {
                tracing::info!(tool = %call.name, ?outcome, "tool call declined");
                self.notify_declined(&call.name);
                return ToolResult::failure(
                    ToolErrorKind::Cancelled,
                    format!("user declined to run {}", invocation.description()),
                );
            }
        }

        tracing::debug!(tool = %call.name, "executing tool call");
        invocation.execute(cancel.clone(), self.events.clone()).await
    }

    fn notify_declined(&self, tool_name: &str) {
        if let Some(tx) = &self.events {
            let _ = tx.send(ToolEvent::Completed {
                tool_name: tool_name.to_owned(),
                success: false,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use halyard_tools::{
        ApprovalMode, ConfirmationQuery, Icon, SessionApprovals, Tool, ToolDeclaration, ToolError,
        ToolInvocation, ToolPolicy,
    };
    use serde_json::json;

    use super::*;

    struct CountingTool {
        decl: ToolDeclaration,
        runs: Arc<AtomicUsize>,
        needs_confirmation: bool,
    }

    struct CountingInvocation {
        text: String,
        runs: Arc<AtomicUsize>,
        needs_confirmation: bool,
    }

    impl ToolInvocation for CountingInvocation {
        fn tool_name(&self) -> &str {
            "note"
        }

        fn description(&self) -> String {
            format!("note {}", self.text)
        }

        fn confirmation_query<'a>(
            &'a self,
            _cancel: &'a CancellationToken,
        ) -> BoxFuture<'a, Result<ConfirmationQuery, ToolError>> {
            let query = if self.needs_confirmation {
                ConfirmationQuery::Edit {
                    file_path: "notes.txt".into(),
                    diff: format!("+{}", self.text),
                }
            } else {
                ConfirmationQuery::None
            };
            Box::pin(std::future::ready(Ok(query)))
        }

        fn execute(
            &self,
            cancel: CancellationToken,
            _events: Option<ToolEventTx>,
        ) -> BoxFuture<'_, ToolResult> {
            Box::pin(async move {
                if cancel.is_cancelled() {
                    return ToolResult::failure(ToolErrorKind::Cancelled, "cancelled");
                }
                self.runs.fetch_add(1, Ordering::SeqCst);
                ToolResult::success(format!("noted {}", self.text), "")
            })
        }
    }

    impl Tool for CountingTool {
        fn declaration(&self) -> &ToolDeclaration {
            &self.decl
        }

        fn build(&self, params: Value) -> Result<Box<dyn ToolInvocation>, ToolError> {
            let text = params["text"].as_str().unwrap_or_default().to_owned();
            Ok(Box::new(CountingInvocation {
                text,
                runs: Arc::clone(&self.runs),
                needs_confirmation: self.needs_confirmation,
            }))
        }
    }

    struct RecordingApprover {
        answer: ConfirmationOutcome,
        asked: Mutex<Vec<String>>,
    }

    impl Approver for RecordingApprover {
        fn approve<'a>(
            &'a self,
            details: &'a ConfirmationDetails,
        ) -> BoxFuture<'a, ConfirmationOutcome> {
            self.asked.lock().unwrap().push(details.title.clone());
            Box::pin(std::future::ready(self.answer))
        }
    }

    fn setup(
        needs_confirmation: bool,
        answer: ConfirmationOutcome,
    ) -> (TurnScheduler, Arc<AtomicUsize>, Arc<RecordingApprover>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut catalog = ToolCatalog::new();
        catalog.register(Arc::new(CountingTool {
            decl: ToolDeclaration {
                name: "note".into(),
                display_name: "Note".into(),
                description: "Record a note".into(),
                icon: Icon::Pencil,
                parameters: json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
                is_output_markdown: false,
                can_update_output: false,
            },
            runs: Arc::clone(&runs),
            needs_confirmation,
        }));
        let approver = Arc::new(RecordingApprover {
            answer,
            asked: Mutex::new(Vec::new()),
        });
        let gate = ConfirmationGate::new(
            ToolPolicy::default(),
            Arc::new(SessionApprovals::new(ApprovalMode::Default)),
        );
        let scheduler = TurnScheduler::new(
            Arc::new(catalog),
            gate,
            Arc::clone(&approver) as Arc<dyn Approver>,
        );
        (scheduler, runs, approver)
    }

    fn note(id: &str, text: &str) -> FunctionCall {
        FunctionCall {
            id: id.into(),
            name: "note".into(),
            args: json!({"text": text}),
        }
    }

    #[tokio::test]
    async fn runs_every_call_in_order() {
        let (mut scheduler, runs, _) = setup(false, ConfirmationOutcome::ProceedOnce);
        let outcome = scheduler
            .run_turn(vec![note("1", "a"), note("2", "b")], &CancellationToken::new())
            .await;
        let TurnOutcome::Completed(results) = outcome else {
            panic!("expected completed turn");
        };
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(results[0].call_id, "1");
        assert_eq!(results[1].result.llm_content, "noted b");
    }

    #[tokio::test]
    async fn invalid_call_is_captured_and_turn_continues() {
        let (mut scheduler, runs, _) = setup(false, ConfirmationOutcome::ProceedOnce);
        let calls = vec![
            FunctionCall {
                id: "1".into(),
                name: "missing_tool".into(),
                args: json!({}),
            },
            FunctionCall {
                id: "2".into(),
                name: "note".into(),
                args: json!({"text": 5}),
            },
            note("3", "ok"),
        ];
        let outcome = scheduler.run_turn(calls, &CancellationToken::new()).await;
        let results = outcome.results();
        assert!(matches!(outcome, TurnOutcome::Completed(_)));
        assert_eq!(
            results[0].result.error.as_ref().unwrap().kind,
            ToolErrorKind::Validation
        );
        assert_eq!(
            results[1].result.error.as_ref().unwrap().kind,
            ToolErrorKind::Validation
        );
        assert!(!results[2].result.is_error());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn declined_call_does_not_run() {
        let (mut scheduler, runs, approver) = setup(true, ConfirmationOutcome::Cancel);
        let outcome = scheduler
            .run_turn(vec![note("1", "a"), note("2", "b")], &CancellationToken::new())
            .await;
        let results = outcome.into_results();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0].result.error.as_ref().unwrap().kind,
            ToolErrorKind::Cancelled
        );
        assert_eq!(approver.asked.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn proceed_always_stops_asking_for_edits() {
        let (mut scheduler, runs, approver) = setup(true, ConfirmationOutcome::ProceedAlways);
        scheduler
            .run_turn(vec![note("1", "a"), note("2", "b")], &CancellationToken::new())
            .await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(approver.asked.lock().unwrap().len(), 1);
        assert_eq!(scheduler.gate().session().mode(), ApprovalMode::AutoEdit);
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let (mut scheduler, runs, _) = setup(false, ConfirmationOutcome::ProceedOnce);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = scheduler.run_turn(vec![note("1", "a")], &cancel).await;
        assert!(matches!(outcome, TurnOutcome::Cancelled(ref r) if r.is_empty()));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeated_identical_calls_stop_the_turn() {
        let (mut scheduler, runs, _) = setup(false, ConfirmationOutcome::ProceedOnce);
        let calls = (0..6).map(|i| note(&i.to_string(), "same")).collect();
        let outcome = scheduler.run_turn(calls, &CancellationToken::new()).await;
        let TurnOutcome::LoopDetected(results) = outcome else {
            panic!("expected loop detection");
        };
        assert_eq!(results.len(), 4);
        assert_eq!(runs.load(Ordering::SeqCst), 4);
        assert!(scheduler.loop_guard().loop_detected());

        scheduler.start_prompt();
        let outcome = scheduler
            .run_turn(vec![note("7", "same")], &CancellationToken::new())
            .await;
        assert!(matches!(outcome, TurnOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn fixed_approver_answers_without_prompting() {
        let (scheduler, runs, _) = setup(true, ConfirmationOutcome::Cancel);
        let mut scheduler = TurnScheduler::new(
            Arc::clone(&scheduler.catalog),
            scheduler.gate.clone(),
            Arc::new(FixedApprover(ConfirmationOutcome::ProceedOnce)),
        );
        let outcome = scheduler
            .run_turn(vec![note("1", "a")], &CancellationToken::new())
            .await;
        assert!(!outcome.results()[0].result.is_error());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn declined_call_emits_completed_event() {
        let (scheduler, _, _) = setup(true, ConfirmationOutcome::Cancel);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut scheduler = scheduler.with_events(tx);
        scheduler
            .run_turn(vec![note("1", "a")], &CancellationToken::new())
            .await;
        assert_eq!(
            rx.try_recv().unwrap(),
            ToolEvent::Completed {
                tool_name: "note".into(),
                success: false
            }
        );
    }
}
