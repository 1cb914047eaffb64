use std::io::IsTerminal;

use dialoguer::Select;
use halyard_core::Approver;
use halyard_tools::{BoxFuture, ConfirmationDetails, ConfirmationKind, ConfirmationOutcome};

/// Prompts on the terminal with `dialoguer`. Without a terminal every
/// confirmation is declined.
#[derive(Debug, Default)]
pub struct TerminalApprover;

impl Approver for TerminalApprover {
    fn approve<'a>(
        &'a self,
        details: &'a ConfirmationDetails,
    ) -> BoxFuture<'a, ConfirmationOutcome> {
        let details = details.clone();
        Box::pin(async move {
            if !std::io::stdin().is_terminal() {
                tracing::warn!(title = %details.title, "no terminal to confirm on, declining");
                return ConfirmationOutcome::Cancel;
            }
            match tokio::task::spawn_blocking(move || prompt(&details)).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    tracing::warn!("confirmation prompt failed: {e}");
                    ConfirmationOutcome::Cancel
                }
                Err(e) => {
                    tracing::warn!("confirmation prompt task failed: {e}");
                    ConfirmationOutcome::Cancel
                }
            }
        })
    }
}

fn prompt(details: &ConfirmationDetails) -> dialoguer::Result<ConfirmationOutcome> {
    eprintln!("{}", details.title);
    let choices: Vec<(String, ConfirmationOutcome)> = match &details.kind {
        ConfirmationKind::Exec {
            command,
            root_commands,
        } => {
            eprintln!("  {command}");
            vec![
                ("Yes, allow once".into(), ConfirmationOutcome::ProceedOnce),
                (
                    format!("Yes, always allow {}", root_commands.join(", ")),
                    ConfirmationOutcome::ProceedAlways,
                ),
                ("No".into(), ConfirmationOutcome::Cancel),
            ]
        }
        ConfirmationKind::Edit { file_path, diff } => {
            eprintln!("  {}\n{diff}", file_path.display());
            vec![
                ("Yes, allow once".into(), ConfirmationOutcome::ProceedOnce),
                (
                    "Yes, allow all edits this session".into(),
                    ConfirmationOutcome::ProceedAlways,
                ),
                ("No".into(), ConfirmationOutcome::Cancel),
            ]
        }
        ConfirmationKind::Info { prompt, urls } => {
            eprintln!("  {prompt}");
            for url in urls {
                eprintln!("  - {url}");
            }
            vec![
                ("Yes, allow once".into(), ConfirmationOutcome::ProceedOnce),
                ("Yes, always allow".into(), ConfirmationOutcome::ProceedAlways),
                ("No".into(), ConfirmationOutcome::Cancel),
            ]
        }
        ConfirmationKind::Mcp {
            server,
            tool,
            display_name,
        } => {
            eprintln!("  {display_name}");
            vec![
                ("Yes, allow once".into(), ConfirmationOutcome::ProceedOnce),
                (
                    format!("Yes, always allow tool \"{tool}\" from server \"{server}\""),
                    ConfirmationOutcome::ProceedAlwaysTool,
                ),
                (
                    format!("Yes, always allow all tools from server \"{server}\""),
                    ConfirmationOutcome::ProceedAlwaysServer,
                ),
                ("No".into(), ConfirmationOutcome::Cancel),
            ]
        }
    };

    let labels: Vec<&str> = choices.iter().map(|(label, _)| label.as_str()).collect();
    let selection = Select::new()
        .with_prompt("Allow execution?")
        .items(&labels)
        .default(0)
        .interact_opt()?;
    Ok(selection.map_or(ConfirmationOutcome::Cancel, |i| choices[i].1))
}
