//! Best-effort repair of `replace` calls whose `old_string` does not match
//! the file exactly.
//!
//! The cheap local pass undoes the over-escaping models commonly produce
//! (`\\n` for a newline, `\"` for a quote). Only when that finds nothing
//! is the model asked for a corrected anchor. Every path that does not
//! converge on the expected number of matches fails closed.

use std::sync::LazyLock;

use halyard_llm::{Extractor, LlmError, LlmProvider};
use regex::{Captures, Regex};
use schemars::JsonSchema;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

static OVER_ESCAPED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\\+(n|t|r|'|"|`|\\|\n)"#).unwrap());

const CORRECTOR_PREAMBLE: &str = "You are an expert code-editing assistant. You fix text \
    snippets that failed to match a file exactly, usually because of escaping, whitespace or \
    small formatting differences. Answer only with the requested JSON object.";

/// Parameters of a single search-and-replace edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditParams {
    pub old_string: String,
    pub new_string: String,
    pub expected_replacements: usize,
}

/// Result of [`ensure_correct_edit`].
///
/// `occurrences` equals `params.expected_replacements` when the edit is
/// safe to apply, and is 0 otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectedEdit {
    pub params: EditParams,
    pub occurrences: usize,
}

impl CorrectedEdit {
    fn unchanged(params: EditParams) -> Self {
        Self {
            params,
            occurrences: 0,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CorrectedTarget {
    /// The corrected snippet, copied verbatim from the file, that should
    /// be replaced. Must appear in the file exactly once.
    corrected_target_snippet: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CorrectedReplacement {
    /// The replacement text adjusted to the corrected target snippet.
    corrected_new_string: String,
}

/// Undo common over-escaping: `\\n`, `\\t`, `\\r`, `\'`, `\"`, `` \` ``,
/// `\\\\` and a backslash before a real newline.
#[must_use]
pub fn unescape_string(input: &str) -> String {
    OVER_ESCAPED_RE
        .replace_all(input, |caps: &Captures<'_>| {
            match &caps[1] {
                "n" | "\n" => "\n",
                "t" => "\t",
                "r" => "\r",
                "'" => "'",
                "\"" => "\"",
                "`" => "`",
                _ => "\\",
            }
            .to_owned()
        })
        .into_owned()
}

fn count_occurrences(content: &str, needle: &str) -> usize {
    if needle.is_empty() {
        0
    } else {
        content.matches(needle).count()
    }
}

fn looks_over_escaped(text: &str) -> bool {
    !text.contains('\n') && unescape_string(text) != text
}

/// Make `params` apply cleanly to `content`, consulting `provider` only as
/// a last resort.
///
/// Model failures, unusable replies and cancellation never propagate: they
/// are logged and the original parameters come back with zero occurrences.
pub async fn ensure_correct_edit<P: LlmProvider>(
    content: &str,
    params: EditParams,
    provider: &P,
    cancel: &CancellationToken,
) -> CorrectedEdit {
    let expected = params.expected_replacements.max(1);
    let occurrences = count_occurrences(content, &params.old_string);

    if occurrences == expected {
        let mut params = params;
        if looks_over_escaped(&params.new_string) {
            params.new_string = unescape_string(&params.new_string);
        }
        return CorrectedEdit {
            params,
            occurrences,
        };
    }
    if params.old_string.is_empty() {
        return CorrectedEdit::unchanged(params);
    }

    let unescaped_old = unescape_string(&params.old_string);
    let unescaped_occurrences = count_occurrences(content, &unescaped_old);
    if unescaped_occurrences == expected {
        tracing::debug!(occurrences, "edit target matched after unescaping");
        return CorrectedEdit {
            params: EditParams {
                old_string: unescaped_old,
                new_string: unescape_string(&params.new_string),
                expected_replacements: params.expected_replacements,
            },
            occurrences: expected,
        };
    }
    if occurrences > expected || unescaped_occurrences > 0 {
        tracing::debug!(
            occurrences,
            unescaped_occurrences,
            expected,
            "edit target is ambiguous, not correcting"
        );
        return CorrectedEdit::unchanged(params);
    }

    match correct_with_model(content, &params, &unescaped_old, expected, provider, cancel).await {
        Ok(Some(corrected)) => CorrectedEdit {
            params: corrected,
            occurrences: expected,
        },
        Ok(None) => CorrectedEdit::unchanged(params),
        Err(e) => {
            tracing::warn!(error = %e, provider = provider.name(), "edit correction failed");
            CorrectedEdit::unchanged(params)
        }
    }
}

async fn correct_with_model<P: LlmProvider>(
    content: &str,
    params: &EditParams,
    unescaped_old: &str,
    expected: usize,
    provider: &P,
    cancel: &CancellationToken,
) -> Result<Option<EditParams>, LlmError> {
    let extractor = Extractor::new(provider).with_preamble(CORRECTOR_PREAMBLE);

    let target_prompt = format!(
        "The following snippet was meant to match a unique passage of the file below, but it \
         does not appear in it.\n\nProblematic snippet:\n```\n{unescaped_old}\n```\n\n\
         File content:\n```\n{content}\n```\n\nReturn the passage of the file that the snippet \
         most likely refers to, copied exactly."
    );
    let target: CorrectedTarget = tokio::select! {
        () = cancel.cancelled() => return Err(LlmError::Cancelled),
        r = extractor.extract(&target_prompt) => r?,
    };

    let Some(anchor) = converge(content, &target.corrected_target_snippet, expected) else {
        tracing::debug!("model proposed an edit target that does not match the file");
        return Ok(None);
    };
    let trimmed = anchor.len() != target.corrected_target_snippet.len();

    let new_prompt = format!(
        "An edit was meant to replace the original snippet with a new string. The original \
         snippet has been corrected to match the file. Adapt the new string to the corrected \
         snippet in the same way.\n\nOriginal snippet:\n```\n{}\n```\n\nCorrected snippet:\n\
         ```\n{anchor}\n```\n\nOriginal new string:\n```\n{}\n```",
        params.old_string, params.new_string
    );
    let replacement: CorrectedReplacement = tokio::select! {
        () = cancel.cancelled() => return Err(LlmError::Cancelled),
        r = extractor.extract(&new_prompt) => r?,
    };

    let new_string = if trimmed {
        replacement.corrected_new_string.trim().to_owned()
    } else {
        replacement.corrected_new_string
    };
    Ok(Some(EditParams {
        old_string: anchor,
        new_string,
        expected_replacements: params.expected_replacements,
    }))
}

/// Accept `snippet` if it matches `expected` times, or its whitespace-trimmed
/// form does.
fn converge(content: &str, snippet: &str, expected: usize) -> Option<String> {
    if count_occurrences(content, snippet) == expected {
        return Some(snippet.to_owned());
    }
    let trimmed = snippet.trim();
    (trimmed.len() != snippet.len() && count_occurrences(content, trimmed) == expected)
        .then(|| trimmed.to_owned())
}
