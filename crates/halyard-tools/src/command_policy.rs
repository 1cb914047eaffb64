//! Quote-aware evaluation of shell command strings against the tool policy.
//!
//! Nothing here executes anything: a command is split into its chained
//! segments, checked for substitution syntax, and matched against allow and
//! exclude prefixes from configuration and the session allowlist.

use crate::permissions::ToolPolicy;

/// Verdict of [`check_command_permissions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPermissionResult {
    pub all_allowed: bool,
    pub disallowed_commands: Vec<String>,
    pub block_reason: Option<String>,
    /// Hard denials are never overridable by confirmation.
    pub is_hard_denial: bool,
}

impl CommandPermissionResult {
    fn allowed() -> Self {
        Self {
            all_allowed: true,
            disallowed_commands: Vec::new(),
            block_reason: None,
            is_hard_denial: false,
        }
    }

    fn denied(disallowed: Vec<String>, reason: String, hard: bool) -> Self {
        Self {
            all_allowed: false,
            disallowed_commands: disallowed,
            block_reason: Some(reason),
            is_hard_denial: hard,
        }
    }
}

/// Split a command line on `&&`, `||`, `;`, `&`, `|` and newlines.
///
/// Separators inside single or double quotes are literal. Outside single
/// quotes a backslash keeps the following character; inside them it is an
/// ordinary character. Segments are trimmed and empty ones dropped.
#[must_use]
pub fn split_commands(command: &str) -> Vec<String> {
    let chars: Vec<char> = command.chars().collect();
    let mut commands = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c == '\\'
            && quote != Some('\'')
            && let Some(escaped) = next
        {
            current.push(c);
            current.push(escaped);
            i += 2;
            continue;
        }

        if c == '\'' || c == '"' {
            match quote {
                Some(q) if q == c => quote = None,
                None => quote = Some(c),
                Some(_) => {}
            }
        }

        if quote.is_none() {
            let double = matches!((c, next), ('&', Some('&')) | ('|', Some('|')));
            if double || matches!(c, ';' | '&' | '|' | '\n') {
                push_segment(&mut commands, &mut current);
                if double {
                    i += 1;
                }
            } else {
                current.push(c);
            }
        } else {
            current.push(c);
        }
        i += 1;
    }
    push_segment(&mut commands, &mut current);
    commands
}

fn push_segment(commands: &mut Vec<String>, current: &mut String) {
    let segment = current.trim();
    if !segment.is_empty() {
        commands.push(segment.to_owned());
    }
    current.clear();
}

/// The program name of a single command: its first token (a fully quoted
/// first token is unwrapped), reduced to the final path segment.
#[must_use]
pub fn command_root(command: &str) -> Option<String> {
    let trimmed = command.trim();
    let token = quoted_first_token(trimmed)
        .or_else(|| trimmed.split_whitespace().next())
        .filter(|t| !t.is_empty())?;
    token
        .rsplit(['/', '\\'])
        .next()
        .filter(|root| !root.is_empty())
        .map(str::to_owned)
}

fn quoted_first_token(s: &str) -> Option<&str> {
    let quote = s.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let rest = &s[1..];
    let end = rest.find(quote)?;
    let inner = &rest[..end];
    (!inner.is_empty()).then_some(inner)
}

/// Roots of every chained command, in order, looking through shell
/// wrappers.
#[must_use]
pub fn command_roots(command: &str) -> Vec<String> {
    expand_segments(command)
        .iter()
        .filter_map(|c| command_root(c))
        .collect()
}

/// Split `command` into segments, replacing each `sh -c '...'` style
/// segment with the segments of the script it wraps.
fn expand_segments(command: &str) -> Vec<String> {
    const MAX_DEPTH: usize = 8;

    let mut pending: Vec<(String, usize)> = split_commands(command)
        .into_iter()
        .rev()
        .map(|s| (s, 0))
        .collect();
    let mut out = Vec::new();
    while let Some((segment, depth)) = pending.pop() {
        let inner = strip_shell_wrapper(&segment);
        if inner == segment || depth >= MAX_DEPTH {
            out.push(segment);
            continue;
        }
        pending.extend(split_commands(&inner).into_iter().rev().map(|s| (s, depth + 1)));
    }
    out
}

/// Remove a leading `sh -c`, `bash -c`, `zsh -c` or `cmd.exe /c` wrapper and
/// the quotes around the wrapped script.
///
/// The shell may be given by path (`/bin/bash`) and `-c` may be clustered
/// with other short flags (`bash -lc`, `sh -e -c`).
#[must_use]
pub fn strip_shell_wrapper(command: &str) -> String {
    let trimmed = command.trim();
    let Some((shell, mut rest)) = trimmed.split_once(char::is_whitespace) else {
        return trimmed.to_owned();
    };
    let shell = shell.rsplit(['/', '\\']).next().unwrap_or(shell);
    if !matches!(shell, "sh" | "bash" | "zsh" | "dash" | "cmd" | "cmd.exe") {
        return trimmed.to_owned();
    }

    let script = loop {
        rest = rest.trim_start();
        let Some((flag, after)) = rest.split_once(char::is_whitespace) else {
            return trimmed.to_owned();
        };
        let is_c = flag.eq_ignore_ascii_case("/c")
            || (flag.starts_with('-') && !flag.starts_with("--") && flag[1..].contains('c'));
        if is_c {
            break after.trim();
        }
        if !flag.starts_with('-') {
            return trimmed.to_owned();
        }
        rest = after;
    };

    for q in ['"', '\''] {
        if script.len() >= 2 && script.starts_with(q) && script.ends_with(q) {
            return script[1..script.len() - 1].to_owned();
        }
    }
    script.to_owned()
}

/// Whether the command uses `$(...)`, backticks, or process substitution
/// (`<(...)`, `>(...)`) in a position where the shell would expand it.
///
/// Nothing is expanded inside single quotes. Inside double quotes `$(` and
/// backticks still expand while `<(` and `>(` do not. A backslash escapes
/// the next character everywhere except inside single quotes.
#[must_use]
pub fn detect_command_substitution(command: &str) -> bool {
    let chars: Vec<char> = command.chars().collect();
    let mut in_single = false;
    let mut in_double = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c == '\\' && !in_single {
            i += 2;
            continue;
        }

        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            _ => {}
        }

        if !in_single {
            if c == '$' && next == Some('(') {
                return true;
            }
            if c == '`' {
                return true;
            }
            if !in_double && matches!(c, '<' | '>') && next == Some('(') {
                return true;
            }
        }
        i += 1;
    }
    false
}

/// Collapse whitespace runs to single spaces and trim.
#[must_use]
pub fn normalize_whitespace(command: &str) -> String {
    command.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `prefix` matches only at a token boundary: `git` matches `git status`
/// but not `gitk`.
fn is_prefixed_by(command: &str, prefix: &str) -> bool {
    command
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
}

/// Evaluate `command` against `policy` and, when given, the session
/// allowlist of approved prefixes.
///
/// With a session allowlist every segment must be explicitly allowed
/// (default deny). Without one, segments pass unless a non-empty global
/// allow-prefix list exists and they miss it (default allow).
#[must_use]
pub fn check_command_permissions(
    command: &str,
    policy: &ToolPolicy,
    session_allowlist: Option<&[String]>,
) -> CommandPermissionResult {
    if detect_command_substitution(command) {
        return CommandPermissionResult::denied(
            vec![command.to_owned()],
            "Command substitution using $(), `, <() or >() is not allowed for security reasons"
                .to_owned(),
            true,
        );
    }

    let commands: Vec<String> = expand_segments(command)
        .iter()
        .map(|c| normalize_whitespace(c))
        .collect();

    if policy.shell_excluded() {
        return CommandPermissionResult::denied(
            commands,
            "Shell tool is globally disabled in configuration".to_owned(),
            true,
        );
    }

    let blocked = policy.excluded_shell_prefixes();
    for cmd in &commands {
        if blocked.iter().any(|prefix| is_prefixed_by(cmd, prefix)) {
            return CommandPermissionResult::denied(
                vec![cmd.clone()],
                format!("Command '{cmd}' is blocked by configuration"),
                true,
            );
        }
    }

    if policy.shell_wildcard_allowed() {
        return CommandPermissionResult::allowed();
    }

    let global = policy.allowed_shell_prefixes();
    let globally_allowed = |cmd: &str| global.iter().any(|p| is_prefixed_by(cmd, p));

    if let Some(session) = session_allowlist {
        let session: Vec<String> = session.iter().map(|p| normalize_whitespace(p)).collect();
        let disallowed: Vec<String> = commands
            .iter()
            .filter(|cmd| {
                !session.iter().any(|p| is_prefixed_by(cmd, p)) && !globally_allowed(cmd)
            })
            .cloned()
            .collect();
        if disallowed.is_empty() {
            return CommandPermissionResult::allowed();
        }
        let reason = format!(
            "Command(s) not on the global or session allowlist. Disallowed commands: {}",
            quote_list(&disallowed)
        );
        return CommandPermissionResult::denied(disallowed, reason, false);
    }

    if !global.is_empty() {
        let disallowed: Vec<String> = commands
            .iter()
            .filter(|cmd| !globally_allowed(cmd))
            .cloned()
            .collect();
        if !disallowed.is_empty() {
            let reason = format!(
                "Command(s) not in the allowed commands list. Disallowed commands: {}",
                quote_list(&disallowed)
            );
            return CommandPermissionResult::denied(disallowed, reason, false);
        }
    }

    CommandPermissionResult::allowed()
}

fn quote_list(commands: &[String]) -> String {
    commands
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ")
}
