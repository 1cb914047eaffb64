use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Names the shell tool answers to in allow/exclude entries.
pub const SHELL_TOOL_NAMES: &[&str] = &["run_shell_command", "ShellTool"];

/// Session-wide approval behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Ask before every side-effecting call not covered by the allowlist.
    #[default]
    Default,
    /// Edits and info fetches run without asking; shell and MCP still ask.
    AutoEdit,
    /// Never ask.
    Yolo,
}

impl fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Default => "default",
            Self::AutoEdit => "auto_edit",
            Self::Yolo => "yolo",
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown approval mode: {0} (expected default, auto_edit, or yolo)")]
pub struct ParseApprovalModeError(String);

impl FromStr for ApprovalMode {
    type Err = ParseApprovalModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "default" => Ok(Self::Default),
            "auto_edit" | "autoedit" => Ok(Self::AutoEdit),
            "yolo" => Ok(Self::Yolo),
            _ => Err(ParseApprovalModeError(s.to_owned())),
        }
    }
}

/// Global allow/exclude lists from configuration.
///
/// Entries are bare tool names (`read_file`) or, for the shell tool, a
/// command prefix in call syntax: `run_shell_command(git status)`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolPolicy {
    #[serde(default)]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub excluded: Vec<String>,
    #[serde(default)]
    pub approval_mode: ApprovalMode,
}

impl ToolPolicy {
    /// False when the tool is excluded by bare name.
    ///
    /// Excluding either shell alias disables the shell tool.
    #[must_use]
    pub fn is_tool_enabled(&self, name: &str) -> bool {
        let names: &[&str] = if SHELL_TOOL_NAMES.contains(&name) {
            SHELL_TOOL_NAMES
        } else {
            std::slice::from_ref(&name)
        };
        !self
            .excluded
            .iter()
            .any(|entry| names.contains(&entry.trim()))
    }

    #[must_use]
    pub fn shell_excluded(&self) -> bool {
        !self.is_tool_enabled(SHELL_TOOL_NAMES[0])
    }

    /// Whether a bare shell tool name appears in the allowed list.
    #[must_use]
    pub fn shell_wildcard_allowed(&self) -> bool {
        self.allowed
            .iter()
            .any(|entry| SHELL_TOOL_NAMES.contains(&entry.trim()))
    }

    #[must_use]
    pub fn allowed_shell_prefixes(&self) -> Vec<String> {
        shell_prefixes(&self.allowed)
    }

    #[must_use]
    pub fn excluded_shell_prefixes(&self) -> Vec<String> {
        shell_prefixes(&self.excluded)
    }
}

/// Split `Name(arg)` into its name and argument; bare names have no argument.
#[must_use]
pub fn parse_tool_entry(entry: &str) -> (&str, Option<&str>) {
    let entry = entry.trim();
    if let Some(open) = entry.find('(')
        && let Some(inner) = entry[open + 1..].strip_suffix(')')
    {
        return (entry[..open].trim(), Some(inner));
    }
    (entry, None)
}

/// Whitespace-normalized command prefixes from `ShellTool(prefix)` entries.
fn shell_prefixes(entries: &[String]) -> Vec<String> {
    entries
        .iter()
        .filter_map(|entry| match parse_tool_entry(entry) {
            (name, Some(arg)) if SHELL_TOOL_NAMES.contains(&name) => {
                let normalized = crate::command_policy::normalize_whitespace(arg);
                (!normalized.is_empty()).then_some(normalized)
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(allowed: &[&str], excluded: &[&str]) -> ToolPolicy {
        ToolPolicy {
            allowed: allowed.iter().map(|s| (*s).to_owned()).collect(),
            excluded: excluded.iter().map(|s| (*s).to_owned()).collect(),
            approval_mode: ApprovalMode::Default,
        }
    }

    #[test]
    fn parse_entry_with_argument() {
        assert_eq!(
            parse_tool_entry("ShellTool(git status)"),
            ("ShellTool", Some("git status"))
        );
        assert_eq!(parse_tool_entry(" read_file "), ("read_file", None));
        assert_eq!(parse_tool_entry("broken(arg"), ("broken(arg", None));
    }

    #[test]
    fn shell_prefixes_normalized() {
        let p = policy(&["run_shell_command(git   log)", "read_file", "ShellTool(ls)"], &[]);
        assert_eq!(p.allowed_shell_prefixes(), vec!["git log", "ls"]);
    }

    #[test]
    fn prefix_entries_for_other_tools_ignored() {
        let p = policy(&["read_file(/etc)"], &[]);
        assert!(p.allowed_shell_prefixes().is_empty());
    }

    #[test]
    fn exclusion_by_bare_name() {
        let p = policy(&[], &["write_file"]);
        assert!(!p.is_tool_enabled("write_file"));
        assert!(p.is_tool_enabled("read_file"));
    }

    #[test]
    fn shell_alias_exclusion_disables_shell() {
        let p = policy(&[], &["ShellTool"]);
        assert!(!p.is_tool_enabled("run_shell_command"));
        assert!(p.shell_excluded());
    }

    #[test]
    fn prefix_exclusion_keeps_tool_enabled() {
        let p = policy(&[], &["run_shell_command(rm)"]);
        assert!(p.is_tool_enabled("run_shell_command"));
        assert_eq!(p.excluded_shell_prefixes(), vec!["rm"]);
    }

    #[test]
    fn wildcard_detection() {
        assert!(policy(&["run_shell_command"], &[]).shell_wildcard_allowed());
        assert!(!policy(&["run_shell_command(ls)"], &[]).shell_wildcard_allowed());
    }

    #[test]
    fn approval_mode_parse() {
        assert_eq!("yolo".parse::<ApprovalMode>().unwrap(), ApprovalMode::Yolo);
        assert_eq!(
            "auto-edit".parse::<ApprovalMode>().unwrap(),
            ApprovalMode::AutoEdit
        );
        assert_eq!(
            "autoEdit".parse::<ApprovalMode>().unwrap(),
            ApprovalMode::AutoEdit
        );
        assert!("sometimes".parse::<ApprovalMode>().is_err());
    }

    #[test]
    fn deserialize_policy_from_toml() {
        let p: ToolPolicy = toml::from_str(
            r#"
            allowed = ["run_shell_command(git status)"]
            excluded = ["web_fetch"]
            approval_mode = "auto_edit"
        "#,
        )
        .unwrap();
        assert_eq!(p.approval_mode, ApprovalMode::AutoEdit);
        assert!(!p.is_tool_enabled("web_fetch"));
    }
}
