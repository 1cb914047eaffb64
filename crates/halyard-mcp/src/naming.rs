//! Function-calling names for discovered tools.

/// Longest name accepted by function-calling APIs.
pub const MAX_TOOL_NAME_LEN: usize = 63;
const PREFIX_LEN: usize = 28;
const SUFFIX_LEN: usize = 32;
const TRUNCATION_MARKER: &str = "___";

/// Replace characters outside `[A-Za-z0-9_.-]` with `_` and clamp the
/// result to [`MAX_TOOL_NAME_LEN`] by keeping a fixed prefix and suffix
/// around `___`.
#[must_use]
pub fn valid_tool_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.len() <= MAX_TOOL_NAME_LEN {
        return sanitized;
    }
    // ASCII only at this point, so byte slicing is char-safe.
    format!(
        "{}{TRUNCATION_MARKER}{}",
        &sanitized[..PREFIX_LEN],
        &sanitized[sanitized.len() - SUFFIX_LEN..]
    )
}

/// Name a discovered tool is registered under.
#[must_use]
pub fn registered_name(server_id: &str, tool: &str, namespaced: bool) -> String {
    if namespaced {
        valid_tool_name(&format!("{server_id}__{tool}"))
    } else {
        valid_tool_name(tool)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn valid_names_pass_through() {
        assert_eq!(valid_tool_name("read_file"), "read_file");
        assert_eq!(valid_tool_name("v1.search-all"), "v1.search-all");
    }

    #[test]
    fn invalid_characters_replaced() {
        assert_eq!(valid_tool_name("create issue!"), "create_issue_");
        assert_eq!(valid_tool_name("a/b:c"), "a_b_c");
        assert_eq!(valid_tool_name("naïve"), "na_ve");
    }

    #[test]
    fn eighty_char_name_truncated_to_63() {
        let name: String = ('a'..='z').cycle().take(80).collect();
        let out = valid_tool_name(&name);
        assert_eq!(out.len(), 63);
        assert_eq!(&out[..28], &name[..28]);
        assert_eq!(&out[28..31], "___");
        assert_eq!(&out[31..], &name[48..]);
    }

    #[test]
    fn sixty_three_chars_untouched() {
        let name = "x".repeat(63);
        assert_eq!(valid_tool_name(&name), name);
    }

    #[test]
    fn namespacing() {
        assert_eq!(registered_name("github", "search", true), "github__search");
        assert_eq!(registered_name("github", "search", false), "search");
        assert_eq!(registered_name("my server", "do it", true), "my_server__do_it");
    }

    proptest! {
        #[test]
        fn output_always_valid(name in "\\PC{0,120}") {
            let out = valid_tool_name(&name);
            prop_assert!(out.len() <= MAX_TOOL_NAME_LEN);
            prop_assert!(out
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')));
        }

        #[test]
        fn idempotent(name in "[a-zA-Z0-9_ .:/-]{0,100}") {
            let once = valid_tool_name(&name);
            prop_assert_eq!(valid_tool_name(&once), once.clone());
        }
    }
}
