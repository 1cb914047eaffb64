use std::io::Write;
use std::time::Duration;

use halyard_mcp::McpTransport;
use halyard_tools::ApprovalMode;
use serial_test::serial;

use super::*;

const ENV_KEYS: [&str; 4] = [
    "HALYARD_APPROVAL_MODE",
    "HALYARD_SHELL_TIMEOUT",
    "HALYARD_LLM_MODEL",
    "HALYARD_LLM_BASE_URL",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{content}").unwrap();
    file
}

#[test]
#[serial]
fn missing_file_gives_defaults() {
    clear_env();
    let config = Config::load(Path::new("/nonexistent/halyard.toml")).unwrap();
    assert_eq!(config.tools.shell.timeout, 120);
    assert_eq!(config.tools.policy.approval_mode, ApprovalMode::Default);
    assert!(config.mcp.servers.is_empty());
    assert_eq!(config.llm.model, "qwen3:8b");
}

#[test]
#[serial]
fn parses_full_file() {
    clear_env();
    let file = write_config(
        r#"
[tools]
allowed = ["run_shell_command(git status)"]
excluded = ["web_fetch"]
approval_mode = "auto_edit"
workspace_root = "/srv/project"

[tools.shell]
timeout = 60

[[mcp.servers]]
id = "github"
command = "npx"
args = ["-y", "@modelcontextprotocol/server-github"]
env = { GITHUB_TOKEN = "secret" }
trust = true

[[mcp.servers]]
id = "docs"
url = "http://localhost:8080/mcp"
timeout = 5

[llm]
base_url = "https://api.example.com/v1"
model = "small"
api_key_env = "EXAMPLE_API_KEY"
"#,
    );
    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.tools.policy.allowed, ["run_shell_command(git status)"]);
    assert_eq!(config.tools.policy.approval_mode, ApprovalMode::AutoEdit);
    assert_eq!(config.tools.shell.timeout, 60);
    assert_eq!(config.workspace_root().unwrap(), PathBuf::from("/srv/project"));
    assert_eq!(config.mcp.servers.len(), 2);
    assert!(config.mcp.servers[0].trust);
    assert_eq!(config.mcp.servers[1].timeout, 5);
    assert_eq!(config.llm.api_key_env.as_deref(), Some("EXAMPLE_API_KEY"));
}

#[test]
#[serial]
fn env_overrides_file_values() {
    clear_env();
    let file = write_config("[tools.shell]\ntimeout = 60\n");
    unsafe {
        std::env::set_var("HALYARD_APPROVAL_MODE", "yolo");
        std::env::set_var("HALYARD_SHELL_TIMEOUT", "5");
        std::env::set_var("HALYARD_LLM_MODEL", "other");
        std::env::set_var("HALYARD_LLM_BASE_URL", "http://127.0.0.1:9000/v1");
    }
    let config = Config::load(file.path()).unwrap();
    clear_env();
    assert_eq!(config.tools.policy.approval_mode, ApprovalMode::Yolo);
    assert_eq!(config.tools.shell.timeout, 5);
    assert_eq!(config.llm.model, "other");
    assert_eq!(config.llm.base_url, "http://127.0.0.1:9000/v1");
}

#[test]
#[serial]
fn invalid_env_values_are_ignored() {
    clear_env();
    unsafe {
        std::env::set_var("HALYARD_APPROVAL_MODE", "reckless");
        std::env::set_var("HALYARD_SHELL_TIMEOUT", "soon");
    }
    let config = Config::load(Path::new("/nonexistent/halyard.toml")).unwrap();
    clear_env();
    assert_eq!(config.tools.policy.approval_mode, ApprovalMode::Default);
    assert_eq!(config.tools.shell.timeout, 120);
}

#[test]
#[serial]
fn malformed_file_is_an_error() {
    clear_env();
    let file = write_config("[tools\nallowed = 3");
    let err = Config::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("failed to parse config file"));
}

#[test]
#[serial]
fn zero_timeout_from_env_fails_validation() {
    clear_env();
    unsafe { std::env::set_var("HALYARD_SHELL_TIMEOUT", "0") };
    let result = Config::load(Path::new("/nonexistent/halyard.toml"));
    clear_env();
    assert!(result.is_err());
}

fn server(id: &str, command: Option<&str>, url: Option<&str>) -> McpServerConfig {
    McpServerConfig {
        id: id.into(),
        command: command.map(Into::into),
        args: Vec::new(),
        env: std::collections::HashMap::new(),
        cwd: None,
        url: url.map(Into::into),
        timeout: 30,
        trust: false,
    }
}

#[test]
fn validate_rejects_bad_servers() {
    let cases = [
        (vec![server("", Some("x"), None)], "must not be empty"),
        (
            vec![server("a", Some("x"), None), server("a", Some("y"), None)],
            "duplicate mcp server id",
        ),
        (vec![server("a", Some("x"), Some("http://h"))], "both command and url"),
        (vec![server("a", None, None)], "needs a command or a url"),
    ];
    for (servers, expected) in cases {
        let mut config = Config::default();
        config.mcp.servers = servers;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains(expected), "{err}");
    }
}

#[test]
fn server_entries_pick_transport() {
    let mut config = Config::default();
    let mut stdio = server("fs", Some("mcp-fs"), None);
    stdio.args = vec!["--root".into(), "/tmp".into()];
    stdio.timeout = 7;
    config.mcp.servers = vec![stdio, server("web", None, Some("http://localhost:1/mcp"))];

    let entries = config.mcp_entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].timeout, Duration::from_secs(7));
    assert!(matches!(
        entries[0].transport,
        McpTransport::Stdio { ref command, ref args, .. }
            if command == "mcp-fs" && args.len() == 2
    ));
    assert!(matches!(
        entries[1].transport,
        McpTransport::Http { ref url } if url == "http://localhost:1/mcp"
    ));
}

#[test]
fn server_debug_redacts_env_values() {
    let mut s = server("github", Some("npx"), None);
    s.env.insert("GITHUB_TOKEN".into(), "ghp_secret".into());
    let debug = format!("{s:?}");
    assert!(debug.contains("GITHUB_TOKEN"));
    assert!(debug.contains("[REDACTED]"));
    assert!(!debug.contains("ghp_secret"));
}

#[test]
fn llm_provider_uses_configured_model() {
    let mut config = Config::default();
    config.llm.model = "tiny".into();
    assert_eq!(config.llm_provider().model(), "tiny");
}
