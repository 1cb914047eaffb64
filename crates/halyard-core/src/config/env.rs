use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("HALYARD_APPROVAL_MODE") {
            match v.parse() {
                Ok(mode) => self.tools.policy.approval_mode = mode,
                Err(e) => tracing::warn!("ignoring invalid HALYARD_APPROVAL_MODE value: {e}"),
            }
        }
        if let Ok(v) = std::env::var("HALYARD_SHELL_TIMEOUT") {
            if let Ok(secs) = v.parse::<u64>() {
                self.tools.shell.timeout = secs;
            } else {
                tracing::warn!("ignoring invalid HALYARD_SHELL_TIMEOUT value: {v}");
            }
        }
        if let Ok(v) = std::env::var("HALYARD_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("HALYARD_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
    }
}
