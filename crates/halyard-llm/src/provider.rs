use serde::{Deserialize, Serialize};

use crate::error::LlmError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

pub trait LlmProvider: Send + Sync {
    /// Send messages to the model and return the assistant text.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails to communicate or the response is invalid.
    fn chat(&self, messages: &[Message]) -> impl Future<Output = Result<String, LlmError>> + Send;

    /// Ask for a JSON object conforming to `schema`.
    ///
    /// The default implementation relies on the prompt alone and parses the
    /// reply, tolerating a fenced ```json block. Backends with native
    /// constrained decoding override it.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::StructuredParse` if the reply is not a JSON object.
    fn chat_json(
        &self,
        messages: &[Message],
        schema: &serde_json::Value,
    ) -> impl Future<Output = Result<serde_json::Value, LlmError>> + Send {
        let _ = schema;
        async move {
            let raw = self.chat(messages).await?;
            parse_json_reply(&raw)
        }
    }

    fn name(&self) -> &'static str;
}

/// Parse a model reply into a JSON object, stripping a markdown code fence if present.
///
/// # Errors
///
/// Returns `LlmError::StructuredParse` when the body is not a JSON object.
pub fn parse_json_reply(raw: &str) -> Result<serde_json::Value, LlmError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| LlmError::StructuredParse(e.to_string()))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(LlmError::StructuredParse(format!(
            "expected a JSON object, got: {body}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_object() {
        let v = parse_json_reply(r#"{"a": 1}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn parse_fenced_object() {
        let v = parse_json_reply("```json\n{\"a\": \"x\"}\n```").unwrap();
        assert_eq!(v["a"], "x");
    }

    #[test]
    fn parse_bare_fence() {
        let v = parse_json_reply("```\n{\"b\": true}\n```\n").unwrap();
        assert_eq!(v["b"], true);
    }

    #[test]
    fn parse_rejects_non_object() {
        let err = parse_json_reply("[1, 2]").unwrap_err();
        assert!(matches!(err, LlmError::StructuredParse(_)));
    }

    #[test]
    fn parse_rejects_prose() {
        assert!(parse_json_reply("sure, here you go").is_err());
    }

    #[test]
    fn message_constructors() {
        let m = Message::system("be terse");
        assert_eq!(m.role, Role::System);
        assert_eq!(Message::user("hi").content, "hi");
    }
}
