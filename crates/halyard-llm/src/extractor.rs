use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use crate::LlmError;
use crate::provider::{LlmProvider, Message};

/// Typed structured-output helper: derives a JSON schema from `T`, asks the
/// provider for a conforming object and deserializes it.
pub struct Extractor<'a, P: LlmProvider> {
    provider: &'a P,
    preamble: Option<String>,
}

impl<'a, P: LlmProvider> Extractor<'a, P> {
    pub fn new(provider: &'a P) -> Self {
        Self {
            provider,
            preamble: None,
        }
    }

    #[must_use]
    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    /// # Errors
    ///
    /// Returns an error if the provider fails or the response cannot be parsed.
    pub async fn extract<T>(&self, input: &str) -> Result<T, LlmError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let schema = serde_json::to_value(schemars::schema_for!(T))?;
        let mut messages = Vec::with_capacity(2);
        if let Some(ref preamble) = self.preamble {
            messages.push(Message::system(preamble.clone()));
        }
        messages.push(Message::user(input));

        let value = self.provider.chat_json(&messages, &schema).await?;
        serde_json::from_value(value).map_err(|e| LlmError::StructuredParse(e.to_string()))
    }
}
