//! Model-call capability consumed by the edit reconciler and other
//! LLM-assisted steps.

pub mod compatible;
pub mod error;
pub mod extractor;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod provider;

pub use compatible::CompatibleProvider;
pub use error::LlmError;
pub use extractor::Extractor;
pub use provider::{LlmProvider, Message, Role};
