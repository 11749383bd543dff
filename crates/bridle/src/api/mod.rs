//! The inference boundary and everything that talks across it.
//!
//! - [`InferenceBackend`]: the trait a model engine satisfies. It takes the
//!   full prompt context and, optionally, the tool definitions, and resolves
//!   with one [`InferenceOutcome`].
//! - [`openai`]: [`ChatCompletionsBackend`](openai::ChatCompletionsBackend)
//!   for OpenAI-compatible `chat/completions` servers.
//! - [`parser`]: [`ResponseParser`](parser::ResponseParser) for calls embedded
//!   in plain text.
//! - [`ids`]: turn and call correlation ids.

pub mod ids;
pub mod openai;
pub mod parser;

pub use ids::{generate_call_id, generate_turn_id};
pub use openai::{BackendConfig, ChatCompletionsBackend};
pub use parser::{DEFAULT_CALL_TAG, ParsedResponse, ResponseParser};

use crate::{CallRequest, Message, ToolDef};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Why the engine stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCall,
    LengthLimit,
    EngineError,
}

impl FinishReason {
    /// Map an OpenAI-style `finish_reason` string. Unknown or missing
    /// reasons count as a normal stop.
    pub fn from_wire(reason: Option<&str>) -> Self {
        match reason {
            Some("tool_calls") | Some("function_call") => FinishReason::ToolCall,
            Some("length") => FinishReason::LengthLimit,
            Some("error") => FinishReason::EngineError,
            _ => FinishReason::Stop,
        }
    }
}

/// One resolved inference call.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutcome {
    /// Generated text, possibly empty.
    pub text: String,
    /// A structured call, when the engine reports one natively.
    pub call: Option<CallRequest>,
    pub finish_reason: FinishReason,
}

impl InferenceOutcome {
    /// A plain text answer.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            call: None,
            finish_reason: FinishReason::Stop,
        }
    }

    /// A structured call, optionally with accompanying text.
    pub fn call(text: impl Into<String>, call: CallRequest) -> Self {
        Self {
            text: text.into(),
            call: Some(call),
            finish_reason: FinishReason::ToolCall,
        }
    }

    /// An engine-side generation failure carrying a diagnostic.
    pub fn engine_error(message: impl Into<String>) -> Self {
        Self {
            text: message.into(),
            call: None,
            finish_reason: FinishReason::EngineError,
        }
    }
}

/// Failures crossing the inference boundary. These are the only errors
/// that end a conversation turn.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference engine not ready: {0}")]
    NotReady(String),
    #[error("generation failed: {0}")]
    Engine(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Boxed future returned by [`InferenceBackend::complete`].
pub type InferenceFuture<'a> =
    Pin<Box<dyn Future<Output = Result<InferenceOutcome, InferenceError>> + Send + 'a>>;

/// A model engine.
///
/// `tools` is `None` when no tool is currently available. Implementations
/// that cannot do native function calling may ignore it; the conversation
/// also lists tools in the system message and parses calls out of text.
pub trait InferenceBackend: Send + Sync {
    fn complete<'a>(
        &'a self,
        messages: &'a [Message],
        tools: Option<&'a [ToolDef]>,
    ) -> InferenceFuture<'a>;
}

impl<T: InferenceBackend + ?Sized> InferenceBackend for Arc<T> {
    fn complete<'a>(
        &'a self,
        messages: &'a [Message],
        tools: Option<&'a [ToolDef]>,
    ) -> InferenceFuture<'a> {
        (**self).complete(messages, tools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(FinishReason::from_wire(Some("stop")), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire(Some("tool_calls")), FinishReason::ToolCall);
        assert_eq!(FinishReason::from_wire(Some("length")), FinishReason::LengthLimit);
        assert_eq!(FinishReason::from_wire(Some("error")), FinishReason::EngineError);
        assert_eq!(FinishReason::from_wire(None), FinishReason::Stop);
    }

    #[test]
    fn api_error_display() {
        let err = InferenceError::Api {
            status: 503,
            body: "loading model".into(),
        };
        assert_eq!(err.to_string(), "API HTTP 503: loading model");
    }
}
