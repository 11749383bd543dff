//! Bounded tool-calling core for LLM conversations.
//!
//! `bridle` lets a language model drive external capabilities ("tools")
//! through a structured call/response protocol while keeping the interaction
//! bounded: a misbehaving model cannot loop forever, a hung tool cannot block
//! a turn indefinitely, and conversation history always stays consistent.
//!
//! The core is four pieces that compose leaf-first:
//!
//! 1. A [`ToolCatalog`](tools::catalog::ToolCatalog) advertising tools with
//!    JSON schemas and live availability.
//! 2. A [`Dispatcher`](tools::dispatch::Dispatcher) that validates and runs
//!    one call under a hard timeout, always producing a [`ToolResult`].
//! 3. A [`ResponseParser`](api::parser::ResponseParser) that pulls an
//!    embedded call out of free-form model text.
//! 4. A [`Conversation`](agent::conversation::Conversation) that runs the
//!    round-limited "model → call → result → model" loop.
//!
//! # Getting started
//!
//! ```ignore
//! use bridle::prelude::*;
//! use std::sync::Arc;
//!
//! #[derive(serde::Deserialize, schemars::JsonSchema)]
//! struct EchoArgs {
//!     /// Text to echo back.
//!     text: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), TurnError> {
//!     let catalog = Arc::new(ToolCatalog::new().with(FnTool::new(
//!         ToolDef::new("echo", "Echo text back", json_schema_for::<EchoArgs>()),
//!         |args: EchoArgs| async move { Ok(ToolResult::success(args.text)) },
//!     )));
//!
//!     let backend = ChatCompletionsBackend::new(BackendConfig::new(
//!         "http://localhost:8080/v1",
//!         "local-model",
//!     ))?;
//!
//!     let config = ConversationConfig::new("You are a helpful device assistant.")
//!         .with_max_rounds(5);
//!
//!     let mut conversation = Conversation::new(&backend, catalog, config)
//!         .with_event_handler(&LoggingHandler);
//!
//!     let outcome = conversation.send("Echo 'hello'").await?;
//!     println!("{}", outcome.text);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`tools`] | [`Tool`](tools::core::Tool) trait, [`FnTool`](tools::core::FnTool), [`ToolCatalog`](tools::catalog::ToolCatalog), [`Dispatcher`](tools::dispatch::Dispatcher) |
//! | [`api`] | [`InferenceBackend`](api::InferenceBackend) boundary, OpenAI-compatible HTTP backend, response parser |
//! | [`agent`] | [`Conversation`](agent::conversation::Conversation) orchestrator, config, events, system prompt assembly |

pub mod agent;
pub mod api;
pub mod prelude;
pub mod tools;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

// Re-export schemars for downstream crates.
pub use schemars;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. This is the bridge between strong Rust types
/// and the `parameters` object of a tool definition.
///
/// # Example
///
/// ```
/// use bridle::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct SendSmsArgs {
///     to: String,
///     #[serde(default)]
///     body: Option<String>,
/// }
///
/// let schema = json_schema_for::<SendSmsArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"to".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema).unwrap_or_else(|_| json!({"type": "object", "properties": {}}))
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A message in the conversation history.
///
/// `call` is only set on assistant messages that triggered a tool call.
/// `tool_name`, `correlation_id` and `media` are only set on tool-role
/// messages, which carry a completed [`ToolResult`] back into history.
/// An assistant call message and its tool message share a `correlation_id`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<CallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Binary payload copied through from a successful tool result. Never
    /// serialized; the wire content only announces it via `hasMedia`.
    #[serde(skip)]
    pub media: Option<Media>,
}

impl Message {
    fn plain(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            call: None,
            tool_name: None,
            correlation_id: None,
            media: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::User, content)
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::Assistant, content)
    }

    /// Assistant message recording a call the model asked for. `content`
    /// is whatever narrative text accompanied the call (possibly empty).
    pub fn assistant_call(
        content: impl Into<String>,
        call: CallRequest,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            call: Some(call),
            correlation_id: Some(correlation_id.into()),
            ..Self::plain(MessageRole::Assistant, content)
        }
    }

    /// Tool-role message carrying `result` in its wire form.
    pub fn tool_result(
        tool_name: impl Into<String>,
        correlation_id: impl Into<String>,
        result: &ToolResult,
    ) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            correlation_id: Some(correlation_id.into()),
            media: result.media().cloned(),
            ..Self::plain(MessageRole::Tool, result.to_wire_string())
        }
    }

    /// Whether this is an assistant message that requested a tool call.
    pub fn is_call(&self) -> bool {
        self.role == MessageRole::Assistant && self.call.is_some()
    }
}

// ── Call types ─────────────────────────────────────────────────────

/// A structured request to invoke one tool.
///
/// `arguments` is kept as a raw JSON value: models hand back either an
/// object or a string containing encoded JSON, and the
/// [`Dispatcher`](tools::dispatch::Dispatcher) normalizes both. A missing
/// `name` deserializes as the empty string so it can be reported as a
/// dispatch failure rather than a parse error.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct CallRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl CallRequest {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Compact JSON rendering of the arguments as presented by the model.
    pub fn arguments_text(&self) -> String {
        match &self.arguments {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

// ── Tool results ───────────────────────────────────────────────────

/// Binary payload attached to a successful tool result.
///
/// The bytes and their media type travel together, so a result can never
/// carry one without the other.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Media {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl Media {
    pub fn new(bytes: impl Into<Vec<u8>>, media_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            media_type: media_type.into(),
        }
    }
}

/// The outcome of executing a call.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolResult {
    Success { data: Value, media: Option<Media> },
    Failure { message: String },
}

impl ToolResult {
    pub fn success(data: impl Into<Value>) -> Self {
        ToolResult::Success {
            data: data.into(),
            media: None,
        }
    }

    pub fn success_with_media(data: impl Into<Value>, media: Media) -> Self {
        ToolResult::Success {
            data: data.into(),
            media: Some(media),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        ToolResult::Failure {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success { .. })
    }

    /// The diagnostic message for a failure, `None` on success.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            ToolResult::Failure { message } => Some(message),
            ToolResult::Success { .. } => None,
        }
    }

    pub fn media(&self) -> Option<&Media> {
        match self {
            ToolResult::Success { media, .. } => media.as_ref(),
            ToolResult::Failure { .. } => None,
        }
    }

    /// Wire form surfaced as tool-message content:
    /// `{"success": true, "data": ..}` (plus `hasMedia`/`mediaType` when a
    /// payload is attached) or `{"success": false, "error": ".."}`.
    pub fn to_wire_json(&self) -> Value {
        match self {
            ToolResult::Success { data, media: None } => json!({
                "success": true,
                "data": data,
            }),
            ToolResult::Success {
                data,
                media: Some(media),
            } => json!({
                "success": true,
                "data": data,
                "hasMedia": true,
                "mediaType": media.media_type,
            }),
            ToolResult::Failure { message } => json!({
                "success": false,
                "error": message,
            }),
        }
    }

    pub fn to_wire_string(&self) -> String {
        self.to_wire_json().to_string()
    }
}

// ── Tool definition types ──────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition in the function-calling wire shape:
/// `{"type": "function", "function": {"name", "description", "parameters"}}`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    /// Create a function-calling tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.content, "hello");

        let user = Message::user("world");
        assert_eq!(user.role, MessageRole::User);

        let call = Message::assistant_call("", CallRequest::new("echo", json!({})), "c-1");
        assert!(call.is_call());
        assert_eq!(call.correlation_id.as_deref(), Some("c-1"));

        let tool = Message::tool_result("echo", "c-1", &ToolResult::success("ok"));
        assert_eq!(tool.role, MessageRole::Tool);
        assert_eq!(tool.tool_name.as_deref(), Some("echo"));
        assert!(!tool.is_call());
    }

    #[test]
    fn wire_json_for_success_and_failure() {
        let ok = ToolResult::success(json!({"lat": 1.5})).to_wire_json();
        assert_eq!(ok["success"], true);
        assert_eq!(ok["data"]["lat"], 1.5);
        assert!(ok.get("hasMedia").is_none());
        assert!(ok.get("error").is_none());

        let err = ToolResult::failure("boom").to_wire_json();
        assert_eq!(err, json!({"success": false, "error": "boom"}));
    }

    #[test]
    fn media_is_announced_and_copied_into_tool_message() {
        let result =
            ToolResult::success_with_media("captured", Media::new(vec![0xff, 0xd8], "image/jpeg"));
        let wire = result.to_wire_json();
        assert_eq!(wire["hasMedia"], true);
        assert_eq!(wire["mediaType"], "image/jpeg");

        let msg = Message::tool_result("camera", "c-9", &result);
        assert_eq!(msg.media.as_ref().map(|m| m.bytes.len()), Some(2));
        // Bytes never reach the serialized message.
        let serialized = serde_json::to_value(&msg).unwrap();
        assert!(serialized.get("media").is_none());
    }

    #[test]
    fn call_request_missing_fields_default() {
        let call: CallRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(call.name, "");
        assert_eq!(call.arguments, Value::Null);
        assert_eq!(call.arguments_text(), "");
    }

    #[test]
    fn tool_def_wire_shape() {
        let def = ToolDef::new("locate", "Current location", json!({"type": "object"}));
        let v = serde_json::to_value(&def).unwrap();
        assert_eq!(v["type"], "function");
        assert_eq!(v["function"]["name"], "locate");
        assert_eq!(v["function"]["parameters"]["type"], "object");
    }
}
