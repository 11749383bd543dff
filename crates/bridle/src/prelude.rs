//! Convenience re-exports for common `bridle` types.
//!
//! ```ignore
//! use bridle::prelude::*;
//! ```
//!
//! Pulls in what most programs need: message and result types, the tool
//! trait and catalog, the conversation and its config, event handlers, and
//! the HTTP backend. Lower-level pieces (parser internals, argument
//! normalization, id generation) stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{CallRequest, Media, Message, MessageRole, ToolDef, ToolResult, json_schema_for};

// ── Conversation runtime ────────────────────────────────────────────
pub use crate::agent::{
    CallRecord, CompositeEventHandler, Conversation, ConversationConfig, ConversationEvent,
    ConversationState, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
    ToolResultHandler, TurnError, TurnOutcome,
};

// ── Inference ───────────────────────────────────────────────────────
pub use crate::api::{
    BackendConfig, ChatCompletionsBackend, FinishReason, InferenceBackend, InferenceError,
    InferenceFuture, InferenceOutcome, ResponseParser,
};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{
    Arguments, AvailabilityFlag, DispatchError, Dispatcher, FnTool, Tool, ToolCatalog, ToolFuture,
    parse_tool_args,
};
