//! Conversation runtime: the bounded call loop and its supporting pieces.
//!
//! - [`conversation::Conversation`]: the orchestrator. Start here.
//! - [`config::ConversationConfig`]: round budget, tool timeout, and how
//!   calls are recognized in text.
//! - [`events`]: [`EventHandler`] trait and [`ConversationEvent`] enum for
//!   observing a turn, plus the [`TurnOutcome`] it returns.
//! - [`prompt`]: per-round system message assembly.

pub mod config;
pub mod conversation;
pub mod events;
pub mod prompt;

pub use config::{ConversationConfig, DEFAULT_MAX_ROUNDS};
pub use conversation::{Conversation, ConversationState, TurnError};
pub use events::{
    CallRecord, CompositeEventHandler, ConversationEvent, EventHandler, FnEventHandler,
    LoggingHandler, NoopHandler, ToolResultHandler, TurnOutcome,
};
pub use prompt::SystemPromptBuilder;
