//! Events, handlers, and turn results for a
//! [`Conversation`](super::conversation::Conversation).
//!
//! The conversation reports its progress through [`ConversationEvent`]
//! variants. Callers implement [`EventHandler`] to observe them for
//! logging, UI updates, or metrics. Handlers are observers only; they
//! cannot steer the loop.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget turns |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`ToolResultHandler`] | Per-tool-name callbacks (e.g. counting photos taken) |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use crate::ToolResult;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted while a turn runs.
#[derive(Debug)]
pub enum ConversationEvent<'a> {
    /// A user message was accepted and a turn is starting.
    TurnStart { turn_id: &'a str, user: &'a str },
    /// The model is about to be asked for the next step. `round` never
    /// exceeds `max_rounds`.
    RoundStart {
        round: u32,
        max_rounds: u32,
        tools_available: usize,
    },
    /// The model produced narrative text (may accompany a call).
    Text(&'a str),
    /// A call is about to be dispatched.
    ToolExecuting {
        name: &'a str,
        call_id: &'a str,
        arguments: &'a Value,
    },
    /// A dispatched call finished, successfully or not.
    ToolResult {
        name: &'a str,
        call_id: &'a str,
        result: &'a ToolResult,
    },
    /// The model asked for another call after the budget was spent. The
    /// call named `dropped` was not executed.
    RoundLimitReached { max_rounds: u32, dropped: &'a str },
    /// The turn completed with a final answer.
    Finished { rounds_used: u32 },
    /// The turn was cancelled by the caller.
    Cancelled,
}

/// Handler for conversation events.
///
/// # Example
///
/// ```ignore
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: &ConversationEvent<'_>) {
///         match event {
///             ConversationEvent::Text(text) => println!("{text}"),
///             ConversationEvent::ToolResult { name, result, .. } => {
///                 println!("[{name}] success={}", result.is_success());
///             }
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called for each event during a turn. The default does nothing.
    fn on_event(&self, event: &ConversationEvent<'_>) {
        let _ = event;
    }
}

/// An event handler that ignores everything.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let ConversationEvent::Text(text) = event {
///         println!("{text}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&ConversationEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&ConversationEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&ConversationEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &ConversationEvent<'_>) {
        (self.0)(event)
    }
}

/// An event handler that delegates to multiple inner handlers, in order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(verbose, PrintHandler);
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the chain. Handlers are called in registration order.
    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Conditionally add a handler to the chain.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    /// Add a handler from an `Option`. `None` is a no-op.
    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &ConversationEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

type ToolResultCallback = Box<dyn Fn(&ToolResult) + Send + Sync>;

/// Dispatches `ToolResult` events to per-tool-name callbacks.
///
/// ```ignore
/// let photos = Arc::new(AtomicU32::new(0));
/// let counter = photos.clone();
/// let handler = ToolResultHandler::new().on("camera", move |result| {
///     if result.is_success() {
///         counter.fetch_add(1, Ordering::Relaxed);
///     }
/// });
/// ```
pub struct ToolResultHandler {
    callbacks: Vec<(String, ToolResultCallback)>,
}

impl ToolResultHandler {
    pub fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    /// Register a callback for a tool name. Several callbacks may share a name.
    pub fn on(
        mut self,
        tool_name: impl Into<String>,
        callback: impl Fn(&ToolResult) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.push((tool_name.into(), Box::new(callback)));
        self
    }
}

impl Default for ToolResultHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for ToolResultHandler {
    fn on_event(&self, event: &ConversationEvent<'_>) {
        if let ConversationEvent::ToolResult { name, result, .. } = event {
            for (tool_name, callback) in &self.callbacks {
                if tool_name == name {
                    callback(result);
                }
            }
        }
    }
}

/// An event handler that logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &ConversationEvent<'_>) {
        match event {
            ConversationEvent::TurnStart { turn_id, user } => {
                let preview: String = user.chars().take(120).collect();
                info!("[{turn_id}] user: {preview}");
            }
            ConversationEvent::RoundStart {
                round,
                max_rounds,
                tools_available,
            } => {
                info!("[round {round}/{max_rounds}] {tools_available} tool(s) available");
            }
            ConversationEvent::Text(text) => {
                let preview: String = text.chars().take(200).collect();
                debug!(
                    "LLM text: {preview}{}",
                    if text.chars().count() > 200 { "..." } else { "" }
                );
            }
            ConversationEvent::ToolExecuting { name, call_id, .. } => {
                debug!("Executing tool: {name} ({call_id})");
            }
            ConversationEvent::ToolResult { name, result, .. } => match result.error_message() {
                None => debug!("Tool {name} succeeded"),
                Some(message) => warn!("Tool {name} failed: {message}"),
            },
            ConversationEvent::RoundLimitReached {
                max_rounds,
                dropped,
            } => {
                info!("Round limit reached ({max_rounds}); dropped call to {dropped}");
            }
            ConversationEvent::Finished { rounds_used } => {
                info!("Turn finished after {rounds_used} tool call(s)");
            }
            ConversationEvent::Cancelled => {
                info!("Turn cancelled");
            }
        }
    }
}

// ── Turn result ────────────────────────────────────────────────────

/// One executed call, kept for observability.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub name: String,
    /// Arguments exactly as the model presented them.
    pub arguments: Value,
    pub correlation_id: String,
    pub result: ToolResult,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// The result of one user turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub turn_id: String,
    /// Final assistant text, never empty.
    pub text: String,
    /// Calls executed this turn, in order.
    pub calls: Vec<CallRecord>,
    /// Tool executions performed (never more than `max_rounds`).
    pub rounds_used: u32,
    /// `false` when the turn ended because the round budget ran out.
    pub finished: bool,
}

impl TurnOutcome {
    /// Names of the tools called this turn, in order.
    pub fn tools_used(&self) -> Vec<&str> {
        self.calls.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn hit_round_limit(&self) -> bool {
        !self.finished
    }
}
