//! The conversation orchestrator: a bounded "model → call → result → model"
//! loop over an append-only message history.
//!
//! Each user turn walks a small state machine:
//!
//! ```text
//! Idle ─send─▶ AwaitingInference ──call, budget left──▶ Dispatching ─┐
//!                    ▲      │                                        │
//!                    │      └──no call / budget spent──▶ Done        │
//!                    └───────────────────────────────────────────────┘
//! ```
//!
//! Every round rebuilds the system message (instructions plus the tools
//! available *now*) and sends it ahead of the full history. At most
//! `max_rounds` tools execute per turn. When the model asks for one more,
//! that call is dropped and a "maximum rounds reached" answer is
//! synthesized instead. Tool failures never end a turn; the model sees them
//! as tool results. Only inference errors and cancellation do.

use super::config::ConversationConfig;
use super::events::{CallRecord, ConversationEvent, EventHandler, NoopHandler, TurnOutcome};
use super::prompt::build_system_message;
use crate::api::ids::{generate_call_id, generate_turn_id};
use crate::api::parser::ResponseParser;
use crate::api::{FinishReason, InferenceBackend, InferenceError};
use crate::tools::catalog::ToolCatalog;
use crate::tools::dispatch::Dispatcher;
use crate::{Message, ToolResult};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Where a conversation is in its turn lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// No turn has run yet, or the last one was cancelled or failed.
    Idle,
    AwaitingInference,
    Dispatching,
    /// The last turn produced a final answer.
    Done,
}

/// Why a turn ended without a final answer.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("turn cancelled")]
    Cancelled,
}

/// A single conversation with a model and a shared tool catalog.
///
/// The conversation exclusively owns its history; every mutating method
/// takes `&mut self`, so a history change can never race an in-flight turn.
///
/// ```ignore
/// let mut conversation = Conversation::new(&backend, catalog, config)
///     .with_event_handler(&LoggingHandler);
///
/// let outcome = conversation.send("Where am I?").await?;
/// println!("{} ({} tool calls)", outcome.text, outcome.rounds_used);
/// ```
pub struct Conversation<'a> {
    backend: &'a dyn InferenceBackend,
    catalog: Arc<ToolCatalog>,
    dispatcher: Dispatcher,
    parser: ResponseParser,
    config: ConversationConfig,
    event_handler: &'a dyn EventHandler,
    history: Vec<Message>,
    state: ConversationState,
}

impl<'a> Conversation<'a> {
    pub fn new(
        backend: &'a dyn InferenceBackend,
        catalog: Arc<ToolCatalog>,
        config: ConversationConfig,
    ) -> Self {
        Self {
            backend,
            dispatcher: config.dispatcher(Arc::clone(&catalog)),
            parser: config.parser(),
            catalog,
            config,
            event_handler: &NoopHandler,
            history: Vec::new(),
            state: ConversationState::Idle,
        }
    }

    /// Attach an event handler.
    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.event_handler = handler;
        self
    }

    /// Start from an existing history (e.g. restored from storage).
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self.close_dangling_call();
        self
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    /// Reset the history to empty.
    pub fn clear_history(&mut self) {
        debug!("Clearing {} message(s) of history", self.history.len());
        self.history.clear();
        self.state = ConversationState::Idle;
    }

    /// Run one user turn to completion.
    pub async fn send(&mut self, user: impl Into<String>) -> Result<TurnOutcome, TurnError> {
        self.send_with_cancel(user, &CancellationToken::new()).await
    }

    /// Run one user turn, stopping early if `cancel` fires.
    ///
    /// On cancellation the turn stops awaiting inference or dispatch, any
    /// call already recorded in history gets a "cancelled" tool result so
    /// no request is left unanswered, and `TurnError::Cancelled` is
    /// returned. A token that is already cancelled leaves history untouched.
    pub async fn send_with_cancel(
        &mut self,
        user: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        // A previous turn whose future was dropped mid-dispatch.
        self.close_dangling_call();

        if cancel.is_cancelled() {
            return Err(TurnError::Cancelled);
        }

        let user = user.into();
        let turn_id = generate_turn_id();
        let backend = self.backend;
        let events = self.event_handler;
        let max_rounds = self.config.max_rounds;

        events.on_event(&ConversationEvent::TurnStart {
            turn_id: &turn_id,
            user: &user,
        });
        self.history.push(Message::user(user));

        let mut calls: Vec<CallRecord> = Vec::new();
        let mut rounds_used: u32 = 0;

        loop {
            self.state = ConversationState::AwaitingInference;

            let tool_defs = self.catalog.to_call_definitions();
            let context = self.build_context();
            // The last inference after the budget is spent cannot dispatch,
            // so it reports the final round again instead of max + 1.
            events.on_event(&ConversationEvent::RoundStart {
                round: (rounds_used + 1).min(max_rounds.max(1)),
                max_rounds,
                tools_available: tool_defs.len(),
            });

            let tools = (!tool_defs.is_empty()).then_some(tool_defs.as_slice());
            let completed = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcome = backend.complete(&context, tools) => Some(outcome),
            };
            let Some(completed) = completed else {
                return Err(self.abandon_turn());
            };

            let outcome = match completed {
                Ok(outcome) if outcome.finish_reason == FinishReason::EngineError => {
                    self.state = ConversationState::Idle;
                    let message = if outcome.text.trim().is_empty() {
                        "engine reported an error".to_string()
                    } else {
                        outcome.text
                    };
                    return Err(InferenceError::Engine(message).into());
                }
                Ok(outcome) => outcome,
                Err(e) => {
                    self.state = ConversationState::Idle;
                    return Err(e.into());
                }
            };

            if outcome.finish_reason == FinishReason::LengthLimit {
                debug!("Model output hit the length limit");
            }

            let (text, call) = match outcome.call {
                Some(call) => (outcome.text.trim().to_string(), Some(call)),
                None if self.config.text_calls => {
                    let parsed = self.parser.parse(&outcome.text);
                    (parsed.text, parsed.call)
                }
                None => (outcome.text, None),
            };

            if !text.trim().is_empty() {
                events.on_event(&ConversationEvent::Text(&text));
            }

            let call = match call {
                None => {
                    let text = if text.trim().is_empty() {
                        fallback_text(&calls)
                    } else {
                        text
                    };
                    return Ok(self.finish(turn_id, text, calls, rounds_used, true));
                }
                Some(call) if rounds_used >= max_rounds => {
                    events.on_event(&ConversationEvent::RoundLimitReached {
                        max_rounds,
                        dropped: &call.name,
                    });
                    let text = round_limit_text(max_rounds, &call.name);
                    return Ok(self.finish(turn_id, text, calls, rounds_used, false));
                }
                Some(call) => call,
            };

            self.state = ConversationState::Dispatching;
            let call_id = generate_call_id(&turn_id, rounds_used);
            self.history
                .push(Message::assistant_call(text, call.clone(), &call_id));
            events.on_event(&ConversationEvent::ToolExecuting {
                name: &call.name,
                call_id: &call_id,
                arguments: &call.arguments,
            });

            let started_at = Utc::now();
            let start = Instant::now();
            let dispatched = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.dispatcher.dispatch(&call) => Some(result),
            };
            let Some(result) = dispatched else {
                return Err(self.abandon_turn());
            };

            self.history
                .push(Message::tool_result(&call.name, &call_id, &result));
            events.on_event(&ConversationEvent::ToolResult {
                name: &call.name,
                call_id: &call_id,
                result: &result,
            });

            calls.push(CallRecord {
                name: call.name,
                arguments: call.arguments,
                correlation_id: call_id,
                result,
                started_at,
                elapsed: start.elapsed(),
            });
            rounds_used += 1;
        }
    }

    /// System message for this round followed by the full history.
    fn build_context(&self) -> Vec<Message> {
        let tags = self
            .config
            .text_calls
            .then(|| (self.parser.open_tag(), self.parser.close_tag()));
        let system = build_system_message(
            &self.config.instructions,
            &self.catalog.to_prompt_block(),
            tags,
        );

        let mut context = Vec::with_capacity(self.history.len() + 1);
        context.push(Message::system(system));
        context.extend(self.history.iter().cloned());
        context
    }

    fn finish(
        &mut self,
        turn_id: String,
        text: String,
        calls: Vec<CallRecord>,
        rounds_used: u32,
        finished: bool,
    ) -> TurnOutcome {
        self.history.push(Message::assistant_text(text.clone()));
        self.state = ConversationState::Done;
        if finished {
            self.event_handler
                .on_event(&ConversationEvent::Finished { rounds_used });
        }
        info!("Turn {turn_id} completed: {rounds_used} tool call(s), finished={finished}");
        TurnOutcome {
            turn_id,
            text,
            calls,
            rounds_used,
            finished,
        }
    }

    fn abandon_turn(&mut self) -> TurnError {
        self.close_dangling_call();
        self.state = ConversationState::Idle;
        self.event_handler.on_event(&ConversationEvent::Cancelled);
        TurnError::Cancelled
    }

    /// Answer a trailing assistant call that never got its tool result.
    fn close_dangling_call(&mut self) {
        let Some(last) = self.history.last() else {
            return;
        };
        let (Some(call), true) = (&last.call, last.is_call()) else {
            return;
        };
        let name = call.name.clone();
        let call_id = last.correlation_id.clone().unwrap_or_default();
        debug!("Closing unanswered call to {name} ({call_id})");
        let result = ToolResult::failure(format!("tool '{name}' was cancelled before completing"));
        self.history
            .push(Message::tool_result(name, call_id, &result));
        if matches!(
            self.state,
            ConversationState::AwaitingInference | ConversationState::Dispatching
        ) {
            self.state = ConversationState::Idle;
        }
    }
}

/// Answer used when the model ends a turn with no text.
pub fn fallback_text(calls: &[CallRecord]) -> String {
    if calls.is_empty() {
        return "I don't have anything to add.".to_string();
    }
    let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
    format!(
        "Completed {} tool call(s): {}.",
        calls.len(),
        names.join(", ")
    )
}

/// Answer used when the model asks for a call after the budget is spent.
pub fn round_limit_text(max_rounds: u32, dropped: &str) -> String {
    format!(
        "Maximum rounds reached ({max_rounds} tool call(s) per turn). \
         The requested call to '{dropped}' was not executed."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CallRequest;
    use serde_json::json;
    use std::time::Duration;

    fn record(name: &str) -> CallRecord {
        CallRecord {
            name: name.into(),
            arguments: json!({}),
            correlation_id: "c".into(),
            result: ToolResult::success(json!(null)),
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn fallback_mentions_tools_used() {
        assert_eq!(
            fallback_text(&[record("camera"), record("sms")]),
            "Completed 2 tool call(s): camera, sms."
        );
        assert!(!fallback_text(&[]).is_empty());
    }

    #[test]
    fn round_limit_text_names_dropped_call() {
        let text = round_limit_text(2, "camera");
        assert!(text.starts_with("Maximum rounds reached"));
        assert!(text.contains("'camera'"));
    }

    struct NeverBackend;

    impl InferenceBackend for NeverBackend {
        fn complete<'a>(
            &'a self,
            _messages: &'a [Message],
            _tools: Option<&'a [crate::ToolDef]>,
        ) -> crate::api::InferenceFuture<'a> {
            Box::pin(futures::future::pending::<
                Result<crate::api::InferenceOutcome, InferenceError>,
            >())
        }
    }

    #[test]
    fn restored_history_gets_dangling_call_closed() {
        let backend = NeverBackend;
        let history = vec![
            Message::user("take a photo"),
            Message::assistant_call("", CallRequest::new("camera", json!({})), "c0"),
        ];
        let conversation = Conversation::new(
            &backend,
            Arc::new(ToolCatalog::new()),
            ConversationConfig::default(),
        )
        .with_history(history);

        let last = conversation.history().last().unwrap();
        assert_eq!(last.role, crate::MessageRole::Tool);
        assert_eq!(last.correlation_id.as_deref(), Some("c0"));
        assert!(last.content.contains("cancelled"));
    }

    #[tokio::test]
    async fn pre_cancelled_token_leaves_history_untouched() {
        let backend = NeverBackend;
        let mut conversation = Conversation::new(
            &backend,
            Arc::new(ToolCatalog::new()),
            ConversationConfig::default(),
        );
        let token = CancellationToken::new();
        token.cancel();

        let err = conversation.send_with_cancel("hi", &token).await.unwrap_err();
        assert!(matches!(err, TurnError::Cancelled));
        assert!(conversation.history().is_empty());
        assert_eq!(conversation.state(), ConversationState::Idle);
    }

    #[tokio::test]
    async fn cancel_during_inference_returns_to_idle() {
        let backend = NeverBackend;
        let mut conversation = Conversation::new(
            &backend,
            Arc::new(ToolCatalog::new()),
            ConversationConfig::default(),
        );
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = conversation.send_with_cancel("hi", &token).await.unwrap_err();
        assert!(matches!(err, TurnError::Cancelled));
        assert_eq!(conversation.state(), ConversationState::Idle);
        assert_eq!(conversation.history().len(), 1);
    }
}
