//! Configuration for a [`Conversation`](super::conversation::Conversation).
//!
//! ```ignore
//! let config = ConversationConfig::new("You are a helpful device assistant.")
//!     .with_max_rounds(3)
//!     .with_tool_timeout(Duration::from_secs(10))
//!     .with_call_tag("function_call")
//!     .with_arg_validation(true);
//! ```

use crate::api::parser::{DEFAULT_CALL_TAG, ResponseParser};
use crate::tools::catalog::ToolCatalog;
use crate::tools::dispatch::{DEFAULT_TOOL_TIMEOUT, Dispatcher};
use std::sync::Arc;
use std::time::Duration;

/// Default bound on tool executions per user turn.
pub const DEFAULT_MAX_ROUNDS: u32 = 5;

/// Settings for the bounded call loop.
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Static instructions at the top of every round's system message.
    pub instructions: String,
    /// Maximum tool executions per user turn. Default: 5.
    pub max_rounds: u32,
    /// Per-call execution timeout. Default: 30 seconds.
    pub tool_timeout: Duration,
    /// Validate arguments against each tool's JSON Schema before execution.
    pub validate_args: bool,
    /// Look for calls embedded in the model's text when the backend does
    /// not report one natively. Default: `true`.
    pub text_calls: bool,
    /// Tag name for embedded calls (`<tag>...</tag>`). Default: `tool_call`.
    pub call_tag: String,
    /// Also accept bare inline `{"name": .., "arguments": ..}` objects.
    pub inline_calls: bool,
}

impl ConversationConfig {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            validate_args: false,
            text_calls: true,
            call_tag: DEFAULT_CALL_TAG.to_string(),
            inline_calls: true,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    pub fn with_text_calls(mut self, enabled: bool) -> Self {
        self.text_calls = enabled;
        self
    }

    pub fn with_call_tag(mut self, tag: impl Into<String>) -> Self {
        self.call_tag = tag.into();
        self
    }

    pub fn with_inline_calls(mut self, enabled: bool) -> Self {
        self.inline_calls = enabled;
        self
    }

    /// Parser matching these settings.
    pub fn parser(&self) -> ResponseParser {
        ResponseParser::with_tag(&self.call_tag).with_inline_objects(self.inline_calls)
    }

    /// Dispatcher over `catalog` matching these settings.
    pub fn dispatcher(&self, catalog: Arc<ToolCatalog>) -> Dispatcher {
        Dispatcher::new(catalog)
            .with_timeout(self.tool_timeout)
            .with_arg_validation(self.validate_args)
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self::new("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ConversationConfig::default();
        assert_eq!(config.max_rounds, 5);
        assert_eq!(config.tool_timeout, Duration::from_secs(30));
        assert!(config.text_calls);
        assert!(!config.validate_args);
        assert_eq!(config.parser().open_tag(), "<tool_call>");
    }

    #[test]
    fn builders_flow_into_parser_and_dispatcher() {
        let config = ConversationConfig::new("x")
            .with_call_tag("call")
            .with_tool_timeout(Duration::from_millis(250));
        assert_eq!(config.parser().close_tag(), "</call>");
        let dispatcher = config.dispatcher(Arc::new(ToolCatalog::new()));
        assert_eq!(dispatcher.timeout(), Duration::from_millis(250));
    }
}
