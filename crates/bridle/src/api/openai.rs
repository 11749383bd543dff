//! [`InferenceBackend`] for OpenAI-compatible `chat/completions` servers
//! (llama.cpp server, vLLM, Ollama's OpenAI endpoint, OpenRouter).
//!
//! Requests are non-streaming. Conversation history is mapped onto the
//! OpenAI message shape: an assistant call becomes a single-entry
//! `tool_calls` array whose id is the call's correlation id, and a tool
//! message answers it through `tool_call_id`.

use super::{FinishReason, InferenceBackend, InferenceError, InferenceFuture, InferenceOutcome};
use crate::{CallRequest, Message, MessageRole, ToolDef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Default completion budget per request.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Connection and sampling settings for [`ChatCompletionsBackend`].
///
/// ```ignore
/// let config = BackendConfig::new("http://localhost:8080/v1", "qwen2.5-7b-instruct")
///     .with_api_key(std::env::var("BRIDLE_API_KEY").ok())
///     .with_temperature(0.1);
/// ```
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL up to and including the version segment, e.g. `http://host/v1`.
    pub base_url: String,
    pub model: String,
    /// Sent as a bearer token when present.
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Whole-request HTTP timeout. This bounds the transport only; the
    /// conversation itself puts no limit on inference time.
    pub request_timeout: Duration,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.2,
            request_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Full `chat/completions` endpoint URL.
    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

// ── Wire types ─────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDef]>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize, Debug, PartialEq)]
struct WireMessage {
    role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Debug, PartialEq)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: WireFunctionCall,
}

#[derive(Serialize, Debug, PartialEq)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

/// Raw API response (internal deserialization target).
#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<RawToolCall>>,
}

#[derive(Deserialize, Debug)]
struct RawToolCall {
    function: RawFunctionCall,
}

#[derive(Deserialize, Debug)]
struct RawFunctionCall {
    #[serde(default)]
    name: String,
    /// Usually a JSON-encoded string; some servers send an object.
    #[serde(default)]
    arguments: Value,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

fn to_wire_message(message: &Message) -> WireMessage {
    let content = Some(message.content.clone());
    match (message.role, &message.call) {
        (MessageRole::Assistant, Some(call)) => {
            let arguments = match call.arguments_text() {
                a if a.trim().is_empty() => "{}".to_string(),
                a => a,
            };
            WireMessage {
                role: MessageRole::Assistant,
                content: content.filter(|c| !c.is_empty()),
                tool_calls: Some(vec![WireToolCall {
                    id: message.correlation_id.clone().unwrap_or_default(),
                    call_type: "function",
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments,
                    },
                }]),
                tool_call_id: None,
            }
        }
        (MessageRole::Tool, _) => WireMessage {
            role: MessageRole::Tool,
            content,
            tool_calls: None,
            tool_call_id: message.correlation_id.clone(),
        },
        (role, _) => WireMessage {
            role,
            content,
            tool_calls: None,
            tool_call_id: None,
        },
    }
}

fn outcome_from_body(body: &str) -> Result<InferenceOutcome, InferenceError> {
    let parsed: RawChatResponse = serde_json::from_str(body)?;

    if let Some(err) = parsed.error {
        return Err(InferenceError::Engine(err.message));
    }

    let Some(choice) = parsed.choices.and_then(|c| c.into_iter().next()) else {
        debug!("LLM output: empty (no choices)");
        return Ok(InferenceOutcome::text(""));
    };

    let mut tool_calls = choice.message.tool_calls.unwrap_or_default();
    if tool_calls.len() > 1 {
        debug!(
            "LLM requested {} tool calls; only the first is used",
            tool_calls.len()
        );
    }
    let call = (!tool_calls.is_empty()).then(|| {
        let first = tool_calls.swap_remove(0);
        CallRequest::new(first.function.name, first.function.arguments)
    });

    let text = choice.message.content.unwrap_or_default();
    debug!(
        "LLM output: {} chars text, call={}",
        text.len(),
        call.as_ref().map_or("none", |c| c.name.as_str())
    );

    Ok(InferenceOutcome {
        text,
        call,
        finish_reason: FinishReason::from_wire(choice.finish_reason.as_deref()),
    })
}

// ── Backend ────────────────────────────────────────────────────────

/// Async HTTP backend for OpenAI-compatible chat completion servers.
pub struct ChatCompletionsBackend {
    client: reqwest::Client,
    config: BackendConfig,
}

impl ChatCompletionsBackend {
    pub fn new(config: BackendConfig) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("bridle/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDef]>,
    ) -> Result<InferenceOutcome, InferenceError> {
        let body = WireRequest {
            model: &self.config.model,
            messages: messages.iter().map(to_wire_message).collect(),
            tools,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };
        debug!(
            "LLM request: model={}, messages={}, tools={}, max_tokens={}, temp={}",
            self.config.model,
            body.messages.len(),
            tools.map_or(0, <[ToolDef]>::len),
            body.max_tokens,
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(&body).map_or(0, |s| s.len())
        );

        let start = Instant::now();
        let mut request = self.client.post(self.config.endpoint()).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request.send().await?;

        let status = resp.status();
        let text = resp.text().await?;
        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(InferenceError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        outcome_from_body(&text)
    }
}

impl InferenceBackend for ChatCompletionsBackend {
    fn complete<'a>(
        &'a self,
        messages: &'a [Message],
        tools: Option<&'a [ToolDef]>,
    ) -> InferenceFuture<'a> {
        Box::pin(self.chat(messages, tools))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolResult;
    use serde_json::json;

    #[test]
    fn endpoint_joins_base_url() {
        let config = BackendConfig::new("http://localhost:8080/v1/", "m");
        assert_eq!(config.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn blank_api_key_is_dropped() {
        let config = BackendConfig::new("http://x", "m").with_api_key(Some("  ".into()));
        assert!(config.api_key.is_none());
    }

    #[test]
    fn call_and_result_messages_share_an_id() {
        let call = Message::assistant_call(
            "",
            CallRequest::new("camera", json!({"flash": true})),
            "turn-1:call0",
        );
        let result = Message::tool_result("camera", "turn-1:call0", &ToolResult::success("ok"));

        let wire_call = serde_json::to_value(to_wire_message(&call)).unwrap();
        assert_eq!(wire_call["role"], "assistant");
        assert!(wire_call.get("content").is_none());
        assert_eq!(wire_call["tool_calls"][0]["id"], "turn-1:call0");
        assert_eq!(wire_call["tool_calls"][0]["type"], "function");
        assert_eq!(wire_call["tool_calls"][0]["function"]["arguments"], "{\"flash\":true}");

        let wire_result = serde_json::to_value(to_wire_message(&result)).unwrap();
        assert_eq!(wire_result["role"], "tool");
        assert_eq!(wire_result["tool_call_id"], "turn-1:call0");
        let content: Value =
            serde_json::from_str(wire_result["content"].as_str().unwrap()).unwrap();
        assert_eq!(content, json!({"success": true, "data": "ok"}));
    }

    #[test]
    fn call_without_arguments_sends_empty_object() {
        let call = Message::assistant_call("", CallRequest::new("locate", Value::Null), "c");
        let wire = to_wire_message(&call);
        let args = &wire.tool_calls.unwrap()[0].function.arguments;
        assert_eq!(args, "{}");
    }

    #[test]
    fn decodes_text_response() {
        let body = r#"{"choices":[{"message":{"content":"Hello"},"finish_reason":"stop"}]}"#;
        let outcome = outcome_from_body(body).unwrap();
        assert_eq!(outcome, InferenceOutcome::text("Hello"));
    }

    #[test]
    fn decodes_first_tool_call_only() {
        let body = r#"{"choices":[{"message":{"content":null,"tool_calls":[
            {"id":"a","type":"function","function":{"name":"sms","arguments":"{\"to\":\"555\"}"}},
            {"id":"b","type":"function","function":{"name":"camera","arguments":"{}"}}
        ]},"finish_reason":"tool_calls"}]}"#;
        let outcome = outcome_from_body(body).unwrap();
        assert_eq!(outcome.finish_reason, FinishReason::ToolCall);
        assert_eq!(outcome.text, "");
        let call = outcome.call.unwrap();
        assert_eq!(call.name, "sms");
        assert_eq!(call.arguments, json!("{\"to\":\"555\"}"));
    }

    #[test]
    fn api_error_body_is_an_engine_error() {
        let err = outcome_from_body(r#"{"error":{"message":"model not loaded"}}"#).unwrap_err();
        assert!(matches!(err, InferenceError::Engine(ref m) if m == "model not loaded"));
    }

    #[test]
    fn garbage_body_is_a_decode_error() {
        let err = outcome_from_body("<html>").unwrap_err();
        assert!(matches!(err, InferenceError::Decode(_)));
    }

    #[test]
    fn empty_choices_is_empty_text() {
        let outcome = outcome_from_body(r#"{"choices":[]}"#).unwrap();
        assert_eq!(outcome.text, "");
        assert!(outcome.call.is_none());
    }
}
