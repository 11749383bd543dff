//! Single-call dispatch: resolve, normalize, validate, execute.
//!
//! [`Dispatcher::dispatch`] never fails. Every problem, from a blank tool
//! name to a panicking tool body, comes back as a [`ToolResult::Failure`]
//! whose message is the `Display` of a [`DispatchError`]. Checks run in a
//! fixed order and the first failing check wins:
//!
//! 1. missing or blank name
//! 2. unknown tool
//! 3. tool not currently available
//! 4. arguments not normalizable to an object (or, when enabled, not
//!    matching the tool's JSON schema)
//! 5. execution timeout or fault
//!
//! Each call is attempted exactly once. There are no retries.

use super::catalog::ToolCatalog;
use super::core::{Arguments, log_tool_call};
use crate::{CallRequest, ToolResult};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinError;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, trace, warn};

/// Default per-call execution timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a dispatch produced a failure instead of the tool's own result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("missing or empty tool name")]
    MissingName,
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("tool '{0}' is not currently available")]
    ToolUnavailable(String),
    #[error("invalid arguments for tool '{name}'{}", detail_suffix(.details))]
    InvalidArguments {
        name: String,
        details: Option<String>,
    },
    #[error("tool '{name}' timed out after {ms}ms")]
    ExecutionTimeout { name: String, ms: u128 },
    #[error("tool '{name}' failed: {message}")]
    ExecutionFault { name: String, message: String },
}

fn detail_suffix(details: &Option<String>) -> String {
    details
        .as_deref()
        .map(|d| format!(": {d}"))
        .unwrap_or_default()
}

impl From<DispatchError> for ToolResult {
    fn from(err: DispatchError) -> Self {
        ToolResult::failure(err.to_string())
    }
}

/// Resolves and executes call requests against a shared [`ToolCatalog`].
///
/// # Example
///
/// ```ignore
/// let dispatcher = Dispatcher::new(catalog.clone())
///     .with_timeout(Duration::from_secs(10))
///     .with_arg_validation(true);
///
/// let result = dispatcher
///     .dispatch(&CallRequest::new("send_sms", json!({"to": "555", "body": "hi"})))
///     .await;
/// ```
#[derive(Debug, Clone)]
pub struct Dispatcher {
    catalog: Arc<ToolCatalog>,
    timeout: Duration,
    /// Whether to validate arguments against the tool's JSON Schema.
    validate_args: bool,
}

impl Dispatcher {
    pub fn new(catalog: Arc<ToolCatalog>) -> Self {
        Self {
            catalog,
            timeout: DEFAULT_TOOL_TIMEOUT,
            validate_args: false,
        }
    }

    /// Override the per-call execution timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable JSON Schema argument validation before execution.
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    /// Dispatch one call, always yielding a single terminal result.
    pub async fn dispatch(&self, request: &CallRequest) -> ToolResult {
        match self.try_dispatch(request).await {
            Ok(result) => result,
            Err(err) => {
                info!("[tool] {err}");
                err.into()
            }
        }
    }

    /// Like [`dispatch`](Self::dispatch) but keeps the failure typed.
    pub async fn try_dispatch(&self, request: &CallRequest) -> Result<ToolResult, DispatchError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(DispatchError::MissingName);
        }

        let tool = self
            .catalog
            .find(name)
            .ok_or_else(|| DispatchError::UnknownTool(name.to_string()))?;

        if !tool.is_available() {
            return Err(DispatchError::ToolUnavailable(name.to_string()));
        }

        let arguments = normalize_arguments(name, &request.arguments)?;

        if self.validate_args {
            validate_arguments(name, &tool.definition().function.parameters, &arguments)?;
        }

        log_tool_call(name, &arguments);
        let start = Instant::now();

        // The tool runs on its own task so a hung body can be abandoned.
        // Dropping this future (a cancelled turn) aborts the task too.
        let mut handle =
            AbortOnDropHandle::new(tokio::spawn(async move { tool.execute(arguments).await }));

        let outcome = match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                // Aborting is best effort; blocking work keeps running detached.
                // Either way the handle is dropped and its result never read.
                handle.abort();
                warn!(
                    "Tool {name} timed out after {:.1}s, abandoning execution",
                    start.elapsed().as_secs_f64()
                );
                return Err(DispatchError::ExecutionTimeout {
                    name: name.to_string(),
                    ms: self.timeout.as_millis(),
                });
            }
        };

        let elapsed = start.elapsed();
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(message)) => {
                return Err(DispatchError::ExecutionFault {
                    name: name.to_string(),
                    message,
                });
            }
            Err(join_err) => {
                return Err(DispatchError::ExecutionFault {
                    name: name.to_string(),
                    message: join_failure_message(join_err),
                });
            }
        };

        debug!(
            "Tool {name} completed in {:.0}ms (success={})",
            elapsed.as_secs_f64() * 1000.0,
            result.is_success()
        );
        trace!("Tool {name} result: {}", result.to_wire_string());

        Ok(result)
    }
}

/// Normalize raw call arguments to an object.
///
/// Objects pass through. `null` (arguments omitted) is an empty object. A
/// string is trimmed; blank or `{}` is an empty object, anything else must
/// parse as a JSON object. Every other shape is invalid.
pub fn normalize_arguments(name: &str, raw: &Value) -> Result<Arguments, DispatchError> {
    let invalid = || DispatchError::InvalidArguments {
        name: name.to_string(),
        details: None,
    };

    match raw {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Arguments::new()),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() || trimmed == "{}" {
                return Ok(Arguments::new());
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Object(map)) => Ok(map),
                _ => Err(invalid()),
            }
        }
        _ => Err(invalid()),
    }
}

/// Validate normalized arguments against a tool's parameter schema.
///
/// A schema that does not compile is treated as "accept anything".
pub fn validate_arguments(
    name: &str,
    schema: &Value,
    arguments: &Arguments,
) -> Result<(), DispatchError> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(v) => v,
        Err(e) => {
            debug!("Skipping argument validation for {name}: schema does not compile: {e}");
            return Ok(());
        }
    };

    let instance = Value::Object(arguments.clone());
    let errors: Vec<String> = validator
        .iter_errors(&instance)
        .map(|e| format!("{}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(DispatchError::InvalidArguments {
            name: name.to_string(),
            details: Some(errors.join("; ")),
        })
    }
}

fn join_failure_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "execution was cancelled".into();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "tool panicked".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::core::{AvailabilityFlag, FnTool, Tool, ToolFuture};
    use crate::{ToolDef, json_schema_for};
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Deserialize, JsonSchema)]
    struct EchoArgs {
        text: String,
    }

    struct FailTool;

    impl Tool for FailTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new("fail", "Always fails", json!({"type": "object"}))
        }

        fn execute(&self, _arguments: Arguments) -> ToolFuture {
            Box::pin(async { Err("printer on fire".to_string()) })
        }
    }

    struct PanicTool;

    impl Tool for PanicTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new("panic", "Panics", json!({"type": "object"}))
        }

        fn execute(&self, _arguments: Arguments) -> ToolFuture {
            Box::pin(async { Ok(ToolResult::success(read_sensor())) })
        }
    }

    fn read_sensor() -> u8 {
        panic!("sensor driver crashed")
    }

    fn echo_tool() -> FnTool {
        FnTool::new(
            ToolDef::new("echo", "Echo text", json_schema_for::<EchoArgs>()),
            |args: EchoArgs| async move { Ok(ToolResult::success(json!({"echo": args.text}))) },
        )
    }

    fn dispatcher_with(catalog: ToolCatalog) -> Dispatcher {
        Dispatcher::new(Arc::new(catalog))
    }

    fn failure_text(result: &ToolResult) -> &str {
        result.error_message().expect("expected failure")
    }

    #[tokio::test]
    async fn missing_name_fails_first() {
        let d = dispatcher_with(ToolCatalog::new());
        let r = d.dispatch(&CallRequest::default()).await;
        assert_eq!(failure_text(&r), "missing or empty tool name");

        let r = d.dispatch(&CallRequest::new("   ", Value::Null)).await;
        assert!(failure_text(&r).contains("missing"));
    }

    #[tokio::test]
    async fn unknown_tool() {
        let d = dispatcher_with(ToolCatalog::new());
        let r = d.dispatch(&CallRequest::new("ghost", Value::Null)).await;
        assert_eq!(failure_text(&r), "unknown tool: ghost");
    }

    #[tokio::test]
    async fn unavailable_tool() {
        let flag = AvailabilityFlag::new(false);
        let d = dispatcher_with(ToolCatalog::new().with(echo_tool().with_flag(flag.clone())));
        let call = CallRequest::new("echo", json!({"text": "hi"}));

        let r = d.dispatch(&call).await;
        assert_eq!(failure_text(&r), "tool 'echo' is not currently available");

        flag.set(true);
        assert!(d.dispatch(&call).await.is_success());
    }

    #[tokio::test]
    async fn string_and_object_arguments_are_equivalent() {
        let d = dispatcher_with(ToolCatalog::new().with(echo_tool()));
        let from_string = d
            .dispatch(&CallRequest::new("echo", json!("{\"text\":\"hi\"}")))
            .await;
        let from_object = d
            .dispatch(&CallRequest::new("echo", json!({"text": "hi"})))
            .await;
        assert_eq!(from_string, from_object);
        assert_eq!(from_object, ToolResult::success(json!({"echo": "hi"})));
    }

    #[test]
    fn normalization_rules() {
        assert!(normalize_arguments("t", &json!("")).unwrap().is_empty());
        assert!(normalize_arguments("t", &json!("  {}  ")).unwrap().is_empty());
        assert!(normalize_arguments("t", &Value::Null).unwrap().is_empty());
        assert_eq!(
            normalize_arguments("t", &json!(" {\"a\": 1} ")).unwrap()["a"],
            1
        );

        for bad in [json!("not json"), json!("[1, 2]"), json!(42), json!([1])] {
            let err = normalize_arguments("t", &bad).unwrap_err();
            assert_eq!(err.to_string(), "invalid arguments for tool 't'");
        }
    }

    #[tokio::test]
    async fn invalid_argument_string_is_reported() {
        let d = dispatcher_with(ToolCatalog::new().with(echo_tool()));
        let r = d.dispatch(&CallRequest::new("echo", json!("{oops"))).await;
        assert_eq!(failure_text(&r), "invalid arguments for tool 'echo'");
    }

    #[tokio::test]
    async fn schema_validation_when_enabled() {
        let catalog = ToolCatalog::new().with(echo_tool());
        let call = CallRequest::new("echo", json!({"text": 5}));

        let strict = dispatcher_with(catalog).with_arg_validation(true);
        let r = strict.dispatch(&call).await;
        let msg = failure_text(&r);
        assert!(msg.starts_with("invalid arguments for tool 'echo': "), "got: {msg}");
        assert!(msg.contains("/text"), "got: {msg}");
    }

    #[tokio::test]
    async fn fault_is_wrapped() {
        let d = dispatcher_with(ToolCatalog::new().with(FailTool));
        let r = d.dispatch(&CallRequest::new("fail", Value::Null)).await;
        assert_eq!(failure_text(&r), "tool 'fail' failed: printer on fire");
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let d = dispatcher_with(ToolCatalog::new().with(PanicTool));
        let r = d.dispatch(&CallRequest::new("panic", Value::Null)).await;
        assert_eq!(failure_text(&r), "tool 'panic' failed: sensor driver crashed");
    }

    #[tokio::test]
    async fn timeout_abandons_and_never_reports_late_success() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let slow = FnTool::new(
            ToolDef::new("slow", "Slow sensor", json!({"type": "object"})),
            move |_: Arguments| {
                let flag = Arc::clone(&flag);
                async move {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok(ToolResult::success("late"))
                }
            },
        );
        let d = dispatcher_with(ToolCatalog::new().with(slow)).with_timeout(Duration::from_millis(20));

        let r = d.dispatch(&CallRequest::new("slow", Value::Null)).await;
        assert_eq!(failure_text(&r), "tool 'slow' timed out after 20ms");

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!finished.load(Ordering::SeqCst), "aborted task must not complete");
    }

    #[tokio::test]
    async fn dropping_dispatch_aborts_the_tool() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let slow = FnTool::new(
            ToolDef::new("slow", "Slow sensor", json!({"type": "object"})),
            move |_: Arguments| {
                let flag = Arc::clone(&flag);
                async move {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok(ToolResult::success("late"))
                }
            },
        );
        let d = dispatcher_with(ToolCatalog::new().with(slow)).with_timeout(Duration::from_secs(5));

        let call = CallRequest::new("slow", Value::Null);
        let abandoned = tokio::time::timeout(Duration::from_millis(20), d.dispatch(&call)).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!finished.load(Ordering::SeqCst), "dropped dispatch must abort its task");
    }

    #[test]
    fn default_timeout_is_thirty_seconds() {
        let d = dispatcher_with(ToolCatalog::new());
        assert_eq!(d.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn dispatch_error_converts_to_failure() {
        let result: ToolResult = DispatchError::UnknownTool("x".into()).into();
        assert_eq!(result, ToolResult::failure("unknown tool: x"));
    }
}
