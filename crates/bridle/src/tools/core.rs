//! Tool abstraction for function-calling models.
//!
//! The [`Tool`] trait is the capability contract every executor satisfies:
//! a static definition (name, description, JSON schema), a side-effect-free
//! availability predicate, and an async `execute` method. Concrete device
//! or service adapters (camera, SMS, location, printer) are independent
//! implementors; the rest of the crate never depends on their identities.

use crate::{ToolDef, ToolResult};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace};

/// Normalized call arguments. Always a JSON object by the time a tool sees it.
pub type Arguments = Map<String, Value>;

/// Boxed future returned by [`Tool::execute`].
///
/// `'static` so the dispatcher can run it on its own task and walk away
/// from it on timeout. `Err(message)` is a tool fault.
pub type ToolFuture = Pin<Box<dyn Future<Output = Result<ToolResult, String>> + Send + 'static>>;

// ── Tool trait ─────────────────────────────────────────────────────

/// A capability a model can invoke via function-calling.
///
/// # Example
///
/// ```ignore
/// struct Locate { gps: Arc<Gps> }
///
/// impl Tool for Locate {
///     fn definition(&self) -> ToolDef { /* ... */ }
///
///     fn is_available(&self) -> bool {
///         self.gps.has_fix_permission()
///     }
///
///     fn execute(&self, _arguments: Arguments) -> ToolFuture {
///         let gps = self.gps.clone();
///         Box::pin(async move {
///             let fix = gps.read().await.map_err(|e| e.to_string())?;
///             Ok(ToolResult::success(json!({"lat": fix.lat, "lon": fix.lon})))
///         })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// The definition advertised to the model.
    fn definition(&self) -> ToolDef;

    /// Whether the tool can be used right now.
    ///
    /// Evaluated on every lookup and never cached, so implementations must
    /// be cheap and side-effect free. Defaults to `true`.
    fn is_available(&self) -> bool {
        true
    }

    /// Execute the tool with already-normalized arguments.
    ///
    /// Returning `Err` (or panicking) is reported to the model as a fault.
    /// Implementations are not required to honor cancellation: on timeout
    /// the dispatcher stops waiting and drops the result.
    fn execute(&self, arguments: Arguments) -> ToolFuture;

    /// The tool's name (convenience, delegates to definition).
    fn name(&self) -> String {
        self.definition().function.name
    }
}

// ── AvailabilityFlag ───────────────────────────────────────────────

/// A push-updated, shareable availability signal.
///
/// Hand one clone to the code that observes the device or permission
/// state and another to the tool via [`FnTool::with_flag`]. Every lookup
/// reads the current value.
#[derive(Clone, Debug)]
pub struct AvailabilityFlag(Arc<AtomicBool>);

impl AvailabilityFlag {
    pub fn new(available: bool) -> Self {
        Self(Arc::new(AtomicBool::new(available)))
    }

    pub fn set(&self, available: bool) {
        self.0.store(available, Ordering::Release);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for AvailabilityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

// ── FnTool ─────────────────────────────────────────────────────────

/// Type-erased handler for [`FnTool`].
type ErasedToolHandler = Box<dyn Fn(Arguments) -> ToolFuture + Send + Sync>;

/// Polled availability predicate.
type AvailabilityCheck = Box<dyn Fn() -> bool + Send + Sync>;

/// A closure-based tool that parses typed arguments and delegates to a handler.
///
/// Removes the boilerplate of a struct plus `impl Tool` for tools whose
/// logic is a single function. For tools that need richer shared state,
/// implement [`Tool`] directly.
///
/// # Example
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct SmsArgs {
///     /// Recipient phone number.
///     to: String,
///     /// Message body.
///     body: String,
/// }
///
/// let radio = AvailabilityFlag::new(true);
/// let tool = FnTool::new(
///     ToolDef::new("send_sms", "Send a text message", json_schema_for::<SmsArgs>()),
///     |args: SmsArgs| async move {
///         Ok(ToolResult::success(json!({"sent_to": args.to})))
///     },
/// )
/// .with_flag(radio.clone());
/// ```
pub struct FnTool {
    def: ToolDef,
    handler: ErasedToolHandler,
    availability: Option<AvailabilityCheck>,
}

impl FnTool {
    /// Create a closure-based tool from an async handler.
    ///
    /// Arguments are deserialized into `A` before the handler runs; a
    /// mismatch is returned as a fault naming the serde error.
    pub fn new<A, F, Fut>(def: ToolDef, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult, String>> + Send + 'static,
    {
        let erased = move |raw: Arguments| -> ToolFuture {
            match parse_tool_args::<A>(raw) {
                Ok(args) => handler(args).boxed(),
                Err(e) => futures::future::ready(Err(e)).boxed(),
            }
        };

        Self {
            def,
            handler: Box::new(erased),
            availability: None,
        }
    }

    /// Create a tool whose handler blocks (sensor reads, synchronous SDKs).
    ///
    /// The handler runs on tokio's blocking pool. Blocking work cannot be
    /// interrupted, so on timeout it keeps running detached and its result
    /// is discarded.
    pub fn blocking<A, F>(def: ToolDef, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(A) -> Result<ToolResult, String> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let erased = move |raw: Arguments| -> ToolFuture {
            let args = match parse_tool_args::<A>(raw) {
                Ok(args) => args,
                Err(e) => return futures::future::ready(Err(e)).boxed(),
            };
            let handler = Arc::clone(&handler);
            async move {
                tokio::task::spawn_blocking(move || handler(args))
                    .await
                    .map_err(|e| format!("blocking task did not complete: {e}"))?
            }
            .boxed()
        };

        Self {
            def,
            handler: Box::new(erased),
            availability: None,
        }
    }

    /// Gate the tool on a polled predicate (builder pattern).
    pub fn with_availability(mut self, check: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.availability = Some(Box::new(check));
        self
    }

    /// Gate the tool on a shared [`AvailabilityFlag`] (builder pattern).
    pub fn with_flag(self, flag: AvailabilityFlag) -> Self {
        self.with_availability(move || flag.get())
    }
}

impl Tool for FnTool {
    fn definition(&self) -> ToolDef {
        self.def.clone()
    }

    fn is_available(&self) -> bool {
        self.availability.as_ref().is_none_or(|check| check())
    }

    fn execute(&self, arguments: Arguments) -> ToolFuture {
        (self.handler)(arguments)
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.def.function.name)
            .field("gated", &self.availability.is_some())
            .finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Deserialize normalized arguments into a typed struct.
///
/// Returns a message suitable for returning as a tool fault.
pub fn parse_tool_args<T: DeserializeOwned>(arguments: Arguments) -> Result<T, String> {
    serde_json::from_value(Value::Object(arguments))
        .map_err(|e| format!("arguments do not match the parameter schema: {e}"))
}

/// Log a tool call at INFO level with a truncated preview of arguments.
pub fn log_tool_call(name: &str, arguments: &Arguments) {
    let rendered = Value::Object(arguments.clone()).to_string();
    let args_preview: String = rendered.chars().take(120).collect();
    info!(
        "[tool] {}({args_preview}{})",
        name,
        if rendered.chars().count() > 120 { "..." } else { "" }
    );
    debug!("[tool] {name} full args ({} bytes)", rendered.len());
    trace!("[tool] {name} arguments: {rendered}");
}
