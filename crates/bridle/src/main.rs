//! Run a tool-calling conversation against an OpenAI-compatible
//! chat-completions endpoint and print the final answer.
//!
//! Reads the API key from the `BRIDLE_API_KEY` environment variable when
//! the endpoint needs one. Local servers (llama.cpp, vLLM, Ollama) usually
//! do not.
//!
//! # Examples
//!
//! ```sh
//! # Plain question, no tools
//! bridle --user "What is a GATT characteristic?"
//!
//! # Tools defined in a JSON file, each backed by a shell command
//! bridle --tools demos/device_tools.json --user "How full is the disk?"
//!
//! # Local model without native function calling, custom call tag
//! bridle --base-url http://localhost:8080/v1 --model qwen2.5-7b-instruct \
//!   --tools demos/device_tools.json --call-tag function_call --user "What time is it?"
//!
//! # Pipe content from stdin
//! cat notes.md | bridle --system "Summarize briefly." --stdin
//!
//! # Interactive session (type /clear to reset history)
//! bridle --tools demos/device_tools.json --repl
//! ```

use bridle::agent::events::{ConversationEvent, EventHandler, LoggingHandler};
use bridle::prelude::*;
use bridle::{FunctionDef, ToolType};
use clap::Parser;
use serde::Deserialize;
use serde_json::Value;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Run a bounded tool-calling conversation and print the answer.
///
/// Reads the API key from the BRIDLE_API_KEY environment variable.
#[derive(Parser)]
#[command(name = "bridle")]
struct Cli {
    // ── Message content ────────────────────────────────────────
    /// Instructions placed at the top of every system message
    #[arg(long)]
    system: Option<String>,

    /// User message to send
    #[arg(long)]
    user: Option<String>,

    /// Read user content from stdin
    #[arg(long)]
    stdin: bool,

    /// Interactive mode: read user turns line by line from stdin
    #[arg(long, conflicts_with = "stdin")]
    repl: bool,

    // ── Endpoint ───────────────────────────────────────────────
    /// Base URL of the chat-completions API, up to the version segment
    #[arg(long, default_value = "http://localhost:8080/v1")]
    base_url: String,

    /// Model identifier sent with each request
    #[arg(long, default_value = "default")]
    model: String,

    /// Bearer token for the endpoint
    #[arg(long, env = "BRIDLE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Sampling temperature
    #[arg(long, default_value_t = 0.2)]
    temperature: f32,

    /// Maximum tokens in each model response
    #[arg(long, default_value_t = bridle::api::openai::DEFAULT_MAX_TOKENS)]
    max_tokens: u32,

    // ── Tool use ───────────────────────────────────────────────
    /// Path to a JSON file defining available tools
    #[arg(long)]
    tools: Option<PathBuf>,

    /// Maximum tool executions per user turn
    #[arg(long, default_value_t = bridle::agent::config::DEFAULT_MAX_ROUNDS)]
    max_rounds: u32,

    /// Per-call tool timeout in milliseconds
    #[arg(long, default_value_t = 30_000)]
    tool_timeout_ms: u64,

    /// Tag name for calls embedded in model text
    #[arg(long, default_value = bridle::api::parser::DEFAULT_CALL_TAG)]
    call_tag: String,

    /// Only accept native function calls, never calls written in text
    #[arg(long)]
    no_text_calls: bool,

    /// Validate call arguments against each tool's JSON Schema
    #[arg(long)]
    validate_args: bool,

    // ── Output ─────────────────────────────────────────────────
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn conversation_config(&self) -> ConversationConfig {
        ConversationConfig::new(self.system.clone().unwrap_or_default())
            .with_max_rounds(self.max_rounds)
            .with_tool_timeout(Duration::from_millis(self.tool_timeout_ms))
            .with_call_tag(&self.call_tag)
            .with_text_calls(!self.no_text_calls)
            .with_arg_validation(self.validate_args)
    }

    fn backend_config(&self) -> BackendConfig {
        BackendConfig::new(&self.base_url, &self.model)
            .with_api_key(self.api_key.clone())
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }
}

// ── Tool file types ────────────────────────────────────────────────

/// Tool definition loaded from the tools JSON file, including an
/// "execute" command template for local subprocess execution.
#[derive(Deserialize)]
struct ToolFileEntry {
    #[serde(rename = "type")]
    tool_type: ToolType,
    function: FunctionDef,
    /// Shell command template. Use {{param_name}} for argument substitution.
    execute: String,
    /// The tool is only offered while this path exists.
    #[serde(default)]
    requires: Option<PathBuf>,
}

/// A tool loaded from a JSON tools file that executes via shell command.
///
/// Standard output becomes the result data (parsed as JSON when it is
/// JSON). A non-zero exit status is reported as a tool failure.
struct ShellCommandTool {
    def: ToolDef,
    template: String,
    requires: Option<PathBuf>,
}

impl Tool for ShellCommandTool {
    fn definition(&self) -> ToolDef {
        self.def.clone()
    }

    fn is_available(&self) -> bool {
        self.requires.as_ref().is_none_or(|path| path.exists())
    }

    fn execute(&self, arguments: Arguments) -> ToolFuture {
        let template = self.template.clone();
        let name = self.def.function.name.clone();
        Box::pin(async move {
            let cmd = render_command(&template, &arguments);
            tracing::debug!("{name}: {} {:?}", cmd.script, cmd.params);

            // `sh -c script name p1 p2 ...` binds $0 to the tool name and
            // $1.. to the parameters.
            let output = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&cmd.script)
                .arg(&name)
                .args(&cmd.params)
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| format!("could not start command: {e}"))?;

            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

            if !output.status.success() {
                return Err(if stderr.is_empty() {
                    format!("command exited with {}", output.status)
                } else {
                    format!("command exited with {}: {stderr}", output.status)
                });
            }

            let data = serde_json::from_str::<Value>(&stdout).unwrap_or(Value::String(stdout));
            Ok(ToolResult::success(data))
        })
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn read_stdin_content() -> Result<String, String> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .map_err(|e| format!("failed to read stdin: {e}"))?;
    Ok(buf)
}

fn build_user_content(cli: &Cli) -> Result<String, String> {
    let stdin_text = if cli.stdin {
        Some(read_stdin_content()?)
    } else {
        None
    };

    match (&cli.user, stdin_text) {
        (Some(msg), Some(piped)) => Ok(format!("{msg}\n\n{piped}")),
        (Some(msg), None) => Ok(msg.clone()),
        (None, Some(piped)) => Ok(piped),
        (None, None) => Err("provide --user, --stdin, or --repl".to_string()),
    }
}

/// Load tools from a JSON file into a [`ToolCatalog`].
fn load_tools(path: &std::path::Path) -> Result<ToolCatalog, String> {
    let display = path.display();
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read tools file '{display}': {e}"))?;
    let entries: Vec<ToolFileEntry> = serde_json::from_str(&content)
        .map_err(|e| format!("failed to parse tools file '{display}': {e}"))?;

    let catalog = ToolCatalog::new();
    for entry in entries {
        catalog.register(ShellCommandTool {
            def: ToolDef {
                tool_type: entry.tool_type,
                function: entry.function,
            },
            template: entry.execute,
            requires: entry.requires,
        });
    }
    Ok(catalog)
}

/// A command template with its placeholders bound.
///
/// Argument values never appear in `script`. Each placeholder becomes a
/// quoted positional parameter (`"${1}"`, `"${2}"`, ...) and the values
/// travel separately in `params`, so the shell sees every value as exactly
/// one word.
#[derive(Debug, PartialEq)]
struct RenderedCommand {
    script: String,
    params: Vec<String>,
}

/// Bind {{param}} placeholders in a command template. Placeholders with no
/// matching argument are removed; a repeated placeholder reuses its slot.
fn render_command(template: &str, arguments: &Arguments) -> RenderedCommand {
    let mut script = String::with_capacity(template.len());
    let mut params: Vec<String> = Vec::new();
    let mut slots: Vec<&str> = Vec::new();

    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let (before, after) = rest.split_at(start);
        let Some(tail) = after.get(2..) else { break };
        let Some(end) = tail.find("}}") else { break };
        script.push_str(before);

        let key = tail.get(..end).unwrap_or_default().trim();
        if let Some(value) = arguments.get(key) {
            let slot = match slots.iter().position(|k| *k == key) {
                Some(index) => index,
                None => {
                    slots.push(key);
                    params.push(param_text(value));
                    slots.len() - 1
                }
            };
            script.push_str(&format!("\"${{{}}}\"", slot + 1));
        }
        rest = tail.get(end + 2..).unwrap_or_default();
    }
    script.push_str(rest);

    while script.contains("  ") {
        script = script.replace("  ", " ");
    }
    RenderedCommand {
        script: script.trim().to_string(),
        params,
    }
}

fn param_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "bridle=warn",
        1 => "bridle=debug",
        _ => "bridle=trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

/// Event handler for the CLI that prints round info to stderr.
struct CliEventHandler;

impl EventHandler for CliEventHandler {
    fn on_event(&self, event: &ConversationEvent<'_>) {
        match event {
            ConversationEvent::RoundStart {
                round,
                max_rounds,
                tools_available,
            } => {
                eprintln!("  [round {round}/{max_rounds}, {tools_available} tool(s)]");
            }
            ConversationEvent::ToolExecuting {
                name, arguments, ..
            } => {
                eprintln!("  [tool_call] {name}({arguments})");
            }
            ConversationEvent::ToolResult { name, result, .. } => {
                if let Some(message) = result.error_message() {
                    eprintln!("  [tool_error] {name}: {message}");
                }
            }
            ConversationEvent::RoundLimitReached { max_rounds, .. } => {
                eprintln!("  [limit] {max_rounds} round(s) used");
            }
            _ => {}
        }
    }
}

async fn run(cli: &Cli, cancel: &CancellationToken) -> Result<String, String> {
    let catalog = match &cli.tools {
        Some(path) => {
            let catalog = load_tools(path)?;
            eprintln!("  Loaded {} tool(s) from {}", catalog.len(), path.display());
            catalog
        }
        None => ToolCatalog::new(),
    };

    let backend = ChatCompletionsBackend::new(cli.backend_config()).map_err(|e| e.to_string())?;
    let handler = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with(CliEventHandler);
    let mut conversation = Conversation::new(&backend, Arc::new(catalog), cli.conversation_config())
        .with_event_handler(&handler);

    if !cli.repl {
        let user_content = build_user_content(cli)?;
        let outcome = conversation
            .send_with_cancel(user_content, cancel)
            .await
            .map_err(|e| e.to_string())?;
        return Ok(format!("{}\n", outcome.text));
    }

    // ── Interactive mode ────────────────────────────────────────
    if let Some(first) = &cli.user {
        let outcome = conversation
            .send_with_cancel(first.clone(), cancel)
            .await
            .map_err(|e| e.to_string())?;
        println!("{}", outcome.text);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line.map_err(|e| format!("failed to read stdin: {e}"))?,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                conversation.clear_history();
                eprintln!("  [history cleared]");
                continue;
            }
            _ => {}
        }
        match conversation.send_with_cancel(line, cancel).await {
            Ok(outcome) => println!("{}", outcome.text),
            Err(TurnError::Cancelled) => break,
            Err(e) => eprintln!("Error: {e}"),
        }
    }
    Ok(String::new())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    match run(&cli, &cancel).await {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn render_binds_placeholders_and_drops_missing_ones() {
        let cmd = render_command(
            "df -h {{path}} {{flags}} | head -n {{lines}}",
            &args(json!({"path": "/data", "lines": 3})),
        );
        assert_eq!(cmd.script, "df -h \"${1}\" | head -n \"${2}\"");
        assert_eq!(cmd.params, vec!["/data", "3"]);
    }

    #[test]
    fn render_reuses_slot_for_repeated_placeholder() {
        let cmd = render_command("cp {{src}} {{src}}.bak", &args(json!({"src": "a.txt"})));
        assert_eq!(cmd.script, "cp \"${1}\" \"${1}\".bak");
        assert_eq!(cmd.params, vec!["a.txt"]);
    }

    #[test]
    fn render_keeps_unterminated_braces() {
        let cmd = render_command("echo {{oops", &Arguments::new());
        assert_eq!(cmd.script, "echo {{oops");
        assert!(cmd.params.is_empty());
    }

    #[test]
    fn render_never_puts_values_in_the_script() {
        let cmd = render_command("df -h {{path}}", &args(json!({"path": "/; echo PWNED"})));
        assert_eq!(cmd.script, "df -h \"${1}\"");
        assert!(!cmd.script.contains("PWNED"));
        assert_eq!(cmd.params, vec!["/; echo PWNED"]);
    }

    #[tokio::test]
    async fn shell_metacharacters_stay_one_argument() {
        let tool = ShellCommandTool {
            def: ToolDef::new("show", "Show argument", json!({"type": "object"})),
            template: "printf '%s|' {{value}}".into(),
            requires: None,
        };
        let value = "/; echo injected $(id) `id` && true";
        let result = tool.execute(args(json!({"value": value}))).await.unwrap();
        assert_eq!(result, ToolResult::success(format!("{value}|")));
    }

    #[test]
    fn load_tools_reads_definitions() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{
                    "type": "function",
                    "function": {{
                        "name": "clock",
                        "description": "Current time",
                        "parameters": {{"type": "object", "properties": {{}}}}
                    }},
                    "execute": "date"
                }},
                {{
                    "type": "function",
                    "function": {{
                        "name": "scanner",
                        "description": "Read a card",
                        "parameters": {{"type": "object"}}
                    }},
                    "execute": "cat {{{{device}}}}",
                    "requires": "/definitely/not/a/device"
                }}
            ]"#
        )
        .unwrap();

        let catalog = load_tools(file.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.find("clock").is_some());
        assert!(catalog.find("scanner").is_some_and(|t| !t.is_available()));
        assert_eq!(catalog.to_call_definitions().len(), 1);
    }

    #[test]
    fn load_tools_reports_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = load_tools(file.path()).err().unwrap();
        assert!(err.contains("failed to parse tools file"));
    }

    #[tokio::test]
    async fn shell_tool_returns_stdout_and_failures() {
        let echo = ShellCommandTool {
            def: ToolDef::new("echo", "Echo", json!({"type": "object"})),
            template: "echo {{text}}".into(),
            requires: None,
        };
        let result = echo.execute(args(json!({"text": "hi"}))).await.unwrap();
        assert_eq!(result, ToolResult::success("hi"));

        let fail = ShellCommandTool {
            def: ToolDef::new("fail", "Fail", json!({"type": "object"})),
            template: "exit 3".into(),
            requires: None,
        };
        let err = fail.execute(Arguments::new()).await.unwrap_err();
        assert!(err.contains("exited"));
    }
}
