//! Minimal conversation example: one backend, one tool, one turn.
//!
//! Registers a clock tool, sends a user prompt, and prints the model's
//! answer along with the calls it made.
//!
//! # Usage
//!
//! ```bash
//! BRIDLE_BASE_URL=http://localhost:8080/v1 cargo run --example basic_conversation
//! ```

use bridle::prelude::*;
use serde_json::{Value, json};

#[tokio::main]
async fn main() -> Result<(), String> {
    // 1. Point the backend at any OpenAI-compatible endpoint.
    let base_url = std::env::var("BRIDLE_BASE_URL")
        .unwrap_or_else(|_| "http://localhost:8080/v1".to_string());
    let backend = ChatCompletionsBackend::new(
        BackendConfig::new(base_url, "default").with_api_key(std::env::var("BRIDLE_API_KEY").ok()),
    )
    .map_err(|e| e.to_string())?;

    // 2. Register tools the model can call.
    let catalog = ToolCatalog::new().with(FnTool::new(
        ToolDef::new(
            "clock",
            "Current UTC date and time",
            json!({"type": "object", "properties": {}}),
        ),
        |_: Value| async { Ok(ToolResult::success(chrono::Utc::now().to_rfc3339())) },
    ));

    // 3. Configure the conversation.
    let config = ConversationConfig::new("You are a helpful assistant. Be concise.").with_max_rounds(3);

    // 4. Run one turn.
    let mut conversation = Conversation::new(&backend, std::sync::Arc::new(catalog), config)
        .with_event_handler(&LoggingHandler);
    let outcome = conversation
        .send("What day of the week is it?")
        .await
        .map_err(|e| e.to_string())?;

    // 5. Print results.
    println!("\n{}", outcome.text);
    println!(
        "\n--- {} tool call(s): {} ---",
        outcome.rounds_used,
        outcome.tools_used().join(", ")
    );

    Ok(())
}
