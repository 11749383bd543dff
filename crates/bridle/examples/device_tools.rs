//! Device tools example: typed arguments, availability gating, and media.
//!
//! Demonstrates:
//! - Typed argument structs with `Deserialize` + `JsonSchema`
//! - A tool gated on a shared `AvailabilityFlag` (simulated camera permission)
//! - A blocking tool run on the blocking pool (simulated sensor read)
//! - A result carrying a binary media payload
//! - Per-tool callbacks with `ToolResultHandler`
//!
//! # Usage
//!
//! ```bash
//! BRIDLE_BASE_URL=http://localhost:8080/v1 cargo run --example device_tools
//! ```

use bridle::prelude::*;
use bridle::schemars;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

// ── Typed argument structs ──────────────────────────────────────────

/// Arguments for the `send_sms` tool.
#[derive(Deserialize, JsonSchema)]
struct SmsArgs {
    /// Recipient phone number.
    to: String,
    /// Message body.
    body: String,
}

/// Arguments for the `take_photo` tool.
#[derive(Deserialize, JsonSchema)]
struct PhotoArgs {
    /// "front" or "back".
    #[serde(default)]
    lens: Option<String>,
}

/// Arguments for the `read_battery` tool.
#[derive(Deserialize, JsonSchema)]
struct BatteryArgs {}

// ── Tool constructors ───────────────────────────────────────────────

fn sms_tool() -> FnTool {
    let def = ToolDef::new(
        "send_sms",
        "Send a text message to a phone number",
        json_schema_for::<SmsArgs>(),
    );
    FnTool::new(def, |args: SmsArgs| async move {
        // A real adapter would hand this to the modem.
        Ok(ToolResult::success(
            json!({"sent_to": args.to, "chars": args.body.chars().count()}),
        ))
    })
}

fn camera_tool(permission: AvailabilityFlag) -> FnTool {
    let def = ToolDef::new(
        "take_photo",
        "Take a photo with the device camera",
        json_schema_for::<PhotoArgs>(),
    );
    FnTool::new(def, |args: PhotoArgs| async move {
        let lens = args.lens.unwrap_or_else(|| "back".into());
        let jpeg = vec![0xFF, 0xD8, 0xFF, 0xD9];
        Ok(ToolResult::success_with_media(
            json!({"lens": lens, "bytes": jpeg.len()}),
            Media::new(jpeg, "image/jpeg"),
        ))
    })
    .with_flag(permission)
}

fn battery_tool() -> FnTool {
    let def = ToolDef::new(
        "read_battery",
        "Read the battery level in percent",
        json_schema_for::<BatteryArgs>(),
    );
    FnTool::blocking(def, |_: BatteryArgs| {
        std::thread::sleep(std::time::Duration::from_millis(20));
        Ok(ToolResult::success(json!({"percent": 73})))
    })
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), String> {
    let base_url = std::env::var("BRIDLE_BASE_URL")
        .unwrap_or_else(|_| "http://localhost:8080/v1".to_string());
    let backend = ChatCompletionsBackend::new(
        BackendConfig::new(base_url, "default").with_api_key(std::env::var("BRIDLE_API_KEY").ok()),
    )
    .map_err(|e| e.to_string())?;

    // The camera appears and disappears with its permission.
    let camera_permission = AvailabilityFlag::new(true);
    let catalog = ToolCatalog::new()
        .with(sms_tool())
        .with(camera_tool(camera_permission.clone()))
        .with(battery_tool());

    let photos = Arc::new(AtomicU32::new(0));
    let counter = photos.clone();
    let handler = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with(ToolResultHandler::new().on("take_photo", move |result| {
            if result.media().is_some() {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }));

    let config = ConversationConfig::new(
        "You are an assistant running on a handheld device. Use tools when they help.",
    )
    .with_arg_validation(true);
    let mut conversation =
        Conversation::new(&backend, Arc::new(catalog), config).with_event_handler(&handler);

    let outcome = conversation
        .send("Take a photo and tell me the battery level.")
        .await
        .map_err(|e| e.to_string())?;
    println!("\n{}", outcome.text);

    camera_permission.set(false);
    let outcome = conversation
        .send("Take one more photo, please.")
        .await
        .map_err(|e| e.to_string())?;
    println!("\n{}", outcome.text);

    println!("\n--- {} photo(s) taken ---", photos.load(Ordering::Relaxed));
    Ok(())
}
