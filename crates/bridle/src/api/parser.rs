//! Extract an embedded tool call from free-form model output.
//!
//! Models without native function calling are asked to emit calls as text.
//! [`ResponseParser::parse`] tries two encodings in order and stops at the
//! first that yields a call:
//!
//! 1. A tagged block, `<tool_call>{"name": .., "arguments": ..}</tool_call>`.
//! 2. A bare inline object carrying both `name` and `arguments` keys.
//!
//! A tier that finds something malformed falls through to the next, and
//! finally to plain text. Parsing never fails. At most one call is
//! extracted per response; only the first candidate of each tier is used.

use crate::CallRequest;
use serde_json::Value;

/// Default tag wrapping an embedded call.
pub const DEFAULT_CALL_TAG: &str = "tool_call";

/// Result of [`ResponseParser::parse`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    /// Narrative text with the matched call removed and trimmed, or the
    /// original text verbatim when no call was found.
    pub text: String,
    pub call: Option<CallRequest>,
}

impl ParsedResponse {
    fn plain(text: &str) -> Self {
        Self {
            text: text.to_string(),
            call: None,
        }
    }
}

/// Ordered recognizer for embedded calls.
#[derive(Debug, Clone)]
pub struct ResponseParser {
    open_tag: String,
    close_tag: String,
    inline_objects: bool,
}

impl ResponseParser {
    /// Parser using the default `<tool_call>` tag with inline objects enabled.
    pub fn new() -> Self {
        Self::with_tag(DEFAULT_CALL_TAG)
    }

    /// Parser recognizing `<tag>...</tag>` blocks.
    pub fn with_tag(tag: &str) -> Self {
        let tag = tag.trim().trim_matches(['<', '>', '/']);
        Self {
            open_tag: format!("<{tag}>"),
            close_tag: format!("</{tag}>"),
            inline_objects: true,
        }
    }

    /// Enable or disable the bare inline object tier (builder pattern).
    pub fn with_inline_objects(mut self, enabled: bool) -> Self {
        self.inline_objects = enabled;
        self
    }

    pub fn open_tag(&self) -> &str {
        &self.open_tag
    }

    pub fn close_tag(&self) -> &str {
        &self.close_tag
    }

    /// Split `text` into narrative and an optional call.
    pub fn parse(&self, text: &str) -> ParsedResponse {
        if let Some(found) = self.tagged_call(text) {
            return found;
        }
        if self.inline_objects
            && let Some(found) = inline_call(text)
        {
            return found;
        }
        ParsedResponse::plain(text)
    }

    fn tagged_call(&self, text: &str) -> Option<ParsedResponse> {
        let start = text.find(&self.open_tag)?;
        let body_start = start + self.open_tag.len();
        let body_len = text.get(body_start..)?.find(&self.close_tag)?;
        let end = body_start + body_len + self.close_tag.len();

        let payload = strip_code_fence(text.get(body_start..body_start + body_len)?);
        let value: Value = serde_json::from_str(payload).ok()?;
        let call = call_from_value(value, false)?;

        Some(ParsedResponse {
            text: splice_out(text, start, end),
            call: Some(call),
        })
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// First inline object with `name` and `arguments` keys, scanning left to right.
fn inline_call(text: &str) -> Option<ParsedResponse> {
    for (start, _) in text.match_indices('{') {
        let Some(slice) = text.get(start..) else {
            continue;
        };
        let mut stream = serde_json::Deserializer::from_str(slice).into_iter::<Value>();
        let Some(Ok(value)) = stream.next() else {
            continue;
        };
        let end = start + stream.byte_offset();
        if let Some(call) = call_from_value(value, true) {
            return Some(ParsedResponse {
                text: splice_out(text, start, end),
                call: Some(call),
            });
        }
    }
    None
}

/// Build a call from a parsed object. `name` must be a non-empty string;
/// `arguments` is optional unless `require_arguments` is set.
fn call_from_value(value: Value, require_arguments: bool) -> Option<CallRequest> {
    let Value::Object(mut map) = value else {
        return None;
    };
    let name = match map.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.clone(),
        _ => return None,
    };
    let arguments = match map.remove("arguments") {
        Some(arguments) => arguments,
        None if require_arguments => return None,
        None => Value::Null,
    };
    Some(CallRequest { name, arguments })
}

/// Remove `text[start..end]` and trim what remains.
///
/// The two halves are rejoined with a newline if one surrounded the
/// removed span, otherwise with a single space, so narrative on one line
/// stays on one line.
fn splice_out(text: &str, start: usize, end: usize) -> String {
    let head = text.get(..start).unwrap_or_default();
    let tail = text.get(end..).unwrap_or_default();
    let before = head.trim_end();
    let after = tail.trim_start();
    let gap_before = head.get(before.len()..).unwrap_or_default();
    let gap_after = tail.get(..tail.len() - after.len()).unwrap_or_default();
    let separator = if gap_before.contains('\n') || gap_after.contains('\n') {
        "\n"
    } else {
        " "
    };
    match (before.is_empty(), after.is_empty()) {
        (true, _) => after.trim_end().to_string(),
        (false, true) => before.trim_start().to_string(),
        (false, false) => format!("{}{separator}{}", before.trim_start(), after.trim_end()),
    }
}

/// Models sometimes wrap the payload in a markdown fence inside the tags.
fn strip_code_fence(payload: &str) -> &str {
    let trimmed = payload.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_text_is_returned_verbatim() {
        let parser = ResponseParser::new();
        let text = "  The printer is ready.\n";
        let parsed = parser.parse(text);
        assert_eq!(parsed.text, text);
        assert!(parsed.call.is_none());

        // Parsing the output again changes nothing.
        assert_eq!(parser.parse(&parsed.text), parsed);
    }

    #[test]
    fn tagged_block_is_extracted_and_stripped() {
        let parser = ResponseParser::new();
        let parsed = parser.parse(
            "Let me take a picture.\n<tool_call>{\"name\": \"camera\", \"arguments\": {\"flash\": true}}</tool_call>\nOne moment.",
        );
        let call = parsed.call.expect("call");
        assert_eq!(call.name, "camera");
        assert_eq!(call.arguments, json!({"flash": true}));
        assert_eq!(parsed.text, "Let me take a picture.\nOne moment.");
        assert!(!parsed.text.contains("tool_call"));
    }

    #[test]
    fn tagged_block_without_arguments() {
        let parsed = ResponseParser::new().parse("<tool_call>{\"name\":\"locate\"}</tool_call>");
        let call = parsed.call.expect("call");
        assert_eq!(call.name, "locate");
        assert_eq!(call.arguments, Value::Null);
        assert_eq!(parsed.text, "");
    }

    #[test]
    fn tagged_block_with_string_arguments_and_fence() {
        let parsed = ResponseParser::new().parse(
            "<tool_call>\n```json\n{\"name\":\"sms\",\"arguments\":\"{\\\"to\\\":\\\"555\\\"}\"}\n```\n</tool_call>",
        );
        let call = parsed.call.expect("call");
        assert_eq!(call.name, "sms");
        assert_eq!(call.arguments, json!("{\"to\":\"555\"}"));
    }

    #[test]
    fn malformed_tagged_block_falls_back_to_text() {
        let text = "Trying: <tool_call>{\"name\": \"camera\", </tool_call>";
        let parsed = ResponseParser::new().parse(text);
        assert!(parsed.call.is_none());
        assert_eq!(parsed.text, text);
    }

    #[test]
    fn unclosed_tag_is_plain_text() {
        let text = "<tool_call>{\"name\": \"camera\"}";
        let parsed = ResponseParser::new().parse(text);
        assert!(parsed.call.is_none());
        assert_eq!(parsed.text, text);
    }

    #[test]
    fn malformed_tag_falls_through_to_inline_tier() {
        let parsed = ResponseParser::new().parse(
            "<tool_call>oops</tool_call> {\"name\": \"locate\", \"arguments\": {}}",
        );
        assert_eq!(parsed.call.map(|c| c.name), Some("locate".into()));
        assert_eq!(parsed.text, "<tool_call>oops</tool_call>");
    }

    #[test]
    fn inline_object_is_extracted() {
        let parsed = ResponseParser::new()
            .parse("Checking now {\"name\":\"battery\",\"arguments\":{\"unit\":\"%\"}} done");
        let call = parsed.call.expect("call");
        assert_eq!(call.name, "battery");
        assert_eq!(call.arguments, json!({"unit": "%"}));
        assert_eq!(parsed.text, "Checking now done");
    }

    #[test]
    fn line_structure_around_the_call_is_kept() {
        let parser = ResponseParser::new();
        let same_line =
            parser.parse("Printing <tool_call>{\"name\":\"print\"}</tool_call> now.");
        assert_eq!(same_line.text, "Printing now.");

        let own_line = parser.parse("Printing\n{\"name\":\"print\",\"arguments\":{}}\nnow.");
        assert_eq!(own_line.text, "Printing\nnow.");
    }

    #[test]
    fn inline_object_requires_both_keys() {
        let text = "Result: {\"name\": \"Ada\"} and {curly} prose";
        let parsed = ResponseParser::new().parse(text);
        assert!(parsed.call.is_none());
        assert_eq!(parsed.text, text);
    }

    #[test]
    fn inline_tier_can_be_disabled() {
        let text = "{\"name\":\"battery\",\"arguments\":{}}";
        let parsed = ResponseParser::new().with_inline_objects(false).parse(text);
        assert!(parsed.call.is_none());
    }

    #[test]
    fn only_first_tagged_block_is_used() {
        let parsed = ResponseParser::new().parse(
            "<tool_call>{\"name\":\"a\"}</tool_call><tool_call>{\"name\":\"b\"}</tool_call>",
        );
        assert_eq!(parsed.call.map(|c| c.name), Some("a".into()));
        assert_eq!(parsed.text, "<tool_call>{\"name\":\"b\"}</tool_call>");
    }

    #[test]
    fn custom_tag() {
        let parser = ResponseParser::with_tag("<call>");
        assert_eq!(parser.open_tag(), "<call>");
        assert_eq!(parser.close_tag(), "</call>");
        let parsed = parser.parse("<call>{\"name\":\"print\"}</call>");
        assert_eq!(parsed.call.map(|c| c.name), Some("print".into()));
    }

    #[test]
    fn tagged_tier_wins_over_inline() {
        let parsed = ResponseParser::new().parse(
            "{\"name\":\"inline\",\"arguments\":{}} <tool_call>{\"name\":\"tagged\"}</tool_call>",
        );
        assert_eq!(parsed.call.map(|c| c.name), Some("tagged".into()));
    }
}
