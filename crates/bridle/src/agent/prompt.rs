//! System message assembly.
//!
//! [`SystemPromptBuilder`] joins a preamble and `## `-headed sections,
//! skipping empty ones. [`build_system_message`] uses it to produce the
//! system message the conversation rebuilds every round: the configured
//! instructions, then the currently available tools and how to call them.

/// Builder for multi-section system prompts.
///
/// Sections are joined with double newlines. Empty sections are silently
/// skipped, so a section never appears as a bare heading.
///
/// # Example
///
/// ```
/// use bridle::agent::prompt::SystemPromptBuilder;
///
/// let prompt = SystemPromptBuilder::new("You are a device assistant.")
///     .section("Device", "Battery at 40%.")
///     .section_if(false, "Debug", || "verbose".into())
///     .section_opt("Missing", None::<String>)
///     .build();
///
/// assert!(prompt.contains("## Device"));
/// assert!(!prompt.contains("## Debug"));
/// assert!(!prompt.contains("## Missing"));
/// ```
pub struct SystemPromptBuilder {
    sections: Vec<String>,
}

impl SystemPromptBuilder {
    /// Create a builder with a preamble section. An empty preamble is dropped.
    pub fn new(preamble: impl Into<String>) -> Self {
        let preamble = preamble.into();
        let sections = if preamble.trim().is_empty() {
            Vec::new()
        } else {
            vec![preamble]
        };
        Self { sections }
    }

    /// Append a named section. Skipped if `content` is blank.
    pub fn section(mut self, heading: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.trim().is_empty() {
            self.sections
                .push(format!("## {heading}\n\n{}", content.trim_end()));
        }
        self
    }

    /// Conditionally append a section. `content_fn` only runs when needed.
    pub fn section_if(
        self,
        condition: bool,
        heading: &str,
        content_fn: impl FnOnce() -> String,
    ) -> Self {
        if condition {
            self.section(heading, content_fn())
        } else {
            self
        }
    }

    /// Append a section only if the content is `Some`.
    pub fn section_opt(self, heading: &str, content: Option<impl Into<String>>) -> Self {
        match content {
            Some(c) => self.section(heading, c),
            None => self,
        }
    }

    pub fn build(self) -> String {
        self.sections.join("\n\n")
    }
}

/// How to request a call in plain text, for models without native
/// function calling.
pub fn call_format_hint(open_tag: &str, close_tag: &str) -> String {
    format!(
        "To use a tool, reply with exactly one block of the form\n\
         {open_tag}{{\"name\": \"<tool name>\", \"arguments\": {{...}}}}{close_tag}\n\
         Use at most one tool per reply. When you have everything you need, \
         answer in plain text without a tool block."
    )
}

/// The per-round system message.
///
/// Both the tool listing and the call-format hint are omitted when
/// `tool_block` is empty. `call_tags` is `None` when calls are only
/// accepted through native function calling.
pub fn build_system_message(
    instructions: &str,
    tool_block: &str,
    call_tags: Option<(&str, &str)>,
) -> String {
    let has_tools = !tool_block.trim().is_empty();
    SystemPromptBuilder::new(instructions)
        .section("Available tools", tool_block)
        .section_opt(
            "Calling a tool",
            call_tags
                .filter(|_| has_tools)
                .map(|(open, close)| call_format_hint(open, close)),
        )
        .build()
}
