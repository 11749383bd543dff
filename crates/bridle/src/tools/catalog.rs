//! The tool catalog: the set of known tools, keyed by name.
//!
//! The catalog is shared read-mostly state. Lookups and listings take a
//! read lock; `register`/`unregister` take the write lock, so a concurrent
//! reader sees either the old descriptor or the new one, never both.
//! Availability predicates run outside the lock on `Arc` snapshots.

use super::core::Tool;
use crate::ToolDef;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::debug;

type Entry = (String, Arc<dyn Tool>);

/// Registry of tools, iterated in registration order.
///
/// # Example
///
/// ```ignore
/// let catalog = Arc::new(
///     ToolCatalog::new()
///         .with(camera_tool)
///         .with(sms_tool),
/// );
///
/// // Only tools whose `is_available()` is true right now.
/// let defs = catalog.to_call_definitions();
/// ```
pub struct ToolCatalog {
    entries: RwLock<Vec<Entry>>,
}

impl fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCatalog")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Register a tool, replacing any tool with the same name.
    ///
    /// A replaced tool keeps its original position in iteration order.
    pub fn register(&self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// Register an already shared tool.
    pub fn register_arc(&self, tool: Arc<dyn Tool>) {
        let name = tool.name();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => {
                debug!("Replacing tool '{name}'");
                slot.1 = tool;
            }
            None => {
                debug!("Registering tool '{name}'");
                entries.push((name, tool));
            }
        }
    }

    /// Register a tool (builder pattern).
    pub fn with(self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Remove a tool by name. Returns whether anything was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|(n, _)| n != name);
        let removed = entries.len() != before;
        if removed {
            debug!("Unregistered tool '{name}'");
        }
        removed
    }

    /// Look up a tool by name, regardless of availability.
    pub fn find(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, tool)| Arc::clone(tool))
    }

    /// Tools whose `is_available()` holds at the moment of the call.
    pub fn available_descriptors(&self) -> Vec<Arc<dyn Tool>> {
        self.snapshot()
            .into_iter()
            .filter(|tool| tool.is_available())
            .collect()
    }

    /// Function-calling definitions for every available tool.
    pub fn to_call_definitions(&self) -> Vec<ToolDef> {
        self.available_descriptors()
            .iter()
            .map(|tool| tool.definition())
            .collect()
    }

    /// [`to_call_definitions`](Self::to_call_definitions) as a JSON array.
    pub fn to_tool_definitions_json(&self) -> Value {
        serde_json::to_value(self.to_call_definitions()).unwrap_or_else(|_| Value::Array(vec![]))
    }

    /// Human-readable listing of available tools for models without native
    /// function calling. Empty when no tool is available, so callers can
    /// omit the section entirely.
    pub fn to_prompt_block(&self) -> String {
        let mut block = String::new();
        for tool in self.available_descriptors() {
            let def = tool.definition();
            if !block.is_empty() {
                block.push('\n');
            }
            block.push_str(&format!(
                "- {}: {}\n  parameters: {}\n",
                def.function.name, def.function.description, def.function.parameters
            ));
        }
        block
    }

    /// Registered names in iteration order, including unavailable tools.
    pub fn names(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn Tool>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.iter().map(|(_, tool)| Arc::clone(tool)).collect()
    }
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new()
    }
}
