//! Contract surface for workflow-runner.
//!
//! This crate defines the types and traits shared between the execution
//! engine, embedding CLIs, and tool plugins:
//!
//! - Conversation types ([`ChatMessage`], [`FunctionCall`]) used to drive
//!   the model's multi-turn reasoning
//! - The [`ChatBackend`] trait — the narrow interface to an external
//!   chat-completion capability
//! - The [`WorkflowTool`] trait and [`ToolRegistry`] — named, schema-carrying
//!   plugins resolved once at startup
//! - [`WorkflowSource`] — a pre-parsed workflow definition (template,
//!   declared tools, default variables)
//! - Structured [`ExecutionEvent`]s and console logging macros

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// Re-exported so engine and plugin crates share one definition
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;

/// Role of a message in the conversation transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
    System,
}

/// A function call requested by the model in an assistant turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Backend-assigned call id, echoed back on the tool result message.
    pub id: String,
    pub name: String,
    /// JSON object of arguments; tools validate their own parameters.
    #[serde(default)]
    pub arguments: Value,
}

/// One message in the conversation transcript.
///
/// The transcript is append-only during a run and is the primary resumable
/// artifact: assistant messages keep their `function_calls` and tool
/// messages keep their `tool_call_id`, so a stored transcript can be
/// replayed to a backend without loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_calls: Vec<FunctionCall>,
    /// Set on tool-role messages: the id of the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    fn new(role: MessageRole, content: Option<String>) -> Self {
        Self {
            role,
            content,
            function_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, Some(content.into()))
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, Some(content.into()))
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, Some(content.into()))
    }

    /// Tool result message answering the call with the given id.
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::new(MessageRole::Tool, Some(content.into()));
        msg.tool_call_id = Some(call_id.into());
        msg
    }

    /// Assistant turn carrying function calls (and optional leading text).
    pub fn assistant_with_calls(content: Option<String>, calls: Vec<FunctionCall>) -> Self {
        let mut msg = Self::new(MessageRole::Assistant, content);
        msg.function_calls = calls;
        msg
    }
}

/// Token accounting reported by the backend for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One completed model turn returned by a [`ChatBackend`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelTurn {
    /// The assistant message, including any requested function calls.
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// True when the backend reports this turn's function calls as
    /// independent of each other. Only then may the engine run them
    /// concurrently; results are still merged in request order.
    #[serde(default)]
    pub independent_calls: bool,
}

/// Per-request settings forwarded to the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Errors surfaced by a chat-completion backend.
///
/// These are deliberately distinguishable kinds rather than a single opaque
/// error: the engine does not retry any of them, but callers and embedding
/// CLIs react differently to a rate limit than to bad credentials.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("model unavailable: {0}")]
    Unavailable(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

/// The external chat-completion capability.
///
/// Implementations submit the transcript plus the declared tool catalog and
/// return one assistant turn. Retry policy, streaming, and provider details
/// all live behind this trait; the engine only awaits `send`.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send(
        &self,
        history: &[ChatMessage],
        tools: &[ToolDescriptor],
        settings: &ChatSettings,
    ) -> Result<ModelTurn, ModelError>;
}

/// Name, description, and parameter schema advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters object.
    pub parameters: Value,
}

/// Result of one tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutcome {
    /// Machine-readable (JSON) payload fed back to the model.
    pub payload: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    /// Values the tool declares as context-worthy; the engine folds these
    /// into the execution variables with the tool's name as the source.
    pub context_updates: HashMap<String, Value>,
}

impl ToolOutcome {
    pub fn success(payload: impl Into<String>) -> Self {
        Self {
            payload: Some(payload.into()),
            success: true,
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_context_update(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context_updates.insert(key.into(), value);
        self
    }
}

/// An externally-implemented capability invocable by name.
///
/// The engine treats every tool as an opaque black box: parameters are
/// validated by the tool itself and the outcome payload is passed to the
/// model verbatim.
#[async_trait]
pub trait WorkflowTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    async fn invoke(&self, params: Value, cancel: CancellationToken) -> ToolOutcome;
}

/// Registry of tools resolved once at startup: name → implementation.
///
/// The engine depends only on this map, never on concrete tool types.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn WorkflowTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name. Last registration wins.
    pub fn register(&mut self, tool: Arc<dyn WorkflowTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn WorkflowTool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Descriptors for the subset of `declared` names that are registered,
    /// in declaration order. Unregistered names are skipped; callers that
    /// care surface those through validation instead.
    pub fn descriptors_for(&self, declared: &[String]) -> Vec<ToolDescriptor> {
        declared
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// A pre-parsed workflow definition.
///
/// Parsing (YAML, markdown front matter, whatever the embedder uses) stays
/// outside the engine; by the time a source reaches `execute` it is a
/// template, an allow-list, and defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSource {
    pub id: String,
    pub name: String,
    /// Task description template with `{{variable}}` placeholders.
    pub template: String,
    /// Declared tool allow-list. A model request for any name outside this
    /// list is rejected without execution.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Schema-level default variables, overridable per invocation.
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    /// The full original workflow text, kept verbatim so resume can check
    /// compatibility against a possibly-edited file.
    pub raw: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
}

/// Prefix for structured event lines on stderr.
pub const EVENT_PREFIX: &str = "__RUN_EVENT__:";

/// Structured events emitted during execution.
///
/// Emitted as `__RUN_EVENT__:<JSON>` lines on stderr so an embedding
/// process can follow progress without scraping human-readable output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    ExecutionStarted {
        workflow_id: String,
        resumed: bool,
    },
    ModelTurnCompleted {
        iteration: usize,
        function_calls: usize,
    },
    ToolStarted {
        name: String,
    },
    ToolCompleted {
        name: String,
        success: bool,
    },
    /// A requested call was outside the declared allow-list.
    ToolRejected {
        name: String,
        reason: String,
    },
    CheckpointSaved {
        workflow_id: String,
        completed_tools: usize,
    },
    ExecutionCompleted {
        workflow_id: String,
        iterations: usize,
    },
    ExecutionFailed {
        workflow_id: String,
        error: String,
    },
}

impl ExecutionEvent {
    /// Emit this event to stderr for the embedding process to parse.
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            use std::io::Write;
            eprintln!("{}{}", EVENT_PREFIX, json);
            let _ = std::io::stderr().flush();
        }
    }
}

/// Logs an informational message.
///
/// # Example
/// ```
/// use workflow_runner_sdk::log_info;
/// log_info!("Loaded workflow definition");
/// ```
#[macro_export]
macro_rules! log_info {
    ($message:expr) => {
        println!("\x1b[36mℹ {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[36mℹ {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs a warning message.
#[macro_export]
macro_rules! log_warning {
    ($message:expr) => {
        println!("\x1b[33m⚠ Warning: {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[33m⚠ Warning: {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs the start of a loop iteration with a header.
///
/// Outputs:
/// ```text
/// ═══ ITERATION 3 ═══
/// ```
#[macro_export]
macro_rules! log_iteration_start {
    ($iteration:expr) => {
        println!("\x1b[1;36m═══ ITERATION {} ═══\x1b[0m", $iteration);
    };
}

/// Logs a completed tool invocation.
#[macro_export]
macro_rules! log_tool_result {
    ($name:expr, $success:expr) => {
        if $success {
            println!("\x1b[32m✓ {}\x1b[0m", $name);
        } else {
            println!("\x1b[31m✗ {}\x1b[0m", $name);
        }
    };
}

/// Logs that a file has been saved.
#[macro_export]
macro_rules! log_file_saved {
    ($path:expr) => {
        println!("\x1b[32m✓ Saved: {}\x1b[0m", $path);
    };
}

/// Logs run statistics.
///
/// Outputs:
/// ```text
/// Statistics: 1250ms, 3 iterations (run 0b5c…)
/// ```
#[macro_export]
macro_rules! log_run_stats {
    ($duration_ms:expr, $iterations:expr, $execution_id:expr) => {
        println!(
            "\x1b[2mStatistics: {}ms, {} iterations (run {})\x1b[0m",
            $duration_ms, $iterations, $execution_id
        );
    };
}
