//! Live, mutable state of one task execution.
//!
//! An [`ExecutionContext`] is created once per execution attempt (or
//! reconstructed from a snapshot on resume), owned exclusively by the
//! orchestrator for that run, and discarded at process exit; the durable
//! copy lives in the resume snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a step attempt recorded in the execution history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ModelTurn,
    ToolCall,
}

/// One step attempt (model turn or tool call), append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub name: String,
    pub kind: StepKind,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One finished tool invocation, immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTool {
    pub function_name: String,
    pub parameters: Value,
    /// Payload on success, failure message otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub executed_at: DateTime<Utc>,
    pub success: bool,
    /// Model-supplied reasoning for the call, when present in the
    /// arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// One recorded variable write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextChange {
    pub timestamp: DateTime<Utc>,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    pub new_value: Value,
    /// Who wrote the value: a tool name, `workflow-defaults`, or
    /// `cli-override`.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Derived, append-only audit trail of how the variables changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextEvolution {
    pub current_context: BTreeMap<String, Value>,
    pub key_insights: Vec<String>,
    pub changes: Vec<ContextChange>,
}

/// The live state of one execution attempt.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Monotonically increasing counter, informational only.
    pub current_step: u32,
    /// Named values accumulated from defaults, overrides, and tool
    /// outputs. Keys unique, last writer wins.
    pub variables: BTreeMap<String, Value>,
    pub completed_tools: Vec<CompletedTool>,
    pub execution_history: Vec<HistoryEntry>,
    pub evolution: ContextEvolution,
    pub start_time: DateTime<Utc>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            current_step: 0,
            variables: BTreeMap::new(),
            completed_tools: Vec::new(),
            execution_history: Vec::new(),
            evolution: ContextEvolution::default(),
            start_time: Utc::now(),
        }
    }

    /// Write a variable and record the change. Last writer wins.
    pub fn set_variable(
        &mut self,
        key: &str,
        value: Value,
        source: &str,
        reasoning: Option<String>,
    ) {
        let old_value = self.variables.insert(key.to_string(), value.clone());
        self.evolution
            .current_context
            .insert(key.to_string(), value.clone());
        self.evolution.changes.push(ContextChange {
            timestamp: Utc::now(),
            key: key.to_string(),
            old_value,
            new_value: value,
            source: source.to_string(),
            reasoning,
        });
    }

    pub fn record_step(&mut self, entry: HistoryEntry) {
        self.execution_history.push(entry);
    }

    pub fn record_tool(&mut self, tool: CompletedTool) {
        self.execution_history.push(HistoryEntry {
            name: tool.function_name.clone(),
            kind: StepKind::ToolCall,
            started_at: tool.executed_at,
            finished_at: Some(tool.executed_at),
            success: tool.success,
            error: if tool.success {
                None
            } else {
                tool.result.clone()
            },
        });
        self.completed_tools.push(tool);
    }

    pub fn add_insight(&mut self, insight: impl Into<String>) {
        self.evolution.key_insights.push(insight.into());
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}
