//! The durable, bounded serialization of execution + conversation state.
//!
//! A snapshot is self-contained: reconstructing a continuable conversation
//! requires no lookups outside the file. The top-level JSON keys
//! (`workflow_metadata`, `completed_tools`, `chat_history`,
//! `context_evolution`, `workflow_variables`) are part of the on-disk
//! contract and must not be renamed.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use workflow_runner_sdk::ChatMessage;

use crate::context::{CompletedTool, ContextEvolution};

/// Identity and advisory metadata for a stored execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_file_path: Option<String>,
    /// sha256 hex of the workflow text the execution started from.
    pub original_workflow_hash: String,
    /// The workflow text itself, kept verbatim for similarity scoring
    /// against a possibly-edited file.
    pub original_workflow_content: String,
    /// Advisory only: inferred from chat content, never a correctness
    /// input to the resume decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_strategy: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub current_step: u32,
    /// Tools the workflow had declared when the snapshot was taken.
    pub available_tools: BTreeSet<String>,
}

/// One resume snapshot — the only artifact ever written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeSnapshot {
    pub workflow_metadata: WorkflowMetadata,
    pub completed_tools: Vec<CompletedTool>,
    pub chat_history: Vec<ChatMessage>,
    pub context_evolution: ContextEvolution,
    pub workflow_variables: BTreeMap<String, Value>,
}

/// Listing-level view of a stored snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub workflow_id: String,
    pub last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    pub completed_tool_count: usize,
}
