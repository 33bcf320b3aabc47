//! Translation between live execution state and the bounded
//! [`ResumeSnapshot`], including the pruning policy.
//!
//! The translation is lossy by design: the snapshot keeps a bounded recent
//! window of the conversation and tool record, with older material
//! summarized into key insights before anything is truncated. Given the
//! same inputs and limits the codec produces the same snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use workflow_runner_sdk::{ChatMessage, MessageRole};

use crate::context::{CompletedTool, ExecutionContext, HistoryEntry, StepKind};
use crate::resume::compat::content_hash;
use crate::resume::snapshot::{ResumeSnapshot, WorkflowMetadata};

/// Retention limits applied before serialization.
#[derive(Debug, Clone)]
pub struct CodecLimits {
    pub max_completed_tools: usize,
    pub max_chat_messages: usize,
    pub max_variables: usize,
    pub max_insights: usize,
}

impl Default for CodecLimits {
    fn default() -> Self {
        Self {
            max_completed_tools: 50,
            max_chat_messages: 20,
            max_variables: 30,
            max_insights: 10,
        }
    }
}

/// Importance scoring for variable pruning. Higher scores survive.
///
/// Kept as a strategy so tuning the heuristic never touches the codec's
/// control flow. `recency_rank` is 0 for the most recently changed key,
/// `None` for keys with no recorded change.
pub trait VariableScorer: Send + Sync {
    fn score(&self, key: &str, value: &Value, recency_rank: Option<usize>) -> f64;
}

/// Default scorer: path/goal/phase-like key names and recently-changed
/// values score higher.
pub struct HeuristicScorer;

const CRITICAL_MARKERS: [&str; 8] = [
    "path", "file", "goal", "objective", "phase", "output", "target", "task",
];

impl VariableScorer for HeuristicScorer {
    fn score(&self, key: &str, _value: &Value, recency_rank: Option<usize>) -> f64 {
        let mut score = 1.0;
        let lower = key.to_lowercase();
        if CRITICAL_MARKERS.iter().any(|m| lower.contains(m)) {
            score += 2.0;
        }
        if let Some(rank) = recency_rank {
            score += 1.0 / (1.0 + rank as f64);
        }
        score
    }
}

/// Identity inputs the codec cannot derive from the live state.
#[derive(Debug, Clone)]
pub struct SnapshotMeta {
    pub workflow_id: String,
    pub workflow_file_path: Option<String>,
    /// Full workflow text the execution started from.
    pub original_content: String,
    pub available_tools: Vec<String>,
}

pub struct SnapshotCodec {
    limits: CodecLimits,
    scorer: Arc<dyn VariableScorer>,
}

impl Default for SnapshotCodec {
    fn default() -> Self {
        Self {
            limits: CodecLimits::default(),
            scorer: Arc::new(HeuristicScorer),
        }
    }
}

impl SnapshotCodec {
    pub fn new(limits: CodecLimits, scorer: Arc<dyn VariableScorer>) -> Self {
        Self { limits, scorer }
    }

    pub fn limits(&self) -> &CodecLimits {
        &self.limits
    }

    /// Compress the live state into a bounded snapshot.
    pub fn to_snapshot(
        &self,
        ctx: &ExecutionContext,
        history: &[ChatMessage],
        meta: &SnapshotMeta,
    ) -> ResumeSnapshot {
        let completed_tools =
            prune_completed_tools(&ctx.completed_tools, self.limits.max_completed_tools);

        // Summarize before truncating: the dropped prefix of the transcript
        // becomes insights, never silence.
        let mut evolution = ctx.evolution.clone();
        let retained_from = history
            .len()
            .saturating_sub(self.limits.max_chat_messages);
        for message in &history[..retained_from] {
            if let Some(summary) = summarize_message(message) {
                evolution.key_insights.push(summary);
            }
        }
        let chat_history: Vec<ChatMessage> = history[retained_from..].to_vec();
        if evolution.key_insights.len() > self.limits.max_insights {
            let keep_from = evolution.key_insights.len() - self.limits.max_insights;
            evolution.key_insights.drain(..keep_from);
        }

        let workflow_variables = self.prune_variables(ctx);
        evolution.current_context = workflow_variables.clone();

        let last_activity = last_activity(ctx, history);

        ResumeSnapshot {
            workflow_metadata: WorkflowMetadata {
                workflow_id: meta.workflow_id.clone(),
                workflow_file_path: meta.workflow_file_path.clone(),
                original_workflow_hash: content_hash(&meta.original_content),
                original_workflow_content: meta.original_content.clone(),
                current_phase: infer_phase(history),
                current_strategy: infer_strategy(history),
                started_at: ctx.start_time,
                last_activity,
                current_step: ctx.current_step,
                available_tools: meta.available_tools.iter().cloned().collect(),
            },
            completed_tools,
            chat_history,
            context_evolution: evolution,
            workflow_variables,
        }
    }

    /// Reconstruct a continuable context and transcript from a snapshot.
    ///
    /// `current_step` is approximated from the recorded change count and
    /// the execution history is derived from the completed tools: resume is
    /// conversation-exact, not step-exact.
    pub fn from_snapshot(
        &self,
        snapshot: &ResumeSnapshot,
    ) -> (ExecutionContext, Vec<ChatMessage>) {
        let mut evolution = snapshot.context_evolution.clone();
        evolution.current_context = snapshot.workflow_variables.clone();

        let execution_history: Vec<HistoryEntry> = snapshot
            .completed_tools
            .iter()
            .map(|tool| HistoryEntry {
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
            })
            .collect();

        let ctx = ExecutionContext {
            current_step: evolution.changes.len() as u32,
            variables: snapshot.workflow_variables.clone(),
            completed_tools: snapshot.completed_tools.clone(),
            execution_history,
            evolution,
            start_time: snapshot.workflow_metadata.started_at,
        };

        (ctx, snapshot.chat_history.clone())
    }

    /// The synthesized system message injected on resume.
    ///
    /// This is the behavioral contract of resume: it must let the model
    /// continue without re-deriving or repeating prior discoveries.
    pub fn resume_briefing(&self, snapshot: &ResumeSnapshot) -> ChatMessage {
        let meta = &snapshot.workflow_metadata;
        let elapsed = meta
            .last_activity
            .signed_duration_since(meta.started_at)
            .num_seconds()
            .max(0);

        let mut completed: Vec<&str> = Vec::new();
        for tool in snapshot.completed_tools.iter().filter(|t| t.success) {
            if !completed.contains(&tool.function_name.as_str()) {
                completed.push(&tool.function_name);
            }
        }

        let mut text = String::new();
        text.push_str("You are resuming an interrupted workflow execution.\n\n");
        text.push_str(&format!(
            "Time spent before interruption: {}m{}s\n",
            elapsed / 60,
            elapsed % 60
        ));
        if completed.is_empty() {
            text.push_str("No tool calls had completed yet.\n");
        } else {
            text.push_str(&format!(
                "Successfully completed tool calls (do not repeat these): {}\n",
                completed.join(", ")
            ));
        }
        if !snapshot.context_evolution.key_insights.is_empty() {
            text.push_str("Key insights from prior work:\n");
            for insight in &snapshot.context_evolution.key_insights {
                text.push_str(&format!("- {}\n", insight));
            }
        }
        let variables = serde_json::to_string_pretty(&snapshot.workflow_variables)
            .unwrap_or_else(|_| "{}".to_string());
        text.push_str(&format!("Current variables:\n{}\n\n", variables));
        text.push_str(
            "Continue the task from this state. Do not re-derive or repeat \
             the work above; pick up where the conversation left off.",
        );

        ChatMessage::system(text)
    }

    fn prune_variables(
        &self,
        ctx: &ExecutionContext,
    ) -> std::collections::BTreeMap<String, Value> {
        if ctx.variables.len() <= self.limits.max_variables {
            return ctx.variables.clone();
        }

        // Rank 0 = most recently changed key.
        let mut recency: HashMap<&str, usize> = HashMap::new();
        for change in ctx.evolution.changes.iter().rev() {
            let next_rank = recency.len();
            recency.entry(change.key.as_str()).or_insert(next_rank);
        }

        let mut scored: Vec<(&String, &Value, f64)> = ctx
            .variables
            .iter()
            .map(|(key, value)| {
                let rank = recency.get(key.as_str()).copied();
                (key, value, self.scorer.score(key, value, rank))
            })
            .collect();
        // Ties broken by key so pruning stays deterministic.
        scored.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });

        scored
            .into_iter()
            .take(self.limits.max_variables)
            .map(|(key, value, _)| (key.clone(), value.clone()))
            .collect()
    }
}

/// Keep the most recent `limit` tools, dropping oldest failed entries
/// first, then oldest successful ones. Survivor order is preserved.
fn prune_completed_tools(tools: &[CompletedTool], limit: usize) -> Vec<CompletedTool> {
    if tools.len() <= limit {
        return tools.to_vec();
    }
    let mut to_drop = tools.len() - limit;
    let mut dropped = vec![false; tools.len()];

    for (idx, tool) in tools.iter().enumerate() {
        if to_drop == 0 {
            break;
        }
        if !tool.success {
            dropped[idx] = true;
            to_drop -= 1;
        }
    }
    for idx in 0..tools.len() {
        if to_drop == 0 {
            break;
        }
        if !dropped[idx] {
            dropped[idx] = true;
            to_drop -= 1;
        }
    }

    tools
        .iter()
        .zip(dropped)
        .filter(|(_, drop)| !drop)
        .map(|(tool, _)| tool.clone())
        .collect()
}

fn summarize_message(message: &ChatMessage) -> Option<String> {
    let content = message.content.as_deref()?.trim();
    if content.is_empty() {
        return None;
    }
    let label = match message.role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool result",
        MessageRole::System => "system",
    };
    Some(format!("{}: {}", label, truncate_chars(content, 120)))
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let truncated: String = text.chars().take(limit).collect();
    format!("{}…", truncated)
}

fn last_activity(ctx: &ExecutionContext, history: &[ChatMessage]) -> DateTime<Utc> {
    let mut latest = ctx.start_time;
    for message in history {
        if message.timestamp > latest {
            latest = message.timestamp;
        }
    }
    for tool in &ctx.completed_tools {
        if tool.executed_at > latest {
            latest = tool.executed_at;
        }
    }
    latest
}

/// Advisory phase guess from recent chat content. Never a correctness
/// input to the resume decision.
fn infer_phase(history: &[ChatMessage]) -> Option<String> {
    let recent = recent_text(history, 6);
    const PHASES: [(&str, &str); 8] = [
        ("test", "verification"),
        ("verif", "verification"),
        ("fix", "remediation"),
        ("debug", "remediation"),
        ("implement", "implementation"),
        ("creat", "implementation"),
        ("analy", "analysis"),
        ("plan", "analysis"),
    ];
    PHASES
        .iter()
        .find(|(keyword, _)| recent.contains(keyword))
        .map(|(_, phase)| phase.to_string())
}

/// Advisory strategy guess, same caveat as [`infer_phase`].
fn infer_strategy(history: &[ChatMessage]) -> Option<String> {
    let recent: Vec<&ChatMessage> =
        history.iter().rev().take(10).collect();
    if recent.is_empty() {
        return None;
    }
    let tool_messages = recent
        .iter()
        .filter(|m| m.role == MessageRole::Tool)
        .count();
    if tool_messages >= 3 {
        return Some("tool-driven".to_string());
    }
    let long_reasoning = recent.iter().any(|m| {
        m.role == MessageRole::Assistant
            && m.content.as_deref().map(|c| c.len() > 600).unwrap_or(false)
    });
    if long_reasoning {
        Some("deliberative".to_string())
    } else {
        Some("incremental".to_string())
    }
}

fn recent_text(history: &[ChatMessage], count: usize) -> String {
    let from = history.len().saturating_sub(count);
    history[from..]
        .iter()
        .filter_map(|m| m.content.as_deref())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
