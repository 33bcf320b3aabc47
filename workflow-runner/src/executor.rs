//! Execution orchestrator: drives a single workflow from start (or resume
//! point) to completion through the automatic tool-calling loop.
//!
//! The loop suspends at exactly two points per iteration — the model call
//! and each tool invocation — and checkpoints through the codec + store
//! after every tool call. Tool failures are folded into the conversation
//! so the model can self-correct; only orchestrator-level failures end the
//! run.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde_json::{json, Value};
use uuid::Uuid;
use workflow_runner_sdk::{
    log_iteration_start, log_tool_result, log_warning, ChatBackend, ChatMessage, ChatSettings,
    ExecutionEvent, FunctionCall, ModelTurn, ToolDescriptor, ToolOutcome, ToolRegistry,
    WorkflowSource, CancellationToken,
};

use crate::context::{CompletedTool, ExecutionContext, HistoryEntry, StepKind};
use crate::conversation::ConversationStore;
use crate::error::EngineError;
use crate::resume::codec::{SnapshotCodec, SnapshotMeta};
use crate::resume::compat;
use crate::resume::store::ResumeStateStore;
use crate::template::{self, TemplateError};

/// Final outcome of one execution attempt.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    /// The model's final answer when the run completed.
    pub final_output: Option<String>,
    pub error_message: Option<String>,
    pub duration: Duration,
    pub iterations: usize,
    pub execution_id: Uuid,
}

/// Outcome of validating a workflow source without invoking the model.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Lifecycle states of one execution.
///
/// `AwaitingModel` and `ExecutingTool` alternate; `Completed` and `Failed`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Rendering,
    AwaitingModel,
    ExecutingTool,
    Completed,
    Failed,
}

#[derive(Clone)]
pub struct ExecutorConfig {
    /// Hard bound on model turns before the run fails.
    pub max_iterations: usize,
    /// Overall wall-clock budget for one `execute`/`resume` call.
    pub execution_timeout: Option<Duration>,
    pub chat: ChatSettings,
    /// Minimum compatibility score required to resume.
    pub compat_threshold: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            execution_timeout: None,
            chat: ChatSettings::default(),
            compat_threshold: compat::DEFAULT_RESUME_THRESHOLD,
        }
    }
}

/// One tool call's worth of bookkeeping, produced by `invoke_checked`.
struct ToolStep {
    completed: CompletedTool,
    message: ChatMessage,
    updates: std::collections::HashMap<String, Value>,
}

pub struct WorkflowExecutor {
    backend: Arc<dyn ChatBackend>,
    registry: Arc<ToolRegistry>,
    conversations: ConversationStore,
    store: ResumeStateStore,
    codec: SnapshotCodec,
    config: ExecutorConfig,
    states: Arc<Mutex<HashMap<String, RunState>>>,
}

impl WorkflowExecutor {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        registry: Arc<ToolRegistry>,
        store: ResumeStateStore,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            backend,
            registry,
            conversations: ConversationStore::new(),
            store,
            codec: SnapshotCodec::default(),
            config,
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_codec(mut self, codec: SnapshotCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn store(&self) -> &ResumeStateStore {
        &self.store
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Current lifecycle state for a workflow, if one has run.
    pub fn state(&self, workflow_id: &str) -> Option<RunState> {
        self.states.lock().unwrap().get(workflow_id).copied()
    }

    fn set_state(&self, workflow_id: &str, state: RunState) {
        self.states
            .lock()
            .unwrap()
            .insert(workflow_id.to_string(), state);
    }

    /// Run a workflow from the beginning.
    ///
    /// `overrides` take precedence over the workflow's own defaults; every
    /// write is recorded in the context evolution with its source.
    pub async fn execute(
        &self,
        source: &WorkflowSource,
        overrides: BTreeMap<String, Value>,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, EngineError> {
        self.set_state(&source.id, RunState::Created);
        let mut ctx = ExecutionContext::new();
        for (key, value) in &source.variables {
            ctx.set_variable(key, value.clone(), "workflow-defaults", None);
        }
        for (key, value) in overrides {
            ctx.set_variable(&key, value, "cli-override", None);
        }

        self.set_state(&source.id, RunState::Rendering);
        let instruction = match template::render(&source.template, &ctx.variables) {
            Ok(text) => text,
            Err(err) => {
                self.fail(&source.id, &err.to_string());
                return Err(err.into());
            }
        };

        let history = vec![ChatMessage::user(instruction)];
        self.conversations.replace(&source.id, history.clone());
        ExecutionEvent::ExecutionStarted {
            workflow_id: source.id.clone(),
            resumed: false,
        }
        .emit();

        self.run_loop(source, ctx, history, cancel).await
    }

    /// Continue a previously interrupted workflow from its last checkpoint.
    pub async fn resume(
        &self,
        source: &WorkflowSource,
        force: bool,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, EngineError> {
        self.set_state(&source.id, RunState::Created);
        let snapshot = self
            .store
            .load(&source.id)?
            .ok_or_else(|| EngineError::NoSnapshot {
                workflow_id: source.id.clone(),
            })?;

        let result = compat::validate_compatibility(
            &snapshot,
            &source.raw,
            &self.registry.names(),
            self.config.compat_threshold,
        );
        for warning in &result.warnings {
            log_warning!(warning);
        }
        if !result.can_resume && !force {
            self.fail(&source.id, "resume incompatible");
            return Err(EngineError::ResumeIncompatible {
                score: result.score,
                warnings: result.warnings,
            });
        }

        let (ctx, mut history) = self.codec.from_snapshot(&snapshot);
        history.push(self.codec.resume_briefing(&snapshot));
        self.conversations.replace(&source.id, history.clone());
        ExecutionEvent::ExecutionStarted {
            workflow_id: source.id.clone(),
            resumed: true,
        }
        .emit();

        self.run_loop(source, ctx, history, cancel).await
    }

    /// Validate template syntax and the declared tool set without invoking
    /// the model.
    pub fn validate(&self, source: &WorkflowSource) -> ValidationReport {
        let mut report = ValidationReport::default();

        match template::placeholders(&source.template) {
            Ok(names) => {
                for name in names {
                    if !source.variables.contains_key(&name) {
                        report.warnings.push(format!(
                            "template variable '{}' has no default value",
                            name
                        ));
                    }
                }
            }
            Err(err @ TemplateError::UnclosedPlaceholder { .. })
            | Err(err @ TemplateError::EmptyPlaceholder { .. }) => {
                report.errors.push(err.to_string());
            }
            Err(err) => report.errors.push(err.to_string()),
        }

        for tool in &source.tools {
            if !self.registry.contains(tool) {
                report
                    .errors
                    .push(format!("declared tool '{}' is not registered", tool));
            }
        }
        for name in self.registry.names() {
            if !source.tools.contains(&name) && source.template.contains(&name) {
                report
                    .warnings
                    .push(format!("tool '{}' referenced but not declared", name));
            }
        }

        report
    }

    async fn run_loop(
        &self,
        source: &WorkflowSource,
        mut ctx: ExecutionContext,
        mut history: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, EngineError> {
        let execution_id = Uuid::new_v4();
        let started = Instant::now();
        let deadline = self.config.execution_timeout.map(|t| started + t);
        let descriptors = self.registry.descriptors_for(&source.tools);

        for iteration in 1..=self.config.max_iterations {
            log_iteration_start!(iteration);
            if cancel.is_cancelled() {
                return Ok(self.cancelled(source, started, iteration - 1, execution_id));
            }
            if deadline_expired(deadline) {
                return Err(self.timed_out(source, started));
            }

            self.set_state(&source.id, RunState::AwaitingModel);
            let model_started = Utc::now();
            let turn = match self
                .await_model(&history, &descriptors, deadline, &cancel, started)
                .await
            {
                Ok(Some(turn)) => turn,
                Ok(None) => {
                    return Ok(self.cancelled(source, started, iteration - 1, execution_id))
                }
                Err(err) => {
                    self.fail(&source.id, &err.to_string());
                    return Err(err);
                }
            };

            ctx.current_step += 1;
            ctx.record_step(HistoryEntry {
                name: format!("model-turn-{}", iteration),
                kind: StepKind::ModelTurn,
                started_at: model_started,
                finished_at: Some(Utc::now()),
                success: true,
                error: None,
            });

            let calls = turn.message.function_calls.clone();
            history.push(turn.message.clone());
            self.conversations.append(&source.id, turn.message.clone());
            ExecutionEvent::ModelTurnCompleted {
                iteration,
                function_calls: calls.len(),
            }
            .emit();

            // A response with no function calls is the final answer.
            if calls.is_empty() {
                self.set_state(&source.id, RunState::Completed);
                ExecutionEvent::ExecutionCompleted {
                    workflow_id: source.id.clone(),
                    iterations: iteration,
                }
                .emit();
                return Ok(ExecutionResult {
                    success: true,
                    final_output: turn.message.content.clone(),
                    error_message: None,
                    duration: started.elapsed(),
                    iterations: iteration,
                    execution_id,
                });
            }

            self.set_state(&source.id, RunState::ExecutingTool);
            if turn.independent_calls && calls.len() > 1 {
                // Concurrent execution, but results merge in the order the
                // interface requested them.
                let invocations = calls
                    .iter()
                    .map(|call| {
                        self.invoke_checked(source, call.clone(), cancel.clone(), deadline, started)
                    })
                    .collect::<Vec<_>>();
                let outcomes = join_all(invocations).await;
                for outcome in outcomes {
                    match outcome {
                        Ok(Some(step)) => {
                            self.apply_tool_step(source, &mut ctx, &mut history, step);
                            self.checkpoint(source, &ctx, &history)?;
                        }
                        Ok(None) => {
                            return Ok(self.cancelled(
                                source,
                                started,
                                iteration,
                                execution_id,
                            ))
                        }
                        Err(err) => {
                            self.fail(&source.id, &err.to_string());
                            return Err(err);
                        }
                    }
                }
            } else {
                for call in calls {
                    if cancel.is_cancelled() {
                        return Ok(self.cancelled(source, started, iteration, execution_id));
                    }
                    match self
                        .invoke_checked(source, call, cancel.clone(), deadline, started)
                        .await
                    {
                        Ok(Some(step)) => {
                            self.apply_tool_step(source, &mut ctx, &mut history, step);
                            self.checkpoint(source, &ctx, &history)?;
                        }
                        Ok(None) => {
                            return Ok(self.cancelled(
                                source,
                                started,
                                iteration,
                                execution_id,
                            ))
                        }
                        Err(err) => {
                            self.fail(&source.id, &err.to_string());
                            return Err(err);
                        }
                    }
                }
            }
        }

        self.fail(&source.id, "max iterations exceeded");
        Err(EngineError::MaxIterationsExceeded {
            iterations: self.config.max_iterations,
        })
    }

    async fn await_model(
        &self,
        history: &[ChatMessage],
        tools: &[ToolDescriptor],
        deadline: Option<Instant>,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<Option<ModelTurn>, EngineError> {
        let send = self.backend.send(history, tools, &self.config.chat);
        tokio::select! {
            _ = cancel.cancelled() => Ok(None),
            _ = sleep_until_deadline(deadline) => Err(EngineError::Timeout {
                elapsed_secs: started.elapsed().as_secs(),
            }),
            result = send => match result {
                Ok(turn) => Ok(Some(turn)),
                Err(err) => Err(err.into()),
            },
        }
    }

    /// Enforce the allow-list, then invoke the tool.
    ///
    /// Returns `Ok(None)` when cancellation fired mid-invocation: the
    /// in-flight result is discarded from history and the caller marks the
    /// run cancelled.
    async fn invoke_checked(
        &self,
        source: &WorkflowSource,
        call: FunctionCall,
        cancel: CancellationToken,
        deadline: Option<Instant>,
        started: Instant,
    ) -> Result<Option<ToolStep>, EngineError> {
        if !source.tools.iter().any(|t| t == &call.name) {
            let reason = format!(
                "tool '{}' is not in the workflow's declared tool set",
                call.name
            );
            ExecutionEvent::ToolRejected {
                name: call.name.clone(),
                reason: reason.clone(),
            }
            .emit();
            return Ok(Some(rejected_step(&call, reason)));
        }
        let Some(tool) = self.registry.get(&call.name) else {
            let reason = format!("tool '{}' is not registered", call.name);
            ExecutionEvent::ToolRejected {
                name: call.name.clone(),
                reason: reason.clone(),
            }
            .emit();
            return Ok(Some(rejected_step(&call, reason)));
        };

        ExecutionEvent::ToolStarted {
            name: call.name.clone(),
        }
        .emit();
        let invocation = tool.invoke(call.arguments.clone(), cancel.clone());
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            _ = sleep_until_deadline(deadline) => {
                return Err(EngineError::Timeout {
                    elapsed_secs: started.elapsed().as_secs(),
                });
            }
            outcome = invocation => outcome,
        };

        log_tool_result!(call.name, outcome.success);
        ExecutionEvent::ToolCompleted {
            name: call.name.clone(),
            success: outcome.success,
        }
        .emit();
        Ok(Some(step_from_outcome(&call, outcome)))
    }

    fn apply_tool_step(
        &self,
        source: &WorkflowSource,
        ctx: &mut ExecutionContext,
        history: &mut Vec<ChatMessage>,
        step: ToolStep,
    ) {
        history.push(step.message.clone());
        self.conversations.append(&source.id, step.message);
        for (key, value) in step.updates {
            ctx.set_variable(&key, value, &step.completed.function_name, None);
        }
        ctx.record_tool(step.completed);
    }

    fn checkpoint(
        &self,
        source: &WorkflowSource,
        ctx: &ExecutionContext,
        history: &[ChatMessage],
    ) -> Result<(), EngineError> {
        let meta = SnapshotMeta {
            workflow_id: source.id.clone(),
            workflow_file_path: source
                .file_path
                .as_ref()
                .map(|p| p.display().to_string()),
            original_content: source.raw.clone(),
            available_tools: source.tools.clone(),
        };
        let snapshot = self.codec.to_snapshot(ctx, history, &meta);
        self.store.save(&snapshot)?;
        ExecutionEvent::CheckpointSaved {
            workflow_id: source.id.clone(),
            completed_tools: snapshot.completed_tools.len(),
        }
        .emit();
        Ok(())
    }

    fn cancelled(
        &self,
        source: &WorkflowSource,
        started: Instant,
        iterations: usize,
        execution_id: Uuid,
    ) -> ExecutionResult {
        self.fail(&source.id, "execution cancelled");
        ExecutionResult {
            success: false,
            final_output: None,
            error_message: Some("execution cancelled".to_string()),
            duration: started.elapsed(),
            iterations,
            execution_id,
        }
    }

    fn timed_out(&self, source: &WorkflowSource, started: Instant) -> EngineError {
        let err = EngineError::Timeout {
            elapsed_secs: started.elapsed().as_secs(),
        };
        self.fail(&source.id, &err.to_string());
        err
    }

    fn fail(&self, workflow_id: &str, error: &str) {
        self.set_state(workflow_id, RunState::Failed);
        ExecutionEvent::ExecutionFailed {
            workflow_id: workflow_id.to_string(),
            error: error.to_string(),
        }
        .emit();
    }
}

fn deadline_expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(d) => {
            let remaining = d.saturating_duration_since(Instant::now());
            tokio::time::sleep(remaining).await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn reasoning_from(call: &FunctionCall) -> Option<String> {
    call.arguments
        .get("reasoning")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// A call outside the allow-list: recorded as a failed tool, surfaced to
/// the model, never executed.
fn rejected_step(call: &FunctionCall, reason: String) -> ToolStep {
    let payload = json!({ "success": false, "error": reason }).to_string();
    ToolStep {
        completed: CompletedTool {
            function_name: call.name.clone(),
            parameters: call.arguments.clone(),
            result: Some(reason),
            executed_at: Utc::now(),
            success: false,
            reasoning: reasoning_from(call),
        },
        message: ChatMessage::tool(call.id.clone(), payload),
        updates: std::collections::HashMap::new(),
    }
}

fn step_from_outcome(call: &FunctionCall, outcome: ToolOutcome) -> ToolStep {
    let (result, payload) = if outcome.success {
        let payload = outcome
            .payload
            .unwrap_or_else(|| json!({ "success": true }).to_string());
        (Some(payload.clone()), payload)
    } else {
        let error = outcome
            .error
            .unwrap_or_else(|| "tool invocation failed".to_string());
        let payload = json!({ "success": false, "error": error }).to_string();
        (Some(error), payload)
    };

    ToolStep {
        completed: CompletedTool {
            function_name: call.name.clone(),
            parameters: call.arguments.clone(),
            result,
            executed_at: Utc::now(),
            success: outcome.success,
            reasoning: reasoning_from(call),
        },
        message: ChatMessage::tool(call.id.clone(), payload),
        updates: outcome.context_updates,
    }
}
