//! Common test fixtures for engine tests

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use workflow_runner::executor::{ExecutorConfig, WorkflowExecutor};
use workflow_runner::resume::store::ResumeStateStore;
use workflow_runner_sdk::{
    async_trait, CancellationToken, ChatBackend, ChatMessage, ChatSettings, FunctionCall,
    ModelError, ModelTurn, ToolDescriptor, ToolOutcome, ToolRegistry, WorkflowTool,
};

/// Chat backend that replays a fixed script of turns.
///
/// Every `send` records the transcript it was given, so tests can assert
/// what the model actually saw. Once the script is exhausted, further
/// sends fail with `ModelError::Unavailable` — which doubles as a way to
/// simulate the process dying mid-run.
pub struct ScriptedBackend {
    turns: Mutex<VecDeque<Result<ModelTurn, ModelError>>>,
    pub histories: Mutex<Vec<Vec<ChatMessage>>>,
    delay: Option<Duration>,
}

impl ScriptedBackend {
    pub fn new(turns: Vec<Result<ModelTurn, ModelError>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            histories: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// A backend whose every reply takes `delay` to arrive.
    pub fn slow(turns: Vec<Result<ModelTurn, ModelError>>, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(turns)
        }
    }

    /// Transcripts received so far, one per `send`.
    pub fn received(&self) -> Vec<Vec<ChatMessage>> {
        self.histories.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn send(
        &self,
        history: &[ChatMessage],
        _tools: &[ToolDescriptor],
        _settings: &ChatSettings,
    ) -> Result<ModelTurn, ModelError> {
        self.histories.lock().unwrap().push(history.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.turns.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(ModelError::Unavailable("script exhausted".to_string())))
    }
}

/// Tool that records every invocation it receives.
pub struct RecordingTool {
    name: String,
    invocations: Arc<Mutex<Vec<Value>>>,
    fail_with: Option<String>,
    context_updates: Vec<(String, Value)>,
    delay: Option<Duration>,
}

impl RecordingTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            invocations: Arc::new(Mutex::new(Vec::new())),
            fail_with: None,
            context_updates: Vec::new(),
            delay: None,
        }
    }

    pub fn failing(name: &str, error: &str) -> Self {
        Self {
            fail_with: Some(error.to_string()),
            ..Self::new(name)
        }
    }

    pub fn with_context_update(mut self, key: &str, value: Value) -> Self {
        self.context_updates.push((key.to_string(), value));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Handle onto the invocation log, alive after the tool is registered.
    pub fn invocations(&self) -> Arc<Mutex<Vec<Value>>> {
        Arc::clone(&self.invocations)
    }
}

#[async_trait]
impl WorkflowTool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, params: Value, _cancel: CancellationToken) -> ToolOutcome {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.invocations.lock().unwrap().push(params);
        if let Some(error) = &self.fail_with {
            return ToolOutcome::failure(error.clone());
        }
        let mut outcome = ToolOutcome::success(format!("{{\"tool\":\"{}\"}}", self.name));
        for (key, value) in &self.context_updates {
            outcome = outcome.with_context_update(key.clone(), value.clone());
        }
        outcome
    }
}

pub fn final_turn(text: &str) -> Result<ModelTurn, ModelError> {
    Ok(ModelTurn {
        message: ChatMessage::assistant(text),
        usage: None,
        independent_calls: false,
    })
}

pub fn call_turn(calls: Vec<FunctionCall>) -> Result<ModelTurn, ModelError> {
    Ok(ModelTurn {
        message: ChatMessage::assistant_with_calls(None, calls),
        usage: None,
        independent_calls: false,
    })
}

pub fn independent_call_turn(calls: Vec<FunctionCall>) -> Result<ModelTurn, ModelError> {
    Ok(ModelTurn {
        message: ChatMessage::assistant_with_calls(None, calls),
        usage: None,
        independent_calls: true,
    })
}

pub fn call(id: &str, name: &str, arguments: Value) -> FunctionCall {
    FunctionCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

pub fn sample_source(id: &str, template: &str, tools: &[&str]) -> workflow_runner_sdk::WorkflowSource {
    workflow_runner_sdk::WorkflowSource {
        id: id.to_string(),
        name: id.to_string(),
        template: template.to_string(),
        tools: tools.iter().map(|t| t.to_string()).collect(),
        variables: BTreeMap::new(),
        raw: format!("id: {}\ndescription: {}\n", id, template),
        file_path: None,
    }
}

pub fn engine(
    backend: Arc<dyn ChatBackend>,
    registry: ToolRegistry,
    resume_dir: &Path,
) -> WorkflowExecutor {
    engine_with_config(backend, registry, resume_dir, ExecutorConfig::default())
}

pub fn engine_with_config(
    backend: Arc<dyn ChatBackend>,
    registry: ToolRegistry,
    resume_dir: &Path,
    config: ExecutorConfig,
) -> WorkflowExecutor {
    WorkflowExecutor::new(
        backend,
        Arc::new(registry),
        ResumeStateStore::with_dir(resume_dir),
        config,
    )
}
