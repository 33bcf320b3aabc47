//! Engine-level error kinds.
//!
//! Tool failures never appear here: they are folded into the conversation
//! as failed tool-result messages so the model can react. These variants
//! are the orchestrator-level failures that end a run.

use thiserror::Error;
use workflow_runner_sdk::ModelError;

use crate::resume::store::StoreError;
use crate::template::TemplateError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Workflow text failed to render. Fatal, reported immediately.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The chat-completion interface failed. Retry policy belongs to the
    /// backend, not this engine.
    #[error("model interface error: {0}")]
    Model(#[from] ModelError),

    /// The tool-calling loop ran past its configured bound.
    #[error("maximum iterations exceeded after {iterations} model turns")]
    MaxIterationsExceeded { iterations: usize },

    /// Overall execution timeout expired.
    #[error("execution timed out after {elapsed_secs}s")]
    Timeout { elapsed_secs: u64 },

    /// `resume` was asked for a workflow id with no stored snapshot.
    #[error("no resume snapshot found for workflow '{workflow_id}'")]
    NoSnapshot { workflow_id: String },

    /// The stored snapshot does not match the current workflow source
    /// closely enough to continue safely. Overridable with `--force`.
    #[error("snapshot is not compatible with the current workflow source (score {score:.2})")]
    ResumeIncompatible { score: f64, warnings: Vec<String> },

    /// Snapshot persistence failed or the stored file is corrupt.
    #[error(transparent)]
    Store(#[from] StoreError),
}
