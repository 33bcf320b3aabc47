//! Tests for checkpoint/resume behavior
//!
//! A run is interrupted by exhausting the scripted backend (the model
//! interface dies mid-task), then a fresh executor — as a new process
//! would — picks the workflow back up from the stored snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use workflow_runner::resume::compat::{validate_compatibility, DEFAULT_RESUME_THRESHOLD};
use workflow_runner::resume::store::StoreError;
use workflow_runner::EngineError;
use workflow_runner_sdk::{CancellationToken, MessageRole, ToolRegistry};

use super::common::*;

fn three_step_registry() -> (ToolRegistry, Vec<Arc<std::sync::Mutex<Vec<serde_json::Value>>>>) {
    let mut registry = ToolRegistry::new();
    let mut logs = Vec::new();
    for name in ["step-one", "step-two", "step-three"] {
        let tool = RecordingTool::new(name);
        logs.push(tool.invocations());
        registry.register(Arc::new(tool));
    }
    (registry, logs)
}

// ============================================================================
// Interrupt + Resume (identical source)
// ============================================================================

#[tokio::test]
async fn test_resume_continues_without_reinvoking_completed_tools() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = sample_source(
        "resumable",
        "Carry out the three preparation steps, then report",
        &["step-one", "step-two", "step-three"],
    );

    // First attempt: three tool calls complete, then the model interface
    // dies before the fourth turn.
    let (registry_a, _logs_a) = three_step_registry();
    let backend_a = Arc::new(ScriptedBackend::new(vec![
        call_turn(vec![call("c1", "step-one", json!({}))]),
        call_turn(vec![call("c2", "step-two", json!({}))]),
        call_turn(vec![call("c3", "step-three", json!({}))]),
    ]));
    let executor_a = engine(backend_a, registry_a, dir.path());
    let err = executor_a
        .execute(&source, BTreeMap::new(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Model(_)));

    let snapshot = executor_a.store().load("resumable").unwrap().unwrap();
    assert_eq!(snapshot.completed_tools.len(), 3);

    // Identical source scores a clean 1.0.
    let compat = validate_compatibility(
        &snapshot,
        &source.raw,
        &["step-one".to_string(), "step-two".to_string(), "step-three".to_string()],
        DEFAULT_RESUME_THRESHOLD,
    );
    assert_eq!(compat.score, 1.0);
    assert!(compat.can_resume);

    // Second attempt in a "new process": fresh executor, fresh tools.
    let (registry_b, logs_b) = three_step_registry();
    let backend_b = Arc::new(ScriptedBackend::new(vec![final_turn(
        "All three steps were already done; reporting now.",
    )]));
    let executor_b = engine(backend_b.clone(), registry_b, dir.path());

    let result = executor_b
        .resume(&source, false, CancellationToken::new())
        .await
        .unwrap();
    assert!(result.success);

    // None of the completed tools ran again.
    for log in &logs_b {
        assert!(log.lock().unwrap().is_empty());
    }

    // The model saw the full prior transcript plus the resume briefing.
    let received = backend_b.received();
    let rehydrated = &received[0];
    assert!(rehydrated.len() >= 8);
    assert!(rehydrated
        .iter()
        .any(|m| m.tool_call_id.as_deref() == Some("c2")));

    let briefing = rehydrated.last().unwrap();
    assert_eq!(briefing.role, MessageRole::System);
    let text = briefing.content.as_deref().unwrap();
    assert!(text.contains("step-one"));
    assert!(text.contains("step-three"));
    assert!(text.contains("Do not re-derive or repeat"));
}

// ============================================================================
// Compatibility Refusal + --force
// ============================================================================

#[tokio::test]
async fn test_resume_refused_when_source_diverged_heavily() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = sample_source("edited", "Inventory the repository modules", &["step-one"]);

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(RecordingTool::new("step-one")));
    let backend = Arc::new(ScriptedBackend::new(vec![call_turn(vec![call(
        "c1",
        "step-one",
        json!({}),
    )])]));
    let executor = engine(backend, registry, dir.path());
    let _ = executor
        .execute(&source, BTreeMap::new(), CancellationToken::new())
        .await;

    // The workflow file is rewritten beyond recognition.
    let mut edited = source.clone();
    edited.raw = "A wholly different document about deploying containers to a fleet of \
                  staging hosts, sharing no phrasing with the original task at all."
        .to_string();

    let (registry_b, _) = three_step_registry();
    let backend_b = Arc::new(ScriptedBackend::new(vec![final_turn("unused")]));
    let executor_b = engine(backend_b, registry_b, dir.path());

    let err = executor_b
        .resume(&edited, false, CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        EngineError::ResumeIncompatible { score, warnings } => {
            assert!(score < DEFAULT_RESUME_THRESHOLD);
            assert!(warnings.iter().any(|w| w.contains("changed significantly")));
        }
        other => panic!("expected ResumeIncompatible, got {:?}", other),
    }
}

#[tokio::test]
async fn test_force_overrides_failed_compatibility_check() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = sample_source("forced", "Index the source files", &["step-one"]);

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(RecordingTool::new("step-one")));
    let backend = Arc::new(ScriptedBackend::new(vec![call_turn(vec![call(
        "c1",
        "step-one",
        json!({}),
    )])]));
    let executor = engine(backend, registry, dir.path());
    let _ = executor
        .execute(&source, BTreeMap::new(), CancellationToken::new())
        .await;

    let mut edited = source.clone();
    edited.raw = "Entirely rewritten workflow text with a new task description that keeps \
                  only the declared tool in common with its predecessor."
        .to_string();

    let mut registry_b = ToolRegistry::new();
    registry_b.register(Arc::new(RecordingTool::new("step-one")));
    let backend_b = Arc::new(ScriptedBackend::new(vec![final_turn("resumed anyway")]));
    let executor_b = engine(backend_b, registry_b, dir.path());

    let result = executor_b
        .resume(&edited, true, CancellationToken::new())
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.final_output.as_deref(), Some("resumed anyway"));
}

// ============================================================================
// Missing / Corrupt Snapshots
// ============================================================================

#[tokio::test]
async fn test_resume_without_snapshot_is_a_distinct_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let backend = Arc::new(ScriptedBackend::new(vec![]));
    let executor = engine(backend, ToolRegistry::new(), dir.path());
    let source = sample_source("never-ran", "Anything", &[]);

    let err = executor
        .resume(&source, false, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::NoSnapshot { .. }));
}

#[tokio::test]
async fn test_corrupt_snapshot_is_surfaced_never_silently_restarted() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("damaged.json"), b"{ truncated").unwrap();

    let backend = Arc::new(ScriptedBackend::new(vec![final_turn("unused")]));
    let executor = engine(backend.clone(), ToolRegistry::new(), dir.path());
    let source = sample_source("damaged", "Anything", &[]);

    let err = executor
        .resume(&source, false, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Store(StoreError::Corrupt { .. })));
    // The model was never contacted with a fresh start.
    assert!(backend.received().is_empty());
}
