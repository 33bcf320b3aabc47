//! Tests for the tool-calling loop
//!
//! Scripted model turns drive the loop end to end; recording tools verify
//! what was actually executed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use workflow_runner::executor::ExecutorConfig;
use workflow_runner::EngineError;
use workflow_runner_sdk::{CancellationToken, MessageRole, ModelError, ToolRegistry};

use super::common::*;

// ============================================================================
// Happy Path
// ============================================================================

#[tokio::test]
async fn test_file_write_then_final_answer() {
    let tool = RecordingTool::new("file-write");
    let invocations = tool.invocations();
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(tool));

    let backend = Arc::new(ScriptedBackend::new(vec![
        call_turn(vec![call(
            "c1",
            "file-write",
            json!({"path": "hello.txt", "content": "hi"}),
        )]),
        final_turn("File written, task complete."),
    ]));
    let dir = tempfile::TempDir::new().unwrap();
    let executor = engine(backend.clone(), registry, dir.path());
    let source = sample_source("greet", "Write hi to hello.txt", &["file-write"]);

    let result = executor
        .execute(&source, BTreeMap::new(), CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(
        result.final_output.as_deref(),
        Some("File written, task complete.")
    );
    assert_eq!(result.iterations, 2);

    let recorded = invocations.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0]["path"], json!("hello.txt"));

    // Checkpoint written after the tool call records a success.
    let snapshot = executor.store().load("greet").unwrap().unwrap();
    assert_eq!(snapshot.completed_tools.len(), 1);
    assert!(snapshot.completed_tools[0].success);
    assert_eq!(snapshot.completed_tools[0].function_name, "file-write");

    // Transcript: user, assistant with call, tool result, final assistant.
    let history = executor.conversations().history("greet");
    assert_eq!(history.len(), 4);
    assert_eq!(history[2].role, MessageRole::Tool);
    assert_eq!(history[2].tool_call_id.as_deref(), Some("c1"));
}

#[tokio::test]
async fn test_variable_overrides_take_precedence_in_rendering() {
    let backend = Arc::new(ScriptedBackend::new(vec![final_turn("ok")]));
    let dir = tempfile::TempDir::new().unwrap();
    let executor = engine(backend.clone(), ToolRegistry::new(), dir.path());

    let mut source = sample_source("render", "Summarize {{target}}", &[]);
    source
        .variables
        .insert("target".to_string(), json!("src/default.rs"));

    let mut overrides = BTreeMap::new();
    overrides.insert("target".to_string(), json!("src/override.rs"));
    executor
        .execute(&source, overrides, CancellationToken::new())
        .await
        .unwrap();

    let received = backend.received();
    let instruction = received[0][0].content.as_deref().unwrap();
    assert_eq!(instruction, "Summarize src/override.rs");
}

#[tokio::test]
async fn test_tool_context_updates_become_variables() {
    let tool = RecordingTool::new("scan").with_context_update("entry_point", json!("src/main.rs"));
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(tool));

    let backend = Arc::new(ScriptedBackend::new(vec![
        call_turn(vec![call("c1", "scan", json!({}))]),
        final_turn("done"),
    ]));
    let dir = tempfile::TempDir::new().unwrap();
    let executor = engine(backend, registry, dir.path());
    let source = sample_source("scan-wf", "Find the entry point", &["scan"]);

    executor
        .execute(&source, BTreeMap::new(), CancellationToken::new())
        .await
        .unwrap();

    let snapshot = executor.store().load("scan-wf").unwrap().unwrap();
    assert_eq!(snapshot.workflow_variables["entry_point"], json!("src/main.rs"));
    let change = snapshot
        .context_evolution
        .changes
        .iter()
        .find(|c| c.key == "entry_point")
        .unwrap();
    assert_eq!(change.source, "scan");
}

// ============================================================================
// Allow-List Enforcement
// ============================================================================

#[tokio::test]
async fn test_undeclared_tool_is_rejected_without_executing() {
    let declared = RecordingTool::new("file-write");
    let undeclared = RecordingTool::new("secret-tool");
    let secret_invocations = undeclared.invocations();
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(declared));
    registry.register(Arc::new(undeclared));

    let backend = Arc::new(ScriptedBackend::new(vec![
        call_turn(vec![call("c1", "secret-tool", json!({}))]),
        final_turn("giving up on that tool"),
    ]));
    let dir = tempfile::TempDir::new().unwrap();
    let executor = engine(backend.clone(), registry, dir.path());
    let source = sample_source("strict", "Do the task", &["file-write"]);

    let result = executor
        .execute(&source, BTreeMap::new(), CancellationToken::new())
        .await
        .unwrap();

    // The run survives; the rejection is folded into the conversation.
    assert!(result.success);
    assert!(secret_invocations.lock().unwrap().is_empty());

    let snapshot = executor.store().load("strict").unwrap().unwrap();
    assert_eq!(snapshot.completed_tools.len(), 1);
    assert!(!snapshot.completed_tools[0].success);
    assert!(snapshot.completed_tools[0]
        .result
        .as_deref()
        .unwrap()
        .contains("declared tool set"));

    // The model saw the failure as a tool-role message.
    let received = backend.received();
    let second_request = &received[1];
    let tool_msg = second_request
        .iter()
        .find(|m| m.role == MessageRole::Tool)
        .unwrap();
    assert!(tool_msg.content.as_deref().unwrap().contains("declared tool set"));
}

// ============================================================================
// Tool Failure Recovery
// ============================================================================

#[tokio::test]
async fn test_tool_failure_is_surfaced_to_model_not_fatal() {
    let tool = RecordingTool::failing("flaky", "disk full");
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(tool));

    let backend = Arc::new(ScriptedBackend::new(vec![
        call_turn(vec![call("c1", "flaky", json!({}))]),
        final_turn("acknowledged the failure"),
    ]));
    let dir = tempfile::TempDir::new().unwrap();
    let executor = engine(backend.clone(), registry, dir.path());
    let source = sample_source("flaky-wf", "Try the flaky thing", &["flaky"]);

    let result = executor
        .execute(&source, BTreeMap::new(), CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success);
    let snapshot = executor.store().load("flaky-wf").unwrap().unwrap();
    assert!(!snapshot.completed_tools[0].success);
    assert_eq!(snapshot.completed_tools[0].result.as_deref(), Some("disk full"));

    let received = backend.received();
    let tool_msg = received[1]
        .iter()
        .find(|m| m.role == MessageRole::Tool)
        .unwrap();
    assert!(tool_msg.content.as_deref().unwrap().contains("disk full"));
}

// ============================================================================
// Concurrent Tool Calls
// ============================================================================

#[tokio::test]
async fn test_independent_calls_merge_in_request_order() {
    let slow = RecordingTool::new("slow-tool").with_delay(Duration::from_millis(80));
    let fast = RecordingTool::new("fast-tool");
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(slow));
    registry.register(Arc::new(fast));

    let backend = Arc::new(ScriptedBackend::new(vec![
        independent_call_turn(vec![
            call("c-slow", "slow-tool", json!({})),
            call("c-fast", "fast-tool", json!({})),
        ]),
        final_turn("both done"),
    ]));
    let dir = tempfile::TempDir::new().unwrap();
    let executor = engine(backend, registry, dir.path());
    let source = sample_source("parallel", "Run both", &["slow-tool", "fast-tool"]);

    executor
        .execute(&source, BTreeMap::new(), CancellationToken::new())
        .await
        .unwrap();

    // The fast tool finishes first, but results are merged in the order
    // the model requested them.
    let history = executor.conversations().history("parallel");
    assert_eq!(history[2].tool_call_id.as_deref(), Some("c-slow"));
    assert_eq!(history[3].tool_call_id.as_deref(), Some("c-fast"));
}

// ============================================================================
// Fatal Paths
// ============================================================================

#[tokio::test]
async fn test_template_render_failure_is_fatal() {
    let backend = Arc::new(ScriptedBackend::new(vec![]));
    let dir = tempfile::TempDir::new().unwrap();
    let executor = engine(backend.clone(), ToolRegistry::new(), dir.path());
    let source = sample_source("broken", "Work on {{missing_var}}", &[]);

    let err = executor
        .execute(&source, BTreeMap::new(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Template(_)));
    // The model was never contacted.
    assert!(backend.received().is_empty());
}

#[tokio::test]
async fn test_max_iterations_exceeded_keeps_checkpoint() {
    let tool = RecordingTool::new("busy");
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(tool));

    let backend = Arc::new(ScriptedBackend::new(vec![
        call_turn(vec![call("c1", "busy", json!({}))]),
        call_turn(vec![call("c2", "busy", json!({}))]),
        call_turn(vec![call("c3", "busy", json!({}))]),
    ]));
    let dir = tempfile::TempDir::new().unwrap();
    let executor = engine_with_config(
        backend,
        registry,
        dir.path(),
        ExecutorConfig {
            max_iterations: 2,
            ..ExecutorConfig::default()
        },
    );
    let source = sample_source("runaway", "Loop forever", &["busy"]);

    let err = executor
        .execute(&source, BTreeMap::new(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::MaxIterationsExceeded { iterations: 2 }
    ));
    let snapshot = executor.store().load("runaway").unwrap().unwrap();
    assert_eq!(snapshot.completed_tools.len(), 2);
}

#[tokio::test]
async fn test_model_error_kinds_propagate() {
    let backend = Arc::new(ScriptedBackend::new(vec![Err(ModelError::RateLimited(
        "429".to_string(),
    ))]));
    let dir = tempfile::TempDir::new().unwrap();
    let executor = engine(backend, ToolRegistry::new(), dir.path());
    let source = sample_source("limited", "Anything", &[]);

    let err = executor
        .execute(&source, BTreeMap::new(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Model(ModelError::RateLimited(_))));
}

#[tokio::test]
async fn test_execution_timeout_fails_the_run() {
    let backend = Arc::new(ScriptedBackend::slow(
        vec![final_turn("too late")],
        Duration::from_millis(500),
    ));
    let dir = tempfile::TempDir::new().unwrap();
    let executor = engine_with_config(
        backend,
        ToolRegistry::new(),
        dir.path(),
        ExecutorConfig {
            execution_timeout: Some(Duration::from_millis(50)),
            ..ExecutorConfig::default()
        },
    );
    let source = sample_source("slow-wf", "Anything", &[]);

    let err = executor
        .execute(&source, BTreeMap::new(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Timeout { .. }));
}

#[tokio::test]
async fn test_cancellation_marks_run_cancelled_not_completed() {
    let backend = Arc::new(ScriptedBackend::slow(
        vec![final_turn("never arrives")],
        Duration::from_secs(30),
    ));
    let dir = tempfile::TempDir::new().unwrap();
    let executor = engine(backend, ToolRegistry::new(), dir.path());
    let source = sample_source("cancelled-wf", "Anything", &[]);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = executor
        .execute(&source, BTreeMap::new(), cancel)
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.error_message.as_deref(), Some("execution cancelled"));
}
