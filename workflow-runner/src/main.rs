use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;
use serde_json::Value;
use workflow_runner::backend::ProcessChatBackend;
use workflow_runner::cli::{parse_var, Cli, Command};
use workflow_runner::loader::load_workflow;
use workflow_runner::resume::store::{ResumeStateStore, StoreConfig};
use workflow_runner::tools::builtin_registry;
use workflow_runner::{EngineError, ExecutionResult, ExecutorConfig, WorkflowExecutor};
use workflow_runner_sdk::{log_info, log_run_stats, log_warning, CancellationToken};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            workflow_file,
            vars,
            max_iterations,
            timeout_secs,
            resume_dir,
            agent_cmd,
        } => {
            let overrides = parse_overrides(&vars)?;
            let executor = build_executor(agent_cmd, resume_dir, max_iterations, timeout_secs)?;
            let source = load_workflow(&workflow_file)?;

            let report = executor.validate(&source);
            for warning in &report.warnings {
                log_warning!(warning);
            }
            if !report.is_ok() {
                for error in &report.errors {
                    eprintln!("error: {}", error);
                }
                return Err(anyhow!("workflow '{}' failed validation", source.id));
            }

            log_info!("Executing workflow '{}'", source.id);
            let cancel = cancel_on_ctrl_c();
            match executor.execute(&source, overrides, cancel).await {
                Ok(result) => report_result(&source.id, result),
                Err(err) => report_fatal(err, executor.store(), &source.id, &workflow_file),
            }
        }

        Command::Resume {
            workflow_file,
            force,
            list,
            clean,
            max_iterations,
            timeout_secs,
            resume_dir,
            agent_cmd,
        } => {
            if list {
                let store = build_store(resume_dir);
                return list_snapshots(&store);
            }
            if clean {
                let store = build_store(resume_dir);
                let retention = store.config().retention;
                let removed = store.cleanup(retention)?;
                log_info!("Removed {} expired snapshot(s)", removed);
                return Ok(());
            }

            let workflow_file = workflow_file
                .ok_or_else(|| anyhow!("resume requires a workflow file (or --list/--clean)"))?;
            let executor = build_executor(agent_cmd, resume_dir, max_iterations, timeout_secs)?;
            let source = load_workflow(&workflow_file)?;

            log_info!("Resuming workflow '{}'", source.id);
            let cancel = cancel_on_ctrl_c();
            match executor.resume(&source, force, cancel).await {
                Ok(result) => report_result(&source.id, result),
                Err(err) => report_fatal(err, executor.store(), &source.id, &workflow_file),
            }
        }

        Command::Validate { workflow_file } => {
            let executor = build_executor_for_validation();
            let source = load_workflow(&workflow_file)?;
            let report = executor.validate(&source);

            for warning in &report.warnings {
                log_warning!(warning);
            }
            if report.is_ok() {
                log_info!("Workflow '{}' is valid", source.id);
                Ok(())
            } else {
                for error in &report.errors {
                    eprintln!("error: {}", error);
                }
                Err(anyhow!("workflow '{}' failed validation", source.id))
            }
        }
    }
}

fn parse_overrides(vars: &[String]) -> Result<BTreeMap<String, Value>> {
    let mut overrides = BTreeMap::new();
    for spec in vars {
        let (key, value) = parse_var(spec)?;
        overrides.insert(key, value);
    }
    Ok(overrides)
}

fn agent_command(agent_cmd: Option<String>) -> Result<String> {
    agent_cmd
        .or_else(|| std::env::var("WORKFLOW_RUNNER_AGENT_CMD").ok())
        .ok_or_else(|| {
            anyhow!("no agent command configured; pass --agent-cmd or set WORKFLOW_RUNNER_AGENT_CMD")
        })
}

fn build_store(resume_dir: Option<PathBuf>) -> ResumeStateStore {
    match resume_dir {
        Some(dir) => ResumeStateStore::new(StoreConfig {
            dir,
            ..StoreConfig::default()
        }),
        None => ResumeStateStore::new(StoreConfig::default()),
    }
}

fn build_executor(
    agent_cmd: Option<String>,
    resume_dir: Option<PathBuf>,
    max_iterations: usize,
    timeout_secs: Option<u64>,
) -> Result<WorkflowExecutor> {
    let backend = Arc::new(ProcessChatBackend::new(agent_command(agent_cmd)?));
    let config = ExecutorConfig {
        max_iterations,
        execution_timeout: timeout_secs.map(Duration::from_secs),
        ..ExecutorConfig::default()
    };
    Ok(WorkflowExecutor::new(
        backend,
        Arc::new(builtin_registry()),
        build_store(resume_dir),
        config,
    ))
}

// Validation never touches the backend, so a placeholder command is fine.
fn build_executor_for_validation() -> WorkflowExecutor {
    WorkflowExecutor::new(
        Arc::new(ProcessChatBackend::new("")),
        Arc::new(builtin_registry()),
        ResumeStateStore::new(StoreConfig::default()),
        ExecutorConfig::default(),
    )
}

fn list_snapshots(store: &ResumeStateStore) -> Result<()> {
    let summaries = store.list()?;
    if summaries.is_empty() {
        log_info!("No resume snapshots found");
        return Ok(());
    }
    for summary in summaries {
        println!(
            "{}  last activity {}  phase {}  {} tool call(s)",
            summary.workflow_id,
            summary.last_activity.format("%Y-%m-%d %H:%M:%S"),
            summary.current_phase.as_deref().unwrap_or("-"),
            summary.completed_tool_count
        );
    }
    Ok(())
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log_warning!("cancellation requested, finishing current step");
            trigger.cancel();
        }
    });
    cancel
}

fn report_result(workflow_id: &str, result: ExecutionResult) -> Result<()> {
    log_run_stats!(
        result.duration.as_millis(),
        result.iterations,
        result.execution_id
    );
    if result.success {
        if let Some(output) = &result.final_output {
            println!("{}", output);
        }
        Ok(())
    } else {
        let message = result
            .error_message
            .unwrap_or_else(|| "execution did not complete".to_string());
        eprintln!("Workflow '{}' did not complete: {}", workflow_id, message);
        eprintln!(
            "A checkpoint of the progress so far is kept; continue with: \
             workflow-runner resume <workflow-file>"
        );
        Err(anyhow!("workflow '{}' {}", workflow_id, message))
    }
}

fn report_fatal(
    err: EngineError,
    store: &ResumeStateStore,
    workflow_id: &str,
    workflow_file: &Path,
) -> Result<()> {
    eprintln!("Workflow '{}' failed: {}", workflow_id, err);
    if let EngineError::ResumeIncompatible { warnings, .. } = &err {
        for warning in warnings {
            eprintln!("  - {}", warning);
        }
        eprintln!(
            "Pass --force to resume anyway: workflow-runner resume {} --force",
            workflow_file.display()
        );
        return Err(err.into());
    }

    let checkpoint_exists = matches!(store.load(workflow_id), Ok(Some(_)));
    if checkpoint_exists {
        eprintln!(
            "A resumable checkpoint exists; continue with: workflow-runner resume {}",
            workflow_file.display()
        );
    } else {
        eprintln!("No resumable checkpoint exists for this workflow.");
    }
    Err(err.into())
}
