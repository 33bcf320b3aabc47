//! CLI argument parsing.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

/// LLM-driven workflow execution with resumable state
#[derive(Parser, Debug)]
#[command(name = "workflow-runner", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a workflow from the beginning
    Run {
        /// Workflow definition file (YAML)
        workflow_file: PathBuf,

        /// Variable override as KEY=VALUE (repeatable); takes precedence
        /// over workflow defaults
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Maximum model turns before the run fails
        #[arg(long, default_value = "25")]
        max_iterations: usize,

        /// Overall execution timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Directory for resume snapshots (default: ~/.workflow-runner/resume)
        #[arg(long)]
        resume_dir: Option<PathBuf>,

        /// Agent command used as the chat backend; also read from
        /// WORKFLOW_RUNNER_AGENT_CMD
        #[arg(long)]
        agent_cmd: Option<String>,
    },

    /// Resume an interrupted workflow from its last checkpoint
    Resume {
        /// Workflow definition file (YAML); optional with --list/--clean
        workflow_file: Option<PathBuf>,

        /// Resume even if the compatibility check fails
        #[arg(long)]
        force: bool,

        /// List known snapshots without executing
        #[arg(long)]
        list: bool,

        /// Delete snapshots older than the retention window
        #[arg(long)]
        clean: bool,

        #[arg(long, default_value = "25")]
        max_iterations: usize,

        #[arg(long)]
        timeout_secs: Option<u64>,

        #[arg(long)]
        resume_dir: Option<PathBuf>,

        #[arg(long)]
        agent_cmd: Option<String>,
    },

    /// Validate a workflow file without invoking the model
    Validate {
        /// Workflow definition file (YAML)
        workflow_file: PathBuf,
    },
}

/// Parse a `KEY=VALUE` override. Values that parse as JSON are kept typed;
/// everything else is a string.
pub fn parse_var(spec: &str) -> Result<(String, Value)> {
    let (key, value) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("invalid --var '{}': expected KEY=VALUE", spec))?;
    if key.is_empty() {
        return Err(anyhow!("invalid --var '{}': empty key", spec));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
