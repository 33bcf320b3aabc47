//! Subprocess chat backend.
//!
//! Drives an external agent command as a child process: the transcript,
//! tool catalog, and settings are written to the child's stdin as one JSON
//! document, and the command replies with a [`ModelTurn`] JSON document on
//! stdout. Stderr is inherited so agent diagnostics reach the operator.

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use workflow_runner_sdk::{
    async_trait, ChatBackend, ChatMessage, ChatSettings, ModelError, ModelTurn, ToolDescriptor,
};

pub struct ProcessChatBackend {
    command: String,
}

#[derive(Serialize)]
struct BackendRequest<'a> {
    messages: &'a [ChatMessage],
    tools: &'a [ToolDescriptor],
    settings: &'a ChatSettings,
}

impl ProcessChatBackend {
    /// `command` is split on whitespace: first token is the binary, the
    /// rest are arguments.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl ChatBackend for ProcessChatBackend {
    async fn send(
        &self,
        history: &[ChatMessage],
        tools: &[ToolDescriptor],
        settings: &ChatSettings,
    ) -> Result<ModelTurn, ModelError> {
        let parts: Vec<&str> = self.command.split_whitespace().collect();
        let (bin, args) = parts
            .split_first()
            .ok_or_else(|| ModelError::Unavailable("agent command is empty".to_string()))?;

        let request = BackendRequest {
            messages: history,
            tools,
            settings,
        };
        let body = serde_json::to_vec(&request)
            .map_err(|e| ModelError::Other(format!("failed to encode request: {}", e)))?;

        let mut child = Command::new(bin)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ModelError::Unavailable(format!("failed to spawn '{}': {}", self.command, e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&body)
                .await
                .map_err(|e| ModelError::Other(format!("failed to write request: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ModelError::Other(format!("agent command wait failed: {}", e)))?;
        if !output.status.success() {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(ModelError::Unavailable(format!(
                "agent command exited with {}",
                code
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ModelError::Other(format!("malformed agent reply: {}", e)))
    }
}
